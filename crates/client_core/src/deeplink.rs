use geohash::Coord;
use shared::domain::{BoundingBox, ConfigKey, LatLng, Timestamp, Viewport};
use tracing::debug;

use crate::selection::SelectionHints;

pub const GEOHASH_PRECISION: usize = 12;
const SEPARATOR: &str = ":";

#[derive(Debug, Clone, PartialEq)]
pub struct LinkDefaults {
    pub config_key: Option<ConfigKey>,
    pub view_extent: BoundingBox,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InitialView {
    CenterZoom { center: LatLng, zoom: u8 },
    Bounds(BoundingBox),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeepLink {
    pub config_key: Option<ConfigKey>,
    pub view: InitialView,
    pub hints: SelectionHints,
}

pub fn encode(
    config_key: Option<&ConfigKey>,
    viewport: &Viewport,
    attribute: Option<&str>,
    timestamp: Option<Timestamp>,
) -> String {
    let geohash = geohash::encode(
        Coord {
            x: viewport.center.lng,
            y: viewport.center.lat,
        },
        GEOHASH_PRECISION,
    )
    .unwrap_or_default();

    [
        config_key.map(ConfigKey::to_string).unwrap_or_default(),
        viewport.zoom.to_string(),
        geohash,
        attribute.unwrap_or_default().to_string(),
        timestamp.map(|t| t.to_compact()).unwrap_or_default(),
    ]
    .join(SEPARATOR)
}

pub fn decode(fragment: &str, defaults: &LinkDefaults) -> DeepLink {
    let fragment = fragment.strip_prefix('#').unwrap_or(fragment);
    let parts: Vec<&str> = fragment.split(SEPARATOR).collect();
    let field = |index: usize| parts.get(index).map(|p| p.trim()).filter(|p| !p.is_empty());

    let config_key = match field(0) {
        Some(raw) => ConfigKey::parse(raw).or_else(|| {
            debug!(raw, "deep link config key is not valid; using default");
            defaults.config_key.clone()
        }),
        None => defaults.config_key.clone(),
    };

    let view = match (field(1), field(2)) {
        (Some(zoom), Some(hash)) => match (zoom.parse::<u8>(), geohash::decode(hash)) {
            (Ok(zoom), Ok((center, _, _))) => InitialView::CenterZoom {
                center: LatLng {
                    lat: center.y,
                    lng: center.x,
                },
                zoom,
            },
            _ => {
                debug!(zoom, hash, "deep link view is malformed; using default extent");
                InitialView::Bounds(defaults.view_extent)
            }
        },
        _ => InitialView::Bounds(defaults.view_extent),
    };

    let hints = SelectionHints {
        attribute: field(3).map(str::to_string),
        timestamp: field(4).and_then(Timestamp::from_compact),
    };

    DeepLink {
        config_key,
        view,
        hints,
    }
}
