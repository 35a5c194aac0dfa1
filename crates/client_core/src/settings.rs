use std::{fs, path::Path, time::Duration};

use serde::Deserialize;
use shared::domain::{BoundingBox, ConfigKey};
use tracing::warn;

use crate::deeplink::LinkDefaults;

pub const DEFAULT_SETTINGS_FILE: &str = "modeller.toml";
const FALLBACK_VIEW_EXTENT: BoundingBox = BoundingBox {
    west: 176.0,
    south: -40.8,
    east: 177.6,
    north: -39.2,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub api_url: String,
    pub api_username: Option<String>,
    pub api_token: Option<String>,
    pub model_name: String,
    pub default_config_key: Option<String>,
    pub default_view_extent: String,
    pub default_zoom: u8,
    pub mapserver: Option<String>,
    pub mapfile: Option<String>,
    pub geocoder_url: Option<String>,
    /// Point time series endpoint. Defaults to `/data/point` on the API host.
    pub point_data_url: Option<String>,
    pub poll_interval_ms: u64,
    pub stall_window: usize,
    pub request_timeout_secs: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:5000/api/v1/".into(),
            api_username: None,
            api_token: None,
            model_name: "example".into(),
            default_config_key: None,
            default_view_extent: FALLBACK_VIEW_EXTENT.to_bbox_string(),
            default_zoom: 9,
            mapserver: None,
            mapfile: None,
            geocoder_url: None,
            point_data_url: None,
            poll_interval_ms: 2000,
            stall_window: 25,
            request_timeout_secs: None,
        }
    }
}

impl Settings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn view_extent(&self) -> BoundingBox {
        BoundingBox::parse(&self.default_view_extent).unwrap_or(FALLBACK_VIEW_EXTENT)
    }

    pub fn link_defaults(&self) -> LinkDefaults {
        LinkDefaults {
            config_key: self
                .default_config_key
                .as_deref()
                .and_then(ConfigKey::parse),
            view_extent: self.view_extent(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileSettings {
    api_url: Option<String>,
    api_username: Option<String>,
    api_token: Option<String>,
    model_name: Option<String>,
    default_config_key: Option<String>,
    default_view_extent: Option<String>,
    default_zoom: Option<u8>,
    mapserver: Option<String>,
    mapfile: Option<String>,
    geocoder_url: Option<String>,
    point_data_url: Option<String>,
    poll_interval_ms: Option<u64>,
    stall_window: Option<usize>,
    request_timeout_secs: Option<u64>,
}

/// Defaults, then the settings file if it exists, then environment overrides.
pub fn load_settings(path: &Path) -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        match toml::from_str::<FileSettings>(&raw) {
            Ok(file_cfg) => apply_file(&mut settings, file_cfg),
            Err(err) => warn!(path = %path.display(), "ignoring unreadable settings file: {err}"),
        }
    }

    apply_env(&mut settings, |key| std::env::var(key).ok());
    settings
}

fn apply_file(settings: &mut Settings, file_cfg: FileSettings) {
    if let Some(v) = file_cfg.api_url {
        settings.api_url = v;
    }
    if let Some(v) = file_cfg.api_username {
        settings.api_username = Some(v);
    }
    if let Some(v) = file_cfg.api_token {
        settings.api_token = Some(v);
    }
    if let Some(v) = file_cfg.model_name {
        settings.model_name = v;
    }
    if let Some(v) = file_cfg.default_config_key {
        settings.default_config_key = Some(v);
    }
    if let Some(v) = file_cfg.default_view_extent {
        settings.default_view_extent = v;
    }
    if let Some(v) = file_cfg.default_zoom {
        settings.default_zoom = v;
    }
    if let Some(v) = file_cfg.mapserver {
        settings.mapserver = Some(v);
    }
    if let Some(v) = file_cfg.mapfile {
        settings.mapfile = Some(v);
    }
    if let Some(v) = file_cfg.geocoder_url {
        settings.geocoder_url = Some(v);
    }
    if let Some(v) = file_cfg.point_data_url {
        settings.point_data_url = Some(v);
    }
    if let Some(v) = file_cfg.poll_interval_ms {
        settings.poll_interval_ms = v;
    }
    if let Some(v) = file_cfg.stall_window {
        settings.stall_window = v;
    }
    if let Some(v) = file_cfg.request_timeout_secs {
        settings.request_timeout_secs = Some(v);
    }
}

/// The later key of each pair wins when both are set.
fn apply_env(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    let var = |keys: &[&str]| keys.iter().rev().find_map(|key| lookup(*key));

    if let Some(v) = var(&["MODELLER_API_URL", "APP__API_URL"]) {
        settings.api_url = v;
    }
    if let Some(v) = var(&["MODELLER_API_USERNAME", "APP__API_USERNAME"]) {
        settings.api_username = Some(v);
    }
    if let Some(v) = var(&["MODELLER_API_TOKEN", "APP__API_TOKEN"]) {
        settings.api_token = Some(v);
    }
    if let Some(v) = var(&["MODELLER_MODEL_NAME", "APP__MODEL_NAME"]) {
        settings.model_name = v;
    }
    if let Some(v) = var(&["MODELLER_DEFAULT_CONFIG_KEY", "APP__DEFAULT_CONFIG_KEY"]) {
        settings.default_config_key = Some(v);
    }
    if let Some(v) = var(&["MODELLER_DEFAULT_VIEW_EXTENT", "APP__DEFAULT_VIEW_EXTENT"]) {
        settings.default_view_extent = v;
    }
    if let Some(v) = var(&["MODELLER_MAPSERVER", "APP__MAPSERVER"]) {
        settings.mapserver = Some(v);
    }
    if let Some(v) = var(&["MODELLER_MAPFILE", "APP__MAPFILE"]) {
        settings.mapfile = Some(v);
    }
    if let Some(v) = var(&["MODELLER_GEOCODER_URL", "APP__GEOCODER_URL"]) {
        settings.geocoder_url = Some(v);
    }
    if let Some(v) = var(&["MODELLER_POINT_DATA_URL", "APP__POINT_DATA_URL"]) {
        settings.point_data_url = Some(v);
    }

    if let Some(v) = var(&["APP__POLL_INTERVAL_MS"]) {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.poll_interval_ms = parsed;
        }
    }
    if let Some(v) = var(&["APP__STALL_WINDOW"]) {
        if let Ok(parsed) = v.parse::<usize>() {
            settings.stall_window = parsed;
        }
    }
    if let Some(v) = var(&["APP__REQUEST_TIMEOUT_SECS"]) {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.request_timeout_secs = Some(parsed);
        }
    }
}
