use serde::Serialize;
use serde_json::{Map, Value};
use shared::{
    domain::{ConfigKey, JobId, Timestamp},
    protocol::PointSeries,
};
use uuid::Uuid;

use crate::{
    api::PointQuery,
    busy::BusyReason,
    job::{JobPhase, Notification},
    prognosis::PrognosisState,
};

/// Everything the map layer needs to request the output tiles for the
/// current selection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerParams {
    pub config_key: Option<ConfigKey>,
    pub attribute: Option<String>,
    pub timestamp: Option<Timestamp>,
    pub mapserver: Option<String>,
    pub mapfile: Option<String>,
    /// Fresh for every newly received result set so cached tiles of the
    /// previous run are not reused.
    pub cache_bust: Option<String>,
}

pub(crate) fn new_cache_bust() -> String {
    Uuid::new_v4().simple().to_string()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerEvent {
    BusyChanged {
        reasons: Vec<BusyReason>,
    },
    RunActionChanged {
        enabled: bool,
        tooltip: Option<String>,
    },
    Notification(Notification),
    JobStateChanged(JobPhase),
    ResultsApplied {
        timesteps: Vec<Timestamp>,
        /// The timestep picker is only useful with more than one timestep.
        show_timestep_picker: bool,
        attribute: Option<String>,
        timestamp: Option<Timestamp>,
    },
    LayerParamsChanged(LayerParams),
    PrognosisChanged(PrognosisState),
    DeepLinkChanged(String),
    ConfigurationLoaded {
        config_key: ConfigKey,
        parameters: Map<String, Value>,
        timesteps: Vec<Timestamp>,
    },
    JobLogLoaded {
        job: JobId,
        content: String,
    },
    PointSeriesLoaded {
        query: PointQuery,
        series: PointSeries,
    },
    Error(String),
}
