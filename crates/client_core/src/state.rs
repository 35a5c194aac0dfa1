use serde_json::{Map, Value};
use shared::domain::{ConfigKey, Timestamp, Viewport};
use tokio_util::sync::CancellationToken;

use crate::{
    api::JobRequest,
    busy::BusyTracker,
    deeplink::{self, InitialView},
    error::ModellerError,
    events::LayerParams,
    job::JobPhase,
    prognosis::PrognosisSequencer,
    selection::{Selection, SelectionHints},
    settings::Settings,
};

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct RunAction {
    pub enabled: bool,
    pub tooltip: Option<String>,
}

/// Mutable client state. Only the controller touches it, always under its
/// lock.
#[derive(Debug)]
pub(crate) struct AppState {
    pub config_key: Option<ConfigKey>,
    pub parameters: Map<String, Value>,
    pub model_timesteps: Vec<Timestamp>,
    pub initial_view: Option<InitialView>,
    pub viewport: Option<Viewport>,
    pub selection: Selection,
    pub hints: SelectionHints,
    pub prognosis: PrognosisSequencer,
    pub busy: BusyTracker,
    pub run_action: RunAction,
    pub cache_bust: Option<String>,
    pub job: JobPhase,
    pub cancel: Option<CancellationToken>,
}

impl AppState {
    pub fn new(config_key: Option<ConfigKey>) -> Self {
        Self {
            config_key,
            parameters: Map::new(),
            model_timesteps: Vec::new(),
            initial_view: None,
            viewport: None,
            selection: Selection::default(),
            hints: SelectionHints::default(),
            prognosis: PrognosisSequencer::default(),
            busy: BusyTracker::default(),
            run_action: RunAction::default(),
            cache_bust: None,
            job: JobPhase::Idle,
            cancel: None,
        }
    }

    pub fn job_request(&self, model_name: &str) -> Result<JobRequest, ModellerError> {
        let viewport = self.viewport.ok_or(ModellerError::MissingViewport)?;
        Ok(JobRequest {
            model_name: model_name.to_string(),
            parameters: self
                .parameters
                .iter()
                .map(|(name, value)| (name.clone(), form_value(value)))
                .collect(),
            bbox: viewport.bounds,
        })
    }

    pub fn evaluate_run_action(&self) -> RunAction {
        let enabled = self.busy.is_idle() && self.prognosis.permitted();
        RunAction {
            enabled,
            tooltip: if enabled {
                None
            } else {
                self.prognosis.state().message.clone()
            },
        }
    }

    pub fn layer_params(&self, settings: &Settings) -> LayerParams {
        LayerParams {
            config_key: self.config_key.clone(),
            attribute: self.selection.attribute().map(str::to_string),
            timestamp: self.selection.timestamp(),
            mapserver: settings.mapserver.clone(),
            mapfile: settings.mapfile.clone(),
            cache_bust: self.cache_bust.clone(),
        }
    }

    pub fn deep_link(&self) -> Option<String> {
        let viewport = self.viewport.as_ref()?;
        Some(deeplink::encode(
            self.config_key.as_ref(),
            viewport,
            self.selection.attribute(),
            self.selection.timestamp(),
        ))
    }
}

fn form_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
