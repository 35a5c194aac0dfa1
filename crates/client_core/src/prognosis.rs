use serde::Serialize;
use serde_json::Value;
use shared::{domain::ConfigKey, protocol::PrognosisResponse};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PrognosisState {
    pub permitted: bool,
    pub message: Option<String>,
    pub config_key: Option<ConfigKey>,
    pub features: Option<Value>,
    pub sequence: u64,
}

#[derive(Debug, Default)]
pub struct PrognosisSequencer {
    issued: u64,
    state: PrognosisState,
}

impl PrognosisSequencer {
    pub fn state(&self) -> &PrognosisState {
        &self.state
    }

    pub fn permitted(&self) -> bool {
        self.state.permitted
    }

    /// Start a new request. The run action stays blocked until it resolves.
    pub fn begin(&mut self) -> u64 {
        self.issued += 1;
        self.state.permitted = false;
        self.issued
    }

    pub fn is_latest(&self, sequence: u64) -> bool {
        sequence == self.issued
    }

    /// Apply an answer. Returns false, leaving state untouched, when a newer
    /// request has been issued since.
    pub fn resolve(&mut self, sequence: u64, permitted: bool, response: PrognosisResponse) -> bool {
        if !self.is_latest(sequence) {
            return false;
        }
        self.state = PrognosisState {
            permitted,
            message: Some(response.message).filter(|m| !m.is_empty()),
            config_key: response.configkey,
            features: response.features,
            sequence,
        };
        true
    }

    pub fn fail(&mut self, sequence: u64, message: impl Into<String>) -> bool {
        if !self.is_latest(sequence) {
            return false;
        }
        self.state = PrognosisState {
            permitted: false,
            message: Some(message.into()),
            config_key: None,
            features: None,
            sequence,
        };
        true
    }
}
