use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::{ConfigKey, JobId, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatusCode {
    Pending,
    Complete,
    Failed,
}

impl JobStatusCode {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Pending),
            1 => Some(Self::Complete),
            -1 => Some(Self::Failed),
            _ => None,
        }
    }

}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timestep {
    pub timestamp: Timestamp,
    /// Keeps the server's order; the first available entry is the default
    /// attribute.
    #[serde(default)]
    pub attributes: IndexMap<String, bool>,
}

impl Timestep {
    pub fn has_attribute(&self, attribute: &str) -> bool {
        self.attributes.get(attribute).copied().unwrap_or(false)
    }

    pub fn available_attributes(&self) -> impl Iterator<Item = &str> {
        self.attributes
            .iter()
            .filter(|(_, available)| **available)
            .map(|(name, _)| name.as_str())
    }
}

/// Output maps known for one model configuration, ordered by timestamp.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    #[serde(default)]
    pub timesteps: Vec<Timestep>,
    #[serde(default)]
    pub attributes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_key: Option<ConfigKey>,
}

impl ResultSet {
    pub fn is_empty(&self) -> bool {
        self.timesteps.is_empty()
    }

    pub fn timestep(&self, timestamp: &Timestamp) -> Option<&Timestep> {
        self.timesteps.iter().find(|t| &t.timestamp == timestamp)
    }

    pub fn last(&self) -> Option<&Timestep> {
        self.timesteps.last()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiStatusResponse {
    #[serde(default)]
    pub authenticated: bool,
    #[serde(default)]
    pub status: bool,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJobResponse {
    #[serde(default)]
    pub job: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusResponse {
    /// Echo of the job id. Not every deployment sends it.
    #[serde(default)]
    pub job: Option<JobId>,
    pub status_code: i32,
    #[serde(default)]
    pub percent_complete: i32,
    #[serde(default)]
    pub status_message: Option<String>,
    /// An object once the job completed; the API sends `[]` or omits it
    /// while the job is still running.
    #[serde(default)]
    pub results: Option<Value>,
}

impl JobStatusResponse {
    pub fn status(&self) -> Option<JobStatusCode> {
        JobStatusCode::from_code(self.status_code)
    }

    /// Results are present only when the payload is an object that decodes
    /// as a result set.
    pub fn result_set(&self) -> Option<ResultSet> {
        match &self.results {
            Some(value @ Value::Object(_)) => serde_json::from_value(value.clone()).ok(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrognosisResponse {
    #[serde(default)]
    pub configkey: Option<ConfigKey>,
    #[serde(default)]
    pub message: String,
    /// GeoJSON features: chunks to be processed and, optionally, the
    /// neighbouring chunks that fall outside the per-model limit.
    #[serde(default)]
    pub features: Option<Value>,
    #[serde(default)]
    pub num_of_chunks_already_processed: Option<u32>,
    #[serde(default)]
    pub num_of_chunks_to_be_processed: Option<u32>,
}

impl PrognosisResponse {
    /// A refusal names its reason or the configuration it was computed for.
    /// An error body without either is a server fault, not an answer.
    pub fn is_answer(&self) -> bool {
        !self.message.trim().is_empty() || self.configkey.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigurationResponse {
    #[serde(default)]
    pub model: Option<Value>,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub timesteps: Vec<Timestamp>,
    #[serde(default)]
    pub results: ResultSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisRange {
    pub min: f64,
    pub max: f64,
}

/// One attribute sampled at a map location across all timesteps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PointSeries {
    #[serde(default, rename = "currentvalue")]
    pub current_value: Option<f64>,
    #[serde(default, rename = "value")]
    pub values: Vec<f64>,
    #[serde(default, rename = "timestamp")]
    pub timestamps: Vec<Timestamp>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default, rename = "yaxis")]
    pub y_axis: Option<AxisRange>,
    #[serde(default)]
    pub message: Option<String>,
}

impl PointSeries {
    /// At least two samples, each paired with a timestamp.
    pub fn is_plottable(&self) -> bool {
        self.values.len() == self.timestamps.len() && self.values.len() > 1
    }

    pub fn points(&self) -> impl Iterator<Item = (Timestamp, f64)> + '_ {
        self.timestamps.iter().copied().zip(self.values.iter().copied())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub name: String,
    #[serde(rename = "countryName", default)]
    pub country_name: Option<String>,
    #[serde(deserialize_with = "de_coordinate")]
    pub lat: f64,
    #[serde(deserialize_with = "de_coordinate")]
    pub lng: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlaceSearchResponse {
    #[serde(default)]
    pub geonames: Vec<Place>,
}

/// Geocoders disagree on whether coordinates are numbers or strings.
fn de_coordinate<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| D::Error::custom("coordinate out of range")),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| D::Error::custom(format!("invalid coordinate '{s}'"))),
        other => Err(D::Error::custom(format!("invalid coordinate {other}"))),
    }
}
