use serde::Serialize;
use shared::{domain::Timestamp, protocol::ResultSet};

use crate::error::ModellerError;

/// Selection carried by the initial deep link, used only as a fallback when
/// a new result set cannot keep the current selection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionHints {
    pub attribute: Option<String>,
    pub timestamp: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimestepOption {
    pub timestamp: Timestamp,
    pub selected: bool,
    /// False when the selected attribute has no map at this time.
    pub selectable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeOption {
    pub name: String,
    pub selected: bool,
    pub available: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SelectionOutcome {
    /// The result set has no timesteps; nothing is selected.
    Empty,
    Selected {
        timestamp: Timestamp,
        attribute: Option<String>,
    },
}

#[derive(Debug, Clone, Default)]
pub struct Selection {
    results: Option<ResultSet>,
    attribute: Option<String>,
    timestamp: Option<Timestamp>,
}

impl Selection {
    pub fn results(&self) -> Option<&ResultSet> {
        self.results.as_ref()
    }

    pub fn attribute(&self) -> Option<&str> {
        self.attribute.as_deref()
    }

    pub fn timestamp(&self) -> Option<Timestamp> {
        self.timestamp
    }

    /// Current choice first, then the deep-link hint, then the last timestep
    /// and its first available attribute.
    pub fn apply_results(&mut self, results: ResultSet, hints: &SelectionHints) -> SelectionOutcome {
        if results.is_empty() {
            self.results = Some(results);
            self.attribute = None;
            self.timestamp = None;
            return SelectionOutcome::Empty;
        }

        let exists = |ts: &Timestamp| results.timestep(ts).is_some();
        let timestamp = self
            .timestamp
            .filter(exists)
            .or_else(|| hints.timestamp.filter(exists))
            .or_else(|| results.last().map(|t| t.timestamp));

        let Some(timestamp) = timestamp else {
            self.results = Some(results);
            return SelectionOutcome::Empty;
        };

        let attribute = results.timestep(&timestamp).and_then(|step| {
            let available = |name: &&String| step.has_attribute(name);
            self.attribute
                .as_ref()
                .filter(available)
                .or_else(|| hints.attribute.as_ref().filter(available))
                .cloned()
                .or_else(|| step.available_attributes().next().map(str::to_string))
        });

        self.results = Some(results);
        self.timestamp = Some(timestamp);
        self.attribute = attribute.clone();
        SelectionOutcome::Selected {
            timestamp,
            attribute,
        }
    }

    pub fn select_attribute(&mut self, attribute: &str) -> Result<(), ModellerError> {
        let Some(results) = &self.results else {
            // Nothing loaded yet: remember the preference for reconciliation.
            self.attribute = Some(attribute.to_string());
            return Ok(());
        };

        let available = self
            .timestamp
            .and_then(|ts| results.timestep(&ts))
            .is_some_and(|step| step.has_attribute(attribute));
        if !available {
            return Err(ModellerError::UnavailableSelection(format!(
                "attribute '{attribute}' has no map at the selected time"
            )));
        }

        self.attribute = Some(attribute.to_string());
        Ok(())
    }

    pub fn select_timestamp(&mut self, timestamp: Timestamp) -> Result<(), ModellerError> {
        let step = self
            .results
            .as_ref()
            .and_then(|results| results.timestep(&timestamp))
            .ok_or_else(|| {
                ModellerError::UnavailableSelection(format!(
                    "no results exist for time {timestamp}"
                ))
            })?;

        if let Some(attribute) = &self.attribute {
            if !step.has_attribute(attribute) {
                return Err(ModellerError::UnavailableSelection(format!(
                    "attribute '{attribute}' has no map at time {timestamp}"
                )));
            }
        }

        self.timestamp = Some(timestamp);
        Ok(())
    }

    pub fn timestep_options(&self) -> Vec<TimestepOption> {
        let Some(results) = &self.results else {
            return Vec::new();
        };
        results
            .timesteps
            .iter()
            .map(|step| TimestepOption {
                timestamp: step.timestamp,
                selected: Some(step.timestamp) == self.timestamp,
                selectable: self
                    .attribute
                    .as_deref()
                    .map_or(true, |attribute| step.has_attribute(attribute)),
            })
            .collect()
    }

    pub fn attribute_options(&self) -> Vec<AttributeOption> {
        let Some(results) = &self.results else {
            return Vec::new();
        };
        let selected_step = self.timestamp.and_then(|ts| results.timestep(&ts));

        let mut names: Vec<&str> = results
            .timesteps
            .iter()
            .flat_map(|step| step.attributes.keys().map(String::as_str))
            .chain(results.attributes.iter().map(String::as_str))
            .collect();
        names.sort_unstable();
        names.dedup();

        names
            .into_iter()
            .map(|name| AttributeOption {
                name: name.to_string(),
                selected: self.attribute.as_deref() == Some(name),
                available: selected_step.is_some_and(|step| step.has_attribute(name)),
            })
            .collect()
    }
}
