use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use shared::{
    domain::{ConfigKey, JobId, LatLng, Timestamp, Viewport},
    protocol::{ApiStatusResponse, Place, PointSeries, ResultSet},
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub mod api;
pub mod busy;
pub mod deeplink;
pub mod error;
pub mod events;
pub mod job;
pub mod prognosis;
pub mod selection;
pub mod settings;
mod state;

pub use api::{HttpModelApi, JobRequest, ModelApi, PointQuery, PrognosisAnswer};
pub use busy::BusyReason;
pub use error::{ApiCallError, ModellerError};
pub use events::{ControllerEvent, LayerParams};
pub use job::{JobPhase, Notification, NotificationKind};
pub use settings::{load_settings, Settings};

use crate::{
    deeplink::InitialView,
    events::new_cache_bust,
    job::{JobTracker, PollDecision},
    prognosis::PrognosisState,
    selection::{AttributeOption, TimestepOption},
    state::AppState,
};

#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed { job: JobId, results: ResultSet },
    Failed { job: JobId, percent: i32 },
    TimedOut { job: JobId, percent: i32, stalled: bool },
    PollError { job: JobId, message: String },
    /// Cancelled by a newer submission or by `abandon_job`.
    Abandoned { job: JobId },
}

pub struct JobHandle {
    job_id: JobId,
    task: JoinHandle<JobOutcome>,
}

impl JobHandle {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub async fn outcome(self) -> JobOutcome {
        let Self { job_id, task } = self;
        match task.await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(job = %job_id, "poll task ended abnormally: {err}");
                JobOutcome::Abandoned { job: job_id }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrognosisOutcome {
    Applied,
    Superseded,
}

#[derive(Debug, Clone, Serialize)]
pub struct ControllerSnapshot {
    pub config_key: Option<ConfigKey>,
    pub viewport: Option<Viewport>,
    pub attribute: Option<String>,
    pub timestamp: Option<Timestamp>,
    pub prognosis: PrognosisState,
    pub busy: Vec<BusyReason>,
    pub run_enabled: bool,
    pub job: JobPhase,
    pub deep_link: Option<String>,
}

pub struct JobController {
    api: Arc<dyn ModelApi>,
    settings: Settings,
    inner: Mutex<AppState>,
    events: broadcast::Sender<ControllerEvent>,
}

impl JobController {
    pub fn new(api: Arc<dyn ModelApi>, settings: Settings) -> Arc<Self> {
        let (events, _) = broadcast::channel(1024);
        let config_key = settings.link_defaults().config_key;
        Arc::new(Self {
            api,
            settings,
            inner: Mutex::new(AppState::new(config_key)),
            events,
        })
    }

    pub fn from_settings(settings: Settings) -> Result<Arc<Self>, ModellerError> {
        let api = HttpModelApi::new(&settings)?;
        Ok(Self::new(Arc::new(api), settings))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: ControllerEvent) {
        let _ = self.events.send(event);
    }

    fn surface(&self, err: &ModellerError) {
        self.emit(ControllerEvent::Error(err.alert_text()));
    }

    pub async fn snapshot(&self) -> ControllerSnapshot {
        let state = self.inner.lock().await;
        ControllerSnapshot {
            config_key: state.config_key.clone(),
            viewport: state.viewport,
            attribute: state.selection.attribute().map(str::to_string),
            timestamp: state.selection.timestamp(),
            prognosis: state.prognosis.state().clone(),
            busy: state.busy.reasons(),
            run_enabled: state.run_action.enabled,
            job: state.job.clone(),
            deep_link: state.deep_link(),
        }
    }

    pub async fn initial_view(&self) -> Option<InitialView> {
        self.inner.lock().await.initial_view
    }

    pub async fn deep_link(&self) -> Option<String> {
        self.inner.lock().await.deep_link()
    }

    // A centre/zoom link leaves the viewport unset until the map reports it.
    pub async fn initialize(self: &Arc<Self>, fragment: &str) -> Result<JoinHandle<()>, ModellerError> {
        let link = deeplink::decode(fragment, &self.settings.link_defaults());
        let config_key = {
            let mut state = self.inner.lock().await;
            state.hints = link.hints;
            state.initial_view = Some(link.view);
            if let InitialView::Bounds(bounds) = link.view {
                state.viewport = Some(Viewport::from_bounds(bounds, self.settings.default_zoom));
            }
            if link.config_key.is_some() {
                state.config_key = link.config_key;
            }
            state.config_key.clone()
        };
        self.load_configuration(config_key).await
    }

    pub async fn check_api(&self) -> Result<ApiStatusResponse, ModellerError> {
        match self.api.api_status().await {
            Ok(status) if status.authenticated => {
                info!("authenticated to the modeller API");
                Ok(status)
            }
            Ok(status) => {
                warn!(message = ?status.message, "modeller API rejected the credentials");
                let err = ModellerError::NotAuthenticated;
                self.surface(&err);
                Err(err)
            }
            Err(source) => {
                warn!("modeller API is unreachable: {source}");
                let err = ModellerError::NotAuthenticated;
                self.surface(&err);
                Err(err)
            }
        }
    }

    pub async fn load_configuration(
        self: &Arc<Self>,
        config_key: Option<ConfigKey>,
    ) -> Result<JoinHandle<()>, ModellerError> {
        let config_key = match config_key {
            Some(key) => key,
            None => self
                .inner
                .lock()
                .await
                .config_key
                .clone()
                .ok_or(ModellerError::MissingConfiguration)?,
        };

        let configuration = match self.api.configuration(&config_key).await {
            Ok(configuration) => configuration,
            Err(err) => {
                let err = ModellerError::from(err);
                self.surface(&err);
                return Err(err);
            }
        };
        info!(
            config = config_key.short(),
            timesteps = configuration.results.timesteps.len(),
            "configuration loaded"
        );

        {
            let mut state = self.inner.lock().await;
            state.config_key = Some(config_key.clone());
            state.parameters = configuration.parameters.clone();
            state.model_timesteps = configuration.timesteps.clone();
            self.emit(ControllerEvent::ConfigurationLoaded {
                config_key,
                parameters: configuration.parameters,
                timesteps: configuration.timesteps,
            });
            self.apply_results_locked(&mut state, configuration.results);
        }

        Ok(self.spawn_prognosis())
    }

    pub async fn request_prognosis(&self) -> Result<PrognosisOutcome, ModellerError> {
        let (sequence, request) = {
            let mut state = self.inner.lock().await;
            let sequence = state.prognosis.begin();
            match state.job_request(&self.settings.model_name) {
                Ok(request) => {
                    self.set_busy_locked(&mut state, BusyReason::ApiPrognosis, true);
                    self.refresh_run_action(&mut state);
                    (sequence, request)
                }
                Err(err) => {
                    state.prognosis.fail(sequence, err.to_string());
                    self.emit(ControllerEvent::PrognosisChanged(
                        state.prognosis.state().clone(),
                    ));
                    self.refresh_run_action(&mut state);
                    return Err(err);
                }
            }
        };

        debug!(sequence, bbox = %request.bbox.to_bbox_string(), "requesting prognosis");
        let answer = self.api.prognosis(&request).await;

        let mut state = self.inner.lock().await;
        if !state.prognosis.is_latest(sequence) {
            debug!(sequence, "discarding superseded prognosis");
            return Ok(PrognosisOutcome::Superseded);
        }
        self.set_busy_locked(&mut state, BusyReason::ApiPrognosis, false);

        let result = match answer {
            Ok(answer) => {
                info!(
                    sequence,
                    permitted = answer.permitted,
                    config = answer.response.configkey.as_ref().map(ConfigKey::short).unwrap_or("-"),
                    message = %answer.response.message,
                    "prognosis"
                );
                state
                    .prognosis
                    .resolve(sequence, answer.permitted, answer.response);
                Ok(PrognosisOutcome::Applied)
            }
            Err(err) => {
                state.prognosis.fail(sequence, err.to_string());
                let err = ModellerError::from(err);
                self.surface(&err);
                Err(err)
            }
        };

        self.emit(ControllerEvent::PrognosisChanged(
            state.prognosis.state().clone(),
        ));
        self.refresh_run_action(&mut state);
        result
    }

    pub fn spawn_prognosis(self: &Arc<Self>) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = controller.request_prognosis().await {
                debug!("prognosis not applied: {err}");
            }
        })
    }

    pub async fn run_model(self: &Arc<Self>) -> Result<JobHandle, ModellerError> {
        let request = {
            let state = self.inner.lock().await;
            if state.job.is_active() {
                return Err(ModellerError::JobInProgress);
            }
            let action = state.evaluate_run_action();
            if !action.enabled {
                let reason = action
                    .tooltip
                    .or_else(|| {
                        let busy = state.busy.reasons();
                        (!busy.is_empty()).then(|| {
                            busy.iter()
                                .map(|reason| reason.as_str())
                                .collect::<Vec<_>>()
                                .join(", ")
                        })
                    })
                    .unwrap_or_else(|| "no positive prognosis for this area".into());
                return Err(ModellerError::RunNotPermitted(reason));
            }
            state.job_request(&self.settings.model_name)?
        };
        self.submit(request).await
    }

    pub async fn submit(self: &Arc<Self>, request: JobRequest) -> Result<JobHandle, ModellerError> {
        let cancel = {
            let mut state = self.inner.lock().await;
            if state.job.is_active() {
                warn!(phase = ?state.job, "submission refused: a model run is in progress");
                return Err(ModellerError::JobInProgress);
            }
            if let Some(previous) = state.cancel.take() {
                previous.cancel();
            }
            let token = CancellationToken::new();
            state.cancel = Some(token.clone());
            self.set_phase_locked(&mut state, JobPhase::Submitting);
            self.set_busy_locked(&mut state, BusyReason::RunningModel, true);
            self.refresh_run_action(&mut state);
            self.emit(ControllerEvent::Notification(Notification::submitted()));
            token
        };

        let created = match self.api.create_job(&request).await {
            Ok(created) if !created.job.trim().is_empty() => Ok(JobId(created.job)),
            Ok(_) => Err(ModellerError::MalformedResponse(
                "job creation response carries no job id".into(),
            )),
            Err(err) => Err(ModellerError::from(err)),
        };

        let mut state = self.inner.lock().await;
        let job_id = match created {
            Ok(job_id) => job_id,
            Err(err) => {
                warn!("model run could not be scheduled: {err}");
                if !cancel.is_cancelled() {
                    state.cancel = None;
                    self.set_phase_locked(&mut state, JobPhase::Idle);
                    self.set_busy_locked(&mut state, BusyReason::RunningModel, false);
                    self.refresh_run_action(&mut state);
                }
                self.surface(&err);
                return Err(err);
            }
        };

        if !cancel.is_cancelled() {
            self.set_phase_locked(&mut state, JobPhase::Polling(job_id.clone()));
        }
        drop(state);
        info!(job = %job_id, model = %request.model_name, "model run scheduled");

        let task = tokio::spawn(Arc::clone(self).poll_job(job_id.clone(), cancel));
        Ok(JobHandle { job_id, task })
    }

    async fn poll_job(self: Arc<Self>, job_id: JobId, cancel: CancellationToken) -> JobOutcome {
        let mut tracker = JobTracker::new(self.settings.stall_window);

        loop {
            let response = tokio::select! {
                _ = cancel.cancelled() => return JobOutcome::Abandoned { job: job_id },
                response = self.api.job_status(&job_id) => response,
            };

            let mut state = self.inner.lock().await;
            if cancel.is_cancelled() || state.job != JobPhase::Polling(job_id.clone()) {
                debug!(job = %job_id, "ignoring status for a job that is no longer active");
                return JobOutcome::Abandoned { job: job_id };
            }

            let status = match response {
                Ok(status) => status,
                Err(err) => {
                    warn!(job = %job_id, status = ?err.status(), "status request failed: {err}");
                    self.emit(ControllerEvent::Notification(Notification::failed(Some(&job_id))));
                    self.finish_locked(&mut state, JobPhase::Failed(job_id.clone()));
                    let err = ModellerError::from(err);
                    self.surface(&err);
                    return JobOutcome::PollError {
                        job: job_id,
                        message: err.to_string(),
                    };
                }
            };

            let decision = tracker.observe(&status);
            self.emit(ControllerEvent::Notification(Notification::for_decision(
                &job_id, &decision,
            )));

            match decision {
                PollDecision::Continue { percent } => {
                    debug!(job = %job_id, percent, "model run in progress");
                }
                PollDecision::Completed { percent, results } => {
                    info!(job = %job_id, percent, timesteps = results.timesteps.len(), "model run complete");
                    self.apply_results_locked(&mut state, results.clone());
                    self.finish_locked(&mut state, JobPhase::Completed(job_id.clone()));
                    drop(state);
                    self.spawn_prognosis();
                    return JobOutcome::Completed {
                        job: job_id,
                        results,
                    };
                }
                PollDecision::Failed { percent } => {
                    warn!(job = %job_id, percent, "model run failed");
                    self.finish_locked(&mut state, JobPhase::Failed(job_id.clone()));
                    return JobOutcome::Failed {
                        job: job_id,
                        percent,
                    };
                }
                PollDecision::TimedOut { percent, stalled } => {
                    warn!(job = %job_id, percent, stalled, "model run timed out");
                    self.finish_locked(&mut state, JobPhase::TimedOut(job_id.clone()));
                    return JobOutcome::TimedOut {
                        job: job_id,
                        percent,
                        stalled,
                    };
                }
            }
            drop(state);

            tokio::select! {
                _ = cancel.cancelled() => return JobOutcome::Abandoned { job: job_id },
                _ = tokio::time::sleep(self.settings.poll_interval()) => {}
            }
        }
    }

    /// Stop polling the active job, if any. The job keeps running remotely.
    pub async fn abandon_job(&self) {
        let mut state = self.inner.lock().await;
        self.abandon_locked(&mut state);
    }

    fn abandon_locked(&self, state: &mut AppState) {
        if let Some(cancel) = state.cancel.take() {
            cancel.cancel();
        }
        if state.job.is_active() {
            info!(job = ?state.job.job_id(), "abandoning model run");
            self.set_phase_locked(state, JobPhase::Idle);
            self.set_busy_locked(state, BusyReason::RunningModel, false);
            self.refresh_run_action(state);
        }
    }

    pub async fn job_phase(&self) -> JobPhase {
        self.inner.lock().await.job.clone()
    }

    pub async fn fetch_job_log(&self, job: &JobId) -> Option<String> {
        match self.api.job_log(job).await {
            Ok(content) => {
                self.emit(ControllerEvent::JobLogLoaded {
                    job: job.clone(),
                    content: content.clone(),
                });
                Some(content)
            }
            Err(err) => {
                warn!(job = %job, "job log unavailable: {err}");
                None
            }
        }
    }

    pub async fn search_places(&self, query: &str) -> Result<Vec<Place>, ModellerError> {
        match self.api.search_places(query).await {
            Ok(places) => Ok(places),
            Err(err) => {
                let err = ModellerError::from(err);
                self.surface(&err);
                Err(err)
            }
        }
    }

    pub async fn query_point(&self, location: LatLng) -> Option<PointSeries> {
        let query = {
            let state = self.inner.lock().await;
            match (
                state.config_key.clone(),
                state.selection.attribute(),
                state.selection.timestamp(),
            ) {
                (Some(config_key), Some(attribute), Some(timestamp)) => PointQuery {
                    location,
                    attribute: attribute.to_string(),
                    timestamp,
                    config_key,
                },
                _ => {
                    debug!("no selection to query a point for");
                    return None;
                }
            }
        };

        match self.api.point_series(&query).await {
            Ok(series) => {
                debug!(
                    attribute = %query.attribute,
                    samples = series.values.len(),
                    "point series loaded"
                );
                self.emit(ControllerEvent::PointSeriesLoaded {
                    query,
                    series: series.clone(),
                });
                Some(series)
            }
            Err(err) => {
                warn!(status = ?err.status(), "point series unavailable: {err}");
                None
            }
        }
    }

    pub async fn set_parameter(self: &Arc<Self>, name: &str, value: Value) -> JoinHandle<()> {
        {
            let mut state = self.inner.lock().await;
            state.parameters.insert(name.to_string(), value);
            self.publish_deep_link(&state);
        }
        self.spawn_prognosis()
    }

    pub async fn begin_viewport_change(&self) {
        let mut state = self.inner.lock().await;
        self.set_busy_locked(&mut state, BusyReason::MapMoving, true);
        self.refresh_run_action(&mut state);
    }

    pub async fn set_viewport(self: &Arc<Self>, viewport: Viewport) -> JoinHandle<()> {
        {
            let mut state = self.inner.lock().await;
            state.viewport = Some(viewport);
            self.set_busy_locked(&mut state, BusyReason::MapMoving, false);
            self.refresh_run_action(&mut state);
            self.publish_deep_link(&state);
        }
        self.spawn_prognosis()
    }

    pub async fn set_busy(&self, reason: BusyReason, active: bool) {
        let mut state = self.inner.lock().await;
        self.set_busy_locked(&mut state, reason, active);
        self.refresh_run_action(&mut state);
    }

    pub async fn set_attribute(&self, attribute: &str) -> Result<(), ModellerError> {
        let mut state = self.inner.lock().await;
        state.selection.select_attribute(attribute)?;
        self.emit(ControllerEvent::LayerParamsChanged(
            state.layer_params(&self.settings),
        ));
        self.publish_deep_link(&state);
        Ok(())
    }

    pub async fn set_time(&self, timestamp: Timestamp) -> Result<(), ModellerError> {
        let mut state = self.inner.lock().await;
        state.selection.select_timestamp(timestamp)?;
        self.emit(ControllerEvent::LayerParamsChanged(
            state.layer_params(&self.settings),
        ));
        self.publish_deep_link(&state);
        Ok(())
    }

    pub async fn timestep_options(&self) -> Vec<TimestepOption> {
        self.inner.lock().await.selection.timestep_options()
    }

    pub async fn attribute_options(&self) -> Vec<AttributeOption> {
        self.inner.lock().await.selection.attribute_options()
    }

    pub async fn apply_results(&self, results: ResultSet) {
        let mut state = self.inner.lock().await;
        self.apply_results_locked(&mut state, results);
    }

    fn apply_results_locked(&self, state: &mut AppState, results: ResultSet) {
        if let Some(key) = &results.config_key {
            state.config_key = Some(key.clone());
        }
        let hints = state.hints.clone();
        state.selection.apply_results(results, &hints);
        state.cache_bust = Some(new_cache_bust());

        let timesteps: Vec<Timestamp> = state
            .selection
            .results()
            .map(|results| results.timesteps.iter().map(|t| t.timestamp).collect())
            .unwrap_or_default();
        self.emit(ControllerEvent::ResultsApplied {
            show_timestep_picker: timesteps.len() > 1,
            timesteps,
            attribute: state.selection.attribute().map(str::to_string),
            timestamp: state.selection.timestamp(),
        });
        self.emit(ControllerEvent::LayerParamsChanged(
            state.layer_params(&self.settings),
        ));
        self.publish_deep_link(state);
    }

    fn finish_locked(&self, state: &mut AppState, phase: JobPhase) {
        state.cancel = None;
        self.set_phase_locked(state, phase);
        self.set_busy_locked(state, BusyReason::RunningModel, false);
        self.refresh_run_action(state);
    }

    fn set_phase_locked(&self, state: &mut AppState, phase: JobPhase) {
        if state.job != phase {
            state.job = phase.clone();
            self.emit(ControllerEvent::JobStateChanged(phase));
        }
    }

    fn set_busy_locked(&self, state: &mut AppState, reason: BusyReason, active: bool) {
        if state.busy.set(reason, active) {
            self.emit(ControllerEvent::BusyChanged {
                reasons: state.busy.reasons(),
            });
        }
    }

    fn refresh_run_action(&self, state: &mut AppState) {
        let action = state.evaluate_run_action();
        if action != state.run_action {
            state.run_action = action.clone();
            self.emit(ControllerEvent::RunActionChanged {
                enabled: action.enabled,
                tooltip: action.tooltip,
            });
        }
    }

    fn publish_deep_link(&self, state: &AppState) {
        if let Some(link) = state.deep_link() {
            self.emit(ControllerEvent::DeepLinkChanged(link));
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
