use std::collections::VecDeque;

use serde::Serialize;
use shared::{
    domain::JobId,
    protocol::{JobStatusCode, JobStatusResponse, ResultSet},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", content = "job", rename_all = "snake_case")]
pub enum JobPhase {
    Idle,
    Submitting,
    Polling(JobId),
    Completed(JobId),
    Failed(JobId),
    TimedOut(JobId),
}

impl JobPhase {
    /// A new submission is refused while this is true.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Submitting | Self::Polling(_))
    }

    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            Self::Idle | Self::Submitting => None,
            Self::Polling(id) | Self::Completed(id) | Self::Failed(id) | Self::TimedOut(id) => {
                Some(id)
            }
        }
    }
}

/// Most recent `percent_complete` samples, newest last.
#[derive(Debug, Clone)]
pub struct ProgressHistory {
    window: usize,
    samples: VecDeque<i32>,
}

impl ProgressHistory {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            samples: VecDeque::with_capacity(window),
        }
    }

    pub fn push(&mut self, percent: i32) {
        if self.samples.len() == self.window {
            self.samples.pop_front();
        }
        self.samples.push_back(percent);
    }

    /// Full window and every sample identical.
    pub fn is_stalled(&self) -> bool {
        self.samples.len() == self.window
            && self
                .samples
                .front()
                .is_some_and(|first| self.samples.iter().all(|s| s == first))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollDecision {
    Continue {
        percent: i32,
    },
    Completed {
        percent: i32,
        results: ResultSet,
    },
    Failed {
        percent: i32,
    },
    /// Stalled progress, or a response that matches no other rule (for
    /// example "complete" without results).
    TimedOut {
        percent: i32,
        stalled: bool,
    },
}

#[derive(Debug, Clone)]
pub struct JobTracker {
    history: ProgressHistory,
}

impl JobTracker {
    pub fn new(stall_window: usize) -> Self {
        Self {
            history: ProgressHistory::new(stall_window),
        }
    }

    pub fn observe(&mut self, status: &JobStatusResponse) -> PollDecision {
        let percent = status.percent_complete;
        self.history.push(percent);

        if self.history.is_stalled() {
            return PollDecision::TimedOut {
                percent,
                stalled: true,
            };
        }

        match status.status() {
            Some(JobStatusCode::Pending) => PollDecision::Continue { percent },
            Some(JobStatusCode::Complete) => match status.result_set() {
                Some(results) => PollDecision::Completed { percent, results },
                None => PollDecision::TimedOut {
                    percent,
                    stalled: false,
                },
            },
            Some(JobStatusCode::Failed) => PollDecision::Failed { percent },
            None => PollDecision::TimedOut {
                percent,
                stalled: false,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Progress,
    Completed,
    Failed,
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub text: String,
    pub percent: Option<i32>,
    /// Job whose log the user should be pointed at.
    pub log_job: Option<JobId>,
}

impl Notification {
    pub fn submitted() -> Self {
        Self {
            kind: NotificationKind::Progress,
            text: "0% complete".into(),
            percent: Some(0),
            log_job: None,
        }
    }

    pub fn progress(percent: i32) -> Self {
        Self {
            kind: NotificationKind::Progress,
            text: format!("Processing: {percent}% complete"),
            percent: Some(percent),
            log_job: None,
        }
    }

    pub fn completed(job: &JobId, percent: i32) -> Self {
        Self {
            kind: NotificationKind::Completed,
            text: format!("Processing: {percent}% complete. View log."),
            percent: Some(percent),
            log_job: Some(job.clone()),
        }
    }

    pub fn failed(job: Option<&JobId>) -> Self {
        Self {
            kind: NotificationKind::Failed,
            text: "An error occurred during the model run. View the job logfile for more information."
                .into(),
            percent: None,
            log_job: job.cloned(),
        }
    }

    pub fn timed_out(job: &JobId, percent: i32) -> Self {
        Self {
            kind: NotificationKind::TimedOut,
            text: format!(
                "Model run reached the timeout at {percent}% complete. View the job logfile for more information or reload the page at a later time."
            ),
            percent: Some(percent),
            log_job: Some(job.clone()),
        }
    }

    pub fn for_decision(job: &JobId, decision: &PollDecision) -> Self {
        match decision {
            PollDecision::Continue { percent } => Self::progress(*percent),
            PollDecision::Completed { percent, .. } => Self::completed(job, *percent),
            PollDecision::Failed { .. } => Self::failed(Some(job)),
            PollDecision::TimedOut { percent, .. } => Self::timed_out(job, *percent),
        }
    }
}
