use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type RunId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Queued,
    Running,
    Done,
}

/// `Error` marks a run cancelled by the user, not a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Error,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStep {
    pub name: String,
    pub status: StepStatus,
    pub log: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub status: RunStatus,
    pub progress: u8,
    pub steps: Vec<RunStep>,
    pub logs: Vec<String>,
    pub trigger: String,
    pub source: String,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunState {
    pub const STARTED_LOG: &'static str = "Agent run started...";

    /// Fresh run: first step running, the rest queued.
    pub fn new(step_names: &[String], trigger: &str, source: &str) -> Self {
        let steps = step_names
            .iter()
            .enumerate()
            .map(|(i, name)| RunStep {
                name: name.clone(),
                status: if i == 0 { StepStatus::Running } else { StepStatus::Queued },
                log: if i == 0 { format!("searching {trigger} intent...") } else { String::new() },
            })
            .collect();
        let now = Utc::now();
        Self {
            status: RunStatus::Running,
            progress: 0,
            steps,
            logs: vec![Self::STARTED_LOG.to_string()],
            trigger: trigger.to_string(),
            source: source.to_string(),
            started_at: now,
            updated_at: now,
        }
    }

    pub fn current_step(&self) -> Option<usize> {
        self.steps.iter().position(|s| s.status == StepStatus::Running)
    }

    pub fn steps_done(&self) -> usize {
        self.steps.iter().filter(|s| s.status == StepStatus::Done).count()
    }

    /// At most one running step, only `done` before it and only `queued` after it.
    pub fn steps_well_ordered(&self) -> bool {
        let mut seen = StepStatus::Done;
        for step in &self.steps {
            let ok = match (seen, step.status) {
                (StepStatus::Done, _) => true,
                (StepStatus::Running, StepStatus::Queued) => true,
                (StepStatus::Queued, StepStatus::Queued) => true,
                _ => false,
            };
            if !ok {
                return false;
            }
            seen = step.status;
        }
        true
    }
}
