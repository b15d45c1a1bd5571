use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::model::{RunId, RunState};

/// Owns every run's state for the lifetime of the process.
///
/// All access goes through [`create`](Self::create), [`get`](Self::get) and
/// [`mutate`](Self::mutate); each is one critical section, so a caller's
/// check-then-act inside `mutate` cannot interleave with another writer.
#[derive(Default)]
pub struct RunRegistry {
    runs: Mutex<HashMap<RunId, RunState>>,
    next_id: AtomicU64,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, step_names: &[String], trigger: &str, source: &str) -> RunId {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let run_id = format!("run_{n}");
        let state = RunState::new(step_names, trigger, source);
        self.runs.lock().insert(run_id.clone(), state);
        run_id
    }

    pub fn get(&self, run_id: &str) -> Option<RunState> {
        self.runs.lock().get(run_id).cloned()
    }

    /// Applies `f` in place; `None` when the run is unknown.
    pub fn mutate<R>(&self, run_id: &str, f: impl FnOnce(&mut RunState) -> R) -> Option<R> {
        let mut runs = self.runs.lock();
        runs.get_mut(run_id).map(f)
    }

    pub fn len(&self) -> usize {
        self.runs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Known run ids, oldest first.
    pub fn ids(&self) -> Vec<RunId> {
        let mut ids: Vec<RunId> = self.runs.lock().keys().cloned().collect();
        ids.sort_by_key(|id| id.trim_start_matches("run_").parse::<u64>().unwrap_or(u64::MAX));
        ids
    }
}
