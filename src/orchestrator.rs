use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use rand::Rng;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, info_span, Instrument};

use crate::config::PipelineCfg;
use crate::model::{RunId, RunState, RunStatus, StepStatus};
use crate::registry::RunRegistry;

pub const CANCELLED_LOG: &str = "Run cancelled by user";
pub const COMPLETED_LOG: &str = "Run complete! New leads available.";

/// One scheduled mutation of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    /// Mark step `i` done and start step `i + 1` if there is one.
    Advance(usize),
    Complete,
}

/// Drives runs through the configured pipeline on a timer.
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct Orchestrator {
    registry: Arc<RunRegistry>,
    pipeline: Arc<PipelineCfg>,
}

impl Orchestrator {
    /// Fails on a pipeline that could never finish a run (no steps, inverted signal range).
    pub fn new(registry: Arc<RunRegistry>, pipeline: PipelineCfg) -> Result<Self> {
        pipeline.validate()?;
        Ok(Self { registry, pipeline: Arc::new(pipeline) })
    }

    pub fn pipeline(&self) -> &PipelineCfg {
        &self.pipeline
    }

    pub fn registry(&self) -> &RunRegistry {
        &self.registry
    }

    /// Registers a run and spawns its schedule. Must be called inside a tokio runtime.
    pub fn start_run(&self, trigger: &str, source: &str) -> RunId {
        let run_id = self.registry.create(&self.pipeline.step_names(), trigger, source);
        info!(%run_id, trigger, source, steps = self.pipeline.steps.len(), "run started");

        let span = info_span!("run", run_id = %run_id);
        tokio::spawn(drive(self.clone(), run_id.clone(), source.to_string()).instrument(span));
        run_id
    }

    pub fn get_run_status(&self, run_id: &str) -> Option<RunState> {
        self.registry.get(run_id)
    }

    /// Returns true only when this call moved the run from running to cancelled.
    pub fn cancel_run(&self, run_id: &str) -> bool {
        let cancelled = self
            .registry
            .mutate(run_id, |st| {
                if st.status != RunStatus::Running {
                    return false;
                }
                st.status = RunStatus::Error;
                st.logs.push(CANCELLED_LOG.to_string());
                st.updated_at = Utc::now();
                true
            })
            .unwrap_or(false);
        if cancelled {
            info!(%run_id, "run cancelled");
        } else {
            debug!(%run_id, "cancel ignored");
        }
        cancelled
    }

    fn schedule(&self) -> Vec<(Duration, Transition)> {
        let mut plan: Vec<(Duration, Transition)> = self
            .pipeline
            .steps
            .iter()
            .enumerate()
            .map(|(i, step)| (step.duration(), Transition::Advance(i)))
            .collect();
        plan.push((self.pipeline.completion_delay(), Transition::Complete));
        plan
    }

    fn signal_count(&self) -> u32 {
        let range = self.pipeline.signal_range;
        rand::rng().random_range(range.min..=range.max)
    }
}

async fn drive(orch: Orchestrator, run_id: RunId, source: String) {
    for (delay, transition) in orch.schedule() {
        sleep(delay).await;
        let signals = orch.signal_count();
        let applied = orch
            .registry
            .mutate(&run_id, |st| apply(st, transition, &source, signals))
            .unwrap_or(false);
        if !applied {
            debug!(?transition, "stale transition ignored");
            return;
        }
    }
}

/// Re-checks the run against its current state before touching it.
fn apply(st: &mut RunState, transition: Transition, source: &str, signals: u32) -> bool {
    if st.status.is_terminal() {
        return false;
    }
    match transition {
        Transition::Advance(i) => {
            if st.steps.get(i).map(|s| s.status) != Some(StepStatus::Running) {
                return false;
            }
            let total = st.steps.len();
            let name = st.steps[i].name.clone();
            st.steps[i].status = StepStatus::Done;
            st.steps[i].log = format!("completed - found {signals} signals");
            if let Some(next) = st.steps.get_mut(i + 1) {
                next.status = StepStatus::Running;
                next.log = format!("processing {source} data...");
            }

            // 100 is reserved for the completed status.
            let pct = (100 * (i + 1) / total).min(99) as u8;
            st.progress = st.progress.max(pct);
            st.logs.push(format!("{name} completed - found {signals} signals"));
            st.updated_at = Utc::now();
            info!(step = %name, progress = st.progress, signals, "step done");
        }
        Transition::Complete => {
            st.status = RunStatus::Completed;
            st.progress = 100;
            st.logs.push(COMPLETED_LOG.to_string());
            st.updated_at = Utc::now();
            info!("run completed");
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SignalRange, StepCfg};

    fn orchestrator() -> Orchestrator {
        Orchestrator::new(Arc::new(RunRegistry::new()), PipelineCfg::default()).unwrap()
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[tokio::test(start_paused = true)]
    async fn job_posting_run_completes_on_schedule() {
        let orch = orchestrator();
        let r = orch.start_run("Job Posting", "jobs");

        let st = orch.get_run_status(&r).unwrap();
        assert_eq!(st.steps[0].status, StepStatus::Running);
        assert!(st.steps[1..].iter().all(|s| s.status == StepStatus::Queued));
        assert_eq!(st.progress, 0);

        sleep(ms(2_100)).await;
        let st = orch.get_run_status(&r).unwrap();
        assert_eq!(st.steps[0].status, StepStatus::Done);
        assert_eq!(st.steps[1].status, StepStatus::Running);
        assert_eq!(st.steps[1].log, "processing jobs data...");
        assert_eq!(st.progress, 20);
        assert_eq!(st.logs.len(), 2);
        assert!(st.logs[1].starts_with("Signal Scout completed - found "));

        sleep(ms(28_000)).await;
        let st = orch.get_run_status(&r).unwrap();
        assert_eq!(st.status, RunStatus::Completed);
        assert_eq!(st.progress, 100);
        assert!(st.steps.iter().all(|s| s.status == StepStatus::Done));
        assert_eq!(st.logs.last().map(String::as_str), Some(COMPLETED_LOG));
        assert_eq!(st.logs.len(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn last_step_holds_below_one_hundred_until_completion() {
        let orch = orchestrator();
        let r = orch.start_run("Reddit Intent", "reddit");

        // every step done, completion delay still pending
        sleep(ms(28_500)).await;
        let st = orch.get_run_status(&r).unwrap();
        assert_eq!(st.status, RunStatus::Running);
        assert_eq!(st.steps_done(), 5);
        assert_eq!(st.current_step(), None);
        assert_eq!(st.progress, 99);
    }

    #[tokio::test(start_paused = true)]
    async fn polled_progress_is_monotonic_and_steps_stay_ordered() {
        let orch = orchestrator();
        let r = orch.start_run("Tech Change", "linkedin");

        let mut last = 0u8;
        let mut observations = 0;
        loop {
            let st = orch.get_run_status(&r).unwrap();
            assert!(st.progress >= last, "progress went from {last} to {}", st.progress);
            assert!(st.steps_well_ordered(), "bad step order: {:?}", st.steps);
            assert_eq!(st.progress == 100, st.status == RunStatus::Completed);
            last = st.progress;
            observations += 1;
            if st.status.is_terminal() {
                break;
            }
            sleep(ms(700)).await;
        }
        assert!(observations > 40);
        assert_eq!(last, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_freezes_run() {
        let orch = orchestrator();
        let r = orch.start_run("Job Posting", "jobs");

        sleep(ms(10_000)).await;
        assert!(orch.cancel_run(&r));
        let frozen = orch.get_run_status(&r).unwrap();
        assert_eq!(frozen.status, RunStatus::Error);
        assert_eq!(frozen.logs.last().map(String::as_str), Some(CANCELLED_LOG));
        assert_eq!(frozen.steps_done(), 2);
        assert_eq!(frozen.current_step(), Some(2));

        sleep(ms(60_000)).await;
        let later = orch.get_run_status(&r).unwrap();
        assert_eq!(later.status, RunStatus::Error);
        assert_eq!(later.progress, frozen.progress);
        assert_eq!(later.steps, frozen.steps);
        assert_eq!(later.logs, frozen.logs);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_is_idempotent() {
        let orch = orchestrator();
        let r = orch.start_run("Job Posting", "jobs");
        assert!(orch.cancel_run(&r));
        assert!(!orch.cancel_run(&r));
        let st = orch.get_run_status(&r).unwrap();
        assert_eq!(st.logs.iter().filter(|l| *l == CANCELLED_LOG).count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_after_completion_is_a_no_op() {
        let orch = orchestrator();
        let r = orch.start_run("Job Posting", "jobs");
        sleep(ms(31_000)).await;
        let done = orch.get_run_status(&r).unwrap();
        assert_eq!(done.status, RunStatus::Completed);

        assert!(!orch.cancel_run(&r));
        let st = orch.get_run_status(&r).unwrap();
        assert_eq!(st.status, RunStatus::Completed);
        assert_eq!(st.logs, done.logs);
    }

    #[tokio::test]
    async fn unknown_run_is_absent() {
        let orch = orchestrator();
        assert!(orch.get_run_status("nonexistent").is_none());
        assert!(!orch.cancel_run("nonexistent"));
        assert!(orch.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn runs_progress_independently() {
        let orch = orchestrator();
        let a = orch.start_run("Job Posting", "jobs");
        sleep(ms(5_000)).await;
        let b = orch.start_run("Reddit Intent", "reddit");
        orch.cancel_run(&a);

        sleep(ms(31_000)).await;
        assert_eq!(orch.get_run_status(&a).unwrap().status, RunStatus::Error);
        let st_b = orch.get_run_status(&b).unwrap();
        assert_eq!(st_b.status, RunStatus::Completed);
        assert_eq!(st_b.source, "reddit");
    }

    #[tokio::test(start_paused = true)]
    async fn signal_counts_stay_in_range() {
        let pipeline = PipelineCfg {
            steps: (0..20).map(|i| StepCfg { name: format!("s{i}"), duration_ms: 10 }).collect(),
            completion_delay_ms: 10,
            signal_range: SignalRange { min: 5, max: 24 },
        };
        let orch = Orchestrator::new(Arc::new(RunRegistry::new()), pipeline).unwrap();
        let r = orch.start_run("t", "s");
        sleep(ms(1_000)).await;

        let st = orch.get_run_status(&r).unwrap();
        assert_eq!(st.status, RunStatus::Completed);
        for step in &st.steps {
            let n: u32 = step
                .log
                .trim_start_matches("completed - found ")
                .trim_end_matches(" signals")
                .parse()
                .unwrap();
            assert!((5..=24).contains(&n), "{n} out of range");
        }
    }

    #[test]
    fn rejects_pipelines_that_cannot_finish() {
        let inverted = PipelineCfg {
            signal_range: SignalRange { min: 10, max: 2 },
            ..PipelineCfg::default()
        };
        let err = Orchestrator::new(Arc::new(RunRegistry::new()), inverted).err().unwrap();
        assert!(err.to_string().contains("signal_range"), "{err}");

        let empty = PipelineCfg { steps: vec![], ..PipelineCfg::default() };
        assert!(Orchestrator::new(Arc::new(RunRegistry::new()), empty).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn single_value_signal_range_completes() {
        let pipeline = PipelineCfg {
            signal_range: SignalRange { min: 7, max: 7 },
            ..PipelineCfg::default()
        };
        let orch = Orchestrator::new(Arc::new(RunRegistry::new()), pipeline).unwrap();
        let r = orch.start_run("t", "s");
        sleep(ms(31_000)).await;

        let st = orch.get_run_status(&r).unwrap();
        assert_eq!(st.status, RunStatus::Completed);
        assert!(st.steps.iter().all(|s| s.log == "completed - found 7 signals"));
    }

    #[test]
    fn stale_transitions_do_nothing() {
        let names: Vec<String> = vec!["A".into(), "B".into()];
        let mut st = RunState::new(&names, "t", "s");
        assert!(apply(&mut st, Transition::Advance(0), "s", 7));
        // same timer firing twice
        assert!(!apply(&mut st, Transition::Advance(0), "s", 7));
        assert_eq!(st.logs.len(), 2);

        st.status = RunStatus::Error;
        let before = st.clone();
        assert!(!apply(&mut st, Transition::Advance(1), "s", 7));
        assert!(!apply(&mut st, Transition::Complete, "s", 7));
        assert_eq!(st.steps, before.steps);
        assert_eq!(st.logs, before.logs);
        assert_eq!(st.progress, before.progress);
    }

    #[test]
    fn schedule_ends_with_completion() {
        let orch = orchestrator();
        let plan = orch.schedule();
        assert_eq!(plan.len(), 6);
        assert_eq!(plan[0], (ms(2_000), Transition::Advance(0)));
        assert_eq!(plan[5], (ms(2_000), Transition::Complete));
    }
}
