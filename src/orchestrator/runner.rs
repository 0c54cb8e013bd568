use super::abort::AbortHandle;
use super::report::{PhaseSummary, RunReport, RunStatus};
use crate::briefing::{
    BriefingStore, PhaseBriefing, SplitOptions, SplitResult, split, validate_marker_contract,
};
use crate::dag::{DagScheduler, PhaseStatus};
use crate::errors::{GateBlockedError, OrchestratorError, StoreError};
use crate::events::{EventSink, RunEvent};
use crate::executor::{ExecutionContext, ExecutionReport, Executor, Fixer, NoopFixer};
use crate::gates::{CheckDetail, FailureClass, GateController, GateReport, blocked_error};
use crate::phase::{Phase, PhasesFile};
use crate::phasegate_config::PhasegateToml;
use crate::session::{
    ArtifactKind, ArtifactRef, PhaseOutcome, ScopePolicy, SessionLayout, SessionState, SessionStore,
};
use anyhow::anyhow;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Briefing handed to a phase, with its on-disk location when persisted.
type Briefed = Option<(PhaseBriefing, Option<PathBuf>)>;

/// Shared by every dispatched phase task.
struct Dispatcher {
    store: Arc<SessionStore>,
    executor: Arc<dyn Executor>,
    fixer: Arc<dyn Fixer>,
    controller: GateController,
    scope: Option<ScopePolicy>,
    events: EventSink,
}

impl Dispatcher {
    /// Run one phase to its next recorded outcome. Gates run to Passed or Blocked.
    async fn dispatch(&self, phase: Phase, briefing: Briefed) -> Result<Option<GateReport>, StoreError> {
        if let Some((b, _)) = &briefing
            && let Some(scope) = &self.scope
        {
            let check = scope.check(&b.files_to_touch);
            if !check.is_valid() {
                let attempt = self.next_attempt(&phase.id);
                tracing::warn!(phase = %phase.id, violations = ?check.violations, "Briefing touches files outside the session scope");
                let outcome = PhaseOutcome::failed(
                    &phase.id,
                    attempt,
                    &format!("scope violation: {}", check.violations.join(", ")),
                );
                self.record(outcome).await?;
                return Ok(None);
            }
        }

        if phase.kind.is_gate() {
            let briefing_arg = briefing
                .as_ref()
                .and_then(|(b, path)| path.clone().map(|p| (b, p)));
            let report = self
                .controller
                .run_gate(
                    &phase,
                    briefing_arg,
                    self.executor.as_ref(),
                    self.fixer.as_ref(),
                    &self.store,
                )
                .await?;
            return Ok(Some(report));
        }

        let attempt = self.next_attempt(&phase.id);
        self.events
            .emit(RunEvent::PhaseStarted {
                phase: phase.id.clone(),
                attempt,
            })
            .await;
        tracing::info!(phase = %phase.id, kind = %phase.kind, attempt, "Dispatching phase");

        let (b, path) = match briefing {
            Some((b, path)) => (Some(b), path),
            None => (None, None),
        };
        let ctx = ExecutionContext::attempt(attempt).with_briefing(b, path);

        let outcome = match self.executor.execute(&phase, &ctx).await {
            Ok(ExecutionReport::Completed { detail }) => {
                PhaseOutcome::passed(&phase.id, attempt).with_detail(&detail)
            }
            Ok(ExecutionReport::Skipped { reason }) => {
                tracing::info!(phase = %phase.id, %reason, "Condition not met, skipping");
                PhaseOutcome::passed(&phase.id, attempt).with_detail(&format!("skipped: {}", reason))
            }
            Ok(ExecutionReport::Failed { detail }) => {
                PhaseOutcome::failed(&phase.id, attempt, &detail)
            }
            Ok(ExecutionReport::Checks(checks)) => {
                let failing: Vec<CheckDetail> = checks
                    .iter()
                    .filter(|c| !c.passed)
                    .map(|c| c.detail.clone())
                    .collect();
                if failing.is_empty() {
                    PhaseOutcome::passed(&phase.id, attempt)
                        .with_detail(&format!("{} check(s) passing", checks.len()))
                } else {
                    PhaseOutcome::failed(
                        &phase.id,
                        attempt,
                        &format!("{} of {} check(s) failing", failing.len(), checks.len()),
                    )
                    .with_unresolved(failing)
                }
            }
            Err(fault) => {
                let message = fault.to_string();
                tracing::error!(phase = %phase.id, error = %message, "Executor fault");
                self.events
                    .emit(RunEvent::InfrastructureFault {
                        phase: phase.id.clone(),
                        attempt,
                        message: message.clone(),
                        class: FailureClass::Infrastructure,
                    })
                    .await;
                PhaseOutcome::failed(&phase.id, attempt, &message)
                    .with_classification(FailureClass::Infrastructure)
            }
        };

        self.record(outcome).await?;
        Ok(None)
    }

    fn next_attempt(&self, phase_id: &str) -> u32 {
        self.store
            .latest(phase_id)
            .map_or(1, |o| o.attempt_number + 1)
    }

    async fn record(&self, outcome: PhaseOutcome) -> Result<(), StoreError> {
        self.store.append(outcome.clone())?;
        tracing::info!(
            phase = %outcome.phase_id,
            attempt = outcome.attempt_number,
            status = %outcome.status,
            "Phase finished"
        );
        self.events
            .emit(RunEvent::PhaseFinished {
                phase: outcome.phase_id,
                attempt: outcome.attempt_number,
                status: outcome.status,
                detail: outcome.detail,
            })
            .await;
        Ok(())
    }
}

/// Drives a whole workflow: validate, split, then dispatch eligible phases
/// until everything has settled.
pub struct Orchestrator {
    phases: Vec<Phase>,
    plan_text: Option<String>,
    split_options: SplitOptions,
    briefing_store: Option<BriefingStore>,
    report_path: Option<PathBuf>,
    max_parallel: usize,
    abort: AbortHandle,
    run_id: String,
    store: Arc<SessionStore>,
    executor: Arc<dyn Executor>,
    fixer: Arc<dyn Fixer>,
    controller: GateController,
    scope: Option<ScopePolicy>,
    events: EventSink,
}

impl Orchestrator {
    pub fn new(phases: Vec<Phase>, store: Arc<SessionStore>, executor: Arc<dyn Executor>) -> Self {
        let split_options = SplitOptions::for_phases(&phases);
        Self {
            phases,
            plan_text: None,
            split_options,
            briefing_store: None,
            report_path: None,
            max_parallel: 1,
            abort: AbortHandle::new(),
            run_id: uuid::Uuid::new_v4().to_string(),
            store,
            executor,
            fixer: Arc::new(NoopFixer),
            controller: GateController::default(),
            scope: None,
            events: EventSink::none(),
        }
    }

    /// Wire up everything a session directory provides: phases, plan,
    /// outcome log, scope, briefings directory, report path and abort file.
    pub fn for_session(
        layout: &SessionLayout,
        executor: Arc<dyn Executor>,
    ) -> Result<Self, OrchestratorError> {
        let phases = PhasesFile::load(&layout.phases_file())?.phases;
        let plan_path = layout.plan();
        let plan_text = if plan_path.exists() {
            Some(
                std::fs::read_to_string(&plan_path).map_err(|source| {
                    OrchestratorError::PlanReadFailed {
                        path: plan_path.clone(),
                        source,
                    }
                })?,
            )
        } else {
            None
        };
        let store = Arc::new(SessionStore::open(layout.root())?);
        let scope = ScopePolicy::load_optional(&layout.scope_file())?;

        let mut orchestrator = Self::new(phases, store, executor)
            .with_briefing_dir(layout.briefings_dir())
            .with_report_path(layout.report())
            .with_abort(AbortHandle::watching(layout.abort_file()))
            .with_scope(scope);
        orchestrator.plan_text = plan_text;
        Ok(orchestrator)
    }

    /// Apply `phasegate.toml` retry bounds, budgets and reference documents.
    pub fn with_config(mut self, toml: &PhasegateToml) -> Self {
        toml.apply_to_phases(&mut self.phases);
        self.split_options = toml.split_options(&self.phases);
        self.max_parallel = toml.defaults.max_parallel.max(1);
        self
    }

    pub fn with_plan(mut self, plan_text: impl Into<String>) -> Self {
        self.plan_text = Some(plan_text.into());
        self
    }

    pub fn with_split_options(mut self, options: SplitOptions) -> Self {
        self.split_options = options;
        self
    }

    pub fn with_briefing_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.briefing_store = Some(BriefingStore::new(dir));
        self
    }

    pub fn with_report_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.report_path = Some(path.into());
        self
    }

    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    pub fn with_abort(mut self, abort: AbortHandle) -> Self {
        self.abort = abort;
        self
    }

    pub fn with_fixer(mut self, fixer: Arc<dyn Fixer>) -> Self {
        self.fixer = fixer;
        self
    }

    pub fn with_controller(mut self, controller: GateController) -> Self {
        self.controller = controller;
        self
    }

    pub fn with_scope(mut self, scope: Option<ScopePolicy>) -> Self {
        self.scope = scope;
        self
    }

    /// Route progress events to `events`; gates report through it too.
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Split the plan and check it against the phase kinds, without running.
    pub fn prepare(&self) -> Result<SplitResult, OrchestratorError> {
        let result = match &self.plan_text {
            Some(text) => split(text, &self.split_options)?,
            None => SplitResult::default(),
        };
        validate_marker_contract(&self.phases, &result)?;
        Ok(result)
    }

    /// Run the workflow until every phase is settled, the run is aborted or it stalls.
    pub async fn run(&self) -> Result<RunReport, OrchestratorError> {
        let started_at = Utc::now();
        let scheduler = DagScheduler::from_phases(&self.phases)?;
        let briefings = self.prepare()?;
        let briefing_paths = self.persist_briefings(&briefings)?;
        let dispatcher = Arc::new(Dispatcher {
            store: self.store.clone(),
            executor: self.executor.clone(),
            fixer: self.fixer.clone(),
            controller: self.controller.clone().with_events(self.events.clone()),
            scope: self.scope.clone(),
            events: self.events.clone(),
        });

        tracing::info!(
            run_id = %self.run_id,
            phases = scheduler.phase_count(),
            waves = scheduler.compute_waves().len(),
            max_parallel = self.max_parallel,
            "Starting workflow"
        );
        self.events
            .emit(RunEvent::RunStarted {
                run_id: self.run_id.clone(),
                phases: scheduler.phase_count(),
            })
            .await;

        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let mut tasks: JoinSet<(String, Result<Option<GateReport>, StoreError>)> = JoinSet::new();
        let mut running: HashSet<String> = HashSet::new();
        let mut gate_reports = Vec::new();
        let mut aborted = false;

        loop {
            if !aborted && self.abort.is_aborted() {
                tracing::warn!(running = running.len(), "Abort requested, finishing running phases");
                aborted = true;
            }

            if !aborted {
                let state = self.store.snapshot();
                for phase in scheduler.next_eligible(&state) {
                    if running.contains(&phase.id) {
                        continue;
                    }
                    let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                        break;
                    };

                    let briefing: Briefed = briefings
                        .get(&phase.id)
                        .map(|b| (b.clone(), briefing_paths.get(&phase.id).cloned()));
                    let dispatcher = dispatcher.clone();
                    let phase = phase.clone();
                    running.insert(phase.id.clone());

                    tasks.spawn(async move {
                        let _permit = permit;
                        let id = phase.id.clone();
                        let result = dispatcher.dispatch(phase, briefing).await;
                        (id, result)
                    });
                }
            }

            if tasks.is_empty() {
                if aborted {
                    break;
                }
                let state = self.store.snapshot();
                if let Some(stalled) = scheduler.stall(&state) {
                    tracing::error!(phase = %stalled.phase, chain = ?stalled.chain, "Workflow stalled");
                    return Err(stalled.into());
                }
                break;
            }

            match tasks.join_next().await {
                Some(Ok((id, result))) => {
                    running.remove(&id);
                    if let Some(report) = result? {
                        gate_reports.push(report);
                    }
                }
                Some(Err(e)) => {
                    tasks.abort_all();
                    return Err(OrchestratorError::Other(anyhow!("Phase task failed: {}", e)));
                }
                None => {}
            }
        }

        let state = self.store.snapshot();
        let statuses = scheduler.statuses(&state);

        for (id, status) in &statuses {
            if let PhaseStatus::Skipped { because_of } = status {
                tracing::warn!(phase = %id, because_of = %because_of, "Phase skipped");
                self.events
                    .emit(RunEvent::PhaseSkipped {
                        phase: id.clone(),
                        because_of: because_of.clone(),
                    })
                    .await;
            }
        }

        let status = if aborted {
            let pending: Vec<String> = statuses
                .iter()
                .filter(|(_, s)| !s.is_settled())
                .map(|(id, _)| id.clone())
                .collect();
            self.events
                .emit(RunEvent::Aborted {
                    pending: pending.clone(),
                })
                .await;
            RunStatus::Aborted { pending }
        } else {
            run_status(&statuses)
        };
        let blocked_gates = blocked_gates(&statuses, &state);

        let phases = statuses
            .into_iter()
            .filter_map(|(id, status)| {
                let phase = scheduler.phase(&id)?;
                let latest = state.latest(&id);
                Some(PhaseSummary {
                    name: phase.name.clone(),
                    kind: phase.kind,
                    attempts: latest.map_or(0, |o| o.attempt_number),
                    detail: latest.map(|o| o.detail.clone()).unwrap_or_default(),
                    status,
                    id,
                })
            })
            .collect();

        let report = RunReport {
            run_id: self.run_id.clone(),
            started_at,
            finished_at: Utc::now(),
            status,
            phases,
            gate_reports,
            blocked_gates,
        };

        if let Some(path) = &self.report_path {
            report.save(path)?;
        }

        tracing::info!(run_id = %self.run_id, status = report.status.label(), "Workflow finished");
        self.events
            .emit(RunEvent::RunFinished {
                status: report.status.label().to_string(),
            })
            .await;

        Ok(report)
    }

    /// Write briefings to disk and record an artifact for each new version.
    fn persist_briefings(
        &self,
        briefings: &SplitResult,
    ) -> Result<HashMap<String, PathBuf>, OrchestratorError> {
        let Some(store) = &self.briefing_store else {
            return Ok(HashMap::new());
        };
        if briefings.briefings.is_empty() {
            return Ok(HashMap::new());
        }

        let summary = store.write_all(briefings)?;
        tracing::debug!(
            written = summary.written.len(),
            unchanged = summary.unchanged.len(),
            removed = summary.removed.len(),
            "Briefings persisted"
        );

        for id in &summary.written {
            if let Some(b) = briefings.get(id) {
                self.store.record_artifact(
                    ArtifactRef::new(ArtifactKind::Briefing, store.path_for(id))
                        .for_phase(id)
                        .with_hash(&b.content_hash),
                )?;
            }
        }

        Ok(briefings
            .briefings
            .keys()
            .map(|id| (id.clone(), store.path_for(id)))
            .collect())
    }
}

fn run_status(statuses: &[(String, PhaseStatus)]) -> RunStatus {
    let ids = |pred: fn(&PhaseStatus) -> bool| -> Vec<String> {
        statuses
            .iter()
            .filter(|(_, s)| pred(s))
            .map(|(id, _)| id.clone())
            .collect()
    };
    let blocked = ids(|s| matches!(s, PhaseStatus::Blocked { .. }));
    let failed = ids(|s| matches!(s, PhaseStatus::Failed { .. }));
    let skipped = ids(|s| matches!(s, PhaseStatus::Skipped { .. }));

    if blocked.is_empty() && failed.is_empty() && skipped.is_empty() {
        RunStatus::Success
    } else {
        RunStatus::PartialFailure {
            blocked,
            failed,
            skipped,
        }
    }
}

/// Unresolved checks of every blocked gate, read from the store so that
/// gates blocked by an earlier run are reported too.
fn blocked_gates(statuses: &[(String, PhaseStatus)], state: &SessionState) -> Vec<GateBlockedError> {
    statuses
        .iter()
        .filter(|(_, s)| matches!(s, PhaseStatus::Blocked { .. }))
        .filter_map(|(id, _)| state.latest(id))
        .filter_map(blocked_error)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ExecutorFault;
    use crate::gates::{CheckResult, RetryPolicy, SignatureClassifier};
    use crate::phase::PhaseKind;
    use crate::session::OutcomeStatus;
    use crate::session::scope::ScopeFile;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::tempdir;

    /// Records dispatch order; fails the phases it is told to fail.
    #[derive(Default)]
    struct Recorder {
        order: Mutex<Vec<String>>,
        failing: Vec<String>,
        abort_after: Option<(String, AbortHandle)>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl Executor for Recorder {
        async fn execute(
            &self,
            phase: &Phase,
            ctx: &ExecutionContext,
        ) -> Result<ExecutionReport, ExecutorFault> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.order.lock().unwrap().push(phase.id.clone());

            if let Some((id, handle)) = &self.abort_after
                && id == &phase.id
            {
                handle.abort();
            }

            let failing = self.failing.contains(&phase.id);
            Ok(match (phase.kind, failing) {
                (PhaseKind::Gate, true) => {
                    ExecutionReport::Checks(vec![CheckResult::failing("c1", "wrong total")])
                }
                (PhaseKind::Gate, false) => {
                    ExecutionReport::Checks(vec![CheckResult::passing("c1")])
                }
                (_, true) => ExecutionReport::Failed {
                    detail: "boom".into(),
                },
                (_, false) => ExecutionReport::Completed {
                    detail: format!(
                        "briefed: {}",
                        ctx.briefing.as_ref().map_or("no", |_| "yes")
                    ),
                },
            })
        }
    }

    const PLAN: &str = "\
<!-- PHASE:01 START -->
## Objective
Scaffold
<!-- PHASE:01 END -->
<!-- PHASE:02 START -->
## Objective
Build
## Files
- src/lib.rs
<!-- PHASE:02 END -->
";

    fn phases() -> Vec<Phase> {
        vec![
            Phase::new("01", "Scaffold", PhaseKind::Subagent, vec![]),
            Phase::new("02", "Build", PhaseKind::Subagent, vec!["01".into()]),
            Phase::gate("03", "Tests", 2, vec!["02".into()]),
            Phase::new("04", "Ship", PhaseKind::Orchestrator, vec!["03".into()]),
        ]
    }

    fn controller() -> GateController {
        GateController::new(
            Arc::new(SignatureClassifier::default()),
            RetryPolicy::immediate(),
        )
    }

    fn orchestrator(executor: Arc<Recorder>) -> Orchestrator {
        Orchestrator::new(phases(), Arc::new(SessionStore::in_memory()), executor)
            .with_plan(PLAN)
            .with_controller(controller())
    }

    #[tokio::test]
    async fn test_sequential_run_succeeds_in_order() {
        let exec = Arc::new(Recorder::default());
        let report = orchestrator(exec.clone()).run().await.unwrap();

        assert_eq!(report.status, RunStatus::Success);
        assert_eq!(*exec.order.lock().unwrap(), vec!["01", "02", "03", "04"]);
        assert_eq!(report.phase("01").unwrap().detail, "briefed: yes");
        assert_eq!(report.phase("04").unwrap().detail, "briefed: no");
        assert_eq!(report.gate_reports.len(), 1);
    }

    #[tokio::test]
    async fn test_blocked_gate_skips_dependents() {
        let exec = Arc::new(Recorder {
            failing: vec!["03".into()],
            ..Default::default()
        });
        let report = orchestrator(exec.clone()).run().await.unwrap();

        assert_eq!(
            report.status,
            RunStatus::PartialFailure {
                blocked: vec!["03".into()],
                failed: vec![],
                skipped: vec!["04".into()],
            }
        );
        assert_eq!(report.status.exit_code(), 2);
        assert!(!exec.order.lock().unwrap().contains(&"04".to_string()));
        let gate = &report.gate_reports[0];
        assert_eq!(gate.final_outcome.attempt_number, 2);
    }

    #[tokio::test]
    async fn test_invalid_graph_is_rejected_before_dispatch() {
        let exec = Arc::new(Recorder::default());
        let mut bad = phases();
        bad[0].prerequisites = vec!["04".into()];
        let result = Orchestrator::new(bad, Arc::new(SessionStore::in_memory()), exec.clone())
            .with_plan(PLAN)
            .run()
            .await;

        assert!(matches!(result, Err(OrchestratorError::PlanValidation(_))));
        assert!(exec.order.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_marker_pair_is_rejected() {
        let exec = Arc::new(Recorder::default());
        let result = Orchestrator::new(phases(), Arc::new(SessionStore::in_memory()), exec)
            .run()
            .await;
        assert!(matches!(
            result,
            Err(OrchestratorError::PlanValidation(
                crate::errors::PlanValidationError::MarkerContract { .. }
            ))
        ));
    }

    #[tokio::test]
    async fn test_abort_stops_at_phase_boundary() {
        let abort = AbortHandle::new();
        let exec = Arc::new(Recorder {
            abort_after: Some(("02".into(), abort.clone())),
            ..Default::default()
        });
        let report = orchestrator(exec.clone())
            .with_abort(abort)
            .run()
            .await
            .unwrap();

        assert_eq!(*exec.order.lock().unwrap(), vec!["01", "02"]);
        assert_eq!(
            report.status,
            RunStatus::Aborted {
                pending: vec!["03".into(), "04".into()]
            }
        );
    }

    #[tokio::test]
    async fn test_resume_skips_passed_phases() {
        let store = Arc::new(SessionStore::in_memory());
        store.append(PhaseOutcome::passed("01", 1)).unwrap();
        store.append(PhaseOutcome::passed("02", 1)).unwrap();

        let exec = Arc::new(Recorder::default());
        let report = Orchestrator::new(phases(), store, exec.clone())
            .with_plan(PLAN)
            .with_controller(controller())
            .run()
            .await
            .unwrap();

        assert!(report.is_success());
        assert_eq!(*exec.order.lock().unwrap(), vec!["03", "04"]);
    }

    #[tokio::test]
    async fn test_scope_violation_fails_phase_without_dispatch() {
        let scope = ScopePolicy::from_file(&ScopeFile {
            allowed_paths: vec!["docs/**".into()],
            ..Default::default()
        })
        .unwrap();
        let exec = Arc::new(Recorder::default());
        let orchestrator = orchestrator(exec.clone()).with_scope(Some(scope));
        let report = orchestrator.run().await.unwrap();

        assert_eq!(*exec.order.lock().unwrap(), vec!["01"]);
        let latest = orchestrator.store().latest("02").unwrap();
        assert_eq!(latest.status, OutcomeStatus::Failed);
        assert!(latest.detail.contains("src/lib.rs"));
        assert!(matches!(report.status, RunStatus::PartialFailure { .. }));
    }

    #[tokio::test]
    async fn test_parallel_dispatch_respects_bound() {
        let independent: Vec<Phase> = (1..=6)
            .map(|i| Phase::new(&format!("{:02}", i), "Work", PhaseKind::Orchestrator, vec![]))
            .collect();
        let exec = Arc::new(Recorder {
            delay: Duration::from_millis(30),
            ..Default::default()
        });
        let report = Orchestrator::new(independent, Arc::new(SessionStore::in_memory()), exec.clone())
            .with_max_parallel(2)
            .run()
            .await
            .unwrap();

        assert!(report.is_success());
        assert_eq!(exec.order.lock().unwrap().len(), 6);
        assert!(exec.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(exec.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_session_run_persists_briefings_and_report() {
        let dir = tempdir().unwrap();
        let layout = SessionLayout::new(dir.path());
        PhasesFile {
            plan_hash: None,
            generated_at: None,
            phases: phases(),
        }
        .save(&layout.phases_file())
        .unwrap();
        std::fs::write(layout.plan(), PLAN).unwrap();

        let exec = Arc::new(Recorder::default());
        let orchestrator = Orchestrator::for_session(&layout, exec)
            .unwrap()
            .with_controller(controller());
        let report = orchestrator.run().await.unwrap();

        assert!(report.is_success());
        assert!(layout.briefings_dir().join("phase-01.md").exists());
        assert!(!layout.briefings_dir().join("phase-03.md").exists());
        assert_eq!(RunReport::load(&layout.report()).unwrap().run_id, report.run_id);
        let briefings: Vec<_> = orchestrator
            .store()
            .artifacts()
            .into_iter()
            .filter(|a| a.kind == ArtifactKind::Briefing)
            .collect();
        assert_eq!(briefings.len(), 2);
    }

    #[tokio::test]
    async fn test_config_overrides_gate_retry_bound() {
        let toml = PhasegateToml::parse(
            "[defaults]\nmax_parallel = 2\n\n[phases.overrides.\"test*\"]\nmax_retries = 1\n",
        )
        .unwrap();
        let exec = Arc::new(Recorder {
            failing: vec!["03".into()],
            ..Default::default()
        });
        let orchestrator = orchestrator(exec).with_config(&toml);
        assert_eq!(orchestrator.phases()[2].max_retries, 1);

        let report = orchestrator.run().await.unwrap();
        assert_eq!(report.phase("03").unwrap().status, PhaseStatus::Blocked { attempts: 1 });
        assert_eq!(report.gate_reports[0].fixer_invocations, 0);
    }
}
