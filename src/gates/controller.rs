//! The bounded retry loop behind every gate phase.
//!
//! ```text
//! Attempting(n) --all checks pass--------------------------> Passed
//! Attempting(n) --failing, n < limit: repair/fix, back off--> Attempting(n+1)
//! Attempting(n) --failing, n == limit----------------------> Blocked
//! ```
//!
//! Every attempt appends exactly one outcome. Failing checks are classified
//! first: test artifact issues are repaired locally, subject bugs go to the
//! fixer one request per check, infrastructure faults are only retried.
//! Delegation happens only when another attempt remains.

use super::check::{CheckDetail, CheckResult, FailureClass};
use super::classify::{FailureClassifier, SignatureClassifier};
use super::retry::RetryPolicy;
use crate::briefing::PhaseBriefing;
use crate::errors::{GateBlockedError, StoreError};
use crate::events::{EventSink, RunEvent};
use crate::executor::{ExecutionContext, ExecutionReport, Executor, FixRequest, Fixer};
use crate::phase::Phase;
use crate::session::{OutcomeStatus, PhaseOutcome, SessionStore};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Everything that happened while running one gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateReport {
    pub phase_id: String,
    pub final_outcome: PhaseOutcome,
    /// Outcomes recorded by this run, in order
    pub attempts: Vec<PhaseOutcome>,
    pub fixer_invocations: u32,
    pub fix_timeouts: u32,
    pub local_repairs: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked: Option<GateBlockedError>,
}

impl GateReport {
    pub fn passed(&self) -> bool {
        self.final_outcome.status == OutcomeStatus::Passed
    }
}

/// Runs gates against an executor and a fixer.
#[derive(Clone)]
pub struct GateController {
    classifier: Arc<dyn FailureClassifier>,
    policy: RetryPolicy,
    events: EventSink,
}

impl Default for GateController {
    fn default() -> Self {
        Self::new(Arc::new(SignatureClassifier::default()), RetryPolicy::default())
    }
}

impl GateController {
    pub fn new(classifier: Arc<dyn FailureClassifier>, policy: RetryPolicy) -> Self {
        Self {
            classifier,
            policy,
            events: EventSink::none(),
        }
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Drive `phase` to Passed or Blocked.
    ///
    /// Continues from the last recorded attempt when the store already holds
    /// failed attempts for this gate.
    pub async fn run_gate(
        &self,
        phase: &Phase,
        briefing: Option<(&PhaseBriefing, PathBuf)>,
        executor: &dyn Executor,
        fixer: &dyn Fixer,
        store: &SessionStore,
    ) -> Result<GateReport, StoreError> {
        let limit = phase.attempt_limit();
        let mut report = GateReport {
            phase_id: phase.id.clone(),
            final_outcome: PhaseOutcome::failed(&phase.id, 0, ""),
            attempts: Vec::new(),
            fixer_invocations: 0,
            fix_timeouts: 0,
            local_repairs: 0,
            blocked: None,
        };

        let first_attempt = match store.latest(&phase.id) {
            Some(latest) if latest.is_terminal(limit) => {
                tracing::debug!(phase = %phase.id, status = %latest.status, "Gate already settled");
                report.blocked = blocked_error(&latest);
                report.final_outcome = latest;
                return Ok(report);
            }
            Some(latest) => {
                tracing::info!(
                    phase = %phase.id,
                    resume_at = latest.attempt_number + 1,
                    "Resuming gate"
                );
                latest.attempt_number + 1
            }
            None => 1,
        };

        let (briefing, briefing_path) = match briefing {
            Some((b, path)) => (Some(b.clone()), Some(path)),
            None => (None, None),
        };

        for attempt in first_attempt..=limit {
            self.events
                .emit(RunEvent::PhaseStarted {
                    phase: phase.id.clone(),
                    attempt,
                })
                .await;

            let ctx = ExecutionContext::attempt(attempt)
                .with_briefing(briefing.clone(), briefing_path.clone());
            let (checks, total) = self.collect_failures(phase, attempt, executor, &ctx).await;

            if checks.is_empty() {
                let outcome = PhaseOutcome::passed(&phase.id, attempt)
                    .with_detail(&format!("{} check(s) passing", total));
                store.append(outcome.clone())?;
                tracing::info!(phase = %phase.id, attempt, "Gate passed");
                self.finish(&mut report, outcome).await;
                return Ok(report);
            }

            self.events
                .emit(RunEvent::ChecksFailed {
                    phase: phase.id.clone(),
                    attempt,
                    failing: checks.len(),
                    total,
                })
                .await;

            let classified: Vec<(CheckDetail, FailureClass)> = checks
                .iter()
                .map(|c| (c.detail.clone(), self.classifier.classify(c)))
                .collect();
            let unresolved: Vec<CheckDetail> = classified.iter().map(|(d, _)| d.clone()).collect();
            let class = dominant_class(&classified);

            if attempt >= limit {
                let outcome = PhaseOutcome::blocked(&phase.id, attempt, unresolved)
                    .with_classification(class);
                store.append(outcome.clone())?;
                tracing::error!(
                    phase = %phase.id,
                    attempt,
                    unresolved = outcome.unresolved_checks.len(),
                    "Gate blocked after exhausting retries"
                );
                report.blocked = blocked_error(&outcome);
                self.finish(&mut report, outcome).await;
                return Ok(report);
            }

            let outcome = PhaseOutcome::failed(
                &phase.id,
                attempt,
                &format!("{} of {} check(s) failing", classified.len(), total),
            )
            .with_classification(class)
            .with_unresolved(unresolved);
            store.append(outcome.clone())?;
            tracing::warn!(
                phase = %phase.id,
                attempt,
                limit,
                failing = classified.len(),
                %class,
                "Gate attempt failed"
            );
            report.attempts.push(outcome);

            self.resolve(phase, attempt, &classified, executor, fixer, &mut report)
                .await;

            let delay = self.policy.backoff_for(attempt);
            if !delay.is_zero() {
                tracing::debug!(delay_ms = delay.as_millis() as u64, "Backing off");
                tokio::time::sleep(delay).await;
            }
        }

        // The loop returns on its last attempt at the latest.
        let outcome = store
            .latest(&phase.id)
            .unwrap_or_else(|| PhaseOutcome::blocked(&phase.id, limit, Vec::new()));
        report.blocked = blocked_error(&outcome);
        self.finish(&mut report, outcome).await;
        Ok(report)
    }

    /// Run the executor once and return the failing checks plus the total count.
    async fn collect_failures(
        &self,
        phase: &Phase,
        attempt: u32,
        executor: &dyn Executor,
        ctx: &ExecutionContext,
    ) -> (Vec<CheckResult>, usize) {
        match executor.execute(phase, ctx).await {
            Ok(ExecutionReport::Checks(checks)) => {
                let total = checks.len();
                for check in checks.iter().filter(|c| c.passed) {
                    if let Some(note) = &check.note {
                        tracing::warn!(check = %check.check_id(), note = %note, "Check passed with warning");
                    }
                }
                (checks.into_iter().filter(|c| !c.passed).collect(), total)
            }
            Ok(ExecutionReport::Completed { .. }) | Ok(ExecutionReport::Skipped { .. }) => {
                (Vec::new(), 0)
            }
            Ok(ExecutionReport::Failed { detail }) => {
                (vec![CheckResult::failing(&phase.id, &detail)], 1)
            }
            Err(fault) => {
                let message = fault.to_string();
                tracing::warn!(phase = %phase.id, attempt, error = %message, "Executor fault");
                self.events
                    .emit(RunEvent::InfrastructureFault {
                        phase: phase.id.clone(),
                        attempt,
                        message: message.clone(),
                        class: FailureClass::Infrastructure,
                    })
                    .await;
                (
                    vec![
                        CheckResult::failing("executor", &message)
                            .classified(FailureClass::Infrastructure),
                    ],
                    1,
                )
            }
        }
    }

    /// Route each failing check to its handler before the next attempt.
    async fn resolve(
        &self,
        phase: &Phase,
        attempt: u32,
        classified: &[(CheckDetail, FailureClass)],
        executor: &dyn Executor,
        fixer: &dyn Fixer,
        report: &mut GateReport,
    ) {
        for (detail, class) in classified {
            match class {
                FailureClass::TestArtifactIssue => {
                    self.events
                        .emit(RunEvent::RepairRequested {
                            phase: phase.id.clone(),
                            check_id: detail.check_id.clone(),
                        })
                        .await;
                    report.local_repairs += 1;
                    if let Err(e) = executor.repair(phase, detail).await {
                        tracing::warn!(check = %detail.check_id, error = %e, "Local repair failed");
                    }
                }
                FailureClass::SubjectBug => {
                    let request = FixRequest {
                        phase_id: phase.id.clone(),
                        attempt,
                        check: detail.clone(),
                    };
                    tracing::info!(phase = %phase.id, attempt, check = %detail, "Delegating fix");
                    self.events
                        .emit(RunEvent::FixDelegated {
                            phase: phase.id.clone(),
                            attempt,
                            check_id: detail.check_id.clone(),
                            detail: detail.to_string(),
                        })
                        .await;
                    report.fixer_invocations += 1;

                    match tokio::time::timeout(self.policy.fix_timeout, fixer.fix(&request)).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            tracing::warn!(check = %detail.check_id, error = %e, "Fixer failed");
                        }
                        Err(_) => {
                            tracing::warn!(
                                check = %detail.check_id,
                                timeout_secs = self.policy.fix_timeout.as_secs(),
                                "Fixer timed out"
                            );
                            report.fix_timeouts += 1;
                            self.events
                                .emit(RunEvent::FixTimedOut {
                                    phase: phase.id.clone(),
                                    check_id: detail.check_id.clone(),
                                })
                                .await;
                        }
                    }
                }
                FailureClass::Infrastructure => {
                    tracing::warn!(check = %detail.check_id, "Infrastructure fault, retrying without fix");
                }
            }
        }
    }

    async fn finish(&self, report: &mut GateReport, outcome: PhaseOutcome) {
        self.events
            .emit(RunEvent::PhaseFinished {
                phase: outcome.phase_id.clone(),
                attempt: outcome.attempt_number,
                status: outcome.status,
                detail: outcome.detail.clone(),
            })
            .await;
        report.attempts.push(outcome.clone());
        report.final_outcome = outcome;
    }
}

/// Subject bugs outrank infrastructure, which outranks test artifact issues.
fn dominant_class(classified: &[(CheckDetail, FailureClass)]) -> FailureClass {
    let has = |c: FailureClass| classified.iter().any(|(_, k)| *k == c);
    if has(FailureClass::SubjectBug) {
        FailureClass::SubjectBug
    } else if has(FailureClass::Infrastructure) {
        FailureClass::Infrastructure
    } else {
        FailureClass::TestArtifactIssue
    }
}

pub(crate) fn blocked_error(outcome: &PhaseOutcome) -> Option<GateBlockedError> {
    (outcome.status == OutcomeStatus::Blocked).then(|| GateBlockedError {
        phase: outcome.phase_id.clone(),
        attempts: outcome.attempt_number,
        unresolved: outcome.unresolved_checks.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ExecutorFault;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Executor that replays a script of reports, one per attempt.
    struct Scripted {
        script: Mutex<VecDeque<Result<ExecutionReport, ExecutorFault>>>,
        calls: AtomicU32,
        repairs: AtomicU32,
    }

    impl Scripted {
        fn new(script: Vec<Result<ExecutionReport, ExecutorFault>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
                repairs: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Executor for Scripted {
        async fn execute(
            &self,
            _phase: &Phase,
            _ctx: &ExecutionContext,
        ) -> Result<ExecutionReport, ExecutorFault> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(ExecutionReport::Checks(vec![CheckResult::passing("x")])))
        }

        async fn repair(&self, _phase: &Phase, _check: &CheckDetail) -> Result<(), ExecutorFault> {
            self.repairs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingFixer {
        requests: Mutex<Vec<FixRequest>>,
    }

    #[async_trait]
    impl Fixer for RecordingFixer {
        async fn fix(&self, request: &FixRequest) -> anyhow::Result<()> {
            self.requests.lock().unwrap().push(request.clone());
            Ok(())
        }
    }

    struct SlowFixer;

    #[async_trait]
    impl Fixer for SlowFixer {
        async fn fix(&self, _request: &FixRequest) -> anyhow::Result<()> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    fn failing(id: &str) -> Result<ExecutionReport, ExecutorFault> {
        Ok(ExecutionReport::Checks(vec![
            CheckResult::passing("ok"),
            CheckResult::failing(id, "assertion failed").at("spec.ts:1"),
        ]))
    }

    fn passing() -> Result<ExecutionReport, ExecutorFault> {
        Ok(ExecutionReport::Checks(vec![CheckResult::passing("ok")]))
    }

    fn controller() -> GateController {
        GateController::new(
            Arc::new(SignatureClassifier::default()),
            RetryPolicy::immediate(),
        )
    }

    fn gate() -> Phase {
        Phase::gate("03", "API tests", 3, vec![])
    }

    #[tokio::test]
    async fn test_pass_on_first_attempt() {
        let exec = Scripted::new(vec![passing()]);
        let fixer = RecordingFixer::default();
        let store = SessionStore::in_memory();

        let report = controller()
            .run_gate(&gate(), None, &exec, &fixer, &store)
            .await
            .unwrap();

        assert!(report.passed());
        assert_eq!(report.attempts.len(), 1);
        assert_eq!(report.fixer_invocations, 0);
        assert_eq!(exec.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_pass_on_second_attempt_stops() {
        let exec = Scripted::new(vec![failing("login"), passing(), failing("never")]);
        let fixer = RecordingFixer::default();
        let store = SessionStore::in_memory();

        let report = controller()
            .run_gate(&gate(), None, &exec, &fixer, &store)
            .await
            .unwrap();

        assert!(report.passed());
        assert_eq!(report.final_outcome.attempt_number, 2);
        assert_eq!(exec.calls.load(Ordering::SeqCst), 2);
        let statuses: Vec<_> = store.history("03").iter().map(|o| o.status).collect();
        assert_eq!(statuses, vec![OutcomeStatus::Failed, OutcomeStatus::Passed]);
    }

    #[tokio::test]
    async fn test_blocked_at_retry_bound() {
        let exec = Scripted::new(vec![failing("a"), failing("a"), failing("a"), passing()]);
        let fixer = RecordingFixer::default();
        let store = SessionStore::in_memory();

        let report = controller()
            .run_gate(&gate(), None, &exec, &fixer, &store)
            .await
            .unwrap();

        assert!(!report.passed());
        assert_eq!(report.final_outcome.status, OutcomeStatus::Blocked);
        assert_eq!(report.final_outcome.attempt_number, 3);
        // Never a fourth attempt
        assert_eq!(exec.calls.load(Ordering::SeqCst), 3);
        let blocked = report.blocked.unwrap();
        assert_eq!(blocked.attempts, 3);
        assert_eq!(blocked.unresolved[0].location.as_deref(), Some("spec.ts:1"));
        // Delegation only while another attempt remains
        assert_eq!(fixer.requests.lock().unwrap().len(), 2);

        let statuses: Vec<_> = store.history("03").iter().map(|o| o.status).collect();
        assert_eq!(
            statuses,
            vec![OutcomeStatus::Failed, OutcomeStatus::Failed, OutcomeStatus::Blocked]
        );
    }

    #[tokio::test]
    async fn test_one_fix_request_per_failing_check() {
        let exec = Scripted::new(vec![
            Ok(ExecutionReport::Checks(vec![
                CheckResult::failing("a", "wrong total"),
                CheckResult::failing("b", "wrong name"),
            ])),
            passing(),
        ]);
        let fixer = RecordingFixer::default();
        let store = SessionStore::in_memory();

        let report = controller()
            .run_gate(&gate(), None, &exec, &fixer, &store)
            .await
            .unwrap();

        assert_eq!(report.fixer_invocations, 2);
        let requests = fixer.requests.lock().unwrap();
        assert_eq!(requests[0].check.check_id, "a");
        assert_eq!(requests[1].check.check_id, "b");
        assert!(requests.iter().all(|r| r.attempt == 1 && r.phase_id == "03"));
    }

    #[tokio::test]
    async fn test_artifact_issue_is_repaired_locally() {
        let exec = Scripted::new(vec![
            Ok(ExecutionReport::Checks(vec![CheckResult::failing(
                "login",
                "selector #submit not found",
            )])),
            passing(),
        ]);
        let fixer = RecordingFixer::default();
        let store = SessionStore::in_memory();

        let report = controller()
            .run_gate(&gate(), None, &exec, &fixer, &store)
            .await
            .unwrap();

        assert!(report.passed());
        assert_eq!(report.local_repairs, 1);
        assert_eq!(exec.repairs.load(Ordering::SeqCst), 1);
        assert!(fixer.requests.lock().unwrap().is_empty());
        assert_eq!(
            store.history("03")[0].failure_classification,
            Some(FailureClass::TestArtifactIssue)
        );
    }

    #[tokio::test]
    async fn test_executor_fault_is_infrastructure_and_retried() {
        let exec = Scripted::new(vec![
            Err(ExecutorFault::Unreachable("ECONNREFUSED".into())),
            passing(),
        ]);
        let fixer = RecordingFixer::default();
        let store = SessionStore::in_memory();

        let report = controller()
            .run_gate(&gate(), None, &exec, &fixer, &store)
            .await
            .unwrap();

        assert!(report.passed());
        assert!(fixer.requests.lock().unwrap().is_empty());
        assert_eq!(
            store.history("03")[0].failure_classification,
            Some(FailureClass::Infrastructure)
        );
    }

    #[tokio::test]
    async fn test_fix_timeout_consumes_attempt() {
        let exec = Scripted::new(vec![failing("a"), passing()]);
        let store = SessionStore::in_memory();
        let controller = GateController::new(
            Arc::new(SignatureClassifier::default()),
            RetryPolicy::immediate().with_fix_timeout(Duration::from_millis(20)),
        );

        let report = controller
            .run_gate(&gate(), None, &exec, &SlowFixer, &store)
            .await
            .unwrap();

        assert_eq!(report.fix_timeouts, 1);
        assert!(report.passed());
        assert_eq!(report.final_outcome.attempt_number, 2);
    }

    #[tokio::test]
    async fn test_resume_continues_from_latest_attempt() {
        let store = SessionStore::in_memory();
        store.append(PhaseOutcome::failed("03", 1, "x")).unwrap();
        store.append(PhaseOutcome::failed("03", 2, "x")).unwrap();

        let exec = Scripted::new(vec![failing("a")]);
        let fixer = RecordingFixer::default();
        let report = controller()
            .run_gate(&gate(), None, &exec, &fixer, &store)
            .await
            .unwrap();

        assert_eq!(exec.calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.final_outcome.attempt_number, 3);
        assert_eq!(report.final_outcome.status, OutcomeStatus::Blocked);
        // Last attempt: no delegation
        assert!(fixer.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_settled_gate_is_not_rerun() {
        let store = SessionStore::in_memory();
        store.append(PhaseOutcome::passed("03", 1)).unwrap();

        let exec = Scripted::new(vec![]);
        let report = controller()
            .run_gate(&gate(), None, &exec, &RecordingFixer::default(), &store)
            .await
            .unwrap();

        assert!(report.passed());
        assert_eq!(exec.calls.load(Ordering::SeqCst), 0);
    }

    /// In-memory sink for formatted log lines.
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_delegation_log_carries_check_detail() {
        let logs = CapturedLogs::default();
        let sink = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || sink.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let exec = Scripted::new(vec![
            Ok(ExecutionReport::Checks(vec![
                CheckResult::failing("totals", "wrong total")
                    .at("api/cart.cy.ts:22")
                    .expecting("42", "41"),
            ])),
            passing(),
        ]);
        let report = controller()
            .run_gate(&gate(), None, &exec, &RecordingFixer::default(), &SessionStore::in_memory())
            .await
            .unwrap();
        assert_eq!(report.fixer_invocations, 1);

        let out = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        let line = out
            .lines()
            .find(|l| l.contains("Delegating fix"))
            .expect("delegation is logged");
        assert!(line.contains("phase=03"), "{line}");
        assert!(line.contains("attempt=1"), "{line}");
        assert!(
            line.contains("totals at api/cart.cy.ts:22: wrong total (expected 42, got 41)"),
            "{line}"
        );
    }

    #[tokio::test]
    async fn test_events_are_emitted() {
        let (tx, mut rx) = tokio::sync::mpsc::channel(64);
        let controller = controller().with_events(EventSink::new(tx));
        let exec = Scripted::new(vec![failing("a"), passing()]);
        let store = SessionStore::in_memory();

        controller
            .run_gate(&gate(), None, &exec, &RecordingFixer::default(), &store)
            .await
            .unwrap();
        drop(controller);

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(match event {
                RunEvent::PhaseStarted { .. } => "started",
                RunEvent::ChecksFailed { .. } => "failed_checks",
                RunEvent::FixDelegated { detail, .. } => {
                    assert_eq!(detail, "a at spec.ts:1: assertion failed");
                    "fix"
                }
                RunEvent::PhaseFinished { .. } => "finished",
                _ => "other",
            });
        }
        assert_eq!(
            kinds,
            vec!["started", "failed_checks", "fix", "started", "finished"]
        );
    }
}
