use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tb_core::{
    EnvironmentParameters, FailureMode, ReportSection, StepDetails, StepKind, TestExecutionResult,
    TestExecutionState, TestStep, STEP_SECTION_GROUP,
};
use tb_runner::{
    DispatchTable, ProgressSink, ReportTransfer, Sequencer, StepCleanup, StepContext, StepError,
    StepProcessor,
};

/// What a scripted processor does for a given step order.
#[derive(Clone, Copy)]
enum Script {
    Pass,
    Fail,
    Error,
    Panic,
}

#[derive(Default)]
struct Journal {
    processed: Vec<u32>,
    cleaned: Vec<u32>,
}

struct ScriptedProcessor {
    kind: StepKind,
    cleanup: bool,
    outcomes: HashMap<u32, Script>,
    cleanup_outcomes: HashMap<u32, Script>,
    journal: Arc<Mutex<Journal>>,
}

#[async_trait]
impl StepProcessor for ScriptedProcessor {
    fn kind(&self) -> StepKind {
        self.kind
    }

    async fn process(
        &self,
        step: &TestStep,
        _env: &EnvironmentParameters,
        _ctx: &StepContext,
        section: &mut ReportSection,
    ) -> Result<TestExecutionState, StepError> {
        self.journal.lock().unwrap().processed.push(step.order);
        section.info("scripted step ran").unwrap();
        match self.outcomes.get(&step.order).copied().unwrap_or(Script::Pass) {
            Script::Pass => Ok(TestExecutionState::Passed),
            Script::Fail => Ok(TestExecutionState::Failed),
            Script::Error => Err(StepError::Execution("tool exploded".into())),
            Script::Panic => panic!("processor bug"),
        }
    }

    fn as_cleanup(&self) -> Option<&dyn StepCleanup> {
        if self.cleanup {
            Some(self)
        } else {
            None
        }
    }
}

#[async_trait]
impl StepCleanup for ScriptedProcessor {
    async fn cleanup(
        &self,
        step: &TestStep,
        _env: &EnvironmentParameters,
        _ctx: &StepContext,
    ) -> Result<(), StepError> {
        self.journal.lock().unwrap().cleaned.push(step.order);
        match self.cleanup_outcomes.get(&step.order).copied().unwrap_or(Script::Pass) {
            Script::Pass => Ok(()),
            Script::Fail | Script::Error => Err(StepError::Execution("uninstall failed".into())),
            Script::Panic => panic!("cleanup bug"),
        }
    }
}

#[derive(Default)]
struct RecordingSink {
    sections: Mutex<Vec<(String, ReportSection)>>,
    results: Mutex<Vec<TestExecutionResult>>,
}

#[async_trait]
impl ProgressSink for RecordingSink {
    async fn progress(&self, section_group: &str, section: ReportSection) {
        self.sections
            .lock()
            .unwrap()
            .push((section_group.to_string(), section));
    }

    async fn completed(&self, result: TestExecutionResult) {
        self.results.lock().unwrap().push(result);
    }
}

impl RecordingSink {
    fn section_names(&self) -> Vec<String> {
        self.sections
            .lock()
            .unwrap()
            .iter()
            .map(|(_, s)| s.name().to_string())
            .collect()
    }
}

struct Harness {
    sequencer: Sequencer,
    sink: Arc<RecordingSink>,
    journal: Arc<Mutex<Journal>>,
    _scratch: tempfile::TempDir,
}

fn harness(kind: StepKind, cleanup: bool, outcomes: &[(u32, Script)]) -> Harness {
    harness_with_context(kind, cleanup, outcomes, |ctx| ctx)
}

fn harness_with_context(
    kind: StepKind,
    cleanup: bool,
    outcomes: &[(u32, Script)],
    configure: impl FnOnce(StepContext) -> StepContext,
) -> Harness {
    build_harness(kind, cleanup, outcomes, &[], configure)
}

fn build_harness(
    kind: StepKind,
    cleanup: bool,
    outcomes: &[(u32, Script)],
    cleanup_outcomes: &[(u32, Script)],
    configure: impl FnOnce(StepContext) -> StepContext,
) -> Harness {
    let journal = Arc::new(Mutex::new(Journal::default()));
    let mut table = DispatchTable::new();
    table.register(Arc::new(ScriptedProcessor {
        kind,
        cleanup,
        outcomes: outcomes.iter().copied().collect(),
        cleanup_outcomes: cleanup_outcomes.iter().copied().collect(),
        journal: journal.clone(),
    }));
    let scratch = tempfile::tempdir().unwrap();
    let sink = Arc::new(RecordingSink::default());
    let context = configure(StepContext::new(scratch.path()));
    Harness {
        sequencer: Sequencer::new(table, context, sink.clone()),
        sink,
        journal,
        _scratch: scratch,
    }
}

fn installer_step(order: u32, mode: FailureMode) -> TestStep {
    TestStep::new(
        order,
        StepDetails::Installer {
            installer: format!("pkg-{order}.msi").into(),
        },
    )
    .with_failure_mode(mode)
}

fn console_step(order: u32, mode: FailureMode) -> TestStep {
    TestStep::new(
        order,
        StepDetails::Console {
            executable: "tool".into(),
        },
    )
    .with_failure_mode(mode)
}

#[tokio::test]
async fn test_stop_failure_rolls_back_earlier_steps_only() {
    let h = harness(StepKind::Installer, true, &[(2, Script::Fail)]);
    let steps: Vec<_> = (1..=3).map(|o| installer_step(o, FailureMode::Stop)).collect();

    let result = h.sequencer.run(&steps, &EnvironmentParameters::new()).await;

    assert_eq!(result, TestExecutionResult::Failed);
    assert_eq!(h.sink.section_names(), vec!["Step 1 (installer)", "Step 2 (installer)"]);
    let journal = h.journal.lock().unwrap();
    assert_eq!(journal.processed, vec![1, 2]);
    assert_eq!(journal.cleaned, vec![1]);
    assert_eq!(*h.sink.results.lock().unwrap(), vec![TestExecutionResult::Failed]);
}

#[tokio::test]
async fn test_rollback_runs_in_reverse_order() {
    let h = harness(StepKind::Installer, true, &[(4, Script::Error)]);
    let steps: Vec<_> = (1..=5).map(|o| installer_step(o, FailureMode::Stop)).collect();

    h.sequencer.run(&steps, &EnvironmentParameters::new()).await;

    let journal = h.journal.lock().unwrap();
    assert_eq!(journal.processed, vec![1, 2, 3, 4]);
    assert_eq!(journal.cleaned, vec![3, 2, 1]);
}

#[tokio::test]
async fn test_continue_crash_still_runs_everything() {
    let h = harness(StepKind::Installer, true, &[(2, Script::Error)]);
    let steps: Vec<_> = (1..=3).map(|o| installer_step(o, FailureMode::Continue)).collect();

    let result = h.sequencer.run(&steps, &EnvironmentParameters::new()).await;

    assert_eq!(result, TestExecutionResult::Failed);
    assert_eq!(h.sink.section_names().len(), 3);
    let journal = h.journal.lock().unwrap();
    assert_eq!(journal.processed, vec![1, 2, 3]);
    assert!(journal.cleaned.is_empty());

    let sections = h.sink.sections.lock().unwrap();
    let (_, crashed) = &sections[1];
    assert!(crashed.is_finalized());
    assert!(!crashed.was_successful());
    assert!(crashed
        .entries()
        .any(|(_, e)| e.text.contains("tool exploded")));
    assert!(sections[0].1.was_successful());
    assert!(sections[2].1.was_successful());
}

#[tokio::test]
async fn test_panicking_processor_is_caught_as_crash() {
    let h = harness(StepKind::Console, false, &[(1, Script::Panic)]);
    let steps = vec![console_step(1, FailureMode::Continue), console_step(2, FailureMode::Continue)];

    let result = h.sequencer.run(&steps, &EnvironmentParameters::new()).await;

    assert_eq!(result, TestExecutionResult::Failed);
    assert_eq!(h.journal.lock().unwrap().processed, vec![1, 2]);
    let sections = h.sink.sections.lock().unwrap();
    assert!(sections[0]
        .1
        .entries()
        .any(|(_, e)| e.text.contains("processor bug")));
}

#[tokio::test]
async fn test_continue_visits_steps_in_ascending_order_once() {
    let h = harness(StepKind::Console, false, &[]);
    let steps = vec![
        console_step(30, FailureMode::Continue),
        console_step(10, FailureMode::Continue),
        console_step(20, FailureMode::Continue),
    ];

    let result = h.sequencer.run(&steps, &EnvironmentParameters::new()).await;

    assert_eq!(result, TestExecutionResult::Passed);
    assert_eq!(h.journal.lock().unwrap().processed, vec![10, 20, 30]);
    let sections = h.sink.sections.lock().unwrap();
    assert!(sections
        .iter()
        .all(|(group, s)| group == STEP_SECTION_GROUP && s.is_finalized() && s.was_successful()));
}

#[tokio::test]
async fn test_unresolved_kind_is_fatal() {
    let h = harness(StepKind::Console, false, &[]);
    let steps = vec![
        console_step(1, FailureMode::Continue),
        TestStep::new(
            2,
            StepDetails::Unsupported {
                name: "registry-edit".into(),
            },
        )
        .with_failure_mode(FailureMode::Continue),
        console_step(3, FailureMode::Continue),
    ];

    let result = h.sequencer.run(&steps, &EnvironmentParameters::new()).await;

    assert_eq!(result, TestExecutionResult::Failed);
    assert_eq!(h.journal.lock().unwrap().processed, vec![1]);
    let sections = h.sink.sections.lock().unwrap();
    assert_eq!(sections.len(), 2);
    let dispatch_failures: Vec<_> = sections
        .iter()
        .filter(|(_, s)| s.entries().any(|(_, e)| e.text.contains("no processor")))
        .collect();
    assert_eq!(dispatch_failures.len(), 1);
    assert!(!dispatch_failures[0].1.was_successful());
    assert_eq!(h.sink.results.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_unresolved_kind_under_continue_cleans_nothing() {
    let h = harness(StepKind::Installer, true, &[]);
    let steps = vec![
        installer_step(1, FailureMode::Continue),
        TestStep::new(2, StepDetails::Unsupported { name: "reboot".into() })
            .with_failure_mode(FailureMode::Continue),
    ];

    let result = h.sequencer.run(&steps, &EnvironmentParameters::new()).await;

    assert_eq!(result, TestExecutionResult::Failed);
    let journal = h.journal.lock().unwrap();
    assert_eq!(journal.processed, vec![1]);
    assert!(journal.cleaned.is_empty(), "cleaned: {:?}", journal.cleaned);
}

#[tokio::test]
async fn test_unresolved_kind_under_stop_rolls_back() {
    let h = harness(StepKind::Installer, true, &[]);
    let steps = vec![
        installer_step(1, FailureMode::Stop),
        installer_step(2, FailureMode::Stop),
        TestStep::new(3, StepDetails::Unsupported { name: "reboot".into() }),
    ];

    let result = h.sequencer.run(&steps, &EnvironmentParameters::new()).await;

    assert_eq!(result, TestExecutionResult::Failed);
    assert_eq!(h.journal.lock().unwrap().cleaned, vec![2, 1]);
}

#[tokio::test]
async fn test_cleanup_faults_do_not_stop_the_rollback() {
    let h = build_harness(
        StepKind::Installer,
        true,
        &[(4, Script::Fail)],
        &[(3, Script::Error), (2, Script::Panic)],
        |ctx| ctx,
    );
    let steps: Vec<_> = (1..=4).map(|o| installer_step(o, FailureMode::Stop)).collect();

    let result = h.sequencer.run(&steps, &EnvironmentParameters::new()).await;

    assert_eq!(result, TestExecutionResult::Failed);
    let journal = h.journal.lock().unwrap();
    assert_eq!(journal.processed, vec![1, 2, 3, 4]);
    assert_eq!(journal.cleaned, vec![3, 2, 1]);
    assert_eq!(h.sink.results.lock().unwrap().as_slice(), &[TestExecutionResult::Failed]);
}

struct FailingTransfer;

#[async_trait]
impl ReportTransfer for FailingTransfer {
    async fn transfer(&self, _step_order: u32, _paths: Vec<PathBuf>) -> anyhow::Result<()> {
        anyhow::bail!("controller unreachable")
    }
}

#[tokio::test]
async fn test_report_transfer_failure_is_only_a_warning() {
    let h = harness_with_context(StepKind::Console, false, &[], |ctx| {
        ctx.with_transfer(Arc::new(FailingTransfer))
    });
    let mut step = console_step(1, FailureMode::Stop);
    step.report_files.push("results.xml".into());

    let result = h.sequencer.run(&[step], &EnvironmentParameters::new()).await;

    assert_eq!(result, TestExecutionResult::Passed);
    let sections = h.sink.sections.lock().unwrap();
    let section = &sections[0].1;
    assert!(section.was_successful());
    assert_eq!(section.count(tb_core::EntryLevel::Warning), 1);
}
