use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tb_channel::{
    download, Capability, ChannelHost, ControllerClient, IncomingNotification, Notification,
};
use tb_controller::{
    ControllerConfig, ControllerError, ControllerService, LaunchRequest, WorkerExit,
    WorkerLauncher, WorkerProcess,
};
use tb_core::{
    EndpointId, EnvironmentParameters, ReportSection, StepDetails, TestExecutionResult,
    TestExecutionState, TestStep, UploadToken, CONTROLLER_SECTION_GROUP, STEP_SECTION_GROUP,
};
use tokio::sync::broadcast;

static NEXT_PID: AtomicU32 = AtomicU32::new(1000);

fn next_worker() -> EndpointId {
    EndpointId::for_worker(NEXT_PID.fetch_add(1, Ordering::Relaxed))
}

async fn pair(a: &Arc<ChannelHost>, b: &Arc<ChannelHost>) {
    let (left, right) = tokio::io::duplex(1024 * 1024);
    let (ra, rb) = tokio::join!(a.attach(left), b.attach(right));
    ra.unwrap();
    rb.unwrap();
}

/// Worker that dies before signing in.
struct ExitingLauncher;

#[async_trait]
impl WorkerLauncher for ExitingLauncher {
    async fn launch(&self, _request: LaunchRequest) -> tb_controller::Result<WorkerProcess> {
        let (process, control) = WorkerProcess::channel(next_worker());
        control.report_exit(WorkerExit { code: Some(1) });
        Ok(process)
    }
}

/// Worker that never signs in and only exits when killed.
struct SilentLauncher;

#[async_trait]
impl WorkerLauncher for SilentLauncher {
    async fn launch(&self, _request: LaunchRequest) -> tb_controller::Result<WorkerProcess> {
        let (process, mut control) = WorkerProcess::channel(next_worker());
        tokio::spawn(async move {
            control.kill_requested().await;
            control.report_exit(WorkerExit { code: None });
        });
        Ok(process)
    }
}

/// Worker that signs on, takes its test files token and dies without a
/// result.
struct CrashingLauncher {
    controller: Arc<ChannelHost>,
    offered: Arc<std::sync::Mutex<Option<UploadToken>>>,
}

#[async_trait]
impl WorkerLauncher for CrashingLauncher {
    async fn launch(&self, request: LaunchRequest) -> tb_controller::Result<WorkerProcess> {
        let endpoint = next_worker();
        let worker = ChannelHost::new(endpoint.clone());
        pair(&self.controller, &worker).await;
        let (process, control) = WorkerProcess::channel(endpoint);
        let offered = self.offered.clone();

        tokio::spawn(async move {
            worker.sign_in(Capability::Commands).await;
            worker.sign_in(Capability::Notifications).await;
            let client = ControllerClient::new(worker.clone(), request.controller.clone());
            let token = client.prepare_test_files_for_transfer().await.unwrap();
            *offered.lock().unwrap() = Some(token);
            worker.shutdown(Duration::from_secs(1)).await;
            control.report_exit(WorkerExit { code: Some(1) });
        });
        Ok(process)
    }
}

struct FailingLauncher;

#[async_trait]
impl WorkerLauncher for FailingLauncher {
    async fn launch(&self, request: LaunchRequest) -> tb_controller::Result<WorkerProcess> {
        Err(ControllerError::Spawn {
            path: request.worker_path,
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        })
    }
}

/// Worker running inside the test: pulls its assignment, reports two
/// passing steps and exits cleanly.
struct InProcessLauncher {
    controller: Arc<ChannelHost>,
    scratch: std::path::PathBuf,
}

#[async_trait]
impl WorkerLauncher for InProcessLauncher {
    async fn launch(&self, request: LaunchRequest) -> tb_controller::Result<WorkerProcess> {
        let endpoint = next_worker();
        let worker = ChannelHost::new(endpoint.clone());
        pair(&self.controller, &worker).await;
        let (process, control) = WorkerProcess::channel(endpoint);
        let scratch = self.scratch.clone();

        tokio::spawn(async move {
            worker.sign_in(Capability::Notifications).await;
            worker.sign_in(Capability::Commands).await;

            let client = ControllerClient::new(worker.clone(), request.controller.clone());
            let steps = client.test_case().await.unwrap();
            let env = client.environment_parameters().await.unwrap();
            assert_eq!(env.get("target").map(String::as_str), Some("staging"));

            let token = client.prepare_test_files_for_transfer().await.unwrap();
            let asset = scratch.join("assets.zip");
            download(&worker, &request.controller, token, &asset).await.unwrap();
            assert_eq!(std::fs::read(&asset).unwrap(), b"zip bytes");

            for step in &steps {
                let mut section = ReportSection::new(step.display_name());
                section.info("ok").unwrap();
                section.finalize(true).unwrap();
                worker
                    .notify(
                        &request.controller,
                        Notification::ExecutionProgress {
                            section_group: STEP_SECTION_GROUP.into(),
                            section,
                        },
                    )
                    .await
                    .unwrap();
            }
            worker
                .notify(
                    &request.controller,
                    Notification::TestCompletion {
                        result: TestExecutionResult::Passed,
                    },
                )
                .await
                .unwrap();
            worker.shutdown(Duration::from_secs(1)).await;
            control.report_exit(WorkerExit { code: Some(0) });
        });
        Ok(process)
    }
}

struct Fixture {
    service: ControllerService,
    client: Arc<ChannelHost>,
    controller_client: ControllerClient,
    token: UploadToken,
    dir: tempfile::TempDir,
}

async fn fixture(make_launcher: impl FnOnce(&Arc<ChannelHost>, &std::path::Path) -> Arc<dyn WorkerLauncher>) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let controller = ChannelHost::new(EndpointId::for_controller(1));
    let client = ChannelHost::new(EndpointId::for_client());

    let config = ControllerConfig {
        handshake_timeout_ms: 200,
        scratch_root: dir.path().to_path_buf(),
        report_dir: dir.path().join("reports"),
        ..ControllerConfig::default()
    };
    let launcher = make_launcher(&controller, dir.path());
    let service = ControllerService::new(controller.clone(), launcher, config, "in-memory");
    controller.install_handler(Arc::new(service.clone()));
    pair(&controller, &client).await;

    let asset = dir.path().join("upload.zip");
    std::fs::write(&asset, b"zip bytes").unwrap();
    let token = client.broker().register(&asset);
    let controller_client = ControllerClient::new(client.clone(), controller.endpoint().clone());

    Fixture {
        service,
        client,
        controller_client,
        token,
        dir,
    }
}

fn steps() -> Vec<TestStep> {
    (1..=2)
        .map(|o| TestStep::new(o, StepDetails::Console { executable: "tool".into() }))
        .collect()
}

fn env() -> EnvironmentParameters {
    let mut env = EnvironmentParameters::new();
    env.insert("target".into(), "staging".into());
    env
}

/// Sections and the result the caller receives for one run.
async fn collect(rx: &mut broadcast::Receiver<IncomingNotification>) -> (Vec<(String, ReportSection)>, TestExecutionResult) {
    let mut sections = Vec::new();
    loop {
        let incoming = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("run should finish")
            .unwrap();
        match incoming.notification {
            Notification::ExecutionProgress {
                section_group,
                section,
            } => sections.push((section_group, section)),
            Notification::TestCompletion { result } => return (sections, result),
        }
    }
}

async fn wait_idle(service: &ControllerService) {
    for _ in 0..200 {
        if service.state() == TestExecutionState::None {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("session did not return to idle");
}

#[tokio::test]
async fn test_worker_exiting_before_sign_in_fails_the_run() {
    let f = fixture(|_, _| Arc::new(ExitingLauncher)).await;
    let mut rx = f.client.subscribe_notifications();

    f.controller_client
        .execute(steps(), env(), f.token)
        .await
        .unwrap();
    let (sections, result) = collect(&mut rx).await;

    assert_eq!(result, TestExecutionResult::Failed);
    assert_eq!(sections.len(), 1);
    assert_eq!(sections[0].0, CONTROLLER_SECTION_GROUP);
    assert!(!sections[0].1.was_successful());
    wait_idle(&f.service).await;
    assert!(f.service.session().worker().is_none());
}

#[tokio::test]
async fn test_worker_exiting_without_a_result_fails_the_run() {
    let offered = Arc::new(std::sync::Mutex::new(None));
    let controller_host = Arc::new(std::sync::Mutex::new(None));
    let f = fixture(|controller, _| {
        *controller_host.lock().unwrap() = Some(controller.clone());
        Arc::new(CrashingLauncher {
            controller: controller.clone(),
            offered: offered.clone(),
        })
    })
    .await;
    let controller: Arc<ChannelHost> = controller_host.lock().unwrap().clone().unwrap();
    let mut rx = f.client.subscribe_notifications();

    f.controller_client
        .execute(steps(), env(), f.token)
        .await
        .unwrap();
    let (sections, result) = collect(&mut rx).await;

    assert_eq!(result, TestExecutionResult::Failed);
    assert_eq!(sections.len(), 1);
    let (group, section) = &sections[0];
    assert_eq!(group, CONTROLLER_SECTION_GROUP);
    assert_eq!(section.name(), "Worker");
    assert!(section.is_finalized());
    assert!(!section.was_successful());

    wait_idle(&f.service).await;
    assert!(f.service.session().worker().is_none());
    assert_eq!(f.service.session().result(), Some(TestExecutionResult::Failed));

    // The token handed to the dead worker no longer resolves.
    let token = offered.lock().unwrap().expect("worker took a token");
    assert!(controller.broker().path_of(&token).is_none());

    // Exactly one result reached the caller.
    tokio::time::sleep(Duration::from_millis(100)).await;
    while let Ok(incoming) = rx.try_recv() {
        assert!(
            !matches!(incoming.notification, Notification::TestCompletion { .. }),
            "second result delivered"
        );
    }
}

#[tokio::test]
async fn test_handshake_timeout_kills_worker_and_fails() {
    let f = fixture(|_, _| Arc::new(SilentLauncher)).await;
    let mut rx = f.client.subscribe_notifications();

    f.controller_client
        .execute(steps(), env(), f.token)
        .await
        .unwrap();
    let (sections, result) = collect(&mut rx).await;

    assert_eq!(result, TestExecutionResult::Failed);
    let text: Vec<_> = sections[0].1.entries().map(|(_, e)| e.text.clone()).collect();
    assert!(text[0].contains("did not sign on"), "{text:?}");
    wait_idle(&f.service).await;
}

#[tokio::test]
async fn test_spawn_failure_fails_without_error_to_caller() {
    let f = fixture(|_, _| Arc::new(FailingLauncher)).await;
    let mut rx = f.client.subscribe_notifications();

    f.controller_client
        .execute(steps(), env(), f.token)
        .await
        .expect("execute acknowledges before provisioning");
    let (_, result) = collect(&mut rx).await;
    assert_eq!(result, TestExecutionResult::Failed);
    wait_idle(&f.service).await;
}

#[tokio::test]
async fn test_concurrent_execute_is_rejected() {
    let f = fixture(|_, _| Arc::new(SilentLauncher)).await;

    f.controller_client
        .execute(steps(), env(), f.token)
        .await
        .unwrap();
    let err = f
        .controller_client
        .execute(steps(), env(), f.token)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("already active"), "{err}");
}

#[tokio::test]
async fn test_invalid_steps_are_rejected_up_front() {
    let f = fixture(|_, _| Arc::new(SilentLauncher)).await;
    let err = f
        .controller_client
        .execute(Vec::new(), env(), f.token)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("invalid test case"), "{err}");
    assert_eq!(f.service.state(), TestExecutionState::None);
}

#[tokio::test]
async fn test_worker_progress_is_relayed_in_order() {
    let f = fixture(|controller, dir| {
        Arc::new(InProcessLauncher {
            controller: controller.clone(),
            scratch: dir.to_path_buf(),
        })
    })
    .await;
    let mut rx = f.client.subscribe_notifications();
    let mut local = f.service.subscribe();

    f.controller_client
        .execute(steps(), env(), f.token)
        .await
        .unwrap();
    let (sections, result) = collect(&mut rx).await;

    assert_eq!(result, TestExecutionResult::Passed);
    let names: Vec<_> = sections.iter().map(|(_, s)| s.name().to_string()).collect();
    assert_eq!(names, vec!["Step 1 (console)", "Step 2 (console)"]);
    assert!(sections.iter().all(|(g, _)| g == STEP_SECTION_GROUP));

    assert!(matches!(
        local.recv().await.unwrap(),
        Notification::ExecutionProgress { .. }
    ));
    wait_idle(&f.service).await;
    assert_eq!(f.service.report().len(), 2);
    assert!(f.service.report().all_successful());
    drop(f.dir);
}
