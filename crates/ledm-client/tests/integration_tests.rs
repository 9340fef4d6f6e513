//! Integration tests for ledm-client
//!
//! These tests run the real client and scanner against the scriptable fake
//! scanner served over HTTP on a local port.

use std::path::PathBuf;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use ledm_client::testing::{wait_for, FakeScanner, JobStep, TestServer, BINARY_URL, JOB_URL};
use ledm_client::{
    CancellationToken, DeviceClient, JobHandle, JobState, PageRecord, ScanError, ScanOutcome,
    ScanPhase, ScannerState,
};
use pretty_assertions::assert_eq;
use rstest::rstest;
use tempfile::TempDir;

// =============================================================================
// Test Helpers
// =============================================================================

async fn start(fake: &FakeScanner) -> TestServer {
    TestServer::start(fake.router())
        .await
        .expect("Failed to start test server")
}

fn output_path(dir: &TempDir) -> PathBuf {
    dir.path().join("scan.jpg")
}

/// Run a full scan, collecting every phase entered
async fn scan_recording(
    server: &TestServer,
    output: &std::path::Path,
    shutdown: &CancellationToken,
) -> (ledm_client::Result<ScanOutcome>, Vec<ScanPhase>) {
    let mut phases = Vec::new();
    let request = server.scanner.request(1800, 1200);
    let result = server
        .scanner
        .scan_with(request, output, shutdown, |phase| phases.push(phase))
        .await;
    (result, phases)
}

// =============================================================================
// Device Client Tests
// =============================================================================

#[tokio::test]
async fn test_get_scanner_state() {
    let fake = FakeScanner::new().with_scanner_states(&["BusyWithScanJob", "Idle"]);
    let server = start(&fake).await;

    let state = server.client().get_scanner_state().await.unwrap();
    assert_eq!(state, ScannerState::Busy("BusyWithScanJob".to_string()));

    let state = server.client().get_scanner_state().await.unwrap();
    assert_eq!(state, ScannerState::Idle);
    assert_eq!(fake.status_polls(), 2);
}

#[tokio::test]
async fn test_get_scanner_state_bad_status() {
    let fake = FakeScanner::new().with_status_code(503);
    let server = start(&fake).await;

    let err = server.client().get_scanner_state().await.unwrap_err();
    assert!(matches!(err, ScanError::Protocol { .. }), "got {err:?}");
    assert_eq!(err.status(), Some(503));
}

#[tokio::test]
async fn test_get_scanner_state_missing_field() {
    let router = Router::new().route(
        "/Scan/Status",
        get(|| async { "<ScanStatus><AdfState>Empty</AdfState></ScanStatus>" }),
    );
    let server = TestServer::start(router).await.unwrap();

    let err = server.client().get_scanner_state().await.unwrap_err();
    assert!(matches!(err, ScanError::MalformedResponse(_)), "got {err:?}");
}

#[tokio::test]
async fn test_get_scanner_state_not_xml() {
    let router = Router::new().route("/Scan/Status", get(|| async { "<html><body>oops" }));
    let server = TestServer::start(router).await.unwrap();

    let err = server.client().get_scanner_state().await.unwrap_err();
    assert!(matches!(err, ScanError::MalformedResponse(_)), "got {err:?}");
}

#[tokio::test]
async fn test_request_timeout_is_protocol_error() {
    let router = Router::new().route(
        "/Scan/Status",
        get(|| async {
            tokio::time::sleep(Duration::from_secs(2)).await;
            "late"
        }),
    );
    let server = TestServer::start_with_timeouts(
        router,
        Duration::from_millis(10),
        Duration::from_millis(100),
    )
    .await
    .unwrap();

    let err = server.client().get_scanner_state().await.unwrap_err();
    assert!(
        matches!(err, ScanError::Protocol { status: None, .. }),
        "got {err:?}"
    );
}

#[tokio::test]
async fn test_connection_refused_is_transport_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let client = DeviceClient::connect("127.0.0.1", port).unwrap();
    let err = client.get_scanner_state().await.unwrap_err();
    assert!(matches!(err, ScanError::Transport(_)), "got {err:?}");
}

#[tokio::test]
async fn test_create_scan_job() {
    let fake = FakeScanner::new();
    let server = start(&fake).await;

    let request = server.scanner.request(1500, 1050);
    let job = server.client().create_scan_job(&request).await.unwrap();
    assert_eq!(job, JobHandle::new(JOB_URL));

    let submitted = fake.submitted_jobs();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].width, 1500);
    assert_eq!(submitted[0].height, 1050);
    assert_eq!(submitted[0].x_resolution, 300);
    assert_eq!(submitted[0].compression_qfactor, 35);
    assert_eq!(submitted[0].format, "Jpeg");
}

#[rstest]
#[case(200)]
#[case(202)]
#[case(400)]
#[case(409)]
#[case(503)]
#[tokio::test]
async fn test_create_scan_job_requires_created(#[case] status: u16) {
    let fake = FakeScanner::new().with_create_status(status);
    let server = start(&fake).await;

    let request = server.scanner.request(1800, 1200);
    let err = server.client().create_scan_job(&request).await.unwrap_err();
    assert!(matches!(err, ScanError::Protocol { .. }), "got {err:?}");
    assert_eq!(err.status(), Some(status));
}

#[tokio::test]
async fn test_create_scan_job_without_location() {
    let fake = FakeScanner::new().without_location();
    let server = start(&fake).await;

    let request = server.scanner.request(1800, 1200);
    let err = server.client().create_scan_job(&request).await.unwrap_err();
    assert!(matches!(err, ScanError::MalformedResponse(_)), "got {err:?}");
}

#[tokio::test]
async fn test_get_job_state() {
    let fake = FakeScanner::new().with_job_steps(vec![
        JobStep::processing().with_page("Scanning", None),
        JobStep::ready(1800, 1200),
    ]);
    let server = start(&fake).await;
    let job = JobHandle::new(JOB_URL);

    let status = server.client().get_job_state(&job).await.unwrap();
    assert_eq!(status.state, JobState::Processing);
    assert_eq!(status.ready_image().unwrap(), None);

    let status = server.client().get_job_state(&job).await.unwrap();
    let image = status
        .ready_image()
        .unwrap()
        .expect("page should be ready");
    assert_eq!(image.image_width, 1800);
    assert_eq!(image.image_height, 1200);
    assert_eq!(image.binary_url, BINARY_URL);
    assert!(matches!(status.page, Some(PageRecord::PreScan(_))));
}

#[tokio::test]
async fn test_get_job_state_absolute_url() {
    let fake = FakeScanner::new().with_job_steps(vec![JobStep::completed()]);
    let server = start(&fake).await;
    let job = JobHandle::new(format!("{}{}", server.base_url(), JOB_URL));

    let status = server.client().get_job_state(&job).await.unwrap();
    assert_eq!(status.state, JobState::Completed);
    assert_eq!(status.page, None);
}

#[tokio::test]
async fn test_fetch_binary() {
    let fake = FakeScanner::new().with_image(vec![1, 2, 3, 4, 5]);
    let server = start(&fake).await;

    let bytes = server.client().fetch_binary(BINARY_URL).await.unwrap();
    assert_eq!(bytes.as_ref(), &[1, 2, 3, 4, 5]);
    assert_eq!(fake.binary_fetches(), 1);
}

#[tokio::test]
async fn test_fetch_binary_ignores_status() {
    let fake = FakeScanner::new();
    let server = start(&fake).await;

    // Unknown path answers 404 with an empty body; that is still returned
    let bytes = server.client().fetch_binary("/no/such/page").await.unwrap();
    assert!(bytes.is_empty());
}

#[tokio::test]
async fn test_cancel_job() {
    let fake = FakeScanner::new();
    let server = start(&fake).await;
    let job = JobHandle::new(JOB_URL);

    let receipt = server.client().cancel_job(&job).await.unwrap();
    assert_eq!(receipt.status, 200);
    assert_eq!(fake.cancel_requests(), vec![job]);
}

// =============================================================================
// Scanner (Orchestrator) Tests
// =============================================================================

#[tokio::test]
async fn test_scan_saves_image() {
    let fake = FakeScanner::new();
    let server = start(&fake).await;
    let dir = TempDir::new().unwrap();
    let output = output_path(&dir);

    let outcome = server.scanner.scan(1800, 1200, &output).await.unwrap();

    assert_eq!(
        outcome,
        ScanOutcome::Saved {
            path: output.clone(),
            image_width: 1800,
            image_height: 1200,
            bytes: fake.image().len(),
            final_state: Some(JobState::Completed),
        }
    );
    assert_eq!(std::fs::read(&output).unwrap(), fake.image());
    assert_eq!(server.scanner.active_job(), None);
}

#[rstest]
#[case("BusyWithScanJob")]
#[case("BusyWithCopyJob")]
#[case("Error")]
#[case("idle")]
#[tokio::test]
async fn test_waits_until_exactly_idle(#[case] busy: &str) {
    let fake = FakeScanner::new().with_scanner_states(&[busy, busy, busy, "Idle"]);
    let server = start(&fake).await;
    let dir = TempDir::new().unwrap();

    let outcome = server
        .scanner
        .scan(1800, 1200, output_path(&dir))
        .await
        .unwrap();

    assert!(outcome.is_saved());
    assert_eq!(fake.status_polls(), 4);
    assert_eq!(fake.submitted_jobs().len(), 1);
}

#[tokio::test]
async fn test_downloads_once_on_first_ready_poll() {
    let fake = FakeScanner::new().with_job_steps(vec![
        JobStep::processing(),
        JobStep::ready(1800, 1200),
        JobStep::completed(),
    ]);
    let server = start(&fake).await;
    let dir = TempDir::new().unwrap();

    let (result, phases) =
        scan_recording(&server, &output_path(&dir), &CancellationToken::new()).await;
    let outcome = result.unwrap();

    match outcome {
        ScanOutcome::Saved {
            image_width,
            image_height,
            ..
        } => assert_eq!((image_width, image_height), (1800, 1200)),
        other => panic!("expected saved image, got {other:?}"),
    }
    assert_eq!(fake.binary_fetches(), 1);
    assert_eq!(fake.job_polls_at_first_fetch(), Some(2));
    assert_eq!(
        phases,
        vec![
            ScanPhase::WaitingForIdle,
            ScanPhase::JobSubmitted,
            ScanPhase::PollingForImage,
            ScanPhase::Downloading,
            ScanPhase::DrainingToTerminal,
            ScanPhase::Done,
        ]
    );
}

#[tokio::test]
async fn test_post_scan_page_is_used() {
    let fake = FakeScanner::new().with_job_steps(vec![
        JobStep::ready(1200, 1800).post_scan(),
        JobStep::completed(),
    ]);
    let server = start(&fake).await;
    let dir = TempDir::new().unwrap();

    let outcome = server
        .scanner
        .scan(1200, 1800, output_path(&dir))
        .await
        .unwrap();

    assert!(outcome.is_saved());
    assert_eq!(fake.binary_fetches(), 1);
}

#[tokio::test]
async fn test_completed_without_page_writes_nothing() {
    let fake = FakeScanner::new().with_job_steps(vec![
        JobStep::processing().with_page("Scanning", None),
        JobStep::completed(),
    ]);
    let server = start(&fake).await;
    let dir = TempDir::new().unwrap();
    let output = output_path(&dir);

    let (result, phases) = scan_recording(&server, &output, &CancellationToken::new()).await;

    assert_eq!(
        result.unwrap(),
        ScanOutcome::NoImage {
            final_state: JobState::Completed
        }
    );
    assert_eq!(fake.binary_fetches(), 0);
    assert!(!output.exists());
    assert_eq!(phases.last(), Some(&ScanPhase::Done));
    assert!(!phases.contains(&ScanPhase::Downloading));
}

#[tokio::test]
async fn test_canceled_by_device_before_page() {
    let fake =
        FakeScanner::new().with_job_steps(vec![JobStep::processing(), JobStep::canceled()]);
    let server = start(&fake).await;
    let dir = TempDir::new().unwrap();
    let output = output_path(&dir);

    let (result, phases) = scan_recording(&server, &output, &CancellationToken::new()).await;

    assert_eq!(
        result.unwrap(),
        ScanOutcome::NoImage {
            final_state: JobState::Canceled
        }
    );
    assert!(!output.exists());
    assert_eq!(phases.last(), Some(&ScanPhase::Canceled));
}

#[tokio::test]
async fn test_drain_waits_for_terminal_state() {
    let fake = FakeScanner::new().with_job_steps(vec![
        JobStep::ready(1800, 1200),
        JobStep::processing(),
        JobStep::processing().with_page("UploadCompleted", None),
        JobStep::state("Pending"),
        JobStep::completed(),
    ]);
    let server = start(&fake).await;
    let dir = TempDir::new().unwrap();

    let outcome = server
        .scanner
        .scan(1800, 1200, output_path(&dir))
        .await
        .unwrap();

    match outcome {
        ScanOutcome::Saved { final_state, .. } => {
            assert_eq!(final_state, Some(JobState::Completed))
        }
        other => panic!("expected saved image, got {other:?}"),
    }
    assert_eq!(fake.job_polls(), 5);
}

#[tokio::test]
async fn test_drain_failure_keeps_image() {
    let fake = FakeScanner::new()
        .with_job_steps(vec![JobStep::ready(1800, 1200), JobStep::http_error(503)]);
    let server = start(&fake).await;
    let dir = TempDir::new().unwrap();
    let output = output_path(&dir);

    let (result, phases) = scan_recording(&server, &output, &CancellationToken::new()).await;

    match result.unwrap() {
        ScanOutcome::Saved { final_state, .. } => assert_eq!(final_state, None),
        other => panic!("expected saved image, got {other:?}"),
    }
    assert!(output.exists());
    assert_eq!(phases.last(), Some(&ScanPhase::Done));
}

#[rstest]
#[case::completed(JobStep::completed(), JobState::Completed)]
#[case::canceled(JobStep::canceled(), JobState::Canceled)]
#[tokio::test]
async fn test_finished_job_ignores_incomplete_page(
    #[case] step: JobStep,
    #[case] expected: JobState,
) {
    let fake = FakeScanner::new().with_job_steps(vec![step.with_page("ReadyToUpload", None)]);
    let server = start(&fake).await;
    let dir = TempDir::new().unwrap();
    let output = output_path(&dir);

    let (result, _) = scan_recording(&server, &output, &CancellationToken::new()).await;

    assert_eq!(
        result.unwrap(),
        ScanOutcome::NoImage {
            final_state: expected
        }
    );
    assert_eq!(fake.binary_fetches(), 0);
    assert!(!output.exists());
}

#[tokio::test]
async fn test_malformed_page_while_polling_fails_scan() {
    let fake = FakeScanner::new()
        .with_job_steps(vec![JobStep::processing().with_page("ReadyToUpload", None)]);
    let server = start(&fake).await;
    let dir = TempDir::new().unwrap();
    let output = output_path(&dir);

    let (result, phases) = scan_recording(&server, &output, &CancellationToken::new()).await;

    assert!(matches!(result, Err(ScanError::MalformedResponse(_))));
    assert_eq!(phases.last(), Some(&ScanPhase::Failed));
    assert!(!output.exists());
    assert_eq!(server.scanner.active_job(), None);
}

#[tokio::test]
async fn test_job_rejected_fails_scan() {
    let fake = FakeScanner::new().with_create_status(503);
    let server = start(&fake).await;
    let dir = TempDir::new().unwrap();
    let output = output_path(&dir);

    let (result, phases) = scan_recording(&server, &output, &CancellationToken::new()).await;

    assert!(matches!(result, Err(ScanError::Protocol { .. })));
    assert_eq!(phases.last(), Some(&ScanPhase::Failed));
    assert_eq!(fake.job_polls(), 0);
    assert!(!output.exists());
}

#[tokio::test]
async fn test_output_write_failure_is_io_error() {
    let fake = FakeScanner::new();
    let server = start(&fake).await;
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("missing-dir").join("scan.jpg");

    let err = server.scanner.scan(1800, 1200, &output).await.unwrap_err();
    assert!(matches!(err, ScanError::Io(_)), "got {err:?}");
}

// =============================================================================
// Cancellation Tests
// =============================================================================

#[tokio::test]
async fn test_cancel_without_job_is_noop() {
    let fake = FakeScanner::new();
    let server = start(&fake).await;

    assert_eq!(server.scanner.cancel().await, None);
    assert!(fake.cancel_requests().is_empty());
}

#[tokio::test]
async fn test_cancel_reaches_device_while_polling() {
    let fake = FakeScanner::new().with_job_steps(vec![JobStep::processing()]);
    let server = start(&fake).await;
    let dir = TempDir::new().unwrap();
    let output = output_path(&dir);

    let polled = fake.clone();
    let (outcome, receipt) = tokio::join!(server.scanner.scan(1800, 1200, &output), async {
        assert!(
            wait_for(
                || {
                    let fake = polled.clone();
                    async move { fake.job_polls() >= 2 }
                },
                Duration::from_secs(5)
            )
            .await
        );
        assert_eq!(server.scanner.active_job(), Some(JobHandle::new(JOB_URL)));
        server.scanner.cancel().await
    });

    assert_eq!(receipt.map(|r| r.status), Some(200));
    assert_eq!(
        outcome.unwrap(),
        ScanOutcome::NoImage {
            final_state: JobState::Canceled
        }
    );
    assert_eq!(fake.cancel_requests(), vec![JobHandle::new(JOB_URL)]);
    assert_eq!(server.scanner.active_job(), None);
}

#[tokio::test]
async fn test_token_cancels_job_on_device() {
    let fake = FakeScanner::new().with_job_steps(vec![JobStep::processing()]);
    let server = TestServer::start_with_timeouts(
        fake.router(),
        Duration::from_secs(30),
        Duration::from_secs(5),
    )
    .await
    .unwrap();
    let dir = TempDir::new().unwrap();
    let shutdown = CancellationToken::new();

    let polled = fake.clone();
    let output = output_path(&dir);
    let (result, _) = tokio::join!(
        scan_recording(&server, &output, &shutdown),
        async {
            wait_for(
                || {
                    let fake = polled.clone();
                    async move { fake.job_polls() >= 1 }
                },
                Duration::from_secs(5),
            )
            .await;
            shutdown.cancel();
        }
    );
    let (result, phases) = result;

    // The 30s poll interval is interrupted by the token
    assert_eq!(
        result.unwrap(),
        ScanOutcome::NoImage {
            final_state: JobState::Canceled
        }
    );
    assert_eq!(fake.cancel_requests().len(), 1);
    assert_eq!(phases.last(), Some(&ScanPhase::Canceled));
}

#[tokio::test]
async fn test_token_aborts_wait_for_idle() {
    let fake = FakeScanner::new().with_scanner_states(&["BusyWithScanJob"]);
    let server = start(&fake).await;
    let dir = TempDir::new().unwrap();
    let shutdown = CancellationToken::new();

    let polled = fake.clone();
    let output = output_path(&dir);
    let (result, _) = tokio::join!(
        scan_recording(&server, &output, &shutdown),
        async {
            wait_for(
                || {
                    let fake = polled.clone();
                    async move { fake.status_polls() >= 3 }
                },
                Duration::from_secs(5),
            )
            .await;
            shutdown.cancel();
        }
    );
    let (result, phases) = result;

    assert!(matches!(result, Err(ScanError::Cancelled)));
    assert_eq!(phases.last(), Some(&ScanPhase::Canceled));
    assert!(fake.submitted_jobs().is_empty());
    assert!(fake.cancel_requests().is_empty());
}

#[tokio::test]
async fn test_token_during_idle_poll_submits_no_job() {
    // The device answers Idle only after the token has fired
    let fake = FakeScanner::new().with_status_delay(Duration::from_millis(300));
    let server = start(&fake).await;
    let dir = TempDir::new().unwrap();
    let shutdown = CancellationToken::new();

    let output = output_path(&dir);
    let (result, _) = tokio::join!(
        scan_recording(&server, &output, &shutdown),
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            shutdown.cancel();
        }
    );
    let (result, phases) = result;

    assert!(matches!(result, Err(ScanError::Cancelled)), "got {result:?}");
    assert_eq!(fake.status_polls(), 1);
    assert!(fake.submitted_jobs().is_empty());
    assert!(fake.cancel_requests().is_empty());
    assert_eq!(phases, vec![ScanPhase::WaitingForIdle, ScanPhase::Canceled]);
}

/// Cancel the held job while the scan polls, then let the device finish it
async fn cancel_then_complete(
    server: &TestServer,
    fake: &FakeScanner,
    output: &std::path::Path,
) -> (ledm_client::Result<ScanOutcome>, Option<ledm_client::CancelReceipt>) {
    let polled = fake.clone();
    tokio::join!(server.scanner.scan(1800, 1200, output), async {
        assert!(
            wait_for(
                || {
                    let fake = polled.clone();
                    async move { fake.job_polls() >= 2 }
                },
                Duration::from_secs(5)
            )
            .await
        );
        let receipt = server.scanner.cancel().await;

        // Polling goes on after the failed cancel
        let polls = polled.job_polls();
        assert!(
            wait_for(
                || {
                    let fake = polled.clone();
                    async move { fake.job_polls() >= polls + 2 }
                },
                Duration::from_secs(5)
            )
            .await
        );
        assert_eq!(server.scanner.active_job(), Some(JobHandle::new(JOB_URL)));

        let _ = polled.clone().with_job_steps(vec![JobStep::completed()]);
        receipt
    })
}

#[tokio::test]
async fn test_cancel_rejected_by_device_is_reported() {
    let fake = FakeScanner::new()
        .with_job_steps(vec![JobStep::processing()])
        .with_cancel_status(500);
    let server = start(&fake).await;
    let dir = TempDir::new().unwrap();

    let (outcome, receipt) = cancel_then_complete(&server, &fake, &output_path(&dir)).await;

    let receipt = receipt.expect("device answered the cancel");
    assert_eq!(receipt.status, 500);
    assert!(receipt.body.contains("cannot be canceled"));
    assert_eq!(
        outcome.unwrap(),
        ScanOutcome::NoImage {
            final_state: JobState::Completed
        }
    );
    assert_eq!(fake.cancel_requests(), vec![JobHandle::new(JOB_URL)]);
}

#[tokio::test]
async fn test_cancel_without_answer_is_swallowed() {
    let fake = FakeScanner::new()
        .with_job_steps(vec![JobStep::processing()])
        .with_cancel_delay(Duration::from_secs(5));
    let server = TestServer::start_with_timeouts(
        fake.router(),
        Duration::from_millis(10),
        Duration::from_millis(300),
    )
    .await
    .unwrap();
    let dir = TempDir::new().unwrap();

    let (outcome, receipt) = cancel_then_complete(&server, &fake, &output_path(&dir)).await;

    assert_eq!(receipt, None);
    assert_eq!(
        outcome.unwrap(),
        ScanOutcome::NoImage {
            final_state: JobState::Completed
        }
    );
    assert_eq!(fake.cancel_requests().len(), 1);
}

#[tokio::test]
async fn test_second_scan_is_rejected() {
    let fake = FakeScanner::new().with_scanner_states(&["BusyWithScanJob"]);
    let server = start(&fake).await;
    let dir = TempDir::new().unwrap();
    let shutdown = CancellationToken::new();

    let polled = fake.clone();
    let output = output_path(&dir);
    let (first, second) = tokio::join!(
        scan_recording(&server, &output, &shutdown),
        async {
            wait_for(
                || {
                    let fake = polled.clone();
                    async move { fake.status_polls() >= 1 }
                },
                Duration::from_secs(5),
            )
            .await;
            let second = server
                .scanner
                .scan(1800, 1200, dir.path().join("other.jpg"))
                .await;
            shutdown.cancel();
            second
        }
    );

    assert!(matches!(second, Err(ScanError::ScanInProgress)));
    assert!(matches!(first.0, Err(ScanError::Cancelled)));
}
