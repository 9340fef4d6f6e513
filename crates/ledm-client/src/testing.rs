//! Test utilities for ledm-client
//!
//! Provides a scriptable in-process scanner and a server wrapper for
//! integration tests.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use parking_lot::Mutex;
use tokio::net::TcpListener;

use crate::codec::{self, JOBS_NAMESPACE, SCAN_NAMESPACE};
use crate::config::ScannerConfig;
use crate::types::{JobHandle, ScanRequest};
use crate::{DeviceClient, Result, Scanner};

/// Job URL handed out by [`FakeScanner`]
pub const JOB_URL: &str = "/Jobs/JobList/1";
/// Binary URL of the single page produced by [`FakeScanner`]
pub const BINARY_URL: &str = "/Scan/Jobs/1/Pages/1";

/// A test server that automatically shuts down when dropped
pub struct TestServer {
    pub addr: SocketAddr,
    pub scanner: Scanner,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    /// Serve `router` on an ephemeral port with a 10ms poll interval
    ///
    /// # Example
    ///
    /// ```ignore
    /// use ledm_client::testing::{FakeScanner, TestServer};
    ///
    /// let fake = FakeScanner::new();
    /// let server = TestServer::start(fake.router()).await?;
    /// let outcome = server.scanner.scan(1800, 1200, "scan.jpg").await?;
    /// ```
    pub async fn start(router: Router) -> Result<Self> {
        Self::start_with_timeouts(router, Duration::from_millis(10), Duration::from_secs(5)).await
    }

    /// Serve `router` with a custom poll interval and request timeout
    pub async fn start_with_timeouts(
        router: Router,
        poll_interval: Duration,
        request_timeout: Duration,
    ) -> Result<Self> {
        // Bind to any available port
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

        // Spawn the server
        let handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        // Give server a moment to start
        tokio::time::sleep(Duration::from_millis(10)).await;

        let config = ScannerConfig::builder(addr.ip().to_string())
            .port(addr.port())
            .poll_interval_ms(poll_interval.as_millis() as u64)
            .request_timeout_ms(request_timeout.as_millis() as u64)
            .connect_timeout_ms(2_000)
            .build();
        let scanner = Scanner::from_config(config)?;

        Ok(Self {
            addr,
            scanner,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Get the base URL of the test server
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get a reference to the device client
    pub fn client(&self) -> &DeviceClient {
        self.scanner.client()
    }

    /// Shutdown the server gracefully
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        // Send shutdown signal if not already done
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        // Abort the task if still running
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Wait for a condition with timeout
pub async fn wait_for<F, Fut>(condition: F, timeout: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;

    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    false
}

// =============================================================================
// Fake Scanner
// =============================================================================

/// Which page element a scripted job reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    PreScan,
    PostScan,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PageStep {
    kind: PageKind,
    state: String,
    image: Option<(u32, u32)>,
}

/// One scripted answer to `GET <job-url>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStep {
    state: String,
    page: Option<PageStep>,
    http_status: StatusCode,
}

impl JobStep {
    /// Job in an arbitrary device state, no page record
    pub fn state(state: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            page: None,
            http_status: StatusCode::OK,
        }
    }

    /// Answer the job poll with a bare HTTP error instead of a job record
    pub fn http_error(status: u16) -> Self {
        Self {
            http_status: StatusCode::from_u16(status)
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            ..Self::processing()
        }
    }

    pub fn processing() -> Self {
        Self::state("Processing")
    }

    pub fn completed() -> Self {
        Self::state("Completed")
    }

    pub fn canceled() -> Self {
        Self::state("Canceled")
    }

    /// Processing job whose pre-scan page is ready at [`BINARY_URL`]
    pub fn ready(width: u32, height: u32) -> Self {
        Self::processing().with_page("ReadyToUpload", Some((width, height)))
    }

    /// Attach a pre-scan page record
    pub fn with_page(mut self, state: impl Into<String>, image: Option<(u32, u32)>) -> Self {
        self.page = Some(PageStep {
            kind: PageKind::PreScan,
            state: state.into(),
            image,
        });
        self
    }

    /// Report the page record as a post-scan page
    pub fn post_scan(mut self) -> Self {
        if let Some(page) = self.page.as_mut() {
            page.kind = PageKind::PostScan;
        }
        self
    }

    fn to_xml(&self) -> String {
        let page = self
            .page
            .as_ref()
            .map(|page| {
                let tag = match page.kind {
                    PageKind::PreScan => "PreScanPage",
                    PageKind::PostScan => "PostScanPage",
                };
                let image = page
                    .image
                    .map(|(w, h)| {
                        format!(
                            "<BufferInfo><ImageWidth>{w}</ImageWidth><ImageHeight>{h}</ImageHeight></BufferInfo>\
                             <BinaryURL>{BINARY_URL}</BinaryURL>"
                        )
                    })
                    .unwrap_or_default();
                format!(
                    "<ScanJob xmlns=\"{SCAN_NAMESPACE}\"><{tag}><PageNumber>1</PageNumber>\
                     <PageState>{}</PageState>{image}</{tag}></ScanJob>",
                    page.state
                )
            })
            .unwrap_or_default();

        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
             <j:Job xmlns:j=\"{JOBS_NAMESPACE}\"><j:JobUrl>{JOB_URL}</j:JobUrl>\
             <j:JobCategory>Scan</j:JobCategory><j:JobState>{}</j:JobState>{page}</j:Job>",
            self.state
        )
    }
}

#[derive(Debug)]
struct FakeState {
    scanner_states: VecDeque<String>,
    job_steps: VecDeque<JobStep>,
    status_code: StatusCode,
    status_delay: Duration,
    create_status: StatusCode,
    send_location: bool,
    cancel_status: StatusCode,
    cancel_delay: Duration,
    image: Vec<u8>,
    canceled: bool,

    status_polls: usize,
    job_polls: usize,
    binary_fetches: usize,
    job_polls_at_first_fetch: Option<usize>,
    submitted: Vec<String>,
    cancel_requests: Vec<String>,
}

/// Pops the next scripted value, repeating the last one forever
fn next_scripted<T: Clone>(queue: &mut VecDeque<T>) -> Option<T> {
    if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    }
}

/// Scriptable stand-in for a scanner's embedded web server
///
/// By default the scanner is idle, the job reports one ready 1800x1200 page
/// and then completes. A cancel request makes every later job poll report
/// `Canceled`.
#[derive(Debug, Clone)]
pub struct FakeScanner {
    inner: Arc<Mutex<FakeState>>,
}

impl Default for FakeScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeScanner {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(FakeState {
                scanner_states: VecDeque::from(["Idle".to_string()]),
                job_steps: VecDeque::from([JobStep::ready(1800, 1200), JobStep::completed()]),
                status_code: StatusCode::OK,
                status_delay: Duration::ZERO,
                create_status: StatusCode::CREATED,
                send_location: true,
                cancel_status: StatusCode::OK,
                cancel_delay: Duration::ZERO,
                image: b"\xFF\xD8\xFF\xE0fake-jpeg\xFF\xD9".to_vec(),
                canceled: false,
                status_polls: 0,
                job_polls: 0,
                binary_fetches: 0,
                job_polls_at_first_fetch: None,
                submitted: Vec::new(),
                cancel_requests: Vec::new(),
            })),
        }
    }

    /// Scanner states returned by successive status polls
    pub fn with_scanner_states(self, states: &[&str]) -> Self {
        self.inner.lock().scanner_states = states.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Job states returned by successive job polls
    pub fn with_job_steps(self, steps: Vec<JobStep>) -> Self {
        self.inner.lock().job_steps = steps.into();
        self
    }

    /// HTTP status of the scanner status endpoint
    pub fn with_status_code(self, status: u16) -> Self {
        self.inner.lock().status_code =
            StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        self
    }

    /// Delay before answering each status poll
    pub fn with_status_delay(self, delay: Duration) -> Self {
        self.inner.lock().status_delay = delay;
        self
    }

    /// HTTP status answered to cancel requests
    ///
    /// Only a 200 answer makes later job polls report `Canceled`.
    pub fn with_cancel_status(self, status: u16) -> Self {
        self.inner.lock().cancel_status =
            StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        self
    }

    /// Delay before answering cancel requests
    pub fn with_cancel_delay(self, delay: Duration) -> Self {
        self.inner.lock().cancel_delay = delay;
        self
    }

    /// HTTP status answered to job creation
    pub fn with_create_status(self, status: u16) -> Self {
        self.inner.lock().create_status =
            StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        self
    }

    /// Answer job creation without a `Location` header
    pub fn without_location(self) -> Self {
        self.inner.lock().send_location = false;
        self
    }

    /// Bytes served at [`BINARY_URL`]
    pub fn with_image(self, image: Vec<u8>) -> Self {
        self.inner.lock().image = image;
        self
    }

    pub fn image(&self) -> Vec<u8> {
        self.inner.lock().image.clone()
    }

    pub fn status_polls(&self) -> usize {
        self.inner.lock().status_polls
    }

    pub fn job_polls(&self) -> usize {
        self.inner.lock().job_polls
    }

    pub fn binary_fetches(&self) -> usize {
        self.inner.lock().binary_fetches
    }

    /// Number of job polls served before the image was first fetched
    pub fn job_polls_at_first_fetch(&self) -> Option<usize> {
        self.inner.lock().job_polls_at_first_fetch
    }

    /// Scan jobs posted so far, decoded
    pub fn submitted_jobs(&self) -> Vec<ScanRequest> {
        self.inner
            .lock()
            .submitted
            .iter()
            .filter_map(|body| codec::decode_scan_job(body).ok())
            .collect()
    }

    /// Jobs named in cancel requests so far
    pub fn cancel_requests(&self) -> Vec<JobHandle> {
        self.inner
            .lock()
            .cancel_requests
            .iter()
            .filter_map(|body| codec::decode_cancel(body).ok())
            .collect()
    }

    /// Build the router serving the scanner endpoints
    pub fn router(&self) -> Router {
        Router::new()
            .route("/Scan/Status", get(get_status))
            .route("/Scan/Jobs", axum::routing::post(post_job).put(put_cancel))
            .route("/Jobs/JobList/{id}", get(get_job))
            .route("/Scan/Jobs/{job}/Pages/{page}", get(get_page))
            .with_state(self.clone())
    }
}

fn xml_response(status: StatusCode, body: String) -> Response {
    (status, [(header::CONTENT_TYPE, "text/xml")], body).into_response()
}

async fn get_status(State(fake): State<FakeScanner>) -> Response {
    let (status, state, delay) = {
        let mut inner = fake.inner.lock();
        inner.status_polls += 1;
        let state = next_scripted(&mut inner.scanner_states).unwrap_or_default();
        (inner.status_code, state, inner.status_delay)
    };
    tokio::time::sleep(delay).await;

    if status != StatusCode::OK {
        return status.into_response();
    }
    xml_response(
        StatusCode::OK,
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
             <ScanStatus xmlns=\"{SCAN_NAMESPACE}\"><ScannerState>{state}</ScannerState>\
             <AdfState>Empty</AdfState></ScanStatus>"
        ),
    )
}

async fn post_job(State(fake): State<FakeScanner>, body: String) -> Response {
    let mut inner = fake.inner.lock();
    inner.submitted.push(body);

    if inner.create_status != StatusCode::CREATED {
        return inner.create_status.into_response();
    }
    if inner.send_location {
        (StatusCode::CREATED, [(header::LOCATION, JOB_URL)]).into_response()
    } else {
        StatusCode::CREATED.into_response()
    }
}

async fn get_job(State(fake): State<FakeScanner>, Path(_id): Path<u32>) -> Response {
    let step = {
        let mut inner = fake.inner.lock();
        inner.job_polls += 1;
        if inner.canceled {
            JobStep::canceled()
        } else {
            next_scripted(&mut inner.job_steps).unwrap_or_else(JobStep::completed)
        }
    };
    if step.http_status != StatusCode::OK {
        return step.http_status.into_response();
    }
    xml_response(StatusCode::OK, step.to_xml())
}

async fn get_page(
    State(fake): State<FakeScanner>,
    Path((_job, _page)): Path<(u32, u32)>,
) -> Response {
    let image = {
        let mut inner = fake.inner.lock();
        inner.binary_fetches += 1;
        if inner.job_polls_at_first_fetch.is_none() {
            inner.job_polls_at_first_fetch = Some(inner.job_polls);
        }
        inner.image.clone()
    };
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "image/jpeg")],
        Bytes::from(image),
    )
        .into_response()
}

async fn put_cancel(State(fake): State<FakeScanner>, body: String) -> Response {
    let (status, delay) = {
        let mut inner = fake.inner.lock();
        inner.cancel_requests.push(body);
        (inner.cancel_status, inner.cancel_delay)
    };
    tokio::time::sleep(delay).await;

    if status != StatusCode::OK {
        return xml_response(status, "<Error>Job cannot be canceled</Error>".to_string());
    }
    fake.inner.lock().canceled = true;
    status.into_response()
}
