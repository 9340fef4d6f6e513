//! Scan orchestration: drives one scan job from submission to completion

use std::path::Path;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::client::DeviceClient;
use crate::config::ScannerConfig;
use crate::error::{Result, ScanError};
use crate::types::*;

/// Runs scans against one device, one job at a time
///
/// Job state lives here rather than in the caller: the handle of the job
/// being driven is recorded for the duration of a scan so that [`cancel`]
/// can reach it, and is cleared when the scan returns.
///
/// [`cancel`]: Scanner::cancel
#[derive(Debug)]
pub struct Scanner {
    client: DeviceClient,
    poll_interval: Duration,
    active_job: Mutex<Option<JobHandle>>,
    running: tokio::sync::Mutex<()>,
}

/// Outcome of polling a job for its page
enum ImagePoll {
    Ready(ReadyImage),
    Ended(JobState),
}

impl Scanner {
    /// Create a scanner over an existing client
    pub fn new(client: DeviceClient) -> Self {
        let poll_interval = client.config().timeouts.poll_interval();
        Self {
            client,
            poll_interval,
            active_job: Mutex::new(None),
            running: tokio::sync::Mutex::new(()),
        }
    }

    /// Create a scanner from configuration
    pub fn from_config(config: ScannerConfig) -> Result<Self> {
        Ok(Self::new(DeviceClient::new(config)?))
    }

    /// Get the underlying device client
    pub fn client(&self) -> &DeviceClient {
        &self.client
    }

    /// Handle of the job currently being driven, if any
    pub fn active_job(&self) -> Option<JobHandle> {
        self.active_job.lock().clone()
    }

    /// Build a request for `width` x `height` using the configured quality
    pub fn request(&self, width: u32, height: u32) -> ScanRequest {
        let defaults = &self.client.config().scan;
        ScanRequest::new(width, height)
            .with_resolution(defaults.resolution)
            .with_compression_qfactor(defaults.compression_qfactor)
    }

    /// Scan a `width` x `height` pixel area into `output`
    ///
    /// The caller picks a non-colliding output path; an existing file is
    /// overwritten.
    pub async fn scan(
        &self,
        width: u32,
        height: u32,
        output: impl AsRef<Path>,
    ) -> Result<ScanOutcome> {
        let request = self.request(width, height);
        self.scan_with(request, output.as_ref(), &CancellationToken::new(), |_| {})
            .await
    }

    /// Scan with an explicit request, cancellation token and progress callback
    ///
    /// Firing `shutdown` before a job exists aborts with
    /// [`ScanError::Cancelled`]. Once a job exists it asks the device to cancel
    /// the job and keeps polling until the device reports a terminal state.
    #[instrument(skip(self, request, shutdown, progress), fields(width = request.width, height = request.height))]
    pub async fn scan_with<F>(
        &self,
        request: ScanRequest,
        output: &Path,
        shutdown: &CancellationToken,
        mut progress: F,
    ) -> Result<ScanOutcome>
    where
        F: FnMut(ScanPhase),
    {
        let _running = self
            .running
            .try_lock()
            .map_err(|_| ScanError::ScanInProgress)?;

        let result = self.run(request, output, shutdown, &mut progress).await;
        match &result {
            Ok(_) => {}
            Err(ScanError::Cancelled) => enter(&mut progress, ScanPhase::Canceled),
            Err(e) => {
                warn!("Scan failed: {}", e);
                enter(&mut progress, ScanPhase::Failed);
            }
        }
        result
    }

    /// Ask the device to cancel the active job
    ///
    /// Does nothing when no job is held. Failures are logged and never
    /// raised; the next poll observes the device's decision.
    pub async fn cancel(&self) -> Option<CancelReceipt> {
        let job = self.active_job.lock().clone();
        let Some(job) = job else {
            debug!("No active job to cancel");
            return None;
        };

        match self.client.cancel_job(&job).await {
            Ok(receipt) => {
                info!(
                    status = receipt.status,
                    body = %receipt.body,
                    "Cancel request for {} answered",
                    job
                );
                Some(receipt)
            }
            Err(e) => {
                warn!("Cancel request for {} failed: {}", job, e);
                None
            }
        }
    }

    // =========================================================================
    // State Machine
    // =========================================================================

    async fn run<F>(
        &self,
        request: ScanRequest,
        output: &Path,
        shutdown: &CancellationToken,
        progress: &mut F,
    ) -> Result<ScanOutcome>
    where
        F: FnMut(ScanPhase),
    {
        info!(
            "Scanning {}x{} to {}",
            request.width,
            request.height,
            output.display()
        );

        enter(progress, ScanPhase::WaitingForIdle);
        self.wait_for_idle(shutdown).await?;

        enter(progress, ScanPhase::JobSubmitted);
        let job = self.client.create_scan_job(&request).await?;
        let _active = ActiveJob::hold(&self.active_job, job.clone());

        enter(progress, ScanPhase::PollingForImage);
        let mut cancel_sent = false;
        let image = match self.poll_for_image(&job, shutdown, &mut cancel_sent).await? {
            ImagePoll::Ready(image) => image,
            ImagePoll::Ended(final_state) => {
                info!("Job {} ended ({}) without an image", job, final_state);
                let phase = if final_state == JobState::Canceled {
                    ScanPhase::Canceled
                } else {
                    ScanPhase::Done
                };
                enter(progress, phase);
                return Ok(ScanOutcome::NoImage { final_state });
            }
        };

        enter(progress, ScanPhase::Downloading);
        info!(
            "Page ready: {}x{} at {}",
            image.image_width, image.image_height, image.binary_url
        );
        let bytes = self.client.fetch_binary(&image.binary_url).await?;
        tokio::fs::write(output, &bytes).await?;
        info!("Saved {} bytes to {}", bytes.len(), output.display());

        // The image is on disk; from here on failures only cost the device cleanup
        enter(progress, ScanPhase::DrainingToTerminal);
        let final_state = match self.drain(&job, shutdown, &mut cancel_sent).await {
            Ok(state) => Some(state),
            Err(e) => {
                warn!("Failed to wait for job {} to finish: {}", job, e);
                None
            }
        };

        enter(progress, ScanPhase::Done);
        Ok(ScanOutcome::Saved {
            path: output.to_path_buf(),
            image_width: image.image_width,
            image_height: image.image_height,
            bytes: bytes.len(),
            final_state,
        })
    }

    async fn wait_for_idle(&self, shutdown: &CancellationToken) -> Result<()> {
        loop {
            if shutdown.is_cancelled() {
                return Err(ScanError::Cancelled);
            }

            let state = self.client.get_scanner_state().await?;
            if shutdown.is_cancelled() {
                return Err(ScanError::Cancelled);
            }
            if state.is_idle() {
                return Ok(());
            }

            debug!("Scanner is {}, waiting", state);
            if self.pause(shutdown).await {
                return Err(ScanError::Cancelled);
            }
        }
    }

    async fn poll_for_image(
        &self,
        job: &JobHandle,
        shutdown: &CancellationToken,
        cancel_sent: &mut bool,
    ) -> Result<ImagePoll> {
        loop {
            let status = self.client.get_job_state(job).await?;

            if status.state.is_terminal() {
                return Ok(ImagePoll::Ended(status.state));
            }
            if let Some(image) = status.ready_image()? {
                return Ok(ImagePoll::Ready(image));
            }

            self.wait_or_cancel(shutdown, cancel_sent).await;
        }
    }

    async fn drain(
        &self,
        job: &JobHandle,
        shutdown: &CancellationToken,
        cancel_sent: &mut bool,
    ) -> Result<JobState> {
        loop {
            let status = self.client.get_job_state(job).await?;
            if status.state.is_terminal() {
                info!("Job {} finished: {}", job, status.state);
                return Ok(status.state);
            }

            self.wait_or_cancel(shutdown, cancel_sent).await;
        }
    }

    /// Sleep one poll interval; returns true if `shutdown` fired first
    async fn pause(&self, shutdown: &CancellationToken) -> bool {
        tokio::select! {
            _ = shutdown.cancelled() => true,
            _ = tokio::time::sleep(self.poll_interval) => false,
        }
    }

    /// Wait between job polls, forwarding the first cancellation to the device
    async fn wait_or_cancel(&self, shutdown: &CancellationToken, cancel_sent: &mut bool) {
        if *cancel_sent {
            tokio::time::sleep(self.poll_interval).await;
            return;
        }
        if self.pause(shutdown).await {
            info!("Cancellation requested");
            self.cancel().await;
            *cancel_sent = true;
        }
    }
}

fn enter<F: FnMut(ScanPhase)>(progress: &mut F, phase: ScanPhase) {
    debug!("Entering {:?}", phase);
    progress(phase);
}

/// Records the job being driven and clears it when dropped
struct ActiveJob<'a> {
    slot: &'a Mutex<Option<JobHandle>>,
}

impl<'a> ActiveJob<'a> {
    fn hold(slot: &'a Mutex<Option<JobHandle>>, job: JobHandle) -> Self {
        *slot.lock() = Some(job);
        Self { slot }
    }
}

impl Drop for ActiveJob<'_> {
    fn drop(&mut self) {
        self.slot.lock().take();
    }
}
