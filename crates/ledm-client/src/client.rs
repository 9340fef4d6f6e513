//! LEDM scanner HTTP client implementation

use bytes::Bytes;
use reqwest::header::{CONTENT_TYPE, LOCATION};
use reqwest::{Client, Response, StatusCode};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::codec;
use crate::config::ScannerConfig;
use crate::error::{Result, ScanError};
use crate::types::*;

const XML_CONTENT_TYPE: &str = "text/xml";

/// Client for the scanner's HTTP/XML control protocol
///
/// Each method is a single round trip. The underlying connection is kept
/// alive and reused for every request of the session.
#[derive(Debug, Clone)]
pub struct DeviceClient {
    client: Client,
    base_url: Url,
    config: ScannerConfig,
}

impl DeviceClient {
    /// Create a new client from configuration
    pub fn new(config: ScannerConfig) -> Result<Self> {
        let client = Client::builder()
            .http1_only()
            .pool_max_idle_per_host(1)
            .timeout(config.timeouts.request())
            .connect_timeout(config.timeouts.connect())
            .build()
            .map_err(ScanError::Transport)?;

        let base_url = Url::parse(&config.base_url())?;

        debug!("Scanner client created for {}", base_url);

        Ok(Self {
            client,
            base_url,
            config,
        })
    }

    /// Create a client for `host:port` with default settings
    pub fn connect(host: &str, port: u16) -> Result<Self> {
        Self::new(ScannerConfig::builder(host).port(port).build())
    }

    /// Create a client from a YAML config file
    pub fn from_yaml_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        Self::new(ScannerConfig::from_yaml_file(path)?)
    }

    /// Get the base URL
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Get the configuration
    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    // =========================================================================
    // Protocol Operations
    // =========================================================================

    /// Query the scanner state (`GET /Scan/Status`)
    #[instrument(skip(self))]
    pub async fn get_scanner_state(&self) -> Result<ScannerState> {
        const OP: &str = "GET scanner status";
        let url = self.build_url(&self.config.endpoints.status)?;

        let response = self.send(OP, self.client.get(url)).await?;
        let body = self.expect_body(OP, response, StatusCode::OK).await?;

        let state = codec::decode_scanner_state(&body)?;
        debug!("Scanner state: {}", state);
        Ok(state)
    }

    /// Submit a scan job (`POST /Scan/Jobs`)
    ///
    /// The device answers `201 Created` with the job URL in `Location`.
    #[instrument(skip(self))]
    pub async fn create_scan_job(&self, request: &ScanRequest) -> Result<JobHandle> {
        const OP: &str = "POST scan job";
        let url = self.build_url(&self.config.endpoints.jobs)?;
        let body = codec::encode_scan_job(request);

        let response = self
            .send(
                OP,
                self.client
                    .post(url)
                    .header(CONTENT_TYPE, XML_CONTENT_TYPE)
                    .body(body),
            )
            .await?;

        let status = response.status();
        if status != StatusCode::CREATED {
            return Err(ScanError::unexpected_status(OP, status));
        }

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(JobHandle::new);

        // No content expected; drain so the connection can be reused
        response
            .bytes()
            .await
            .map_err(|e| ScanError::from_transport(OP, e))?;

        let job = location.ok_or_else(|| {
            ScanError::MalformedResponse("job creation response has no Location header".into())
        })?;
        info!("Created scan job {}", job);
        Ok(job)
    }

    /// Query the state of a job (`GET <job-url>`)
    #[instrument(skip(self))]
    pub async fn get_job_state(&self, job: &JobHandle) -> Result<JobStatus> {
        const OP: &str = "GET job state";
        let url = self.build_url(job.as_str())?;

        let response = self.send(OP, self.client.get(url)).await?;
        let body = self.expect_body(OP, response, StatusCode::OK).await?;

        let status = codec::decode_job_status(&body)?;
        debug!(
            "Job state: {}, page state: {}",
            status.state,
            status
                .page
                .as_ref()
                .map(|p| p.fields().state.to_string())
                .unwrap_or_else(|| "-".to_string())
        );
        Ok(status)
    }

    /// Fetch a device-supplied URL and return the raw body
    ///
    /// The status code is not checked; only transport failures are errors.
    #[instrument(skip(self))]
    pub async fn fetch_binary(&self, url: &str) -> Result<Bytes> {
        const OP: &str = "GET binary";
        let url = self.build_url(url)?;

        let response = self.send(OP, self.client.get(url)).await?;
        let status = response.status();
        if !status.is_success() {
            warn!("Binary fetch answered HTTP {}", status);
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ScanError::from_transport(OP, e))?;
        info!("Fetched {} bytes", bytes.len());
        Ok(bytes)
    }

    /// Ask the device to cancel a job (`PUT /Scan/Jobs`)
    ///
    /// Non-success statuses are returned in the receipt, not as errors.
    #[instrument(skip(self))]
    pub async fn cancel_job(&self, job: &JobHandle) -> Result<CancelReceipt> {
        const OP: &str = "PUT cancel job";
        let url = self.build_url(&self.config.endpoints.jobs)?;
        let body = codec::encode_cancel(job);

        let response = self
            .send(
                OP,
                self.client
                    .put(url)
                    .header(CONTENT_TYPE, XML_CONTENT_TYPE)
                    .body(body),
            )
            .await?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ScanError::from_transport(OP, e))?;

        info!("Cancel of {} answered HTTP {}", job, status);
        Ok(CancelReceipt {
            status: status.as_u16(),
            body,
        })
    }

    // =========================================================================
    // Helper Methods
    // =========================================================================

    fn build_url(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).map_err(Into::into)
    }

    async fn send(
        &self,
        operation: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<Response> {
        request
            .send()
            .await
            .map_err(|e| ScanError::from_transport(operation, e))
    }

    async fn expect_body(
        &self,
        operation: &'static str,
        response: Response,
        expected: StatusCode,
    ) -> Result<String> {
        let status = response.status();
        if status != expected {
            return Err(ScanError::unexpected_status(operation, status));
        }
        response
            .text()
            .await
            .map_err(|e| ScanError::from_transport(operation, e))
    }
}
