//! Protocol types for scanner status, scan jobs and pages

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScanError};

/// Default scan resolution in dots per inch
pub const DEFAULT_RESOLUTION: u32 = 300;
/// Default JPEG compression quality factor
pub const DEFAULT_COMPRESSION_QFACTOR: u32 = 35;

// =============================================================================
// Scanner State
// =============================================================================

/// Scanner-level state reported by `GET /Scan/Status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScannerState {
    /// Ready to accept a scan job
    Idle,
    /// Any other device-reported state (busy, warming up, error, ...)
    Busy(String),
}

impl ScannerState {
    /// Check whether a job can be submitted now
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }
}

impl From<&str> for ScannerState {
    fn from(s: &str) -> Self {
        match s {
            "Idle" => Self::Idle,
            other => Self::Busy(other.to_string()),
        }
    }
}

impl fmt::Display for ScannerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Busy(s) => write!(f, "{}", s),
        }
    }
}

// =============================================================================
// Job State
// =============================================================================

/// Opaque job URL returned in the `Location` header on job creation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobHandle(String);

impl JobHandle {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    /// The job URL as reported by the device (absolute or relative)
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Job-level state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Processing,
    Completed,
    Canceled,
    /// Unrecognized device state; keep polling
    Other(String),
}

impl JobState {
    /// Check if the job has reached the end of its lifecycle
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Canceled)
    }
}

impl From<&str> for JobState {
    fn from(s: &str) -> Self {
        match s {
            "Processing" => Self::Processing,
            "Completed" => Self::Completed,
            "Canceled" => Self::Canceled,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Processing => write!(f, "Processing"),
            Self::Completed => write!(f, "Completed"),
            Self::Canceled => write!(f, "Canceled"),
            Self::Other(s) => write!(f, "{}", s),
        }
    }
}

/// Page-level state inside a page record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageState {
    /// Rendered image can be fetched from the binary URL
    ReadyToUpload,
    Other(String),
}

impl From<&str> for PageState {
    fn from(s: &str) -> Self {
        match s {
            "ReadyToUpload" => Self::ReadyToUpload,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for PageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadyToUpload => write!(f, "ReadyToUpload"),
            Self::Other(s) => write!(f, "{}", s),
        }
    }
}

/// Image metadata published once a page is `ReadyToUpload`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyImage {
    pub image_width: u32,
    pub image_height: u32,
    pub binary_url: String,
}

/// Fields shared by pre-scan and post-scan page records
///
/// Image fields are kept as the device sent them and only validated by
/// [`PageFields::ready_image`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageFields {
    pub state: PageState,
    #[serde(default)]
    pub image_width: Option<String>,
    #[serde(default)]
    pub image_height: Option<String>,
    #[serde(default)]
    pub binary_url: Option<String>,
}

impl PageFields {
    /// Image metadata of a `ReadyToUpload` page
    ///
    /// Other page states yield `Ok(None)`. A ready page missing any image
    /// field is a malformed response.
    pub fn ready_image(&self) -> Result<Option<ReadyImage>> {
        if self.state != PageState::ReadyToUpload {
            return Ok(None);
        }
        Ok(Some(ReadyImage {
            image_width: parse_field("ImageWidth", &self.image_width)?,
            image_height: parse_field("ImageHeight", &self.image_height)?,
            binary_url: self
                .binary_url
                .clone()
                .ok_or_else(|| ScanError::missing_element("BinaryURL"))?,
        }))
    }
}

fn parse_field<T: FromStr>(name: &str, value: &Option<String>) -> Result<T> {
    let text = value
        .as_deref()
        .ok_or_else(|| ScanError::missing_element(name))?;
    text.parse()
        .map_err(|_| ScanError::MalformedResponse(format!("invalid <{}> value: {:?}", name, text)))
}

/// Page record of a job, tagged by the element the device reported it in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageRecord {
    PreScan(PageFields),
    PostScan(PageFields),
}

impl PageRecord {
    pub fn fields(&self) -> &PageFields {
        match self {
            Self::PreScan(fields) | Self::PostScan(fields) => fields,
        }
    }
}

/// Decoded response of `GET <job-url>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub state: JobState,
    #[serde(default)]
    pub page: Option<PageRecord>,
}

impl JobStatus {
    /// Image ready for download, if the job is processing and its page is ready
    ///
    /// Page image fields are only read while the job is `Processing`; a
    /// finished job never fails on an incomplete page record.
    pub fn ready_image(&self) -> Result<Option<ReadyImage>> {
        if self.state != JobState::Processing {
            return Ok(None);
        }
        match &self.page {
            Some(page) => page.fields().ready_image(),
            None => Ok(None),
        }
    }
}

/// Device response to a cancel request, kept for diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelReceipt {
    pub status: u16,
    pub body: String,
}

// =============================================================================
// Scan Request
// =============================================================================

/// Tone-map block of a scan job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToneMap {
    pub gamma: u32,
    pub brightness: u32,
    pub contrast: u32,
    pub highlite: u32,
    pub shadow: u32,
}

impl Default for ToneMap {
    fn default() -> Self {
        Self {
            gamma: 1000,
            brightness: 1000,
            contrast: 1000,
            highlite: 179,
            shadow: 25,
        }
    }
}

/// Parameters of one flatbed scan job
///
/// Only the geometry and quality vary between scans; the remaining fields
/// mirror the device defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRequest {
    pub x_resolution: u32,
    pub y_resolution: u32,
    pub x_start: u32,
    pub y_start: u32,
    pub width: u32,
    pub height: u32,
    pub format: String,
    pub compression_qfactor: u32,
    pub color_space: String,
    pub bit_depth: u32,
    pub input_source: String,
    pub gray_rendering: String,
    pub tone_map: ToneMap,
    pub content_type: String,
}

impl ScanRequest {
    /// Create a request for a `width` x `height` pixel area at the crop origin
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            x_resolution: DEFAULT_RESOLUTION,
            y_resolution: DEFAULT_RESOLUTION,
            x_start: 0,
            y_start: 0,
            width,
            height,
            format: "Jpeg".to_string(),
            compression_qfactor: DEFAULT_COMPRESSION_QFACTOR,
            color_space: "Color".to_string(),
            bit_depth: 8,
            input_source: "Platen".to_string(),
            gray_rendering: "NTSC".to_string(),
            tone_map: ToneMap::default(),
            content_type: "Photo".to_string(),
        }
    }

    /// Set both X and Y resolution
    pub fn with_resolution(mut self, dpi: u32) -> Self {
        self.x_resolution = dpi;
        self.y_resolution = dpi;
        self
    }

    /// Set the compression quality factor
    pub fn with_compression_qfactor(mut self, qfactor: u32) -> Self {
        self.compression_qfactor = qfactor;
        self
    }
}

// =============================================================================
// Scan Progress
// =============================================================================

/// States of the scan orchestrator, reported as they are entered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanPhase {
    /// Polling the scanner until it reports `Idle`
    WaitingForIdle,
    /// Submitting the scan job
    JobSubmitted,
    /// Polling the job until a page is ready
    PollingForImage,
    /// Fetching the image and writing the output file
    Downloading,
    /// Waiting for the device to finish the job after the download
    DrainingToTerminal,
    /// Scan finished
    Done,
    /// Device canceled the job before any image was produced
    Canceled,
    /// Scan aborted with an error
    Failed,
}

impl fmt::Display for ScanPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WaitingForIdle => write!(f, "Waiting for scanner"),
            Self::JobSubmitted => write!(f, "Submitting job"),
            Self::PollingForImage => write!(f, "Scanning"),
            Self::Downloading => write!(f, "Downloading"),
            Self::DrainingToTerminal => write!(f, "Finishing"),
            Self::Done => write!(f, "Done"),
            Self::Canceled => write!(f, "Canceled"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Result of a scan that ran to a terminal job state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ScanOutcome {
    /// Image was written to `path`
    Saved {
        path: PathBuf,
        image_width: u32,
        image_height: u32,
        bytes: usize,
        /// `None` when draining the job failed after the image was saved
        final_state: Option<JobState>,
    },
    /// Job ended before a page became ready; nothing was written
    NoImage { final_state: JobState },
}

impl ScanOutcome {
    pub fn is_saved(&self) -> bool {
        matches!(self, Self::Saved { .. })
    }
}
