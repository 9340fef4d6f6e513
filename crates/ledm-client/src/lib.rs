//! LEDM Scanner Client Library
//!
//! Drives a network scanner's HTTP/XML control protocol through one flatbed
//! scan: wait for the device to become idle, submit the job, poll until the
//! page is ready, download it and let the device finish the job.
//!
//! # Example
//!
//! ```rust,no_run
//! use ledm_client::{Scanner, ScannerConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ScannerConfig::builder("printer.local").port(80).build();
//!     let scanner = Scanner::from_config(config)?;
//!
//!     // 6x4 inch landscape at 300 dpi
//!     let outcome = scanner.scan(1800, 1200, "photo.jpg").await?;
//!     println!("{:?}", outcome);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Cancellation
//!
//! [`Scanner::scan_with`] takes a `CancellationToken`. Firing it while the
//! scanner is busy abandons the scan; firing it once a job exists asks the
//! device to cancel the job, and the scan ends when the device agrees.
//!
//! # Testing
//!
//! The `testing` module provides a scriptable fake scanner:
//!
//! ```rust,ignore
//! use ledm_client::testing::{FakeScanner, JobStep, TestServer};
//!
//! let fake = FakeScanner::new().with_job_steps(vec![JobStep::completed()]);
//! let server = TestServer::start(fake.router()).await?;
//! let outcome = server.scanner.scan(1800, 1200, "scan.jpg").await?;
//! ```

mod client;
pub mod codec;
mod config;
mod error;
mod scanner;
pub mod testing;
mod types;

pub use client::DeviceClient;
pub use config::*;
pub use error::{Result, ScanError};
pub use scanner::Scanner;
pub use types::*;

// Re-export the cancellation token used by `Scanner::scan_with`
pub use tokio_util::sync::CancellationToken;
