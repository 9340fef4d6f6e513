//! Scan command - run one flatbed scan into a JPEG file

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use indicatif::{ProgressBar, ProgressStyle};
use ledm_client::{CancellationToken, ScanError, ScanOutcome, Scanner};

use crate::output::OutputContext;

/// Photo print sizes, in inches
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SizePreset {
    /// 5x3.5 landscape
    #[value(name = "5x3.5")]
    LandscapeSmall,
    /// 6x4 landscape
    #[value(name = "6x4")]
    LandscapeMedium,
    /// 7x5 landscape
    #[value(name = "7x5")]
    LandscapeLarge,
    /// 3.5x5 portrait
    #[value(name = "3.5x5")]
    PortraitSmall,
    /// 4x6 portrait
    #[value(name = "4x6")]
    PortraitMedium,
    /// 5x7 portrait
    #[value(name = "5x7")]
    PortraitLarge,
}

impl SizePreset {
    /// Width and height in tenths of an inch
    fn tenths(self) -> (u32, u32) {
        match self {
            Self::LandscapeSmall => (50, 35),
            Self::LandscapeMedium => (60, 40),
            Self::LandscapeLarge => (70, 50),
            Self::PortraitSmall => (35, 50),
            Self::PortraitMedium => (40, 60),
            Self::PortraitLarge => (50, 70),
        }
    }

    /// Pixel dimensions at `dpi`
    pub fn dimensions(self, dpi: u32) -> (u32, u32) {
        let (w, h) = self.tenths();
        (w * dpi / 10, h * dpi / 10)
    }
}

/// Pick the output file: `<dir>/<name>.jpg`, defaulting to a timestamp name
///
/// Refuses to reuse an existing file.
pub fn resolve_output_path(dir: &Path, name: Option<&str>) -> Result<PathBuf> {
    let stem = match name.map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => chrono::Local::now().format("%Y%m%d-%H%M%S").to_string(),
    };

    let path = dir.join(format!("{}.jpg", stem));
    if path.exists() {
        bail!("File already exists: {}", path.display());
    }
    Ok(path)
}

/// Run a scan, cancelling the device job on Ctrl-C
pub async fn scan(
    scanner: &Scanner,
    width: u32,
    height: u32,
    output: &Path,
    ctx: &OutputContext,
) -> Result<()> {
    ctx.info(&format!(
        "Scanning {}x{} to {}...",
        width,
        height,
        output.display()
    ));

    let shutdown = CancellationToken::new();
    let ctrl_c = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let ctrl_c = || async { tokio::signal::ctrl_c().await.is_ok() };
            if watch_interrupts(ctrl_c, shutdown).await {
                std::process::exit(130);
            }
        })
    };

    let pb = if ctx.is_interactive() {
        ProgressBar::new_spinner()
    } else {
        ProgressBar::hidden()
    };
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .context("Invalid progress template")?,
    );
    pb.enable_steady_tick(Duration::from_millis(120));

    let request = scanner.request(width, height);
    let result = scanner
        .scan_with(request, output, &shutdown, |phase| {
            pb.set_message(format!("{}...", phase));
        })
        .await;
    ctrl_c.abort();
    pb.finish_and_clear();

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            // A failed scan may leave a partial file behind
            if let Some(warning) = remove_partial_file(output).await {
                ctx.warn(&warning);
            }
            if matches!(e, ScanError::Cancelled) {
                bail!("Scan cancelled before the scanner became ready");
            }
            return Err(e).context("Scan failed");
        }
    };

    match &outcome {
        ScanOutcome::Saved {
            path,
            image_width,
            image_height,
            bytes,
            final_state,
        } => {
            ctx.success(&format!("Saved {}", path.display()));
            ctx.print_result(
                &outcome,
                &[
                    ("File", path.display().to_string()),
                    ("Image", format!("{}x{}", image_width, image_height)),
                    ("Bytes", bytes.to_string()),
                    (
                        "Job",
                        final_state
                            .as_ref()
                            .map(ToString::to_string)
                            .unwrap_or_else(|| "unknown".to_string()),
                    ),
                ],
            );
        }
        ScanOutcome::NoImage { final_state } => {
            ctx.warn(&format!(
                "Job ended ({}) before an image was produced",
                final_state
            ));
            ctx.print_result(&outcome, &[("Job", final_state.to_string())]);
        }
    }

    Ok(())
}

/// Cancel `shutdown` on the first interrupt
///
/// Returns true when a second interrupt arrives, false if the signal source
/// goes away first.
async fn watch_interrupts<F, Fut>(mut interrupted: F, shutdown: CancellationToken) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    if !interrupted().await {
        return false;
    }
    eprintln!("Cancelling scan, press Ctrl-C again to quit");
    shutdown.cancel();

    interrupted().await
}

/// Delete whatever a failed scan left at `output`
///
/// Returns a warning when the file exists but cannot be removed.
async fn remove_partial_file(output: &Path) -> Option<String> {
    if !output.exists() {
        return None;
    }
    tokio::fs::remove_file(output).await.err().map(|e| {
        format!(
            "Could not remove partial file {}: {}",
            output.display(),
            e
        )
    })
}
