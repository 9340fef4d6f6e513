//! Cancel command - ask the scanner to cancel a job by URL

use anyhow::{Context, Result};
use ledm_client::{DeviceClient, JobHandle};

use crate::output::OutputContext;

/// Send a best-effort cancel request for `job_url`
pub async fn cancel(client: &DeviceClient, job_url: &str, ctx: &OutputContext) -> Result<()> {
    let job = JobHandle::new(job_url);
    let receipt = client
        .cancel_job(&job)
        .await
        .context("Failed to send cancel request")?;

    if (200..300).contains(&receipt.status) {
        ctx.success(&format!("Cancel request for {} accepted", job));
    } else {
        ctx.warn(&format!(
            "Scanner answered HTTP {} to the cancel request",
            receipt.status
        ));
    }

    ctx.print_result(
        &receipt,
        &[
            ("Status", receipt.status.to_string()),
            ("Body", receipt.body.trim().to_string()),
        ],
    );
    Ok(())
}
