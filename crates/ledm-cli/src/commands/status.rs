//! Status command - show the scanner state

use anyhow::{Context, Result};
use ledm_client::DeviceClient;
use serde::Serialize;

use crate::output::OutputContext;

#[derive(Serialize)]
struct StatusReport {
    scanner: String,
    state: String,
    idle: bool,
}

/// Query and print the scanner state
pub async fn status(client: &DeviceClient, ctx: &OutputContext) -> Result<()> {
    let state = client
        .get_scanner_state()
        .await
        .context("Failed to query scanner state")?;

    let report = StatusReport {
        scanner: client.base_url().to_string(),
        state: state.to_string(),
        idle: state.is_idle(),
    };

    ctx.print_result(
        &report,
        &[
            ("Scanner", report.scanner.clone()),
            ("State", report.state.clone()),
        ],
    );
    Ok(())
}
