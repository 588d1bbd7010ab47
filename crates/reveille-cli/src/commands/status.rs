use serde_json::json;

use crate::commands::common::{format_status_lines, load_local_state, status_items};
use crate::config::CliConfig;
use crate::error::CliError;

pub async fn run_status(config: &CliConfig, as_json: bool) -> Result<(), CliError> {
    let (ledger, queue) = load_local_state(config).await?;

    if as_json {
        let devices: Vec<_> = ledger.devices.values().collect();
        let payload = json!({
            "lastFullSync": ledger.last_full_sync,
            "alarms": status_items(&ledger),
            "devices": devices,
            "conflicts": ledger.conflicts,
            "queued": queue.len(),
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    for line in format_status_lines(&ledger) {
        println!("{line}");
    }
    if !queue.is_empty() {
        println!();
        println!("{} operation(s) waiting for the hub", queue.len());
    }
    Ok(())
}
