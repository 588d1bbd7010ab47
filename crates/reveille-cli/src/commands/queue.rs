use crate::commands::common::{format_queue_lines, load_local_state};
use crate::config::CliConfig;
use crate::error::CliError;

pub async fn run_queue(config: &CliConfig, as_json: bool) -> Result<(), CliError> {
    let (_, operations) = load_local_state(config).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&operations)?);
        return Ok(());
    }

    if operations.is_empty() {
        println!("Offline queue is empty.");
        return Ok(());
    }
    for line in format_queue_lines(&operations) {
        println!("{line}");
    }
    Ok(())
}
