use crate::config::CliConfig;
use crate::error::CliError;
use crate::runtime::{load_device_id, open_state};

pub async fn run_device(config: &CliConfig) -> Result<(), CliError> {
    let (_db, state) = open_state(&config.resolve_db_path()?)?;
    let device_id = load_device_id(&state).await?;
    println!("{device_id}");
    Ok(())
}
