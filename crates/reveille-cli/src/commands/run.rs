use reveille_core::ConnectionEvent;
use tokio::sync::broadcast::error::RecvError;

use crate::config::CliConfig;
use crate::error::CliError;
use crate::runtime::Runtime;

pub async fn run_daemon(config: &CliConfig) -> Result<(), CliError> {
    let runtime = Runtime::build(config).await?;
    let mut events = runtime.connection.subscribe();

    runtime.sync.start();
    runtime.presence.start();
    runtime.connect().await;
    println!(
        "Syncing as {} (Ctrl-C to stop)",
        runtime.connection.device_id()
    );

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
            event = events.recv() => match event {
                Ok(ConnectionEvent::GaveUp { attempts }) => {
                    eprintln!("Hub unreachable after {attempts} retries; changes stay queued locally");
                }
                Ok(ConnectionEvent::StatusChanged { connected }) => {
                    tracing::debug!(connected, "Hub connection status changed");
                }
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
        }
    }

    runtime.shutdown().await?;
    println!("Stopped");
    Ok(())
}
