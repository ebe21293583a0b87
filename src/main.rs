use std::error::Error;

use tide_client::logging::{init_logging, LogLevel};
use tide_client::{Collaborators, EngineConfig, GatewayEngine, SessionSnapshot};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let verbose = std::env::args().filter(|a| a == "-v" || a == "--verbose").count();
    init_logging(LogLevel::from_verbosity(u8::try_from(verbose).unwrap_or(u8::MAX)))?;

    let config = match EngineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("invalid configuration: {}", e);
            return Err(e.into());
        }
    };

    let collaborators = match Collaborators::system(&config) {
        Ok(collaborators) => collaborators,
        Err(e) => {
            error!("cannot build gateway client: {}", e);
            return Err(e.into());
        }
    };
    let engine = GatewayEngine::spawn(config, collaborators);
    let mut reader = engine.subscribe();
    engine.start_discovery().await?;

    loop {
        tokio::select! {
            changed = reader.changed() => match changed {
                Some(snapshot) => report(&snapshot),
                None => break,
            },
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!("signal handler failed: {}", e);
                }
                info!("shutting down");
                engine.shutdown().await?;
                break;
            }
        }
    }

    Ok(())
}

fn report(snapshot: &SessionSnapshot) {
    let status = &snapshot.status;
    match status.bound_address {
        Some(address) => info!(
            gateway = %address,
            tor = %status.upstream_status,
            mode = status.mode.as_deref().unwrap_or("-"),
            egress = status.egress_address.as_deref().unwrap_or("-"),
            redirection = snapshot.redirection_enabled,
            "gateway status"
        ),
        None => info!(redirection = snapshot.redirection_enabled, "searching for gateway"),
    }
    if let Some(settings) = snapshot.proxy_settings() {
        info!("proxy settings\n{}", settings);
    }
}
