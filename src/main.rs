//! Boot-time discovery of VirtualBox guest configuration.

use log::{error, info};
use tokio::signal;

mod codec;
mod config;
mod datasource;
mod error;
mod exec;
mod keys;
mod metadata;
mod network;
mod platform;
mod redact;
mod transport;

use config::Config;
use datasource::{Collaborators, DataSource};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    // Load configuration
    let cfg = Config::load()?;
    info!("Starting guestinfo discovery with config: {:?}", cfg);

    let host = Collaborators::system(&cfg);
    let mut ds = DataSource::new(cfg, host);

    let Some(transport) = ds.get_data().await? else {
        error!("No usable guest configuration found");
        return Err(error::Error::NoTransport.into());
    };
    info!(
        "Discovered configuration via {}: userdata={}, vendordata={}",
        ds.subplatform(),
        ds.userdata_raw.is_some(),
        ds.vendordata_raw.is_some()
    );

    // The network wait may block indefinitely; let Ctrl+C end it.
    tokio::select! {
        res = ds.setup(&transport) => res?,
        res = signal::ctrl_c() => {
            res?;
            info!("Received Ctrl+C while waiting on network, shutting down...");
            return Ok(());
        }
    }

    info!(
        "local hostname: {:?}, {} ssh key(s), {} network config",
        ds.local_hostname(),
        ds.public_ssh_keys().len(),
        if ds.network_config().is_some() { "metadata" } else { "fallback" }
    );

    match ds.instance_id() {
        Ok(id) => info!("instance id: {}", id),
        Err(e) => error!("Unable to determine instance id: {}", e),
    }

    println!("{}", serde_json::to_string_pretty(&ds.metadata)?);
    Ok(())
}
