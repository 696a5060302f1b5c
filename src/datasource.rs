//! The VirtualBox datasource: discovery of metadata, userdata and vendordata
//! at boot, followed by the network-dependent setup step.
//!
//! Metadata keys with special meaning:
//!
//! * `local-hostname` sets the hostname.
//! * `instance-id` sets the instance id; without it the DMI product uuid is
//!   used.
//! * `network` (with optional `network.encoding`) holds a network config in
//!   version 1 or version 2 format.
//! * `redact` (or the older `cleanup-guestinfo`) lists guest properties to
//!   clear once read.
//! * `wait-on-network` selects the address families setup waits for.

use std::fs;
use std::sync::Arc;

use log::{debug, error, info};
use serde_json::Value;

use crate::config::Config;
use crate::error::Result;
use crate::exec::{ProcessExecutor, TokioExecutor};
use crate::metadata::{self, Metadata, INSTANCE_ID, NETWORK};
use crate::network::{
    self, HostInfo, HostInfoProvider, SystemHostInfo, WaitOnNetwork, LOCAL_IPV4, LOCAL_IPV6,
};
use crate::platform::{Dmi, PathResolver, PlatformIdentity, SearchPath};
use crate::redact;
use crate::transport::{
    self, Environment, ProbeContext, ProcessEnvironment, ResolvedTransport, TransportKind,
    TRANSPORTS,
};

/// Everything the datasource needs from the host it runs on.
#[derive(Clone)]
pub struct Collaborators {
    pub env: Arc<dyn Environment>,
    pub platform: Arc<dyn PlatformIdentity>,
    pub paths: Arc<dyn PathResolver>,
    pub exec: Arc<dyn ProcessExecutor>,
    pub host_info: Arc<dyn HostInfoProvider>,
}

impl Collaborators {
    pub fn system(cfg: &Config) -> Self {
        Self {
            env: Arc::new(ProcessEnvironment),
            platform: Arc::new(Dmi::new(&cfg.product_name_path)),
            paths: Arc::new(SearchPath),
            exec: Arc::new(TokioExecutor),
            host_info: Arc::new(SystemHostInfo),
        }
    }
}

pub struct DataSource {
    config: Config,
    host: Collaborators,
    data_access_method: Option<TransportKind>,
    pub metadata: Metadata,
    pub userdata_raw: Option<String>,
    pub vendordata_raw: Option<String>,
}

impl DataSource {
    pub fn new(config: Config, host: Collaborators) -> Self {
        Self {
            config,
            host,
            data_access_method: None,
            metadata: Metadata::new(),
            userdata_raw: None,
            vendordata_raw: None,
        }
    }

    /// Loads metadata, userdata and vendordata from the first transport
    /// that has any, then redacts what the metadata asks for.
    ///
    /// Returns the transport used, or `None` when no transport had data.
    pub async fn get_data(&mut self) -> Result<Option<ResolvedTransport>> {
        let ctx = ProbeContext {
            env: self.host.env.as_ref(),
            platform: self.host.platform.as_ref(),
            paths: self.host.paths.as_ref(),
            exec: self.host.exec.clone(),
            control_tool: &self.config.control_tool,
            max_list_depth: self.config.max_list_depth,
        };

        let Some((transport, raw)) = transport::select(&TRANSPORTS, &ctx).await? else {
            error!("get_data: failed to find a valid data access method");
            return Ok(None);
        };
        self.data_access_method = Some(transport.kind());
        info!("using data access method {}", self.subplatform());

        self.metadata = metadata::process(metadata::load(raw.metadata.as_deref())?)?;
        self.userdata_raw = raw.userdata;
        self.vendordata_raw = raw.vendordata;

        redact::redact(&metadata::keys_to_redact(&self.metadata), &transport).await;

        let has_text = |s: &Option<String>| s.as_ref().is_some_and(|s| !s.is_empty());
        if self.metadata.is_empty() && !has_text(&self.userdata_raw) && !has_text(&self.vendordata_raw)
        {
            return Ok(None);
        }
        Ok(Some(transport))
    }

    /// Waits for the network the metadata asks for, reflects the local
    /// addresses back into guest properties and merges host facts into the
    /// metadata.
    pub async fn setup(&mut self, transport: &ResolvedTransport) -> Result<()> {
        let wait = WaitOnNetwork::from_metadata(&self.metadata);
        let host_info = network::wait_on_network(
            self.host.host_info.as_ref(),
            wait,
            self.config.poll_interval(),
            self.config.wait_timeout(),
        )
        .await?;
        info!("got host-info: {:?}", host_info);

        advertise_local_ip_addrs(&host_info, transport).await;

        metadata::merge_missing(&mut self.metadata, host_info.to_metadata());
        Ok(())
    }

    /// `"<method> (<metadata key in that transport>)"`.
    pub fn subplatform(&self) -> String {
        match self.data_access_method {
            Some(kind) => format!("{} ({})", kind, kind.key_name("metadata")),
            None => "unknown".to_string(),
        }
    }

    pub fn instance_id(&mut self) -> Result<String> {
        if let Some(id) = self.metadata.get(INSTANCE_ID) {
            return Ok(match id {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            });
        }
        let id = fs::read_to_string(&self.config.product_uuid_path)?
            .trim_end()
            .to_lowercase();
        self.metadata
            .insert(INSTANCE_ID.to_string(), Value::String(id.clone()));
        Ok(id)
    }

    pub fn local_hostname(&self) -> Option<&str> {
        self.metadata.get("local-hostname").and_then(Value::as_str)
    }

    pub fn public_ssh_keys(&self) -> Vec<String> {
        metadata::public_ssh_keys(&self.metadata)
    }

    /// Network config carried in metadata, if any.
    pub fn network_config(&self) -> Option<&Value> {
        match self.metadata.get(NETWORK).and_then(|n| n.get("config")) {
            Some(config) => {
                debug!("using metadata network config");
                Some(config)
            }
            None => {
                debug!("using fallback network config");
                None
            }
        }
    }
}

/// Publishes the default addresses in `local-ipv4` / `local-ipv6` guest
/// properties.
async fn advertise_local_ip_addrs(host_info: &HostInfo, transport: &ResolvedTransport) {
    let Some(store) = transport.guest_property() else {
        return;
    };
    for (key, addr) in [
        (LOCAL_IPV4, &host_info.local_ipv4),
        (LOCAL_IPV6, &host_info.local_ipv6),
    ] {
        if let Some(addr) = addr {
            if store.set_value(key, addr).await {
                info!("advertised {} address {} in guestinfo", key, addr);
            }
        }
    }
}
