//! Host network facts and the wait for addresses to come up.
//!
//! The datasource can be told through metadata to block until the guest
//! holds a usable IPv4 and/or IPv6 address:
//!
//! ```yaml
//! wait-on-network:
//!   ipv4: true
//!   ipv6: false
//! ```
//!
//! Each poll takes a fresh [`HostInfo`] snapshot. Loopback, link-local and
//! unspecified addresses never count as usable.

use std::collections::HashMap;
use std::fs;
use std::net::IpAddr;
use std::time::Duration;

use log::debug;
use network_interface::{Addr, NetworkInterface, NetworkInterfaceConfig};
use serde_json::{json, Map, Value};
use tokio::time::{sleep, Instant};

use crate::error::{Error, Result};
use crate::metadata::Metadata;

pub const LOCAL_IPV4: &str = "local-ipv4";
pub const LOCAL_IPV6: &str = "local-ipv6";
pub const WAIT_ON_NETWORK: &str = "wait-on-network";

const LOOPBACK_MAC: &str = "00:00:00:00:00:00";

/// One address as enumerated on an interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddrInfo {
    pub addr: String,
    pub netmask: Option<String>,
    pub broadcast: Option<String>,
}

impl AddrInfo {
    fn to_value(&self, include_addr: bool) -> Map<String, Value> {
        let mut m = Map::new();
        if include_addr {
            m.insert("addr".to_string(), json!(self.addr));
        }
        if let Some(ref b) = self.broadcast {
            m.insert("broadcast".to_string(), json!(b));
        }
        if let Some(ref n) = self.netmask {
            m.insert("netmask".to_string(), json!(n));
        }
        m
    }
}

/// Addresses of one network device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceAddrs {
    pub name: String,
    pub mac: Option<String>,
    pub ipv4: Vec<AddrInfo>,
    pub ipv6: Vec<AddrInfo>,
}

/// Snapshot of the host's name and addresses. The `by_*` maps keep
/// interface enumeration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostInfo {
    pub hostname: Option<String>,
    pub local_ipv4: Option<String>,
    pub local_ipv6: Option<String>,
    pub by_mac: Map<String, Value>,
    pub by_ipv4: Map<String, Value>,
    pub by_ipv6: Map<String, Value>,
}

/// False for loopback, link-local, unspecified or unparsable addresses.
pub fn is_valid_ip_addr(addr: &str) -> bool {
    match addr.parse::<IpAddr>() {
        Ok(IpAddr::V4(a)) => !(a.is_loopback() || a.is_link_local() || a.is_unspecified()),
        Ok(IpAddr::V6(a)) => {
            let link_local = (a.segments()[0] & 0xffc0) == 0xfe80;
            !(a.is_loopback() || link_local || a.is_unspecified())
        }
        Err(_) => false,
    }
}

impl HostInfo {
    pub fn new(
        hostname: Option<String>,
        defaults: (Option<String>, Option<String>),
        interfaces: &[InterfaceAddrs],
    ) -> Self {
        let mut info = HostInfo {
            hostname: hostname.filter(|h| !h.is_empty()),
            local_ipv4: defaults.0,
            local_ipv6: defaults.1,
            ..Default::default()
        };

        for iface in interfaces {
            let mac = iface.mac.as_deref();
            if mac == Some(LOOPBACK_MAC) {
                continue;
            }

            if let Some(mac) = mac {
                if !iface.ipv4.is_empty() || !iface.ipv6.is_empty() {
                    let valid = |addrs: &[AddrInfo]| -> Vec<Value> {
                        addrs
                            .iter()
                            .filter(|a| is_valid_ip_addr(&a.addr))
                            .map(|a| Value::Object(a.to_value(true)))
                            .collect()
                    };
                    let mut entry = Map::new();
                    if !iface.ipv4.is_empty() {
                        entry.insert("ipv4".to_string(), Value::Array(valid(&iface.ipv4)));
                    }
                    if !iface.ipv6.is_empty() {
                        entry.insert("ipv6".to_string(), Value::Array(valid(&iface.ipv6)));
                    }
                    info.by_mac.insert(mac.to_string(), Value::Object(entry));
                }
            }

            for (addrs, by_addr) in [
                (&iface.ipv4, &mut info.by_ipv4),
                (&iface.ipv6, &mut info.by_ipv6),
            ] {
                for a in addrs.iter().filter(|a| is_valid_ip_addr(&a.addr)) {
                    let mut val = a.to_value(false);
                    if let Some(mac) = mac {
                        val.insert("mac".to_string(), json!(mac));
                    }
                    by_addr.insert(a.addr.clone(), Value::Object(val));
                }
            }
        }
        info
    }

    /// Metadata-shaped view of the snapshot, ready to merge.
    pub fn to_metadata(&self) -> Metadata {
        let mut md = Metadata::new();
        md.insert(
            "network".to_string(),
            json!({
                "interfaces": {
                    "by-mac": self.by_mac,
                    "by-ipv4": self.by_ipv4,
                    "by-ipv6": self.by_ipv6,
                }
            }),
        );
        if let Some(ref h) = self.hostname {
            for key in ["hostname", "local-hostname", "local_hostname"] {
                md.insert(key.to_string(), json!(h));
            }
        }
        if let Some(ref ip) = self.local_ipv4 {
            md.insert(LOCAL_IPV4.to_string(), json!(ip));
        }
        if let Some(ref ip) = self.local_ipv6 {
            md.insert(LOCAL_IPV6.to_string(), json!(ip));
        }
        md
    }
}

pub trait HostInfoProvider: Send + Sync {
    fn current_snapshot(&self) -> Result<HostInfo>;

    /// Addresses of the devices carrying the default routes.
    fn default_route_addresses(&self) -> Result<(Option<String>, Option<String>)>;
}

/// Reads interfaces, routes and the hostname from the running system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemHostInfo;

const PROC_ROUTE: &str = "/proc/net/route";
const PROC_IPV6_ROUTE: &str = "/proc/net/ipv6_route";

impl SystemHostInfo {
    /// Interfaces grouped by name, in enumeration order.
    fn interfaces() -> Result<Vec<InterfaceAddrs>> {
        let listed = NetworkInterface::show().map_err(|e| Error::HostInfo(e.to_string()))?;

        let mut out: Vec<InterfaceAddrs> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for iface in listed {
            let pos = *index.entry(iface.name.clone()).or_insert_with(|| {
                out.push(InterfaceAddrs {
                    name: iface.name.clone(),
                    ..Default::default()
                });
                out.len() - 1
            });
            let entry = &mut out[pos];
            if entry.mac.is_none() {
                entry.mac = iface.mac_addr.clone().map(|m| m.to_lowercase());
            }
            for addr in iface.addr {
                match addr {
                    Addr::V4(v4) => entry.ipv4.push(AddrInfo {
                        addr: v4.ip.to_string(),
                        netmask: v4.netmask.map(|n| n.to_string()),
                        broadcast: v4.broadcast.map(|b| b.to_string()),
                    }),
                    Addr::V6(v6) => entry.ipv6.push(AddrInfo {
                        addr: v6.ip.to_string(),
                        netmask: v6.netmask.map(|n| n.to_string()),
                        broadcast: v6.broadcast.map(|b| b.to_string()),
                    }),
                }
            }
        }
        Ok(out)
    }

    fn hostname() -> Option<String> {
        nix::unistd::gethostname()
            .ok()
            .and_then(|h| h.into_string().ok())
    }

    fn route_devices() -> (Option<String>, Option<String>) {
        let v4 = fs::read_to_string(PROC_ROUTE)
            .ok()
            .and_then(|t| default_route_device_v4(&t));
        let v6 = fs::read_to_string(PROC_IPV6_ROUTE)
            .ok()
            .and_then(|t| default_route_device_v6(&t));
        (v4, v6)
    }
}

impl HostInfoProvider for SystemHostInfo {
    fn current_snapshot(&self) -> Result<HostInfo> {
        let interfaces = Self::interfaces()?;
        let (dev4, dev6) = Self::route_devices();
        Ok(snapshot(
            Self::hostname(),
            &interfaces,
            dev4.as_deref(),
            dev6.as_deref(),
        ))
    }

    fn default_route_addresses(&self) -> Result<(Option<String>, Option<String>)> {
        let interfaces = Self::interfaces()?;
        let (dev4, dev6) = Self::route_devices();
        Ok(default_addresses(&interfaces, dev4.as_deref(), dev6.as_deref()))
    }
}

/// Device of the IPv4 default route in `/proc/net/route` format.
pub fn default_route_device_v4(table: &str) -> Option<String> {
    table.lines().skip(1).find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        // Iface Destination Gateway Flags RefCnt Use Metric Mask ...
        match fields.as_slice() {
            [iface, "00000000", _, _, _, _, _, "00000000", ..] => Some(iface.to_string()),
            _ => None,
        }
    })
}

/// Device of the IPv6 default route in `/proc/net/ipv6_route` format.
pub fn default_route_device_v6(table: &str) -> Option<String> {
    table.lines().find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        // dest plen src splen next_hop metric refcnt use flags iface
        match fields.as_slice() {
            [dest, "00", _, _, _, _, _, _, _, iface]
                if dest.chars().all(|c| c == '0') && *iface != "lo" =>
            {
                Some(iface.to_string())
            }
            _ => None,
        }
    })
}

fn single(addrs: &[AddrInfo], dev: &str, family: &str) -> Option<String> {
    match addrs {
        [only] => Some(only.addr.clone()),
        [] => None,
        _ => {
            debug!(
                "device {} has more than one {} address: {:?}",
                dev, family, addrs
            );
            None
        }
    }
}

/// Default IPv4/IPv6 addresses: the sole address of each family on the
/// default-route device. When only one family has a default route, the
/// other family's sole address on that same device is used.
pub fn default_addresses(
    interfaces: &[InterfaceAddrs],
    dev4: Option<&str>,
    dev6: Option<&str>,
) -> (Option<String>, Option<String>) {
    let find = |name: &str| interfaces.iter().find(|i| i.name == name);
    let iface4 = dev4.and_then(find);
    let iface6 = dev6.and_then(find);

    let mut ipv4 = iface4.and_then(|i| single(&i.ipv4, &i.name, "ipv4"));
    let mut ipv6 = iface6.and_then(|i| single(&i.ipv6, &i.name, "ipv6"));

    if ipv4.is_some() && ipv6.is_none() {
        ipv6 = iface4.and_then(|i| single(&i.ipv6, &i.name, "ipv6"));
    } else if ipv4.is_none() && ipv6.is_some() {
        ipv4 = iface6.and_then(|i| single(&i.ipv4, &i.name, "ipv4"));
    }
    (ipv4, ipv6)
}

/// Builds a snapshot whose default addresses come from the same interface
/// listing as its address maps.
pub fn snapshot(
    hostname: Option<String>,
    interfaces: &[InterfaceAddrs],
    dev4: Option<&str>,
    dev6: Option<&str>,
) -> HostInfo {
    let defaults = default_addresses(interfaces, dev4, dev6);
    HostInfo::new(hostname, defaults, interfaces)
}

/// Accepts native booleans and the usual spellings of true.
pub fn translate_bool(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::String(s) => matches!(
            s.trim().to_lowercase().as_str(),
            "true" | "1" | "on" | "yes"
        ),
        Value::Number(n) => n.as_i64() == Some(1) || n.as_f64() == Some(1.0),
        Value::Array(_) | Value::Object(_) => false,
    }
}

/// Which address families to wait for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WaitOnNetwork {
    pub ipv4: bool,
    pub ipv6: bool,
}

impl WaitOnNetwork {
    pub fn from_metadata(md: &Metadata) -> Self {
        let section = md.get(WAIT_ON_NETWORK).and_then(Value::as_object);
        let flag = |k: &str| {
            section
                .and_then(|s| s.get(k))
                .map(translate_bool)
                .unwrap_or(false)
        };
        Self {
            ipv4: flag("ipv4"),
            ipv6: flag("ipv6"),
        }
    }
}

/// Polls `provider` every `interval` until every requested family has a
/// usable address and returns that snapshot. Without a `timeout` this
/// blocks until the network is up or the process is stopped.
pub async fn wait_on_network(
    provider: &dyn HostInfoProvider,
    wait: WaitOnNetwork,
    interval: Duration,
    timeout: Option<Duration>,
) -> Result<HostInfo> {
    let started = Instant::now();
    loop {
        let info = provider.current_snapshot()?;

        let ready4 = wait.ipv4 && !info.by_ipv4.is_empty();
        let ready6 = wait.ipv6 && !info.by_ipv6.is_empty();
        if (!wait.ipv4 || ready4) && (!wait.ipv6 || ready6) {
            debug!("waiting on network complete");
            return Ok(info);
        }

        debug!(
            "waiting on network: wait4={}, ready4={}, wait6={}, ready6={}",
            wait.ipv4, ready4, wait.ipv6, ready6
        );
        if let Some(limit) = timeout {
            if started.elapsed() >= limit {
                return Err(Error::NetworkWaitTimeout(limit));
            }
        }
        sleep(interval).await;
    }
}
