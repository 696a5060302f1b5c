//! Data transports and the ordered probe that picks one of them.

use std::fmt;
use std::sync::Arc;

use log::{debug, info};

use crate::error::Result;
use crate::exec::ProcessExecutor;
use crate::keys;
use crate::platform::{self, PathResolver, PlatformIdentity};

pub mod envvar;
pub mod guestprop;

pub use envvar::{EnvVarTransport, Environment, ProcessEnvironment};
pub use guestprop::GuestPropertyTransport;

/// Metadata, userdata and vendordata as read from a transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawData {
    pub metadata: Option<String>,
    pub userdata: Option<String>,
    pub vendordata: Option<String>,
}

impl RawData {
    pub fn is_empty(&self) -> bool {
        self.metadata.is_none() && self.userdata.is_none() && self.vendordata.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    EnvVar,
    GuestProperty,
}

/// Probe order. Earlier entries win when several transports carry data.
pub const TRANSPORTS: [TransportKind; 2] = [TransportKind::EnvVar, TransportKind::GuestProperty];

impl TransportKind {
    pub fn name(self) -> &'static str {
        match self {
            TransportKind::EnvVar => "envvar",
            TransportKind::GuestProperty => "guestinfo",
        }
    }

    /// Whether the transport is only tried on a VirtualBox host.
    pub fn platform_gated(self) -> bool {
        matches!(self, TransportKind::GuestProperty)
    }

    /// Name `key` is stored under in this transport's namespace.
    pub fn key_name(self, key: &str) -> String {
        match self {
            TransportKind::EnvVar => keys::env_var_key(key),
            TransportKind::GuestProperty => keys::guest_property_key(key),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The transport discovery settled on, carrying whatever later steps need
/// to talk to it again.
#[derive(Debug, Clone)]
pub enum ResolvedTransport {
    EnvVar,
    GuestProperty(GuestPropertyTransport),
}

impl ResolvedTransport {
    pub fn kind(&self) -> TransportKind {
        match self {
            ResolvedTransport::EnvVar => TransportKind::EnvVar,
            ResolvedTransport::GuestProperty(_) => TransportKind::GuestProperty,
        }
    }

    /// The writable guest-property store, if this transport has one.
    pub fn guest_property(&self) -> Option<&GuestPropertyTransport> {
        match self {
            ResolvedTransport::GuestProperty(t) => Some(t),
            ResolvedTransport::EnvVar => None,
        }
    }
}

/// Host facilities the probes run against.
pub struct ProbeContext<'a> {
    pub env: &'a dyn Environment,
    pub platform: &'a dyn PlatformIdentity,
    pub paths: &'a dyn PathResolver,
    pub exec: Arc<dyn ProcessExecutor>,
    pub control_tool: &'a str,
    pub max_list_depth: usize,
}

impl ProbeContext<'_> {
    async fn probe(&self, kind: TransportKind) -> Result<Option<(ResolvedTransport, RawData)>> {
        match kind {
            TransportKind::EnvVar => {
                let data = EnvVarTransport::new(self.env).probe()?;
                Ok(Some((ResolvedTransport::EnvVar, data)))
            }
            TransportKind::GuestProperty => {
                let Some(tool) = self.paths.which(self.control_tool) else {
                    debug!("probe: {} not found on PATH", self.control_tool);
                    return Ok(None);
                };
                debug!(
                    "probe: using control tool {}",
                    tool.display()
                );
                let transport =
                    GuestPropertyTransport::new(tool, self.exec.clone(), self.max_list_depth);
                let data = transport.probe().await;
                Ok(Some((ResolvedTransport::GuestProperty(transport), data)))
            }
        }
    }
}

/// Probes `transports` in order and returns the first that yields any of
/// metadata, userdata or vendordata. Gated transports are skipped unless
/// the host is a VirtualBox guest.
pub async fn select(
    transports: &[TransportKind],
    ctx: &ProbeContext<'_>,
) -> Result<Option<(ResolvedTransport, RawData)>> {
    for &kind in transports {
        if kind.platform_gated() && !platform::is_virtualbox_platform(ctx.platform) {
            debug!("skipping {} transport: not a Virtualbox platform", kind);
            continue;
        }
        if let Some((resolved, data)) = ctx.probe(kind).await? {
            if !data.is_empty() {
                info!("found data via the {} transport", kind);
                return Ok(Some((resolved, data)));
            }
        }
        debug!("no data via the {} transport", kind);
    }
    Ok(None)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::transport::envvar::tests::FakeEnv;
    use crate::transport::guestprop::tests::FakeTool;
    use std::path::PathBuf;

    pub(crate) struct FakePlatform(pub(crate) Option<&'static str>);

    impl PlatformIdentity for FakePlatform {
        fn read(&self, _field: &str) -> Option<String> {
            self.0.map(str::to_string)
        }
    }

    pub(crate) struct FakePaths(pub(crate) bool);

    impl PathResolver for FakePaths {
        fn which(&self, tool: &str) -> Option<PathBuf> {
            self.0.then(|| PathBuf::from("/usr/bin").join(tool))
        }
    }

    fn ctx<'a>(
        env: &'a FakeEnv,
        platform: &'a FakePlatform,
        paths: &'a FakePaths,
        tool: Arc<FakeTool>,
    ) -> ProbeContext<'a> {
        ProbeContext {
            env,
            platform,
            paths,
            exec: tool,
            control_tool: "VBoxControl",
            max_list_depth: 16,
        }
    }

    #[test]
    fn test_transport_table() {
        assert_eq!(TRANSPORTS[0].name(), "envvar");
        assert_eq!(TRANSPORTS[1].name(), "guestinfo");
        assert!(!TransportKind::EnvVar.platform_gated());
        assert!(TransportKind::GuestProperty.platform_gated());
        assert_eq!(
            TransportKind::GuestProperty.key_name("metadata"),
            "/VirtualBox/GuestInfo/metadata"
        );
    }

    #[tokio::test]
    async fn test_envvar_wins_over_guest_property() {
        let env = FakeEnv::enabled().with_key("metadata", "{\"a\": 1}");
        let tool = Arc::new(FakeTool::default().with("metadata", "{\"b\": 2}"));
        let platform = FakePlatform(Some("VirtualBox"));
        let paths = FakePaths(true);

        let (resolved, data) = select(&TRANSPORTS, &ctx(&env, &platform, &paths, tool.clone()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.kind(), TransportKind::EnvVar);
        assert_eq!(data.metadata.as_deref(), Some("{\"a\": 1}"));
        assert!(tool.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_falls_through_to_guest_property() {
        let env = FakeEnv::default();
        let tool = Arc::new(FakeTool::default().with("userdata", "#cloud-config"));
        let platform = FakePlatform(Some("VirtualBox"));
        let paths = FakePaths(true);

        let (resolved, data) = select(&TRANSPORTS, &ctx(&env, &platform, &paths, tool))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.kind(), TransportKind::GuestProperty);
        assert_eq!(
            resolved.guest_property().unwrap().tool(),
            PathBuf::from("/usr/bin/VBoxControl")
        );
        assert_eq!(data.userdata.as_deref(), Some("#cloud-config"));
    }

    #[tokio::test]
    async fn test_guest_property_not_probed_off_platform() {
        let env = FakeEnv::default();
        let tool = Arc::new(FakeTool::default().with("metadata", "{}"));
        let paths = FakePaths(true);

        for platform in [FakePlatform(None), FakePlatform(Some("VMware Virtual Platform"))] {
            let found = select(&TRANSPORTS, &ctx(&env, &platform, &paths, tool.clone()))
                .await
                .unwrap();
            assert!(found.is_none());
        }
        assert!(tool.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_tool_yields_nothing() {
        let env = FakeEnv::default();
        let tool = Arc::new(FakeTool::default().with("metadata", "{}"));
        let platform = FakePlatform(Some("VirtualBox"));
        let paths = FakePaths(false);

        let found = select(&TRANSPORTS, &ctx(&env, &platform, &paths, tool.clone()))
            .await
            .unwrap();
        assert!(found.is_none());
        assert!(tool.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_envvar_decode_error_is_fatal() {
        let env = FakeEnv::enabled()
            .with_key("metadata", "@@@")
            .with_key("metadata.encoding", "gz+b64");
        let tool = Arc::new(FakeTool::default());
        let platform = FakePlatform(Some("VirtualBox"));
        let paths = FakePaths(true);

        assert!(select(&TRANSPORTS, &ctx(&env, &platform, &paths, tool))
            .await
            .is_err());
    }
}
