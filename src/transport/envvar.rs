use log::debug;

use super::RawData;
use crate::codec::{self, Encoding};
use crate::error::Result;
use crate::keys::{self, DATA_KEYS};

/// Must be set to a non-empty value for the environment to be consulted.
pub const ENABLE_VAR: &str = "VMX_GUESTINFO";

/// Read-only view of the process environment.
pub trait Environment: Send + Sync {
    fn var(&self, name: &str) -> Option<String>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnvironment;

impl Environment for ProcessEnvironment {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// Reads metadata, userdata and vendordata from `VBOX_VIRTUALBOX_GUESTINFO_*`
/// environment variables.
pub struct EnvVarTransport<'a> {
    env: &'a dyn Environment,
}

impl<'a> EnvVarTransport<'a> {
    pub fn new(env: &'a dyn Environment) -> Self {
        Self { env }
    }

    pub fn enabled(&self) -> bool {
        self.env.var(ENABLE_VAR).is_some_and(|v| !v.is_empty())
    }

    fn get_value(&self, key: &str) -> Option<String> {
        let name = keys::env_var_key(key);
        self.env
            .var(&name)
            .and_then(|raw| codec::none_if_empty(&raw))
    }

    /// Value of `key`, decoded per its `.encoding` sibling.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let Some(val) = self.get_value(key) else {
            debug!("envvar: no value for {}", keys::env_var_key(key));
            return Ok(None);
        };
        let enc = self.get_value(&keys::encoding_key(key));
        let decoded = codec::decode(
            &keys::env_var_key(key),
            Encoding::from_tag(enc.as_deref()),
            &val,
        )?;
        Ok(Some(decoded))
    }

    pub fn probe(&self) -> Result<RawData> {
        if !self.enabled() {
            return Ok(RawData::default());
        }
        let [md, ud, vd] = DATA_KEYS;
        Ok(RawData {
            metadata: self.get(md)?,
            userdata: self.get(ud)?,
            vendordata: self.get(vd)?,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory environment that records every lookup.
    #[derive(Default)]
    pub(crate) struct FakeEnv {
        vars: HashMap<String, String>,
        pub(crate) lookups: Mutex<Vec<String>>,
    }

    impl FakeEnv {
        pub(crate) fn enabled() -> Self {
            Self::default().with(ENABLE_VAR, "1")
        }

        pub(crate) fn with(mut self, name: &str, value: &str) -> Self {
            self.vars.insert(name.to_string(), value.to_string());
            self
        }

        pub(crate) fn with_key(self, key: &str, value: &str) -> Self {
            let name = keys::env_var_key(key);
            self.with(&name, value)
        }
    }

    impl Environment for FakeEnv {
        fn var(&self, name: &str) -> Option<String> {
            self.lookups.lock().unwrap().push(name.to_string());
            self.vars.get(name).cloned()
        }
    }

    const USERDATA: &str = "#cloud-config\nusers:\n- default\n";

    #[test]
    fn test_disabled_without_sentinel() {
        let env = FakeEnv::default().with_key("metadata", "{\"a\": 1}");
        let data = EnvVarTransport::new(&env).probe().unwrap();
        assert!(data.is_empty());
        assert_eq!(*env.lookups.lock().unwrap(), vec![ENABLE_VAR.to_string()]);
    }

    #[test]
    fn test_empty_sentinel_is_disabled() {
        let env = FakeEnv::default()
            .with(ENABLE_VAR, "")
            .with_key("metadata", "{\"a\": 1}");
        assert!(EnvVarTransport::new(&env).probe().unwrap().is_empty());
    }

    #[test]
    fn test_keys_resolve_independently() {
        let env = FakeEnv::enabled().with_key("userdata", USERDATA);
        let data = EnvVarTransport::new(&env).probe().unwrap();
        assert_eq!(data.metadata, None);
        assert_eq!(data.userdata.as_deref(), Some(USERDATA.trim()));
        assert_eq!(data.vendordata, None);
    }

    #[test]
    fn test_base64_encoded_value() {
        let env = FakeEnv::enabled()
            .with_key("vendordata", &STANDARD.encode(USERDATA))
            .with_key("vendordata.encoding", "b64");
        let data = EnvVarTransport::new(&env).probe().unwrap();
        assert_eq!(data.vendordata.as_deref(), Some(USERDATA));
    }

    #[test]
    fn test_cleared_value_is_absent() {
        let env = FakeEnv::enabled().with_key("metadata", "---");
        assert!(EnvVarTransport::new(&env).probe().unwrap().is_empty());
    }

    #[test]
    fn test_bad_payload_propagates() {
        let env = FakeEnv::enabled()
            .with_key("metadata", "%%%")
            .with_key("metadata.encoding", "base64");
        assert!(EnvVarTransport::new(&env).probe().is_err());
    }

    #[test]
    fn test_encoding_is_not_read_for_missing_value() {
        let env = FakeEnv::enabled();
        EnvVarTransport::new(&env).probe().unwrap();
        let lookups = env.lookups.lock().unwrap();
        assert!(!lookups.iter().any(|n| n.ends_with(".ENCODING")));
    }
}
