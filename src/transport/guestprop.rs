use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use log::{debug, error, info};

use super::RawData;
use crate::codec::{self, Encoding};
use crate::error::{Error, Result};
use crate::exec::{ExecOutput, ProcessExecutor};
use crate::keys::{self, DATA_KEYS};

/// Reply of `VBoxControl guestproperty get` for an unset property.
pub const NO_VALUE: &str = "No value set!";

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

fn is_no_value(stdout: &str, stderr: &str) -> bool {
    stdout.trim() == NO_VALUE || stderr.trim() == NO_VALUE
}

/// Outcome of a single property read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    Found(String),
    NotSet,
}

impl PropertyValue {
    pub fn into_option(self) -> Option<String> {
        match self {
            PropertyValue::Found(v) => Some(v),
            PropertyValue::NotSet => None,
        }
    }
}

/// Reads and writes `/VirtualBox/GuestInfo/*` guest properties through the
/// control tool.
#[derive(Clone)]
pub struct GuestPropertyTransport {
    tool: PathBuf,
    exec: Arc<dyn ProcessExecutor>,
    max_depth: usize,
}

impl std::fmt::Debug for GuestPropertyTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuestPropertyTransport")
            .field("tool", &self.tool)
            .field("max_depth", &self.max_depth)
            .finish()
    }
}

impl GuestPropertyTransport {
    pub fn new(tool: impl Into<PathBuf>, exec: Arc<dyn ProcessExecutor>, max_depth: usize) -> Self {
        Self {
            tool: tool.into(),
            exec,
            max_depth,
        }
    }

    pub fn tool(&self) -> &Path {
        &self.tool
    }

    async fn invoke(&self, args: &[&str]) -> Result<ExecOutput> {
        let mut argv = vec![
            self.tool.display().to_string(),
            "--nologo".to_string(),
            "guestproperty".to_string(),
        ];
        argv.extend(args.iter().map(|s| s.to_string()));
        self.exec.run(&argv).await
    }

    /// Raw value of `key`. The tool's "no value" reply is reported as
    /// [`PropertyValue::NotSet`] on either output stream, whether or not the
    /// invocation failed.
    pub async fn get_value(&self, key: &str) -> Result<PropertyValue> {
        debug!("get_value: getting guestproperty value for key {}", key);
        let name = keys::guest_property_key(key);

        match self.invoke(&["get", name.as_str()]).await {
            Ok(out) => {
                if !out.stderr.is_empty() {
                    debug!("get_value: {} stderr: {}", name, out.stderr.trim());
                }
                if is_no_value(&out.stdout, &out.stderr) {
                    debug!("get_value: no value found for key {}", key);
                    return Ok(PropertyValue::NotSet);
                }
                Ok(codec::none_if_empty(&out.stdout)
                    .map_or(PropertyValue::NotSet, PropertyValue::Found))
            }
            Err(Error::Exec {
                ref stdout,
                ref stderr,
                ..
            }) if is_no_value(stdout, stderr) => {
                debug!("get_value: no value found for key {} (tool failed)", key);
                Ok(PropertyValue::NotSet)
            }
            Err(e) => Err(e),
        }
    }

    /// Sets `key` to `value`. The tool cannot store an empty string, so an
    /// empty value is written as a single space.
    pub async fn set_value(&self, key: &str, value: &str) -> bool {
        let value = if value.is_empty() { " " } else { value };
        debug!("Setting guestinfo key={} to value={}", key, value);
        let name = keys::guest_property_key(key);

        match self.invoke(&["set", name.as_str(), value]).await {
            Ok(_) => true,
            Err(e) => {
                error!(
                    "Failed to set guestinfo key={} to value={}: {}",
                    key, value, e
                );
                false
            }
        }
    }

    /// Fetches `key` and decodes it per its `.encoding` sibling, following
    /// `list` encodings into the keys they name.
    pub async fn resolve(&self, key: &str) -> Result<Option<String>> {
        let mut chain = Vec::new();
        self.resolve_in(key, &mut chain).await
    }

    fn resolve_in<'a>(
        &'a self,
        key: &'a str,
        chain: &'a mut Vec<String>,
    ) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            if chain.iter().any(|k| k == key) {
                return Err(Error::ListCycle(key.to_string()));
            }
            if chain.len() > self.max_depth {
                return Err(Error::ListTooDeep {
                    key: key.to_string(),
                    limit: self.max_depth,
                });
            }

            let Some(val) = self.get_value(key).await?.into_option() else {
                return Ok(None);
            };
            debug!("resolve: query key:{} val<-:{}", key, val);

            let tag = self.get_value(&keys::encoding_key(key)).await?.into_option();
            let mut encoding = Encoding::from_tag(tag.as_deref());
            let mut data = val;

            if encoding == Encoding::List {
                debug!("resolve: recursive format detected: {}, key: {}", encoding, key);
                chain.push(key.to_string());
                let mut joined = String::new();
                for part in data.split(':') {
                    match self.resolve_in(part, chain).await? {
                        Some(v) => joined.push_str(&v),
                        None => {
                            return Err(Error::MissingListPart {
                                list: key.to_string(),
                                part: part.to_string(),
                            })
                        }
                    }
                }
                chain.pop();
                data = joined;
                encoding = Encoding::Base64;
            } else {
                debug!("resolve: found encoded data {}", encoding);
            }

            codec::decode(&keys::guest_property_key(key), encoding, &data).map(Some)
        })
    }

    /// Resolves metadata, userdata and vendordata in that order. Any failure
    /// is logged and reported as no data from this transport.
    pub async fn probe(&self) -> RawData {
        info!(
            "probe: query guestproperty with {}",
            self.tool().display()
        );
        match self.query().await {
            Ok(data) => data,
            Err(e) => {
                error!(
                    "Failed to query guestinfo with {}: {}",
                    self.tool.display(),
                    e
                );
                RawData::default()
            }
        }
    }

    async fn query(&self) -> Result<RawData> {
        let [md, ud, vd] = DATA_KEYS;
        let metadata = self.resolve(md).await?;
        let userdata = self.resolve(ud).await?;
        let vendordata = self.resolve(vd).await?;
        Ok(RawData {
            metadata,
            userdata,
            vendordata,
        })
    }
}
