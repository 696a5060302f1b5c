//! Parsing and normalization of the metadata document.

use log::debug;
use serde_json::{Map, Value};

use crate::codec::{self, Encoding};
use crate::error::{Error, Result};
use crate::keys;

/// Top-level metadata mapping.
pub type Metadata = Map<String, Value>;

pub const NETWORK: &str = "network";
pub const REDACT: &str = "redact";
/// Older name for [`REDACT`].
pub const CLEANUP_GUESTINFO: &str = "cleanup-guestinfo";
pub const INSTANCE_ID: &str = "instance-id";

const PUBLIC_KEY_NAMES: [&str; 4] = [
    "public-keys-data",
    "public_keys_data",
    "public-keys",
    "public_keys",
];

/// Parses `raw` as JSON, falling back to YAML when it is not valid JSON.
/// Empty input yields an empty mapping.
pub fn parse_json_or_yaml(raw: &str) -> Result<Value> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    match serde_json::from_str(raw) {
        Ok(v) => Ok(v),
        Err(e) if e.is_syntax() || e.is_eof() => Ok(serde_yaml::from_str(raw)?),
        Err(e) => Err(e.into()),
    }
}

/// Parses the metadata string from a transport. No metadata at all is an
/// empty mapping; a document that is not a mapping is rejected.
pub fn load(raw: Option<&str>) -> Result<Metadata> {
    let Some(raw) = raw else {
        return Ok(Metadata::new());
    };
    match parse_json_or_yaml(raw)? {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Metadata::new()),
        Value::Bool(_) => Err(Error::MetadataNotMapping("a boolean")),
        Value::Number(_) => Err(Error::MetadataNotMapping("a number")),
        Value::String(_) => Err(Error::MetadataNotMapping("a string")),
        Value::Array(_) => Err(Error::MetadataNotMapping("a list")),
    }
}

/// Rewrites YAML 1.1 boolean words (`yes`, `off`, ...) to booleans.
/// Network config schemas are written against YAML 1.1, which the YAML 1.2
/// parser leaves as strings.
pub fn normalize_yaml11_bools(v: &mut Value) {
    match v {
        Value::String(s) => {
            let b = match s.as_str() {
                "yes" | "Yes" | "YES" | "on" | "On" | "ON" | "true" | "True" | "TRUE" => true,
                "no" | "No" | "NO" | "off" | "Off" | "OFF" | "false" | "False" | "FALSE" => {
                    false
                }
                _ => return,
            };
            *v = Value::Bool(b);
        }
        Value::Array(items) => items.iter_mut().for_each(normalize_yaml11_bools),
        Value::Object(map) => map.values_mut().for_each(normalize_yaml11_bools),
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Normalizes the optional `network` entry to `{"config": <document>}`.
///
/// An inline mapping is used as is. A string is decoded per the sibling
/// `network.encoding` and parsed as JSON or YAML. The encoding sibling is
/// always removed.
pub fn process(mut md: Metadata) -> Result<Metadata> {
    if md.is_empty() {
        return Ok(md);
    }
    let network = md.shift_remove(NETWORK);
    let encoding = md.shift_remove(&keys::encoding_key(NETWORK));

    let Some(network) = network.filter(is_truthy) else {
        return Ok(md);
    };

    let mut config = match network {
        Value::Object(map) => {
            debug!("network data copied to 'config' key");
            Value::Object(map)
        }
        Value::String(s) => {
            debug!("network data to be decoded {}", s);
            let tag = encoding.as_ref().and_then(Value::as_str);
            let decoded = codec::decode("metadata.network", Encoding::from_tag(tag), &s)?;
            parse_json_or_yaml(&decoded)?
        }
        other => other,
    };
    normalize_yaml11_bools(&mut config);

    let mut wrapped = Map::new();
    wrapped.insert("config".to_string(), config);
    debug!("network data {:?}", wrapped);
    md.insert(NETWORK.to_string(), Value::Object(wrapped));
    Ok(md)
}

/// Inserts everything from `other` that `target` lacks. Where both hold a
/// mapping under the same key the mappings are merged; otherwise `target`
/// keeps its value.
pub fn merge_missing(target: &mut Metadata, other: Metadata) {
    for (key, value) in other {
        match (target.get_mut(&key), value) {
            (None, value) => {
                target.insert(key, value);
            }
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                merge_missing(existing, incoming);
            }
            (Some(_), _) => {}
        }
    }
}

/// Guest properties to clear after reading, from `redact` or the legacy
/// `cleanup-guestinfo`. A single string names one key.
pub fn keys_to_redact(md: &Metadata) -> Vec<String> {
    let value = md.get(REDACT).or_else(|| md.get(CLEANUP_GUESTINFO));
    match value {
        Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

/// SSH public keys from the first present of the accepted key names.
pub fn public_ssh_keys(md: &Metadata) -> Vec<String> {
    let Some(value) = PUBLIC_KEY_NAMES.iter().find_map(|k| md.get(*k)) else {
        return Vec::new();
    };
    match value {
        Value::String(s) => s
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(str::to_string)
            .collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}
