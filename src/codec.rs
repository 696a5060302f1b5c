//! Decoding of transport values.
//!
//! Every value read from a transport may carry a sibling `<key>.encoding`
//! describing how it was packed. Absence of that sibling means plain text.

use std::fmt;
use std::io::Read;

use base64::alphabet;
use base64::engine::{GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use flate2::read::GzDecoder;
use log::debug;

use crate::error::{Error, Result};

/// Prefix `VBoxControl guestproperty get` puts in front of a value.
pub const TOOL_VALUE_PREFIX: &str = "Value: ";

/// Valid YAML for an empty document; written over redacted keys.
pub const EMPTY_YAML_VALUE: &str = "---";

/// Standard alphabet, lenient about non-zero bits in the final symbol.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_allow_trailing_bits(true),
);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Plain,
    Base64,
    GzipBase64,
    Binary,
    /// Colon separated list of other keys whose values concatenate into one
    /// base64 payload. Only meaningful on the guest-property transport.
    List,
}

impl Encoding {
    /// Unset and unrecognized tags both decode as plain text.
    pub fn from_tag(tag: Option<&str>) -> Self {
        match tag.map(str::trim) {
            Some("gzip+base64") | Some("gz+b64") => Encoding::GzipBase64,
            Some("base64") | Some("b64") => Encoding::Base64,
            Some("binary") => Encoding::Binary,
            Some("list") => Encoding::List,
            _ => Encoding::Plain,
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Encoding::Plain => "plain",
            Encoding::Base64 => "base64",
            Encoding::GzipBase64 => "gzip+base64",
            Encoding::Binary => "binary",
            Encoding::List => "list",
        };
        f.write_str(s)
    }
}

/// Decode `data` according to `encoding`. `key` only names the value in
/// logs and errors.
pub fn decode(key: &str, encoding: Encoding, data: &str) -> Result<String> {
    debug!("decode: getting encoded data for key={}, enc={}", key, encoding);

    let raw = match encoding {
        Encoding::GzipBase64 => {
            debug!("decode: decoding {} format {}", encoding, key);
            let compressed = b64decode(key, data)?;
            let mut out = Vec::new();
            GzDecoder::new(compressed.as_slice())
                .read_to_end(&mut out)
                .map_err(|source| Error::Gzip {
                    key: key.to_string(),
                    source,
                })?;
            out
        }
        Encoding::Base64 => {
            debug!("decode: decoding {} format {}", encoding, key);
            b64decode(key, data)?
        }
        Encoding::Binary => {
            debug!("decode: no decoding: key {} format {}", key, encoding);
            return Ok(data.to_string());
        }
        Encoding::Plain | Encoding::List => {
            debug!("decode: plain-text data {}", key);
            return Ok(data.to_string());
        }
    };

    String::from_utf8(raw).map_err(|_| Error::Utf8 {
        key: key.to_string(),
    })
}

fn b64decode(key: &str, data: &str) -> Result<Vec<u8>> {
    // Values split across several properties may carry stray whitespace.
    let compact: String = data.split_whitespace().collect();
    LENIENT_BASE64.decode(compact).map_err(|source| Error::Base64 {
        key: key.to_string(),
        source,
    })
}

/// Strip the tool's `Value: ` prefix and surrounding whitespace. Returns
/// `None` when nothing remains or the value is the cleared marker `---`.
pub fn none_if_empty(raw: &str) -> Option<String> {
    let val = raw.strip_prefix(TOOL_VALUE_PREFIX).unwrap_or(raw).trim();
    if val.is_empty() || val == EMPTY_YAML_VALUE {
        return None;
    }
    Some(val.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    const METADATA_YAML: &str = "instance-id: cloud-vm\nlocal-hostname: cloud-vm\n";

    fn gzip_b64(data: &str) -> String {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data.as_bytes()).unwrap();
        STANDARD.encode(enc.finish().unwrap())
    }

    #[test]
    fn test_from_tag() {
        assert_eq!(Encoding::from_tag(None), Encoding::Plain);
        assert_eq!(Encoding::from_tag(Some("plain")), Encoding::Plain);
        assert_eq!(Encoding::from_tag(Some("rot13")), Encoding::Plain);
        assert_eq!(Encoding::from_tag(Some("b64")), Encoding::Base64);
        assert_eq!(Encoding::from_tag(Some("base64")), Encoding::Base64);
        assert_eq!(Encoding::from_tag(Some("gz+b64")), Encoding::GzipBase64);
        assert_eq!(Encoding::from_tag(Some("gzip+base64")), Encoding::GzipBase64);
        assert_eq!(Encoding::from_tag(Some("binary")), Encoding::Binary);
        assert_eq!(Encoding::from_tag(Some("list")), Encoding::List);
    }

    #[test]
    fn test_decode_base64() {
        let data = STANDARD.encode(METADATA_YAML);
        for enc in ["base64", "b64"] {
            let out = decode("metadata", Encoding::from_tag(Some(enc)), &data).unwrap();
            assert_eq!(out, METADATA_YAML);
        }
    }

    #[test]
    fn test_decode_gzip_base64() {
        let data = gzip_b64(METADATA_YAML);
        for enc in ["gzip+base64", "gz+b64"] {
            let out = decode("metadata", Encoding::from_tag(Some(enc)), &data).unwrap();
            assert_eq!(out, METADATA_YAML);
        }
    }

    #[test]
    fn test_decode_plain_and_binary_pass_through() {
        assert_eq!(
            decode("userdata", Encoding::Plain, METADATA_YAML).unwrap(),
            METADATA_YAML
        );
        assert_eq!(
            decode("userdata", Encoding::Binary, METADATA_YAML).unwrap(),
            METADATA_YAML
        );
    }

    #[test]
    fn test_decode_base64_with_trailing_bits() {
        assert_eq!(decode("metadata", Encoding::Base64, "QR==").unwrap(), "A");
        assert_eq!(decode("metadata", Encoding::Base64, "QQ==").unwrap(), "A");
    }

    #[test]
    fn test_decode_malformed_base64_is_fatal() {
        let err = decode("metadata", Encoding::Base64, "!!not base64!!").unwrap_err();
        assert!(matches!(err, Error::Base64 { .. }));
    }

    #[test]
    fn test_decode_base64_that_is_not_gzip_is_fatal() {
        let data = STANDARD.encode("not gzip at all");
        let err = decode("metadata", Encoding::GzipBase64, &data).unwrap_err();
        assert!(matches!(err, Error::Gzip { .. }));
    }

    #[test]
    fn test_decode_non_utf8_is_fatal() {
        let data = STANDARD.encode([0xff, 0xfe, 0xfd]);
        let err = decode("metadata", Encoding::Base64, &data).unwrap_err();
        assert!(matches!(err, Error::Utf8 { .. }));
    }

    #[test]
    fn test_none_if_empty() {
        assert_eq!(none_if_empty(""), None);
        assert_eq!(none_if_empty("   \n\t"), None);
        assert_eq!(none_if_empty("---"), None);
        assert_eq!(none_if_empty(" --- \n"), None);
        assert_eq!(none_if_empty("Value: ---"), None);
        assert_eq!(none_if_empty("Value: "), None);
        assert_eq!(none_if_empty("  hello \n"), Some("hello".to_string()));
        assert_eq!(none_if_empty("Value: hello\n"), Some("hello".to_string()));
        assert_eq!(none_if_empty("{\"a\": 1}"), Some("{\"a\": 1}".to_string()));
    }
}
