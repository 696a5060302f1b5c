//! Mapping from logical keys (`metadata`, `userdata`, ...) to the names
//! each transport stores them under.

/// Prefix of every guest property read or written by the datasource.
pub const GUEST_PROPERTY_PREFIX: &str = "/VirtualBox/GuestInfo/";

/// Suffix of the sibling key carrying a value's encoding.
pub const ENCODING_SUFFIX: &str = ".encoding";

/// The three logical keys probed on every transport, in probe order.
pub const DATA_KEYS: [&str; 3] = ["metadata", "userdata", "vendordata"];

pub fn guest_property_key(key: &str) -> String {
    format!("{GUEST_PROPERTY_PREFIX}{key}")
}

/// `metadata` becomes `VBOX_VIRTUALBOX_GUESTINFO_METADATA`.
pub fn env_var_key(key: &str) -> String {
    format!("VBox{}", guest_property_key(key))
        .to_uppercase()
        .replace('/', "_")
}

pub fn encoding_key(key: &str) -> String {
    format!("{key}{ENCODING_SUFFIX}")
}
