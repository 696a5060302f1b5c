//! Clearing of sensitive guest properties once they have been read.

use log::{error, info};

use crate::codec::EMPTY_YAML_VALUE;
use crate::keys;
use crate::transport::ResolvedTransport;

/// Overwrites each key with `---` and blanks its `.encoding` sibling.
/// Only the guest-property store can be written; for any other transport
/// this does nothing. Failures are logged per key and never stop the pass.
pub async fn redact(keys_to_redact: &[String], transport: &ResolvedTransport) {
    let Some(store) = transport.guest_property() else {
        return;
    };

    for key in keys_to_redact {
        let name = keys::guest_property_key(key);

        info!("clearing {}", name);
        if !store.set_value(key, EMPTY_YAML_VALUE).await {
            error!("failed to clear {}", name);
        }

        info!("clearing {}.encoding", name);
        if !store.set_value(&keys::encoding_key(key), "").await {
            error!("failed to clear {}.encoding", name);
        }
    }
}
