//! Host identity checks: DMI product name and executable lookup.

use std::fs;
use std::path::PathBuf;

use log::debug;

/// DMI field naming the hypervisor product.
pub const SYSTEM_PRODUCT_NAME: &str = "system-product-name";

/// Case-insensitive marker expected in the product name.
const PLATFORM_MARKER: &str = "virtualbox";

pub trait PlatformIdentity: Send + Sync {
    fn read(&self, field: &str) -> Option<String>;
}

pub trait PathResolver: Send + Sync {
    fn which(&self, tool: &str) -> Option<PathBuf>;
}

/// Reads DMI fields from sysfs.
#[derive(Debug, Clone)]
pub struct Dmi {
    product_name_path: PathBuf,
}

impl Dmi {
    pub fn new(product_name_path: impl Into<PathBuf>) -> Self {
        Self {
            product_name_path: product_name_path.into(),
        }
    }
}

impl PlatformIdentity for Dmi {
    fn read(&self, field: &str) -> Option<String> {
        if field != SYSTEM_PRODUCT_NAME {
            return None;
        }
        fs::read_to_string(&self.product_name_path)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }
}

/// Looks tools up on `PATH`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SearchPath;

impl PathResolver for SearchPath {
    fn which(&self, tool: &str) -> Option<PathBuf> {
        which::which(tool).ok()
    }
}

pub fn is_virtualbox_platform(identity: &dyn PlatformIdentity) -> bool {
    match identity.read(SYSTEM_PRODUCT_NAME) {
        None => {
            debug!("No system-product-name found");
            false
        }
        Some(name) if !name.to_lowercase().contains(PLATFORM_MARKER) => {
            debug!("Not a Virtualbox platform: {}", name);
            false
        }
        Some(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn dmi_with(contents: &str) -> (tempfile::NamedTempFile, Dmi) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        let dmi = Dmi::new(file.path());
        (file, dmi)
    }

    #[test]
    fn test_virtualbox_product_name_matches() {
        let (_file, dmi) = dmi_with("VirtualBox\n");
        assert_eq!(dmi.read(SYSTEM_PRODUCT_NAME).as_deref(), Some("VirtualBox"));
        assert!(is_virtualbox_platform(&dmi));
    }

    #[test]
    fn test_match_is_case_insensitive() {
        let (_file, dmi) = dmi_with("Oracle VIRTUALBOX Guest");
        assert!(is_virtualbox_platform(&dmi));
    }

    #[test]
    fn test_other_product_does_not_match() {
        let (_file, dmi) = dmi_with("VMware Virtual Platform");
        assert!(!is_virtualbox_platform(&dmi));
    }

    #[test]
    fn test_missing_field_does_not_match() {
        let dmi = Dmi::new("/nonexistent/dmi/product_name");
        assert_eq!(dmi.read(SYSTEM_PRODUCT_NAME), None);
        assert!(!is_virtualbox_platform(&dmi));
    }

    #[test]
    fn test_unknown_field_is_none() {
        let (_file, dmi) = dmi_with("VirtualBox");
        assert_eq!(dmi.read("system-uuid"), None);
    }
}
