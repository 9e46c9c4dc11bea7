//! Path resolution for paratrooper
//!
//! # Environment Variables
//!
//! - `PARATROOPER_CONFIG` - Override the configuration file (same as `--config`)
//!
//! Without an override, `paratrooper.toml` in the current directory is used.

use std::path::{Path, PathBuf};

/// Environment variable for config file override
pub const ENV_CONFIG: &str = "PARATROOPER_CONFIG";

/// Configuration file looked up in the current directory
pub const DEFAULT_CONFIG_FILE: &str = "paratrooper.toml";

/// Resolve the configuration file to load.
pub fn config_file(explicit: Option<&Path>) -> PathBuf {
    match explicit {
        Some(path) => {
            let path = expand(&path.to_string_lossy());
            log::debug!("Using config file: {}", path.display());
            path
        }
        None => PathBuf::from(DEFAULT_CONFIG_FILE),
    }
}

/// Expand ~ and environment variables in a string.
///
/// Unknown variables are left as written.
pub fn expand_str(value: &str) -> String {
    shellexpand::full(value)
        .map(|v| v.into_owned())
        .unwrap_or_else(|_| value.to_string())
}

/// Expand ~ and environment variables, failing on unset variables.
pub fn expand_required(
    value: &str,
) -> Result<String, shellexpand::LookupError<std::env::VarError>> {
    shellexpand::full(value).map(|v| v.into_owned())
}

/// Expand ~ and environment variables in a path string.
pub fn expand(path: &str) -> PathBuf {
    PathBuf::from(expand_str(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_file() {
        assert_eq!(config_file(None), PathBuf::from("paratrooper.toml"));
    }

    #[test]
    fn test_explicit_config_file() {
        assert_eq!(
            config_file(Some(Path::new("/etc/paratrooper/prod.toml"))),
            PathBuf::from("/etc/paratrooper/prod.toml")
        );
    }

    #[test]
    fn test_expand_tilde() {
        let expanded = expand("~/kitchen");
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert!(expanded.ends_with("kitchen"));
    }

    #[test]
    fn test_expand_unknown_variable_kept() {
        assert_eq!(
            expand_str("$PARATROOPER_SURELY_UNSET_VAR/x"),
            "$PARATROOPER_SURELY_UNSET_VAR/x"
        );
    }

    #[test]
    fn test_expand_required_rejects_unknown_variable() {
        assert!(expand_required("$PARATROOPER_SURELY_UNSET_VAR").is_err());
        assert_eq!(expand_required("AKIA").unwrap(), "AKIA");
    }

    #[test]
    fn test_expand_plain_string_unchanged() {
        assert_eq!(expand_str("/var/chef/cache"), "/var/chef/cache");
    }
}
