//! Engine configuration
//!
//! Loaded from TOML; every field has a default so partial files are fine.
//!
//! ```toml
//! max_commit_retries = 5
//! sweep_batch_size = 64
//! reap_final_instances = false
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use tandem_core::{Result, TandemError, TrustLevel};

/// Tunables of the protocol engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How many times a message is re-run after its commit hit a conflict
    pub max_commit_retries: u32,
    /// Instances deleted per transaction by the final-state sweep
    pub sweep_batch_size: usize,
    /// Delete an instance in the transaction that commits its final state
    pub reap_final_instances: bool,
    /// Nesting limit for synchronous cross-protocol execution
    pub max_sub_protocol_depth: usize,
    /// Trust a legacy-group inviter needs before its invitation is accepted
    pub group_invitation_min_trust: TrustLevel,
    /// Trust given to a contact verified by mutual scan
    pub mutual_scan_trust_level: TrustLevel,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_commit_retries: 3,
            sweep_batch_size: 128,
            reap_final_instances: true,
            max_sub_protocol_depth: 4,
            group_invitation_min_trust: TrustLevel::new(3),
            mutual_scan_trust_level: TrustLevel::new(4),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| TandemError::invalid(format!("Invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TandemError::not_found(format!(
                "Failed to read config file {}: {e}",
                path.display()
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.sweep_batch_size == 0 {
            return Err(TandemError::invalid("sweep_batch_size must be positive"));
        }
        if self.max_sub_protocol_depth == 0 {
            return Err(TandemError::invalid(
                "max_sub_protocol_depth must be positive",
            ));
        }
        if self.mutual_scan_trust_level < self.group_invitation_min_trust {
            return Err(TandemError::invalid(
                "mutual_scan_trust_level must not be below group_invitation_min_trust",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str("sweep_batch_size = 7\n").unwrap();
        assert_eq!(config.sweep_batch_size, 7);
        assert_eq!(config.max_commit_retries, 3);
        assert!(config.reap_final_instances);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let err = EngineConfig::from_toml_str("sweep_batch_size = 0\n").unwrap_err();
        assert!(matches!(err, TandemError::Invalid { .. }));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "reap_final_instances = false").unwrap();
        writeln!(file, "group_invitation_min_trust = 2").unwrap();
        let config = EngineConfig::load_from_file(file.path()).unwrap();
        assert!(!config.reap_final_instances);
        assert_eq!(config.group_invitation_min_trust, TrustLevel::new(2));
    }
}
