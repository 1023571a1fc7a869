//! Execution configuration

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Maximum in-memory groups before the operator spills, unless overridden
/// per operator.
pub const DEFAULT_GROUP_LIMIT: usize = 1_000_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Root directory for spill temp storage. Each spilling operator
    /// creates its own scoped directory underneath.
    pub spill_path: PathBuf,
    /// Default maximum in-memory groups before spilling.
    pub group_limit: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            spill_path: std::env::temp_dir(),
            group_limit: DEFAULT_GROUP_LIMIT,
        }
    }
}

impl ExecutionConfig {
    /// Create the spill root if it does not exist yet.
    pub fn ensure_spill_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.spill_path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ExecutionConfig::default();
        assert_eq!(config.group_limit, DEFAULT_GROUP_LIMIT);
        assert!(config.spill_path.is_absolute());
    }

    #[test]
    fn test_ensure_spill_dir() {
        let root = tempfile::tempdir().unwrap();
        let config = ExecutionConfig {
            spill_path: root.path().join("spill"),
            ..Default::default()
        };
        config.ensure_spill_dir().unwrap();
        assert!(config.spill_path.is_dir());
    }
}
