//! Analysis and store configuration.
//!
//! Both configs read their defaults from the environment, in the same way
//! for the library and the CLI. CLI flags override what is read here.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Seed of the sampling PRNG. Fixed so re-runs of one configuration
/// reproduce the same sample matrices.
pub const DEFAULT_SEED: u64 = 42;

/// Monte Carlo iterations per persisted chunk.
pub const DEFAULT_MC_CHUNK_SIZE: usize = 1000;

/// The simulator output file every analysis keeps per run.
pub const STATISTIC_FILE: &str = "sustainability_global_information_statistic.xml";

/// Knobs of an analysis run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// PRNG seed (`COSTUQ_SEED`)
    pub seed: u64,
    /// Iterations per Monte Carlo chunk (`COSTUQ_MC_CHUNK_SIZE`)
    pub mc_chunk_size: usize,
    /// Output file retained per run
    pub statistic_file: String,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            seed: DEFAULT_SEED,
            mc_chunk_size: DEFAULT_MC_CHUNK_SIZE,
            statistic_file: STATISTIC_FILE.to_string(),
        }
    }
}

impl AnalysisConfig {
    /// Create a config from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable lookup. Unparsable values
    /// fall back to the default with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            seed: parse_or(&lookup, "COSTUQ_SEED", defaults.seed),
            mc_chunk_size: parse_or(&lookup, "COSTUQ_MC_CHUNK_SIZE", defaults.mc_chunk_size)
                .max(1),
            statistic_file: defaults.statistic_file,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_mc_chunk_size(mut self, size: usize) -> Self {
        self.mc_chunk_size = size.max(1);
        self
    }
}

/// Where the filesystem stores live
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Root directory (`COSTUQ_STORE_DIR`, default `.costuq`)
    pub root: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: std::env::var("COSTUQ_STORE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".costuq")),
        }
    }
}

impl StoreConfig {
    pub fn from_env() -> Self {
        Self::default()
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

fn parse_or<T: std::str::FromStr + Copy>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "ignoring unparsable config value");
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_constants() {
        let config = AnalysisConfig::default();
        assert_eq!(config.seed, 42);
        assert_eq!(config.mc_chunk_size, 1000);
        assert_eq!(config.statistic_file, STATISTIC_FILE);
    }

    #[test]
    fn lookup_overrides_defaults() {
        let config = AnalysisConfig::from_lookup(|key| match key {
            "COSTUQ_SEED" => Some("7".into()),
            "COSTUQ_MC_CHUNK_SIZE" => Some("250".into()),
            _ => None,
        });
        assert_eq!(config.seed, 7);
        assert_eq!(config.mc_chunk_size, 250);
    }

    #[test]
    fn garbage_values_fall_back() {
        let config = AnalysisConfig::from_lookup(|key| match key {
            "COSTUQ_SEED" => Some("not-a-number".into()),
            "COSTUQ_MC_CHUNK_SIZE" => Some("0".into()),
            _ => None,
        });
        assert_eq!(config.seed, DEFAULT_SEED);
        assert_eq!(config.mc_chunk_size, 1);
    }

    #[test]
    fn store_root_can_be_overridden() {
        let config = StoreConfig::with_root("/tmp/x");
        assert_eq!(config.root, PathBuf::from("/tmp/x"));
    }
}
