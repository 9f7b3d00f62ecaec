//! Configuration for the linearizability experiment.
//!
//! Values come from `Default`, optionally overlaid with a TOML document and
//! then with `MAPCHECK_*` environment variables, so a long soak run can be
//! tuned without recompiling the tests.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{HarnessError, Result};
use crate::testing::{ClockPolicy, OperationMix};

const ROUNDS_VAR: &str = "MAPCHECK_ROUNDS";
const OPS_VAR: &str = "MAPCHECK_OPS";
const WORKERS_VAR: &str = "MAPCHECK_WORKERS";
const TIMEOUT_VAR: &str = "MAPCHECK_TIMEOUT_MS";
const ARTIFACT_DIR_VAR: &str = "MAPCHECK_ARTIFACT_DIR";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Number of independent rounds, each with a fresh history.
    pub rounds: usize,
    /// Operations issued sequentially by every client in a round.
    pub ops_per_client: usize,
    /// Number of concurrent clients per round.
    pub workers: usize,
    /// Wall-clock budget handed to the checker for each round.
    pub timeout_ms: u64,
    pub clock: ClockPolicy,
    pub mix: OperationMix,
    /// Share one map across every round instead of building one per round.
    pub shared_map: bool,
    /// Turn the first inconclusive round into an error.
    pub strict_timeouts: bool,
    pub artifact_dir: PathBuf,
    pub artifact_prefix: String,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            rounds: 10_000,
            ops_per_client: 50,
            workers: num_cpus::get(),
            timeout_ms: 5_000,
            clock: ClockPolicy::Plain,
            mix: OperationMix::InsertDelete,
            shared_map: false,
            strict_timeouts: false,
            artifact_dir: PathBuf::from("."),
            artifact_prefix: "mapcheck".to_owned(),
        }
    }
}

impl HarnessConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a TOML document. Missing keys keep their default values.
    pub fn from_toml(source: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(source).map_err(|e| HarnessError::Config(e.to_string()))?;
        config.validate()
    }

    /// Defaults overlaid with whatever `MAPCHECK_*` variables are set.
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Some(rounds) = env_override(ROUNDS_VAR)? {
            self.rounds = rounds;
        }
        if let Some(ops) = env_override(OPS_VAR)? {
            self.ops_per_client = ops;
        }
        if let Some(workers) = env_override(WORKERS_VAR)? {
            self.workers = workers;
        }
        if let Some(timeout) = env_override(TIMEOUT_VAR)? {
            self.timeout_ms = timeout;
        }
        if let Some(dir) = env_override::<String>(ARTIFACT_DIR_VAR)? {
            self.artifact_dir = PathBuf::from(dir);
        }
        self.validate()
    }

    pub fn with_rounds(mut self, rounds: usize) -> Self {
        self.rounds = rounds;
        self
    }

    pub fn with_ops_per_client(mut self, ops: usize) -> Self {
        self.ops_per_client = ops;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_clock(mut self, clock: ClockPolicy) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_mix(mut self, mix: OperationMix) -> Self {
        self.mix = mix;
        self
    }

    pub fn with_shared_map(mut self, shared: bool) -> Self {
        self.shared_map = shared;
        self
    }

    pub fn with_strict_timeouts(mut self, strict: bool) -> Self {
        self.strict_timeouts = strict;
        self
    }

    pub fn with_artifact_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.artifact_dir = dir.into();
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(self) -> Result<Self> {
        if self.workers == 0 {
            return Err(HarnessError::Config("workers must be at least 1".to_owned()));
        }
        if self.ops_per_client == 0 {
            return Err(HarnessError::Config("ops_per_client must be at least 1".to_owned()));
        }
        if self.timeout_ms == 0 {
            return Err(HarnessError::Config("timeout_ms must be positive".to_owned()));
        }
        Ok(self)
    }
}

/// Read and parse a single environment variable. Unset is `Ok(None)`, a value
/// that does not parse is a configuration error.
pub(crate) fn env_override<T: FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| HarnessError::Config(format!("{}={:?} is not valid", name, raw))),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => {
            Err(HarnessError::Config(format!("{} is not valid unicode", name)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::HarnessConfig;
    use crate::testing::{ClockPolicy, OperationMix};
    use std::time::Duration;

    #[test]
    fn test_defaults_match_soak_run() {
        let config = HarnessConfig::default();
        assert_eq!(config.rounds, 10_000);
        assert_eq!(config.ops_per_client, 50);
        assert!(config.workers >= 1);
        assert_eq!(config.clock, ClockPolicy::Plain);
        assert_eq!(config.mix, OperationMix::InsertDelete);
    }

    #[test]
    fn test_toml_overrides_only_given_keys() {
        let config = HarnessConfig::from_toml(
            r#"
            rounds = 12
            clock = "fenced"
            mix = "full"
            "#,
        ).unwrap();
        assert_eq!(config.rounds, 12);
        assert_eq!(config.clock, ClockPolicy::Fenced);
        assert_eq!(config.mix, OperationMix::Full);
        assert_eq!(config.ops_per_client, 50);
    }

    #[test]
    fn test_rejects_zero_workers() {
        assert!(HarnessConfig::from_toml("workers = 0").is_err());
        assert!(HarnessConfig::new().with_workers(0).validate().is_err());
    }

    #[test]
    fn test_huge_timeout_saturates() {
        let config = HarnessConfig::new().with_timeout(Duration::MAX);
        assert_eq!(config.timeout_ms, u64::MAX);
        let config = HarnessConfig::new().with_timeout(Duration::from_millis(1500));
        assert_eq!(config.timeout_ms, 1500);
    }

    #[test]
    fn test_rejects_unknown_clock() {
        assert!(HarnessConfig::from_toml(r#"clock = "sometimes""#).is_err());
    }
}
