//! Centralized configuration for the duet machine.
//!
//! Fixed machine parameters live on [`MachineConfig`] as constants. Per-run
//! choices (dialect, receive policy, optional budgets) are carried by
//! [`RunConfig`].

use crate::error::{DuetError, Result};
use crate::program::Register;
use serde::Serialize;
use std::time::Duration;

/// Fixed machine parameters.
pub struct MachineConfig;

impl MachineConfig {
    /// Register pre-seeded with each processor's instance id.
    pub const PROGRAM_ID_REGISTER: Register = Register::new_unchecked('p');
    /// Number of processors wired together by a duet run.
    pub const DUET_PROCESSORS: usize = 2;
    /// Default bounded wait before a timed receive gives up.
    pub const RECEIVE_TIMEOUT: Duration = Duration::from_secs(1);
    /// Program counter written when a processor is told to stop. Always outside
    /// any program, so the next fetch fails its bound check.
    pub const TERMINATED_PC: i64 = i64::MAX;
    /// Instructions a processor executes between scheduler yields.
    pub const YIELD_INTERVAL: u64 = 1024;
}

/// Instruction set accepted by the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// The sound-card set: no `sub`, no `jnz`.
    Sound,
    /// The full set.
    #[default]
    Extended,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Sound => "sound",
            Dialect::Extended => "extended",
        }
    }
}

impl std::str::FromStr for Dialect {
    type Err = DuetError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "sound" => Ok(Dialect::Sound),
            "extended" => Ok(Dialect::Extended),
            other => Err(DuetError::Config {
                message: format!("unknown dialect '{}'", other),
            }),
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How `rcv` behaves on an empty inbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceivePolicy {
    /// Wait indefinitely; the deadlock monitor decides when to give up.
    Blocking,
    /// Wait at most this long, then halt the processor.
    Timeout(Duration),
}

impl Default for ReceivePolicy {
    fn default() -> Self {
        ReceivePolicy::Blocking
    }
}

/// Configuration for a single run.
#[derive(Debug, Clone, Default)]
pub struct RunConfig {
    /// Instruction set accepted by the parser.
    pub dialect: Dialect,
    /// Receive behavior for linked processors.
    pub receive_policy: ReceivePolicy,
    /// Maximum instructions each processor may execute.
    pub step_limit: Option<u64>,
    /// Wall-clock bound on the whole run.
    pub run_timeout: Option<Duration>,
}

impl RunConfig {
    /// Create a new run config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Config for a processor running without a partner: timed receives.
    pub fn standalone() -> Self {
        Self::default().with_receive_policy(ReceivePolicy::Timeout(MachineConfig::RECEIVE_TIMEOUT))
    }

    /// Set the accepted dialect.
    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    /// Set the receive policy.
    pub fn with_receive_policy(mut self, policy: ReceivePolicy) -> Self {
        self.receive_policy = policy;
        self
    }

    /// Cap the number of instructions each processor may execute.
    pub fn with_step_limit(mut self, limit: u64) -> Self {
        self.step_limit = Some(limit);
        self
    }

    /// Bound the whole run by wall-clock time.
    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = Some(timeout);
        self
    }

    /// Reject settings that would stop a run before it starts.
    pub fn validate(&self) -> Result<()> {
        if let ReceivePolicy::Timeout(wait) = self.receive_policy {
            if wait.is_zero() {
                return Err(DuetError::Config {
                    message: "receive timeout must be greater than zero".to_string(),
                });
            }
        }
        if self.step_limit == Some(0) {
            return Err(DuetError::Config {
                message: "step limit must be greater than zero".to_string(),
            });
        }
        if self.run_timeout.is_some_and(|t| t.is_zero()) {
            return Err(DuetError::Config {
                message: "run timeout must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_roundtrip() {
        for dialect in [Dialect::Sound, Dialect::Extended] {
            assert_eq!(dialect.as_str().parse::<Dialect>().unwrap(), dialect);
        }
        assert_eq!("SOUND".parse::<Dialect>().unwrap(), Dialect::Sound);
        assert!(matches!(
            "duet".parse::<Dialect>(),
            Err(DuetError::Config { .. })
        ));
    }

    #[test]
    fn test_default_config() {
        let config = RunConfig::default();
        assert_eq!(config.dialect, Dialect::Extended);
        assert_eq!(config.receive_policy, ReceivePolicy::Blocking);
        assert!(config.step_limit.is_none());
        assert!(config.run_timeout.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_standalone_uses_timeout() {
        let config = RunConfig::standalone();
        assert_eq!(
            config.receive_policy,
            ReceivePolicy::Timeout(MachineConfig::RECEIVE_TIMEOUT)
        );
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let config = RunConfig::new().with_receive_policy(ReceivePolicy::Timeout(Duration::ZERO));
        assert!(config.validate().is_err());

        let config = RunConfig::new().with_step_limit(0);
        assert!(config.validate().is_err());

        let config = RunConfig::new().with_run_timeout(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_program_id_register() {
        assert_eq!(MachineConfig::PROGRAM_ID_REGISTER.name(), 'p');
    }
}
