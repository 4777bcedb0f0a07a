//! Queue configuration

use strata_core::{QueueError, QueueResult};

/// State queue configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueConfig {
    /// Resolve after every mutation, active signal and default change.
    /// When off, the host decides when to call `resolve()`.
    pub auto_resolve: bool,
    /// Upper bound on collapsed re-entrant passes within one resolve call
    pub max_resolve_passes: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            auto_resolve: true,
            max_resolve_passes: 8,
        }
    }
}

impl QueueConfig {
    /// Host-driven queue: nothing resolves until `resolve()` is called
    pub fn manual() -> Self {
        QueueConfig {
            auto_resolve: false,
            ..QueueConfig::default()
        }
    }

    /// Requests made while a resolve is running are dropped instead of re-run
    pub fn single_pass() -> Self {
        QueueConfig {
            max_resolve_passes: 1,
            ..QueueConfig::default()
        }
    }

    pub fn validate(&self) -> QueueResult<()> {
        if self.max_resolve_passes == 0 {
            return Err(QueueError::InvalidConfig(
                "max_resolve_passes must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_validate() {
        assert!(QueueConfig::default().validate().is_ok());
        assert!(QueueConfig::manual().validate().is_ok());
        assert!(QueueConfig::single_pass().validate().is_ok());
        assert!(!QueueConfig::manual().auto_resolve);
    }

    #[test]
    fn test_zero_passes_rejected() {
        let config = QueueConfig {
            max_resolve_passes: 0,
            ..QueueConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(QueueError::InvalidConfig(_))
        ));
    }
}
