//! Intervals that operators can change at runtime through commands.

use crate::error::{FleetError, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const MIN_INTERVAL_SECS: u64 = 1;
pub const MAX_INTERVAL_SECS: u64 = 3600;

pub const DEFAULT_COMMAND_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_LIVENESS_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    command_interval: Arc<AtomicU64>,
    liveness_interval: Arc<AtomicU64>,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND_INTERVAL_SECS, DEFAULT_LIVENESS_INTERVAL_SECS)
    }
}

impl RuntimeSettings {
    /// Out-of-range values are clamped; only runtime changes are rejected.
    pub fn new(command_secs: u64, liveness_secs: u64) -> Self {
        Self {
            command_interval: Arc::new(AtomicU64::new(clamp(command_secs))),
            liveness_interval: Arc::new(AtomicU64::new(clamp(liveness_secs))),
        }
    }

    pub fn command_interval(&self) -> Duration {
        Duration::from_secs(self.command_interval.load(Ordering::Relaxed))
    }

    pub fn liveness_interval(&self) -> Duration {
        Duration::from_secs(self.liveness_interval.load(Ordering::Relaxed))
    }

    pub fn set_command_interval(&self, secs: u64) -> Result<()> {
        check_range(secs)?;
        self.command_interval.store(secs, Ordering::Relaxed);
        Ok(())
    }

    pub fn set_liveness_interval(&self, secs: u64) -> Result<()> {
        check_range(secs)?;
        self.liveness_interval.store(secs, Ordering::Relaxed);
        Ok(())
    }
}

fn clamp(secs: u64) -> u64 {
    secs.clamp(MIN_INTERVAL_SECS, MAX_INTERVAL_SECS)
}

fn check_range(secs: u64) -> Result<()> {
    if !(MIN_INTERVAL_SECS..=MAX_INTERVAL_SECS).contains(&secs) {
        return Err(FleetError::Rejected("interval range 1-3600 seconds".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let settings = RuntimeSettings::default();
        assert_eq!(settings.command_interval(), Duration::from_secs(5));
        assert_eq!(settings.liveness_interval(), Duration::from_secs(60));
    }

    #[test]
    fn bounds_are_enforced() {
        let settings = RuntimeSettings::default();
        assert!(settings.set_liveness_interval(0).is_err());
        assert!(settings.set_liveness_interval(3601).is_err());
        settings.set_liveness_interval(3600).unwrap();
        assert_eq!(settings.liveness_interval(), Duration::from_secs(3600));

        // clones share the same atomics
        let clone = settings.clone();
        clone.set_command_interval(1).unwrap();
        assert_eq!(settings.command_interval(), Duration::from_secs(1));
    }

    #[test]
    fn constructor_clamps() {
        let settings = RuntimeSettings::new(0, 99_999);
        assert_eq!(settings.command_interval(), Duration::from_secs(1));
        assert_eq!(settings.liveness_interval(), Duration::from_secs(3600));
    }
}
