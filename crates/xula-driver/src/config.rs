//! Session configuration
//!
//! One [`SessionConfig`] describes a session with one peripheral: where it
//! lives, how long each wait may take, and what to do with the controller's
//! error status. Nothing here is global; every protocol layer receives the
//! config it runs under.

use crate::error::{Result, XulaError};
use std::time::Duration;
use xula_chip::board::{DEFAULT_USB_INDEX, SDCARD_MODULE_ID};

/// Where a peripheral lives: board USB index plus FPGA module identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkAddress {
    /// USB port index of the board
    pub usb_index: u32,
    /// Module identifier inside the bitstream
    pub module_id: u8,
}

impl LinkAddress {
    /// The SD card controller on the first attached board.
    pub const SDCARD: Self = Self {
        usb_index: DEFAULT_USB_INDEX,
        module_id: SDCARD_MODULE_ID,
    };
}

impl Default for LinkAddress {
    fn default() -> Self {
        Self::SDCARD
    }
}

impl std::fmt::Display for LinkAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "usb{}/module {:#04x}", self.usb_index, self.module_id)
    }
}

/// Bound on a single status wait.
///
/// A wait fails once either limit is reached, whichever comes first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Maximum status reads per wait
    pub max_polls: u64,
    /// Maximum wall-clock time per wait
    pub timeout: Duration,
    /// Yield the thread every this many polls (0 = never)
    pub yield_interval: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_polls: 1_000_000,
            timeout: Duration::from_secs(5),
            yield_interval: 1024,
        }
    }
}

/// What to do when a status frame carries a nonzero error code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ErrorStatusPolicy {
    /// Log a warning once per distinct code and carry on
    #[default]
    Warn,
    /// Fail the current operation with [`XulaError::DeviceError`]
    Abort,
}

/// Configuration for one peripheral session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Target peripheral
    pub address: LinkAddress,
    /// Bound on every status wait
    pub poll: PollConfig,
    /// Pause after each reset during initialization
    pub settle: Duration,
    /// Resets to try before declaring the controller unresponsive
    pub max_reset_attempts: u32,
    /// Handling of the controller's error status field
    pub error_policy: ErrorStatusPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            address: LinkAddress::SDCARD,
            poll: PollConfig::default(),
            settle: Duration::from_secs(1),
            max_reset_attempts: 10,
            error_policy: ErrorStatusPolicy::Warn,
        }
    }
}

impl SessionConfig {
    /// Configuration for simulated peripherals: no settle pause and tight
    /// poll bounds so a hang surfaces quickly.
    pub fn fast() -> Self {
        Self {
            poll: PollConfig {
                max_polls: 10_000,
                timeout: Duration::from_secs(1),
                yield_interval: 0,
            },
            settle: Duration::ZERO,
            max_reset_attempts: 4,
            ..Self::default()
        }
    }

    /// Set the target peripheral.
    #[must_use]
    pub fn with_address(mut self, address: LinkAddress) -> Self {
        self.address = address;
        self
    }

    /// Set the per-wait poll bound.
    #[must_use]
    pub fn with_poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    /// Set the post-reset settle pause.
    #[must_use]
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Set the number of reset attempts during initialization.
    #[must_use]
    pub fn with_max_reset_attempts(mut self, attempts: u32) -> Self {
        self.max_reset_attempts = attempts;
        self
    }

    /// Set the error status policy.
    #[must_use]
    pub fn with_error_policy(mut self, policy: ErrorStatusPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    /// Check that the configuration can make progress.
    ///
    /// # Errors
    ///
    /// Returns [`XulaError::InvalidConfig`] if a bound is zero.
    pub fn validate(&self) -> Result<()> {
        if self.poll.max_polls == 0 {
            return Err(XulaError::invalid_config("max_polls must be at least 1"));
        }
        if self.poll.timeout.is_zero() {
            return Err(XulaError::invalid_config("poll timeout must be nonzero"));
        }
        if self.max_reset_attempts == 0 {
            return Err(XulaError::invalid_config(
                "max_reset_attempts must be at least 1",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_target_the_sd_controller() {
        let config = SessionConfig::default();
        assert_eq!(config.address.usb_index, 0);
        assert_eq!(config.address.module_id, 0xFF);
        assert_eq!(config.settle, Duration::from_secs(1));
        assert_eq!(config.error_policy, ErrorStatusPolicy::Warn);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn fast_config_is_valid() {
        let config = SessionConfig::fast();
        assert!(config.settle.is_zero());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_bounds_are_rejected() {
        let config = SessionConfig::fast().with_poll(PollConfig {
            max_polls: 0,
            ..PollConfig::default()
        });
        assert!(matches!(
            config.validate(),
            Err(XulaError::InvalidConfig { .. })
        ));

        let config = SessionConfig::fast().with_max_reset_attempts(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn address_display() {
        assert_eq!(LinkAddress::SDCARD.to_string(), "usb0/module 0xff");
    }
}
