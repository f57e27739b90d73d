//! Link state machine
//!
//! Owns the register link for the session and turns the controller's `busy`
//! and `handshake` bits into primitives: reset, one-shot status queries, and
//! waits. Every wait is bounded by the session's [`PollConfig`]; a wait that
//! runs out fails with [`XulaError::Unresponsive`] naming the condition and
//! the transfer phase.

use super::TransferPhase;
use crate::config::{ErrorStatusPolicy, PollConfig, SessionConfig};
use crate::error::{Result, XulaError};
use crate::link::RegisterLink;
use std::collections::BTreeSet;
use std::time::Instant;
use tracing::{debug, info, warn};
use xula_chip::{ControlFrame, StatusFrame};

/// Register transactions issued during a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// Status reads
    pub reads: u64,
    /// Control writes
    pub writes: u64,
    /// Combined write-then-read transactions
    pub executes: u64,
}

impl LinkStats {
    /// Total transactions of every kind.
    pub const fn total(&self) -> u64 {
        self.reads + self.writes + self.executes
    }
}

/// Status-bit state machine over an exclusively owned register link.
#[derive(Debug)]
pub struct LinkStateMachine<L> {
    link: L,
    config: SessionConfig,
    phase: TransferPhase,
    control: ControlFrame,
    error_codes: BTreeSet<u16>,
    stats: LinkStats,
}

impl<L: RegisterLink> LinkStateMachine<L> {
    /// Take ownership of `link` for a session under `config`.
    ///
    /// # Errors
    ///
    /// Returns error if `config` fails validation.
    pub fn new(link: L, config: SessionConfig) -> Result<Self> {
        config.validate()?;
        debug!("Session opened on {}", link.address());
        Ok(Self {
            link,
            config,
            phase: TransferPhase::Idle,
            control: ControlFrame::IDLE,
            error_codes: BTreeSet::new(),
            stats: LinkStats::default(),
        })
    }

    /// Session configuration.
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current transfer phase.
    pub const fn phase(&self) -> TransferPhase {
        self.phase
    }

    pub(crate) fn set_phase(&mut self, phase: TransferPhase) {
        self.phase = phase;
    }

    /// Last control frame driven onto the link.
    pub const fn control(&self) -> ControlFrame {
        self.control
    }

    /// Transaction counters.
    pub const fn stats(&self) -> LinkStats {
        self.stats
    }

    /// Distinct nonzero error codes the controller has reported, ascending.
    pub fn error_codes(&self) -> Vec<u16> {
        self.error_codes.iter().copied().collect()
    }

    /// Borrow the link.
    pub const fn link(&self) -> &L {
        &self.link
    }

    /// Mutably borrow the link.
    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    /// Release the link.
    pub fn into_link(self) -> L {
        self.link
    }

    /// Drive a complete control frame.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails.
    pub fn issue(&mut self, frame: ControlFrame) -> Result<()> {
        self.link.write(&frame)?;
        self.stats.writes += 1;
        self.control = frame;
        Ok(())
    }

    /// Drive a control frame and sample the status in one transaction.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails or the error status policy aborts.
    pub fn exchange(&mut self, frame: ControlFrame) -> Result<StatusFrame> {
        let status = self.link.execute(&frame)?;
        self.stats.executes += 1;
        self.control = frame;
        self.observe(status)
    }

    /// Sample the status frame.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails or the error status policy aborts.
    pub fn status(&mut self) -> Result<StatusFrame> {
        let status = self.link.read()?;
        self.stats.reads += 1;
        self.observe(status)
    }

    fn observe(&mut self, status: StatusFrame) -> Result<StatusFrame> {
        if status.error != 0 {
            match self.config.error_policy {
                ErrorStatusPolicy::Abort => {
                    return Err(XulaError::DeviceError {
                        code: status.error,
                        phase: self.phase.to_string(),
                    });
                }
                ErrorStatusPolicy::Warn => {
                    if self.error_codes.insert(status.error) {
                        warn!(
                            "Controller reports error status {:#06x} during {}",
                            status.error, self.phase
                        );
                    }
                }
            }
        }
        Ok(status)
    }

    /// Pulse reset: one frame with reset raised, one with it lowered.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails.
    pub fn reset(&mut self) -> Result<()> {
        self.issue(ControlFrame::reset())?;
        self.issue(ControlFrame::IDLE)?;
        self.phase = TransferPhase::Idle;
        Ok(())
    }

    /// True if a block operation is in progress.
    ///
    /// # Errors
    ///
    /// Returns error if the status read fails.
    pub fn is_busy(&mut self) -> Result<bool> {
        Ok(self.status()?.busy)
    }

    /// True if the controller is offering a byte exchange.
    ///
    /// # Errors
    ///
    /// Returns error if the status read fails.
    pub fn is_handshake_active(&mut self) -> Result<bool> {
        Ok(self.status()?.handshake)
    }

    /// Reset, let the controller settle, and repeat until it reports idle.
    ///
    /// # Errors
    ///
    /// Returns [`XulaError::InitFailed`] after `max_reset_attempts` resets that
    /// all left the controller busy.
    pub fn initialize(&mut self) -> Result<()> {
        let attempts = self.config.max_reset_attempts;
        for attempt in 1..=attempts {
            self.reset()?;
            if !self.config.settle.is_zero() {
                std::thread::sleep(self.config.settle);
            }
            if !self.is_busy()? {
                info!(
                    "SD card controller on {} ready after {attempt} reset(s)",
                    self.link.address()
                );
                return Ok(());
            }
            debug!("Controller still busy after reset {attempt}/{attempts}");
        }
        Err(XulaError::InitFailed { attempts })
    }

    /// Poll until `busy` equals `busy`, returning the number of polls.
    ///
    /// # Errors
    ///
    /// Returns [`XulaError::Unresponsive`] if the poll bound runs out.
    pub fn wait_busy(&mut self, busy: bool) -> Result<u64> {
        let condition = if busy { "busy asserted" } else { "busy cleared" };
        self.poll_until(condition, |s| s.busy == busy)
    }

    /// Poll until `handshake` equals `active`, returning the number of polls.
    ///
    /// # Errors
    ///
    /// Returns [`XulaError::Unresponsive`] if the poll bound runs out.
    pub fn wait_handshake(&mut self, active: bool) -> Result<u64> {
        let condition = if active {
            "handshake asserted"
        } else {
            "handshake released"
        };
        self.poll_until(condition, |s| s.handshake == active)
    }

    fn poll_until(
        &mut self,
        condition: &'static str,
        done: impl Fn(&StatusFrame) -> bool,
    ) -> Result<u64> {
        let PollConfig {
            max_polls,
            timeout,
            yield_interval,
        } = self.config.poll;
        let start = Instant::now();

        for polls in 1..=max_polls {
            if done(&self.status()?) {
                return Ok(polls);
            }
            if start.elapsed() > timeout {
                return Err(self.unresponsive(condition, polls, start));
            }
            if yield_interval != 0 && polls % u64::from(yield_interval) == 0 {
                std::thread::yield_now();
            }
        }
        Err(self.unresponsive(condition, max_polls, start))
    }

    fn unresponsive(&self, condition: &'static str, polls: u64, start: Instant) -> XulaError {
        let elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        warn!(
            "{}: {condition} not reached during {} after {polls} polls",
            self.link.address(),
            self.phase
        );
        XulaError::Unresponsive {
            condition,
            phase: self.phase.to_string(),
            polls,
            elapsed_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{SimFaults, SimulatedSdCard, Transaction};
    use crate::config::LinkAddress;
    use crate::link::FramedLink;

    fn machine(card: SimulatedSdCard) -> LinkStateMachine<FramedLink<SimulatedSdCard>> {
        let link = card.into_link(LinkAddress::SDCARD).unwrap();
        LinkStateMachine::new(link, SessionConfig::fast()).unwrap()
    }

    #[test]
    fn reset_drives_two_full_frames() {
        let mut lsm = machine(SimulatedSdCard::new().with_trace());
        lsm.reset().unwrap();
        assert_eq!(
            lsm.link().dut().transactions(),
            &[
                Transaction::Write(ControlFrame::reset()),
                Transaction::Write(ControlFrame::IDLE),
            ]
        );
        assert_eq!(lsm.control(), ControlFrame::IDLE);
    }

    #[test]
    fn reset_twice_matches_reset_once() {
        let mut once = machine(SimulatedSdCard::new());
        once.reset().unwrap();
        let mut twice = machine(SimulatedSdCard::new());
        twice.reset().unwrap();
        twice.reset().unwrap();

        assert_eq!(once.status().unwrap(), twice.status().unwrap());
        assert!(once.link().dut().is_idle());
        assert!(twice.link().dut().is_idle());
    }

    #[test]
    fn initialize_leaves_controller_idle() {
        let mut lsm = machine(SimulatedSdCard::new());
        lsm.initialize().unwrap();
        assert!(!lsm.is_busy().unwrap());
        assert_eq!(lsm.link().dut().resets(), 1);
    }

    #[test]
    fn initialize_retries_while_busy() {
        let mut lsm = machine(SimulatedSdCard::new().with_faults(SimFaults {
            busy_resets: 2,
            ..SimFaults::default()
        }));
        lsm.initialize().unwrap();
        assert_eq!(lsm.link().dut().resets(), 3);
        assert!(!lsm.is_busy().unwrap());
    }

    #[test]
    fn initialize_gives_up() {
        let mut lsm = machine(SimulatedSdCard::new().with_faults(SimFaults {
            busy_resets: u32::MAX,
            ..SimFaults::default()
        }));
        let err = lsm.initialize().unwrap_err();
        assert!(matches!(err, XulaError::InitFailed { attempts: 4 }));
        assert!(err.is_unresponsive());
    }

    #[test]
    fn wait_reports_poll_count() {
        let mut lsm = machine(SimulatedSdCard::new());
        assert_eq!(lsm.wait_busy(false).unwrap(), 1);
    }

    #[test]
    fn wait_is_bounded() {
        let mut lsm = machine(SimulatedSdCard::new());
        let err = lsm.wait_handshake(true).unwrap_err();
        match err {
            XulaError::Unresponsive { condition, polls, phase, .. } => {
                assert_eq!(condition, "handshake asserted");
                assert_eq!(polls, SessionConfig::fast().poll.max_polls);
                assert_eq!(phase, "Idle");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn error_codes_collected_once_each() {
        let mut lsm = machine(SimulatedSdCard::new().with_faults(SimFaults {
            error_code: 0x0BAD,
            ..SimFaults::default()
        }));
        assert!(lsm.error_codes().is_empty());
        lsm.issue(ControlFrame::read_request(0)).unwrap();
        lsm.wait_busy(true).unwrap();
        lsm.status().unwrap();
        assert_eq!(lsm.error_codes(), vec![0x0BAD]);
    }

    #[test]
    fn stats_count_each_transaction_kind() {
        let mut lsm = machine(SimulatedSdCard::new());
        lsm.reset().unwrap();
        lsm.status().unwrap();
        lsm.exchange(ControlFrame::IDLE).unwrap();
        let stats = lsm.stats();
        assert_eq!(stats.writes, 2);
        assert_eq!(stats.reads, 1);
        assert_eq!(stats.executes, 1);
        assert_eq!(stats.total(), 4);
    }
}
