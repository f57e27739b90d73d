//! Handshake-synchronized byte exchange
//!
//! The acknowledgement is a level, not an edge. Each exchange waits for the
//! controller to raise handshake, acknowledges, then waits for handshake to
//! drop before withdrawing the acknowledgement. Seeing both transitions keeps
//! one byte from being counted twice when the host polls faster than the
//! controller updates, and still catches a handshake that is high for a
//! single read.

use super::link_state::LinkStateMachine;
use crate::error::Result;
use crate::link::RegisterLink;
use tracing::trace;
use xula_chip::ControlFrame;

impl<L: RegisterLink> LinkStateMachine<L> {
    /// Hand one byte to the controller.
    ///
    /// # Errors
    ///
    /// Returns [`XulaError::Unresponsive`](crate::XulaError::Unresponsive) if
    /// the handshake does not rise or fall within the poll bound, or a
    /// transport error.
    pub fn send_byte(&mut self, value: u8) -> Result<()> {
        let offered = self.wait_handshake(true)?;
        self.issue(ControlFrame::data(value, true))?;
        let released = self.wait_handshake(false)?;
        // data stays on the bus while the acknowledgement drops
        self.issue(ControlFrame::data(value, false))?;
        trace!("sent {value:#04x} ({offered}+{released} polls)");
        Ok(())
    }

    /// Take one byte from the controller.
    ///
    /// The byte is sampled in the same transaction that raises the
    /// acknowledgement.
    ///
    /// # Errors
    ///
    /// See [`LinkStateMachine::send_byte`].
    pub fn receive_byte(&mut self) -> Result<u8> {
        let offered = self.wait_handshake(true)?;
        let value = self.exchange(ControlFrame::data(0, true))?.data_out;
        let released = self.wait_handshake(false)?;
        self.issue(ControlFrame::IDLE)?;
        trace!("received {value:#04x} ({offered}+{released} polls)");
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use crate::backends::{SimTiming, SimulatedSdCard, Transaction};
    use crate::config::{LinkAddress, SessionConfig};
    use crate::link::FramedLink;
    use crate::sdcard::LinkStateMachine;
    use xula_chip::{ControlFrame, StatusFrame};

    fn started(
        timing: SimTiming,
        request: ControlFrame,
    ) -> LinkStateMachine<FramedLink<SimulatedSdCard>> {
        let card = SimulatedSdCard::new().with_timing(timing).with_trace();
        let link = card.into_link(LinkAddress::SDCARD).unwrap();
        let mut lsm = LinkStateMachine::new(link, SessionConfig::fast()).unwrap();
        lsm.issue(request).unwrap();
        lsm.wait_busy(true).unwrap();
        lsm.issue(ControlFrame::IDLE).unwrap();
        lsm.link_mut().dut_mut().clear_trace();
        lsm
    }

    #[test]
    fn send_byte_sequence() {
        let mut lsm = started(SimTiming::default(), ControlFrame::write_request(0));
        lsm.send_byte(0xC3).unwrap();

        let trace = lsm.link().dut().transactions();
        let writes: Vec<ControlFrame> = trace
            .iter()
            .filter_map(|t| match t {
                Transaction::Write(frame) => Some(*frame),
                Transaction::Read(_) => None,
            })
            .collect();
        assert_eq!(
            writes,
            vec![ControlFrame::data(0xC3, true), ControlFrame::data(0xC3, false)]
        );

        // the ack is only driven after a read showed handshake high
        let ack_at = trace
            .iter()
            .position(|t| matches!(t, Transaction::Write(f) if f.handshake_ack))
            .unwrap();
        assert!(matches!(
            trace[ack_at - 1],
            Transaction::Read(StatusFrame { handshake: true, .. })
        ));
        // and withdrawn only after a read showed it low again
        let withdraw_at = trace.len() - 1;
        assert!(matches!(
            trace[withdraw_at - 1],
            Transaction::Read(StatusFrame { handshake: false, .. })
        ));
    }

    #[test]
    fn receive_byte_samples_with_the_ack() {
        let mut stored = [0u8; 512];
        stored[0] = 0x7E;
        let mut card = SimulatedSdCard::new();
        card.store_block(3, stored);
        let link = card.into_link(LinkAddress::SDCARD).unwrap();
        let mut lsm = LinkStateMachine::new(link, SessionConfig::fast()).unwrap();
        lsm.issue(ControlFrame::read_request(3)).unwrap();
        lsm.wait_busy(true).unwrap();
        lsm.issue(ControlFrame::IDLE).unwrap();

        assert_eq!(lsm.receive_byte().unwrap(), 0x7E);
        assert_eq!(lsm.stats().executes, 1);
        assert_eq!(lsm.control(), ControlFrame::IDLE);
    }

    #[test]
    fn single_read_pulse_is_not_missed() {
        let mut lsm = started(SimTiming::immediate(), ControlFrame::write_request(0));
        for value in 0..4u8 {
            lsm.send_byte(value).unwrap();
        }
        let highs = lsm
            .link()
            .dut()
            .transactions()
            .iter()
            .filter(|t| matches!(t, Transaction::Read(StatusFrame { handshake: true, .. })))
            .count();
        // exactly one high read per byte: each pulse seen once, none double-counted
        assert_eq!(highs, 4);
    }

    #[test]
    fn slow_release_is_waited_out() {
        let timing = SimTiming {
            ack_latency: 25,
            ..SimTiming::default()
        };
        let mut lsm = started(timing, ControlFrame::write_request(0));
        lsm.send_byte(1).unwrap();
        lsm.send_byte(2).unwrap();
        let acks = lsm
            .link()
            .dut()
            .transactions()
            .iter()
            .filter(|t| matches!(t, Transaction::Write(f) if f.handshake_ack))
            .count();
        assert_eq!(acks, 2, "a long handshake must not be taken for a second byte");
    }
}
