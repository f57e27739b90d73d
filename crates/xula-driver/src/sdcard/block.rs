//! Block transfers
//!
//! A block operation is started by an edge on the request bit: the request is
//! held only until the controller raises busy, then dropped for the rest of
//! the transfer. Exactly [`BLOCK_SIZE`] bytes follow, and the operation is
//! complete once busy clears again.

use super::{SdCard, TransferMode, TransferPhase};
use crate::error::{Result, XulaError};
use crate::link::RegisterLink;
use std::iter;
use tracing::{debug, info};
use xula_chip::board::{BLOCK_SIZE, PAD_BYTE};
use xula_chip::ControlFrame;

/// One SD card block.
pub type Block = [u8; BLOCK_SIZE];

impl<L: RegisterLink> SdCard<L> {
    /// Start a block read or write at `address`.
    ///
    /// Waits for any previous operation to finish, drives the request until
    /// the controller raises busy, then lowers it.
    ///
    /// # Errors
    ///
    /// Returns [`XulaError::Unresponsive`] if busy never clears beforehand or
    /// never rises after the request, or a transport error.
    pub fn start_transfer(&mut self, address: u32, mode: TransferMode) -> Result<()> {
        self.link.set_phase(TransferPhase::Idle);
        self.link.wait_busy(false)?;

        let request = match mode {
            TransferMode::Read => ControlFrame::read_request(address),
            TransferMode::Write => ControlFrame::write_request(address),
        };
        self.link.issue(request)?;
        self.link.set_phase(TransferPhase::RequestIssued);

        let polls = self.link.wait_busy(true)?;
        self.link.issue(ControlFrame::IDLE)?;
        debug!("{mode:?} at {address:#x} started after {polls} polls");
        Ok(())
    }

    /// Write `data` to the block at `address`, padding with `0xFF` to a full
    /// block.
    ///
    /// # Errors
    ///
    /// Returns [`XulaError::BlockTooLong`] before touching the link if `data`
    /// exceeds one block; otherwise any error from the transfer.
    pub fn write_block(&mut self, address: u32, data: &[u8]) -> Result<()> {
        if data.len() > BLOCK_SIZE {
            return Err(XulaError::BlockTooLong {
                len: data.len(),
                max: BLOCK_SIZE,
            });
        }

        self.start_transfer(address, TransferMode::Write)?;
        let padding = iter::repeat(PAD_BYTE).take(BLOCK_SIZE - data.len());
        for (index, byte) in data.iter().copied().chain(padding).enumerate() {
            self.link.set_phase(TransferPhase::Transferring(index));
            self.link.send_byte(byte)?;
        }
        self.drain()?;

        info!(
            "Wrote block {address:#x} ({} data bytes, {} padding)",
            data.len(),
            BLOCK_SIZE - data.len()
        );
        Ok(())
    }

    /// Read the block at `address`.
    ///
    /// # Errors
    ///
    /// Any error from the transfer.
    pub fn read_block(&mut self, address: u32) -> Result<Block> {
        self.start_transfer(address, TransferMode::Read)?;
        let mut block = [0u8; BLOCK_SIZE];
        for (index, slot) in block.iter_mut().enumerate() {
            self.link.set_phase(TransferPhase::Transferring(index));
            *slot = self.link.receive_byte()?;
        }
        self.drain()?;

        info!("Read block {address:#x}");
        Ok(block)
    }

    fn drain(&mut self) -> Result<()> {
        self.link.set_phase(TransferPhase::Draining);
        let polls = self.link.wait_busy(false)?;
        self.link.set_phase(TransferPhase::Idle);
        debug!("Controller idle after {polls} polls");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{SimFaults, SimTiming, SimulatedSdCard};
    use crate::config::{LinkAddress, SessionConfig};
    use crate::link::FramedLink;

    fn card_with(sim: SimulatedSdCard) -> SdCard<FramedLink<SimulatedSdCard>> {
        let link = sim.into_link(LinkAddress::SDCARD).unwrap();
        let mut card = SdCard::new(link, SessionConfig::fast()).unwrap();
        card.initialize().unwrap();
        card
    }

    #[test]
    fn full_block_round_trip() {
        let mut card = card_with(SimulatedSdCard::new());
        let data: Vec<u8> = (0..BLOCK_SIZE).map(|i| (i * 7 % 251) as u8).collect();
        card.write_block(0, &data).unwrap();
        let back = card.read_block(0).unwrap();
        assert_eq!(back.as_slice(), data.as_slice());
        assert_eq!(card.phase(), TransferPhase::Idle);
    }

    #[test]
    fn short_write_is_padded() {
        let mut card = card_with(SimulatedSdCard::new());
        card.write_block(9, &[1, 2, 3]).unwrap();
        let stored = card.link_state().link().dut().block(9).unwrap();
        assert_eq!(&stored[..3], &[1, 2, 3]);
        assert!(stored[3..].iter().all(|&b| b == PAD_BYTE));
    }

    #[test]
    fn empty_write_is_all_padding() {
        let mut card = card_with(SimulatedSdCard::new());
        card.write_block(0, &[]).unwrap();
        assert_eq!(card.read_block(0).unwrap(), [PAD_BYTE; BLOCK_SIZE]);
    }

    #[test]
    fn oversized_write_touches_nothing() {
        let mut card = card_with(SimulatedSdCard::new());
        let before = card.stats();
        let err = card.write_block(0, &[0u8; BLOCK_SIZE + 1]).unwrap_err();
        assert!(matches!(err, XulaError::BlockTooLong { len: 513, max: 512 }));
        assert_eq!(card.stats(), before);
    }

    #[test]
    fn unwritten_block_reads_zero() {
        let mut card = card_with(SimulatedSdCard::new());
        assert_eq!(card.read_block(0x4000).unwrap(), [0u8; BLOCK_SIZE]);
    }

    #[test]
    fn exactly_one_block_of_handshakes() {
        let mut card = card_with(SimulatedSdCard::new());
        card.read_block(0).unwrap();
        // one execute per received byte
        assert_eq!(card.stats().executes, BLOCK_SIZE as u64);
    }

    #[test]
    fn stuck_busy_times_out_in_transfer() {
        let mut card = card_with(SimulatedSdCard::new().with_faults(SimFaults {
            stuck_busy: true,
            ..SimFaults::default()
        }));
        let err = card.write_block(0, &[0xAA; 16]).unwrap_err();
        assert!(err.is_unresponsive());
        assert_eq!(card.phase(), TransferPhase::Transferring(0));
    }

    #[test]
    fn ignored_request_times_out_waiting_for_busy() {
        let mut card = card_with(SimulatedSdCard::new().with_faults(SimFaults {
            ignore_requests: true,
            ..SimFaults::default()
        }));
        match card.read_block(0).unwrap_err() {
            XulaError::Unresponsive { condition, phase, .. } => {
                assert_eq!(condition, "busy asserted");
                assert_eq!(phase, "RequestIssued");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn slow_controller_round_trip() {
        let timing = SimTiming {
            start_latency: 20,
            byte_latency: 3,
            ack_latency: 5,
            commit_latency: 200,
        };
        let mut card = card_with(SimulatedSdCard::new().with_timing(timing));
        card.write_block(1, &[0x5A; BLOCK_SIZE]).unwrap();
        assert_eq!(card.read_block(1).unwrap(), [0x5A; BLOCK_SIZE]);
    }

    #[test]
    fn back_to_back_blocks() {
        let mut card = card_with(SimulatedSdCard::new().with_timing(SimTiming::immediate()));
        for address in 0..4u32 {
            card.write_block(address, &[address as u8; 8]).unwrap();
        }
        for address in 0..4u32 {
            let block = card.read_block(address).unwrap();
            assert!(block[..8].iter().all(|&b| b == address as u8));
            assert!(block[8..].iter().all(|&b| b == PAD_BYTE));
        }
    }
}
