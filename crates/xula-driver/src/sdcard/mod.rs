//! SD card block transfer protocol
//!
//! Three layers, each built only on the one below:
//!
//! ```text
//! SdCard            block.rs          start_transfer / write_block / read_block
//!   └─ LinkStateMachine
//!        ├─ byte_transfer.rs          send_byte / receive_byte (handshake)
//!        └─ link_state.rs             reset / initialize / bounded busy & handshake waits
//!             └─ RegisterLink         one frame per transaction
//! ```
//!
//! Block state machine:
//!
//! ```text
//! Idle ─▶ RequestIssued ─(busy 0→1)─▶ Transferring(0..511) ─(512 bytes)─▶ Draining ─(busy=0)─▶ Idle
//! ```
//!
//! A failed operation leaves the controller mid-transfer; call
//! [`SdCard::initialize`] to bring it back to idle before the next block.

mod block;
mod byte_transfer;
mod link_state;

pub use block::Block;
pub use link_state::{LinkStateMachine, LinkStats};

use crate::config::SessionConfig;
use crate::error::Result;
use crate::link::RegisterLink;
use std::fmt;

/// Direction of a block transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    /// Card to host
    Read,
    /// Host to card
    Write,
}

/// Where a block operation currently stands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransferPhase {
    /// No operation in progress
    #[default]
    Idle,
    /// Request driven, waiting for busy to rise
    RequestIssued,
    /// Exchanging the byte at this index
    Transferring(usize),
    /// All bytes exchanged, waiting for busy to clear
    Draining,
}

impl fmt::Display for TransferPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::RequestIssued => write!(f, "RequestIssued"),
            Self::Transferring(i) => write!(f, "Transferring({i})"),
            Self::Draining => write!(f, "Draining"),
        }
    }
}

/// Session with one SD card controller.
#[derive(Debug)]
pub struct SdCard<L> {
    link: LinkStateMachine<L>,
}

impl<L: RegisterLink> SdCard<L> {
    /// Open a session over `link`.
    ///
    /// # Errors
    ///
    /// Returns error if `config` fails validation.
    pub fn new(link: L, config: SessionConfig) -> Result<Self> {
        Ok(Self {
            link: LinkStateMachine::new(link, config)?,
        })
    }

    /// Reset the controller until it reports idle.
    ///
    /// # Errors
    ///
    /// Returns [`XulaError::InitFailed`](crate::XulaError::InitFailed) if the
    /// controller stays busy through every reset attempt, or a transport error.
    pub fn initialize(&mut self) -> Result<()> {
        self.link.initialize()
    }

    /// Current phase of the block state machine.
    pub const fn phase(&self) -> TransferPhase {
        self.link.phase()
    }

    /// Transaction counters for this session.
    pub const fn stats(&self) -> LinkStats {
        self.link.stats()
    }

    /// Distinct nonzero error codes reported by the controller this session.
    pub fn error_codes(&self) -> Vec<u16> {
        self.link.error_codes()
    }

    /// The link state machine underneath.
    pub const fn link_state(&self) -> &LinkStateMachine<L> {
        &self.link
    }

    /// Mutable access to the link state machine, for byte-level work.
    pub fn link_state_mut(&mut self) -> &mut LinkStateMachine<L> {
        &mut self.link
    }

    /// End the session and hand back the link.
    pub fn into_link(self) -> L {
        self.link.into_link()
    }
}
