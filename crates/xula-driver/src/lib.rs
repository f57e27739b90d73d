//! Host-side driver for the XuLA-2 SD card controller.
//!
//! The FPGA exposes a simple peripheral: a control word the host drives and a
//! status word it polls. Everything above that, from resetting the controller
//! to moving whole 512-byte blocks, runs here.
//!
//! # Layers
//!
//! ```text
//! verify          run_block_test: write a pattern, read it back, compare
//! SdCard          start_transfer / write_block / read_block
//! LinkStateMachine send_byte / receive_byte, reset, bounded busy & handshake waits
//! RegisterLink    write / read / execute of whole frames
//!   FramedLink<D: DutIo>   packs frames into words for a raw device
//!     SimulatedSdCard      behavioural model of the controller
//! ```
//!
//! # Quick start
//!
//! ```
//! use xula_driver::{run_block_test, HarnessConfig, Pattern, SdCard, SessionConfig, SimulatedSdCard};
//!
//! # fn main() -> xula_driver::Result<()> {
//! let config = SessionConfig::fast();
//! let link = SimulatedSdCard::attach(config.address)?;
//! let mut card = SdCard::new(link, config)?;
//!
//! let harness = HarnessConfig { pattern: Pattern::Random { seed: Some(1) }, ..HarnessConfig::default() };
//! let report = run_block_test(&mut card, &harness)?;
//! println!("{report}");
//! assert!(report.is_success());
//! # Ok(())
//! # }
//! ```
//!
//! Every wait is bounded by [`PollConfig`]; a controller that stops answering
//! produces [`XulaError::Unresponsive`] instead of a hang.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

pub mod backends;
mod config;
mod error;
mod link;
pub mod sdcard;
pub mod verify;

/// Board constants (re-exported from xula-chip).
pub mod board {
    pub use xula_chip::board::{BLOCK_SIZE, DEFAULT_USB_INDEX, PAD_BYTE, SDCARD_MODULE_ID};
}

pub use backends::{SimFaults, SimTiming, SimulatedSdCard, Transaction};
pub use config::{ErrorStatusPolicy, LinkAddress, PollConfig, SessionConfig};
pub use error::{Result, XulaError};
pub use link::{DutIo, FramedLink, RegisterLink};
pub use sdcard::{Block, LinkStateMachine, LinkStats, SdCard, TransferMode, TransferPhase};
pub use verify::{
    compare, run_block_test, run_block_test_with, HarnessConfig, Mismatch, Pattern, Stage,
    StageEvent, VerificationReport,
};
pub use xula_chip::{ControlFrame, StatusFrame};

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        run_block_test, ErrorStatusPolicy, HarnessConfig, LinkAddress, Pattern, PollConfig,
        RegisterLink, Result, SdCard, SessionConfig, SimulatedSdCard, VerificationReport,
        XulaError,
    };
}
