//! Device implementations behind the register link
//!
//! - **Simulated**: behavioural model of the FPGA SD card controller, used for
//!   CI and for exercising the protocol without a board attached
//!
//! USB framing to a physical XuLA-2 is not part of this crate; any transport
//! that implements [`DutIo`](crate::DutIo) slots in through
//! [`FramedLink`](crate::FramedLink).

pub mod simulated;

pub use simulated::{SimFaults, SimTiming, SimulatedSdCard, Transaction};
