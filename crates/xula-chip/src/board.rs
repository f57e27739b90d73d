//! Board-level identifiers for the XuLA-2.
//!
//! The host reaches a peripheral through the board's USB index and the
//! module identifier the bitstream assigned to it. Only one board is
//! normally attached, so index 0 is the usual target.

/// USB port index of the first XuLA-2 attached to the host.
pub const DEFAULT_USB_INDEX: u32 = 0;

/// Module identifier of the SD card controller in the FPGA design.
pub const SDCARD_MODULE_ID: u8 = 0xFF;

/// Bytes per SD card block.
pub const BLOCK_SIZE: usize = 512;

/// Value written to pad a short block out to [`BLOCK_SIZE`].
pub const PAD_BYTE: u8 = 0xFF;
