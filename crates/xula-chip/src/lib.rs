//! Register model for the XuLA-2 SD card controller.
//!
//! This crate has **no dependencies** and **no hardware access**. It describes
//! what the FPGA exposes to the host: which module answers on which USB index,
//! how wide each register field is, and how a frame of named fields packs
//! into the word that crosses the link.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`board`] | USB index and module identifiers, block geometry |
//! | [`layout`] | Generic field-width layouts and the packing codec |
//! | [`frame`] | `ControlFrame` / `StatusFrame` for the SD card controller |
//!
//! # Wire layout
//!
//! ```text
//! controller inputs  (host → FPGA): rd(1) wr(1) continue(1) address(32) data(8) hs_ack(1) reset(1)
//! controller outputs (FPGA → host): data(8) busy(1) handshake(1) error(16)
//! ```
//!
//! Field 0 sits in the least significant bits of the packed word.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod board;
pub mod frame;
pub mod layout;

pub use frame::{ControlFrame, StatusFrame};
pub use layout::{FieldError, FieldLayout};
