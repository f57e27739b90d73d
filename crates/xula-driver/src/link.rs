//! Register link abstraction
//!
//! A [`RegisterLink`] moves whole frames to and from one peripheral. Each call
//! is one indivisible register transaction; the protocol layers above never
//! see partial fields or raw words.
//!
//! ```text
//! LinkStateMachine ──frames──▶ RegisterLink
//!                                  │
//!                     FramedLink<D: DutIo> ──words──▶ simulated controller
//! ```

use crate::config::LinkAddress;
use crate::error::Result;
use std::fmt::Debug;
use xula_chip::{ControlFrame, StatusFrame};

/// Frame-level access to one peripheral.
///
/// The session that holds a link owns it exclusively: the protocol relies on
/// no other writer changing the control frame between steps.
pub trait RegisterLink: Debug + Send {
    /// Drive a complete control frame.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails.
    fn write(&mut self, frame: &ControlFrame) -> Result<()>;

    /// Sample the status frame.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails.
    fn read(&mut self) -> Result<StatusFrame>;

    /// Drive a control frame and sample the status in one transaction.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails.
    fn execute(&mut self, frame: &ControlFrame) -> Result<StatusFrame>;

    /// Peripheral this link talks to.
    fn address(&self) -> LinkAddress;
}

impl<L: RegisterLink + ?Sized> RegisterLink for Box<L> {
    fn write(&mut self, frame: &ControlFrame) -> Result<()> {
        (**self).write(frame)
    }

    fn read(&mut self) -> Result<StatusFrame> {
        (**self).read()
    }

    fn execute(&mut self, frame: &ControlFrame) -> Result<StatusFrame> {
        (**self).execute(frame)
    }

    fn address(&self) -> LinkAddress {
        (**self).address()
    }
}

/// Word-level access to a device under test.
///
/// This is the raw side of the link: words packed per the controller's
/// declared field layouts.
pub trait DutIo: Debug + Send {
    /// Drive the packed input word.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails.
    fn write_word(&mut self, word: u64) -> Result<()>;

    /// Sample the packed output word.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails.
    fn read_word(&mut self) -> Result<u64>;

    /// Drive then sample as one transaction.
    ///
    /// # Errors
    ///
    /// Returns error if the transport fails.
    fn execute_word(&mut self, word: u64) -> Result<u64> {
        self.write_word(word)?;
        self.read_word()
    }
}

/// Adapts a [`DutIo`] into a [`RegisterLink`] using the controller layouts.
#[derive(Debug)]
pub struct FramedLink<D> {
    dut: D,
    address: LinkAddress,
}

impl<D: DutIo> FramedLink<D> {
    /// Wrap a word-level device at `address`.
    pub const fn new(dut: D, address: LinkAddress) -> Self {
        Self { dut, address }
    }

    /// Borrow the underlying device.
    pub const fn dut(&self) -> &D {
        &self.dut
    }

    /// Mutably borrow the underlying device.
    pub fn dut_mut(&mut self) -> &mut D {
        &mut self.dut
    }

    /// Unwrap the underlying device.
    pub fn into_inner(self) -> D {
        self.dut
    }
}

impl<D: DutIo> RegisterLink for FramedLink<D> {
    fn write(&mut self, frame: &ControlFrame) -> Result<()> {
        let word = frame.to_word()?;
        tracing::trace!("{} <- {word:#013x} {frame:?}", self.address);
        self.dut.write_word(word)
    }

    fn read(&mut self) -> Result<StatusFrame> {
        let word = self.dut.read_word()?;
        let status = StatusFrame::from_word(word)?;
        tracing::trace!("{} -> {word:#09x} {status:?}", self.address);
        Ok(status)
    }

    fn execute(&mut self, frame: &ControlFrame) -> Result<StatusFrame> {
        let word = frame.to_word()?;
        let reply = self.dut.execute_word(word)?;
        let status = StatusFrame::from_word(reply)?;
        tracing::trace!("{} <> {word:#013x} {frame:?} -> {status:?}", self.address);
        Ok(status)
    }

    fn address(&self) -> LinkAddress {
        self.address
    }
}
