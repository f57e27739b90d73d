//! Control and status frames of the SD card controller.
//!
//! Every host transaction carries a complete [`ControlFrame`]; there are no
//! partial-field writes, so a field left at its default is driven low.

use crate::layout::{FieldError, FieldLayout};

/// Controller inputs: rd, wr, continue, address, data, hs_ack, reset.
pub const CONTROL_LAYOUT: FieldLayout = FieldLayout::new(&[1, 1, 1, 32, 8, 1, 1]);

/// Controller outputs: data, busy, handshake, error.
pub const STATUS_LAYOUT: FieldLayout = FieldLayout::new(&[8, 1, 1, 16]);

/// Fields driven by the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlFrame {
    /// Start a block read
    pub read_request: bool,
    /// Start a block write
    pub write_request: bool,
    /// Continue a multi-block transfer
    pub continue_transfer: bool,
    /// Card address of the block
    pub address: u32,
    /// Byte offered to the controller during a write
    pub data: u8,
    /// Host acknowledgement of the controller's handshake
    pub handshake_ack: bool,
    /// Controller reset
    pub reset: bool,
}

impl ControlFrame {
    /// Frame with every field low.
    pub const IDLE: Self = Self {
        read_request: false,
        write_request: false,
        continue_transfer: false,
        address: 0,
        data: 0,
        handshake_ack: false,
        reset: false,
    };

    /// Frame asserting reset.
    pub const fn reset() -> Self {
        Self { reset: true, ..Self::IDLE }
    }

    /// Frame requesting a block read at `address`.
    pub const fn read_request(address: u32) -> Self {
        Self { read_request: true, address, ..Self::IDLE }
    }

    /// Frame requesting a block write at `address`.
    pub const fn write_request(address: u32) -> Self {
        Self { write_request: true, address, ..Self::IDLE }
    }

    /// Frame carrying `data` with the handshake acknowledgement set to `ack`.
    pub const fn data(data: u8, ack: bool) -> Self {
        Self { data, handshake_ack: ack, ..Self::IDLE }
    }

    /// Pack into the controller's input word.
    ///
    /// # Errors
    ///
    /// Never fails for a well-formed frame; the layout check guards against
    /// the layout and the struct drifting apart.
    pub fn to_word(&self) -> Result<u64, FieldError> {
        CONTROL_LAYOUT.pack(&[
            u64::from(self.read_request),
            u64::from(self.write_request),
            u64::from(self.continue_transfer),
            u64::from(self.address),
            u64::from(self.data),
            u64::from(self.handshake_ack),
            u64::from(self.reset),
        ])
    }

    /// Decode the controller's input word.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::WordTooWide`] if `word` has bits outside the layout.
    #[allow(clippy::cast_possible_truncation)] // widths checked by unpack
    pub fn from_word(word: u64) -> Result<Self, FieldError> {
        let f = CONTROL_LAYOUT.unpack(word)?;
        Ok(Self {
            read_request: f[0] != 0,
            write_request: f[1] != 0,
            continue_transfer: f[2] != 0,
            address: f[3] as u32,
            data: f[4] as u8,
            handshake_ack: f[5] != 0,
            reset: f[6] != 0,
        })
    }
}

/// Fields reported by the controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusFrame {
    /// Byte offered to the host during a read
    pub data_out: u8,
    /// A block operation is in progress
    pub busy: bool,
    /// The controller is ready to exchange one byte
    pub handshake: bool,
    /// Controller error code; zero when healthy
    pub error: u16,
}

impl StatusFrame {
    /// Pack into the controller's output word.
    ///
    /// # Errors
    ///
    /// See [`ControlFrame::to_word`].
    pub fn to_word(&self) -> Result<u64, FieldError> {
        STATUS_LAYOUT.pack(&[
            u64::from(self.data_out),
            u64::from(self.busy),
            u64::from(self.handshake),
            u64::from(self.error),
        ])
    }

    /// Decode the controller's output word.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::WordTooWide`] if `word` has bits outside the layout.
    #[allow(clippy::cast_possible_truncation)] // widths checked by unpack
    pub fn from_word(word: u64) -> Result<Self, FieldError> {
        let f = STATUS_LAYOUT.unpack(word)?;
        Ok(Self {
            data_out: f[0] as u8,
            busy: f[1] != 0,
            handshake: f[2] != 0,
            error: f[3] as u16,
        })
    }
}
