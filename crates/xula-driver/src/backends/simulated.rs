//! Simulated SD card controller
//!
//! Behavioural model of the FPGA-side controller, seen through the same
//! packed words a real board would exchange. It lets the whole protocol stack
//! run in CI and makes misbehaving hardware reproducible.
//!
//! ## Timing model
//!
//! Every status read is one tick. Between ticks the controller only sees the
//! control frame most recently written, exactly like the host-polled FPGA:
//!
//! ```text
//! Idle ──rd/wr (armed)──▶ Starting(start_latency) ──▶ Transfer ──512 bytes──▶ Committing(commit_latency) ──▶ Idle
//!                          busy=0                      busy=1                   busy=1
//!
//! per byte:  Preparing(byte_latency) ─▶ Offered ─ack─▶ Acked(ack_latency) ─▶ Released ─ack low─▶ next byte
//!            handshake=0                handshake=1    handshake=1            handshake=0
//! ```
//!
//! With `ack_latency = 0` the handshake is a single-read pulse: it drops on the
//! very tick that sees the acknowledgement.
//!
//! Request bits are edge-armed: after a transfer starts, `rd`/`wr` must be seen
//! low before another request is accepted. Reset acts on its rising edge.

use crate::config::LinkAddress;
use crate::error::{Result, XulaError};
use crate::link::{DutIo, FramedLink};
use std::collections::HashMap;
use tracing::{debug, info};
use xula_chip::board::{BLOCK_SIZE, SDCARD_MODULE_ID};
use xula_chip::{ControlFrame, StatusFrame};

/// Latencies of the simulated controller, in status reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimTiming {
    /// Reads between a latched request and busy rising
    pub start_latency: u32,
    /// Reads between bytes before handshake rises
    pub byte_latency: u32,
    /// Reads handshake stays high after the acknowledgement is seen
    pub ack_latency: u32,
    /// Reads busy stays high after the last byte
    pub commit_latency: u32,
}

impl Default for SimTiming {
    fn default() -> Self {
        Self {
            start_latency: 2,
            byte_latency: 1,
            ack_latency: 1,
            commit_latency: 4,
        }
    }
}

impl SimTiming {
    /// Everything as fast as the protocol allows.
    pub const fn immediate() -> Self {
        Self {
            start_latency: 0,
            byte_latency: 0,
            ack_latency: 0,
            commit_latency: 0,
        }
    }
}

/// Injected misbehaviour.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimFaults {
    /// Raise busy on a request and never make progress
    pub stuck_busy: bool,
    /// Ignore read/write requests entirely
    pub ignore_requests: bool,
    /// Number of resets that leave the controller busy
    pub busy_resets: u32,
    /// Error code reported while a transfer is in progress
    pub error_code: u16,
    /// `(position, mask)` pairs XORed into bytes offered during reads
    pub corrupt: Vec<(usize, u8)>,
    /// Fail every transaction after this many have succeeded
    pub fail_after: Option<u64>,
}

/// One register transaction as the controller saw it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transaction {
    /// Host drove a control frame
    Write(ControlFrame),
    /// Host sampled a status frame
    Read(StatusFrame),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ByteStep {
    Preparing(u32),
    Offered,
    Acked(u32),
    Released,
}

#[derive(Debug)]
enum State {
    Idle,
    Stuck,
    Starting {
        op: Op,
        address: u32,
        countdown: u32,
    },
    Transfer {
        op: Op,
        address: u32,
        index: usize,
        step: ByteStep,
        buf: Box<[u8; BLOCK_SIZE]>,
    },
    Committing {
        countdown: u32,
    },
}

/// Simulated SD card controller.
#[derive(Debug)]
pub struct SimulatedSdCard {
    timing: SimTiming,
    faults: SimFaults,
    control: ControlFrame,
    state: State,
    armed: bool,
    busy_resets_left: u32,
    storage: HashMap<u32, Box<[u8; BLOCK_SIZE]>>,
    trace: Option<Vec<Transaction>>,
    transactions: u64,
    reads: u64,
    writes: u64,
    resets: u64,
}

impl Default for SimulatedSdCard {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedSdCard {
    /// Fault-free controller with default timing and an empty card.
    pub fn new() -> Self {
        Self {
            timing: SimTiming::default(),
            faults: SimFaults::default(),
            control: ControlFrame::IDLE,
            state: State::Idle,
            armed: true,
            busy_resets_left: 0,
            storage: HashMap::new(),
            trace: None,
            transactions: 0,
            reads: 0,
            writes: 0,
            resets: 0,
        }
    }

    /// Attach a fresh controller at `address`, ready to use as a register link.
    ///
    /// # Errors
    ///
    /// Returns [`XulaError::DeviceNotFound`] unless `address` names the SD card
    /// controller module.
    pub fn attach(address: LinkAddress) -> Result<FramedLink<Self>> {
        Self::new().into_link(address)
    }

    /// Wrap this controller as a register link at `address`.
    ///
    /// # Errors
    ///
    /// See [`SimulatedSdCard::attach`].
    pub fn into_link(self, address: LinkAddress) -> Result<FramedLink<Self>> {
        if address.module_id != SDCARD_MODULE_ID {
            return Err(XulaError::DeviceNotFound {
                usb_index: address.usb_index,
                module_id: address.module_id,
            });
        }
        info!("Simulated SD card controller attached at {address}");
        Ok(FramedLink::new(self, address))
    }

    /// Set controller latencies.
    #[must_use]
    pub fn with_timing(mut self, timing: SimTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Inject faults.
    #[must_use]
    pub fn with_faults(mut self, faults: SimFaults) -> Self {
        self.busy_resets_left = faults.busy_resets;
        self.faults = faults;
        self
    }

    /// Record every transaction for later inspection.
    #[must_use]
    pub fn with_trace(mut self) -> Self {
        self.trace = Some(Vec::new());
        self
    }

    /// Recorded transactions (empty unless tracing was enabled).
    pub fn transactions(&self) -> &[Transaction] {
        self.trace.as_deref().unwrap_or(&[])
    }

    /// Forget recorded transactions.
    pub fn clear_trace(&mut self) {
        if let Some(trace) = &mut self.trace {
            trace.clear();
        }
    }

    /// Number of status reads served.
    pub const fn reads(&self) -> u64 {
        self.reads
    }

    /// Number of control frames accepted.
    pub const fn writes(&self) -> u64 {
        self.writes
    }

    /// Number of reset edges seen.
    pub const fn resets(&self) -> u64 {
        self.resets
    }

    /// Contents of a block, if it has ever been written.
    pub fn block(&self, address: u32) -> Option<&[u8; BLOCK_SIZE]> {
        self.storage.get(&address).map(|block| &**block)
    }

    /// Preload a block, as if written earlier.
    pub fn store_block(&mut self, address: u32, data: [u8; BLOCK_SIZE]) {
        self.storage.insert(address, Box::new(data));
    }

    /// True while no block operation is in progress.
    pub const fn is_idle(&self) -> bool {
        matches!(self.state, State::Idle)
    }

    fn count_transaction(&mut self) -> Result<()> {
        if let Some(limit) = self.faults.fail_after {
            if self.transactions >= limit {
                return Err(XulaError::transport(format!(
                    "simulated link failure after {limit} transactions"
                )));
            }
        }
        self.transactions += 1;
        Ok(())
    }

    fn apply(&mut self, frame: ControlFrame) {
        if frame.reset && !self.control.reset {
            self.resets += 1;
            if self.busy_resets_left > 0 {
                self.busy_resets_left -= 1;
                self.state = State::Stuck;
            } else {
                self.state = State::Idle;
            }
            self.armed = false;
            debug!("SimulatedSdCard: reset ({} busy resets left)", self.busy_resets_left);
        }
        self.control = frame;
    }

    /// Advance one tick against the current control frame.
    fn tick(&mut self) {
        let control = self.control;
        if control.reset {
            return;
        }
        let requested = control.read_request || control.write_request;

        if !requested && matches!(self.state, State::Idle | State::Committing { .. } | State::Stuck) {
            self.armed = true;
        }

        match &mut self.state {
            State::Idle => {
                if requested && self.armed && !self.faults.ignore_requests {
                    self.armed = false;
                    let op = if control.read_request { Op::Read } else { Op::Write };
                    debug!("SimulatedSdCard: {op:?} request at {:#x}", control.address);
                    self.state = if self.faults.stuck_busy {
                        State::Stuck
                    } else {
                        State::Starting {
                            op,
                            address: control.address,
                            countdown: self.timing.start_latency,
                        }
                    };
                }
            }
            State::Stuck => {}
            State::Starting { op, address, countdown } => {
                if *countdown == 0 {
                    let buf = match op {
                        Op::Read => self
                            .storage
                            .get(&*address)
                            .map_or_else(|| Box::new([0u8; BLOCK_SIZE]), Clone::clone),
                        Op::Write => Box::new([0u8; BLOCK_SIZE]),
                    };
                    self.state = State::Transfer {
                        op: *op,
                        address: *address,
                        index: 0,
                        step: ByteStep::Preparing(self.timing.byte_latency),
                        buf,
                    };
                } else {
                    *countdown -= 1;
                }
            }
            State::Transfer { op, address, index, step, buf } => match *step {
                ByteStep::Preparing(n) => {
                    *step = if n == 0 { ByteStep::Offered } else { ByteStep::Preparing(n - 1) };
                }
                ByteStep::Offered => {
                    if control.handshake_ack {
                        if *op == Op::Write {
                            buf[*index] = control.data;
                        }
                        *step = match self.timing.ack_latency {
                            0 => ByteStep::Released,
                            n => ByteStep::Acked(n),
                        };
                    }
                }
                ByteStep::Acked(n) => {
                    *step = if n <= 1 { ByteStep::Released } else { ByteStep::Acked(n - 1) };
                }
                ByteStep::Released => {
                    if !control.handshake_ack {
                        *index += 1;
                        if *index == BLOCK_SIZE {
                            if *op == Op::Write {
                                debug!("SimulatedSdCard: committed block {address:#x}");
                                self.storage.insert(*address, buf.clone());
                            }
                            self.state = State::Committing {
                                countdown: self.timing.commit_latency,
                            };
                        } else {
                            *step = ByteStep::Preparing(self.timing.byte_latency);
                        }
                    }
                }
            },
            State::Committing { countdown } => {
                if *countdown == 0 {
                    self.state = State::Idle;
                } else {
                    *countdown -= 1;
                }
            }
        }
    }

    fn status(&self) -> StatusFrame {
        match &self.state {
            State::Idle | State::Starting { .. } => StatusFrame::default(),
            State::Stuck => StatusFrame {
                busy: true,
                ..StatusFrame::default()
            },
            State::Transfer { op, index, step, buf, .. } => {
                let data_out = match op {
                    Op::Read => self
                        .faults
                        .corrupt
                        .iter()
                        .filter(|(pos, _)| pos == index)
                        .fold(buf[*index], |byte, (_, mask)| byte ^ mask),
                    Op::Write => 0,
                };
                StatusFrame {
                    data_out,
                    busy: true,
                    handshake: matches!(step, ByteStep::Offered | ByteStep::Acked(_)),
                    error: self.faults.error_code,
                }
            }
            State::Committing { .. } => StatusFrame {
                busy: true,
                error: self.faults.error_code,
                ..StatusFrame::default()
            },
        }
    }

    fn record(&mut self, transaction: Transaction) {
        if let Some(trace) = &mut self.trace {
            trace.push(transaction);
        }
    }
}

impl DutIo for SimulatedSdCard {
    fn write_word(&mut self, word: u64) -> Result<()> {
        self.count_transaction()?;
        let frame = ControlFrame::from_word(word)?;
        self.writes += 1;
        self.record(Transaction::Write(frame));
        self.apply(frame);
        Ok(())
    }

    fn read_word(&mut self) -> Result<u64> {
        self.count_transaction()?;
        self.tick();
        let status = self.status();
        self.reads += 1;
        self.record(Transaction::Read(status));
        Ok(status.to_word()?)
    }
}
