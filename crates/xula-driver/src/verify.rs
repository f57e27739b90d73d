//! Block round-trip verification
//!
//! Writes a pattern to one block, reads the block back and compares it byte
//! for byte against what the card should now hold. Mismatches are reported,
//! never raised: a data-integrity failure is a result, not an error.

use crate::error::{Result, XulaError};
use crate::link::RegisterLink;
use crate::sdcard::{Block, LinkStats, SdCard};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use xula_chip::board::{BLOCK_SIZE, PAD_BYTE};

/// Test data written by the harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    /// Uniform random bytes, reproducible when seeded
    Random {
        /// RNG seed, or `None` for entropy
        seed: Option<u64>,
    },
    /// All `0x00`
    Zeros,
    /// All `0xFF`
    Ones,
    /// `0x00, 0x01, ...` wrapping at 256
    Counting,
}

impl Default for Pattern {
    fn default() -> Self {
        Self::Random { seed: None }
    }
}

impl Pattern {
    /// Produce `len` bytes of this pattern.
    pub fn generate(&self, len: usize) -> Vec<u8> {
        match *self {
            Self::Random { seed } => {
                let mut rng = seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
                let mut data = Vec::with_capacity(len);
                data.resize_with(len, || rng.gen::<u8>());
                data
            }
            Self::Zeros => vec![0x00; len],
            Self::Ones => vec![0xFF; len],
            #[allow(clippy::cast_possible_truncation)]
            Self::Counting => (0..len).map(|i| i as u8).collect(),
        }
    }
}

/// One byte that did not survive the round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mismatch {
    /// Offset within the block
    pub position: usize,
    /// Byte read back
    pub read: u8,
    /// Byte that was written
    pub written: u8,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Data error: {:02x} != {:02x} (byte {})",
            self.read, self.written, self.position
        )
    }
}

/// Pairwise comparison of `read` against `written`.
///
/// Only the common prefix is compared.
pub fn compare(read: &[u8], written: &[u8]) -> Vec<Mismatch> {
    read.iter()
        .zip(written)
        .enumerate()
        .filter(|(_, (r, w))| r != w)
        .map(|(position, (&read, &written))| Mismatch {
            position,
            read,
            written,
        })
        .collect()
}

/// What the harness writes, and where.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HarnessConfig {
    /// Block address under test
    pub address: u32,
    /// Data pattern
    pub pattern: Pattern,
    /// Bytes of pattern data; the rest of the block is padding
    pub length: usize,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            address: 0,
            pattern: Pattern::default(),
            length: BLOCK_SIZE,
        }
    }
}

impl HarnessConfig {
    /// Check that the pattern fits in one block.
    ///
    /// # Errors
    ///
    /// Returns [`XulaError::InvalidConfig`] if `length` exceeds a block.
    pub fn validate(&self) -> Result<()> {
        if self.length > BLOCK_SIZE {
            return Err(XulaError::invalid_config(format!(
                "harness length {} exceeds the {BLOCK_SIZE}-byte block",
                self.length
            )));
        }
        Ok(())
    }
}

/// Outcome of one round trip.
#[derive(Debug, Clone)]
pub struct VerificationReport {
    /// Block address tested
    pub address: u32,
    /// Expected block contents: pattern data plus padding
    pub written: Block,
    /// Block contents read back
    pub read: Block,
    /// Every byte that differs
    pub mismatches: Vec<Mismatch>,
    /// Nonzero controller error codes seen, ascending
    pub error_codes: Vec<u16>,
    /// Register transactions over the whole run
    pub stats: LinkStats,
    /// Time spent in the block write
    pub write_time: Duration,
    /// Time spent in the block read
    pub read_time: Duration,
}

impl VerificationReport {
    /// True if the block came back intact.
    pub fn is_success(&self) -> bool {
        self.mismatches.is_empty()
    }

    /// Number of mismatched bytes.
    pub fn error_count(&self) -> usize {
        self.mismatches.len()
    }

    /// Every `(read, written)` pair in block order.
    pub fn pairs(&self) -> impl Iterator<Item = (u8, u8)> + '_ {
        self.read.iter().copied().zip(self.written.iter().copied())
    }
}

impl fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for code in &self.error_codes {
            writeln!(f, "Controller reported error status {code:#06x}")?;
        }
        for mismatch in &self.mismatches {
            writeln!(f, "{mismatch}")?;
        }
        write!(f, "{} errors detected.", self.error_count())
    }
}

/// Harness step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Resetting the controller
    Initialize,
    /// Writing the test block
    Write,
    /// Reading it back
    Read,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initialize => write!(f, "Initializing SD card"),
            Self::Write => write!(f, "Writing data"),
            Self::Read => write!(f, "Reading data"),
        }
    }
}

/// Progress notification from [`run_block_test_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageEvent {
    /// A stage is about to run
    Started(Stage),
    /// A stage completed after this long
    Finished(Stage, Duration),
}

/// Initialize the card, write the configured pattern, read it back and
/// compare.
///
/// # Errors
///
/// Returns error for an invalid `config` or if any transfer fails.
/// Mismatched data is not an error; see [`VerificationReport::mismatches`].
pub fn run_block_test<L: RegisterLink>(
    card: &mut SdCard<L>,
    config: &HarnessConfig,
) -> Result<VerificationReport> {
    run_block_test_with(card, config, |_| {})
}

/// [`run_block_test`] with a callback at the start and end of every stage.
///
/// # Errors
///
/// See [`run_block_test`].
pub fn run_block_test_with<L, F>(
    card: &mut SdCard<L>,
    config: &HarnessConfig,
    mut progress: F,
) -> Result<VerificationReport>
where
    L: RegisterLink,
    F: FnMut(StageEvent),
{
    config.validate()?;
    let data = config.pattern.generate(config.length);
    let mut written = [PAD_BYTE; BLOCK_SIZE];
    written[..data.len()].copy_from_slice(&data);

    timed(Stage::Initialize, &mut progress, || card.initialize())?;
    let ((), write_time) = timed(Stage::Write, &mut progress, || {
        card.write_block(config.address, &data)
    })?;
    let (read, read_time) = timed(Stage::Read, &mut progress, || card.read_block(config.address))?;

    let mismatches = compare(&read, &written);
    let report = VerificationReport {
        address: config.address,
        written,
        read,
        mismatches,
        error_codes: card.error_codes(),
        stats: card.stats(),
        write_time,
        read_time,
    };

    if report.is_success() {
        info!(
            "Block {:#x} verified ({} transactions)",
            report.address,
            report.stats.total()
        );
    } else {
        warn!(
            "Block {:#x}: {} bytes differ",
            report.address,
            report.error_count()
        );
    }
    Ok(report)
}

fn timed<T>(
    stage: Stage,
    progress: &mut impl FnMut(StageEvent),
    op: impl FnOnce() -> Result<T>,
) -> Result<(T, Duration)> {
    progress(StageEvent::Started(stage));
    let start = Instant::now();
    let value = op()?;
    let elapsed = start.elapsed();
    progress(StageEvent::Finished(stage, elapsed));
    Ok((value, elapsed))
}
