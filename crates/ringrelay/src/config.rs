//! Configuration for the fabric and for the two run modes.

use crate::error::{Error, Result};
use crate::world::ThreadLevel;
use crate::Tag;
use serde::Serialize;

/// When a send request counts as complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SendMode {
    /// Complete once the envelope sits in the destination's lane.
    #[default]
    Buffered,
    /// Complete only once the destination has matched the envelope.
    ///
    /// This is the strictly blocking discipline: a send with no matching
    /// receive never completes.
    Synchronous,
}

/// Configuration of the message fabric shared by a world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FabricConfig {
    /// Lane size as power of 2 (default: 6 = 64 envelopes per source)
    pub lane_bits: u8,
    /// Send completion discipline
    pub send_mode: SendMode,
    /// Concurrency support level the world provides to its participants
    pub thread_level: ThreadLevel,
}

impl FabricConfig {
    /// Creates a new configuration with custom settings.
    pub const fn new(lane_bits: u8, send_mode: SendMode, thread_level: ThreadLevel) -> Self {
        Self {
            lane_bits,
            send_mode,
            thread_level,
        }
    }

    /// Returns the number of envelopes one lane can hold.
    #[inline]
    pub const fn lane_capacity(&self) -> usize {
        1 << self.lane_bits
    }

    /// Sets the lane size exponent.
    pub fn with_lane_bits(mut self, bits: u8) -> Self {
        self.lane_bits = bits;
        self
    }

    /// Sets the send completion discipline.
    pub fn with_send_mode(mut self, mode: SendMode) -> Self {
        self.send_mode = mode;
        self
    }

    /// Sets the provided thread support level.
    pub fn with_thread_level(mut self, level: ThreadLevel) -> Self {
        self.thread_level = level;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.lane_bits == 0 || self.lane_bits > 20 {
            return Err(Error::Configuration(format!(
                "lane bits must be in 1..=20, got {}",
                self.lane_bits
            )));
        }
        Ok(())
    }
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self {
            lane_bits: 6,
            send_mode: SendMode::Buffered,
            thread_level: ThreadLevel::Multiple,
        }
    }
}

/// Strictly blocking sends with small lanes.
pub const SYNCHRONOUS_CONFIG: FabricConfig =
    FabricConfig::new(4, SendMode::Synchronous, ThreadLevel::Multiple);

/// Deep lanes for large bursts.
pub const DEEP_LANE_CONFIG: FabricConfig =
    FabricConfig::new(12, SendMode::Buffered, ThreadLevel::Multiple);

/// How each participant fills its send buffer before the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BufferFill {
    /// `value[i] = (i + 1) * (rank + 1)`
    Scaled,
    /// Uniform values in `[0, 1)`, seeded with `seed + rank`.
    Random {
        /// Base seed
        seed: u64,
    },
}

/// Configuration of the non-blocking ring exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExchangeConfig {
    /// Elements per send/receive buffer
    pub buffer_size: usize,
    /// Send buffer contents
    pub fill: BufferFill,
    /// Tag carried by the exchanged message
    pub tag: Tag,
    /// Participant that aggregates the verification tables
    pub root: usize,
}

impl ExchangeConfig {
    /// Creates an exchange of `buffer_size` elements with deterministic contents.
    pub const fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size,
            fill: BufferFill::Scaled,
            tag: 0,
            root: 0,
        }
    }

    /// Sets the buffer fill.
    pub fn with_fill(mut self, fill: BufferFill) -> Self {
        self.fill = fill;
        self
    }

    /// Sets the message tag.
    pub fn with_tag(mut self, tag: Tag) -> Self {
        self.tag = tag;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(Error::Configuration(
                "buffer size must be a positive integer".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration of one relay loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelayConfig {
    /// Trips around the ring per context
    pub iterations: usize,
    /// Payload relayed on the data tag
    pub message: Vec<u8>,
    /// Receive buffer capacity in bytes
    pub receive_capacity: usize,
    /// Tag of the data message
    pub data_tag: Tag,
    /// Tag of the placeholder message exchanged with the null endpoint
    pub placeholder_tag: Tag,
}

impl RelayConfig {
    /// Default number of trips around the ring.
    pub const DEFAULT_ITERATIONS: usize = 100;
    /// Default receive capacity in bytes.
    pub const DEFAULT_RECEIVE_CAPACITY: usize = 512;
    /// Default data tag.
    pub const DATA_TAG: Tag = 99;
    /// Default placeholder tag.
    pub const PLACEHOLDER_TAG: Tag = 299;
    /// Upper bound on execution units per participant.
    pub const MAX_THREADS: usize = 10;

    /// Sets the iteration count.
    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    /// Sets the relayed payload.
    pub fn with_message(mut self, message: impl Into<Vec<u8>>) -> Self {
        self.message = message.into();
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.iterations == 0 {
            return Err(Error::Configuration("iterations must be at least 1".into()));
        }
        if self.message.len() > self.receive_capacity {
            return Err(Error::Configuration(format!(
                "message of {} bytes exceeds receive capacity {}",
                self.message.len(),
                self.receive_capacity
            )));
        }
        if self.data_tag == self.placeholder_tag {
            return Err(Error::Configuration(
                "data and placeholder tags must differ".into(),
            ));
        }
        Ok(())
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            iterations: Self::DEFAULT_ITERATIONS,
            message: b"hello there\0".to_vec(),
            receive_capacity: Self::DEFAULT_RECEIVE_CAPACITY,
            data_tag: Self::DATA_TAG,
            placeholder_tag: Self::PLACEHOLDER_TAG,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fabric_defaults() {
        let config = FabricConfig::default();
        assert_eq!(config.lane_capacity(), 64);
        assert_eq!(config.send_mode, SendMode::Buffered);
        assert!(config.validate().is_ok());
        assert!(config.with_lane_bits(0).validate().is_err());
        assert_eq!(SYNCHRONOUS_CONFIG.lane_capacity(), 16);
    }

    #[test]
    fn test_exchange_requires_positive_buffer() {
        assert!(ExchangeConfig::new(3).validate().is_ok());
        assert!(matches!(
            ExchangeConfig::new(0).validate(),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_relay_defaults_and_validation() {
        let config = RelayConfig::default();
        assert_eq!(config.message.len(), 12);
        assert_eq!(config.iterations, 100);
        assert!(config.validate().is_ok());

        assert!(config.clone().with_iterations(0).validate().is_err());
        assert!(config
            .clone()
            .with_message(vec![b'x'; 513])
            .validate()
            .is_err());
    }
}
