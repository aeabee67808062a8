//! ringrelay - Ring Exchange and Duplicated-Context Relay
//!
//! A fixed group of participants, each on its own thread, passing messages
//! around a ring over an in-process fabric. Every destination mailbox is
//! ring-decomposed: one lock-free SPSC lane per source, so sources never
//! contend with each other and per-source order is lane order.
//!
//! Two run modes are provided:
//!
//! - [`run_exchange`]: every participant issues a send to its successor and a
//!   receive from its predecessor without blocking, waits on both, and the
//!   root verifies that the data shifted one place around the ring.
//! - [`run_hybrid`]: every participant duplicates its group once per
//!   execution unit and runs an independent [`RingRelay`] in each context.
//!
//! # Key Features
//!
//! - Non-blocking issue/wait with explicit [`RequestState`]
//! - Isolated contexts via [`ParticipantGroup::duplicate`]
//! - Buffered or strictly synchronous sends ([`SendMode`])
//! - Whole-group abort that unblocks every waiting participant
//!
//! # Example
//!
//! ```
//! use ringrelay::{run_exchange, ExchangeConfig, World};
//!
//! let reports = World::new(5)
//!     .unwrap()
//!     .run(|p| run_exchange(p.group(), &ExchangeConfig::new(3)))
//!     .unwrap();
//!
//! let record = &reports[0].as_ref().unwrap().record;
//! // Participant 1 received participant 0's [1, 2, 3]
//! assert_eq!(record.get(1).unwrap().received_sum, 6.0);
//! ```

mod backoff;
mod config;
mod datatype;
mod error;
mod exchange;
mod fabric;
mod gather;
mod group;
mod invariants;
mod lane;
mod mailbox;
mod relay;
mod request;
mod status;
mod topology;
mod world;

/// Identity of a participant within a group, in `[0, size)`.
pub type Rank = usize;

/// Message tag.
pub type Tag = u32;

pub use config::{
    BufferFill, ExchangeConfig, FabricConfig, RelayConfig, SendMode, DEEP_LANE_CONFIG,
    SYNCHRONOUS_CONFIG,
};
pub use datatype::Element;
pub use error::{Error, Result, ABORT_EXIT_CODE};
pub use exchange::{exchange_round, fill_buffer, run_exchange, ExchangeReport};
pub use fabric::ContextId;
pub use gather::{AggregationEntry, AggregationRecord};
pub use group::ParticipantGroup;
pub use relay::{run_hybrid, RelayRole, RelaySummary, RingRelay};
pub use request::{RequestState, TransferRequest};
pub use status::{Endpoint, Source, Status, TagMatch};
pub use topology::RingTopology;
pub use world::{Participant, ThreadLevel, World};
