//! Iterated ring relay over duplicated contexts.
//!
//! Participant 0 starts every trip by sending; everyone else receives first
//! and forwards. With that asymmetry a trip completes even when every send
//! blocks until it is matched, because exactly one participant is sending
//! while all others are already waiting to receive.

use crate::config::RelayConfig;
use crate::error::{root_cause, Error, Result, ABORT_EXIT_CODE};
use crate::fabric::ContextId;
use crate::group::ParticipantGroup;
use crate::status::{Endpoint, Source, TagMatch};
use crate::world::{Participant, ThreadLevel};
use crate::Rank;
use serde::Serialize;
use std::thread;
use tracing::{debug, info, trace};

/// Order in which a participant sends and receives within one trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RelayRole {
    /// Send to the successor, then receive. Only participant 0.
    SendFirst,
    /// Receive, then forward to the successor.
    ReceiveFirst,
}

impl RelayRole {
    /// Role of `rank`.
    #[inline]
    pub const fn for_rank(rank: Rank) -> Self {
        if rank == 0 {
            Self::SendFirst
        } else {
            Self::ReceiveFirst
        }
    }
}

/// What one relay loop did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelaySummary {
    /// Context the loop ran in.
    pub context: ContextId,
    /// Participant that ran it.
    pub rank: Rank,
    /// Role the participant played.
    pub role: RelayRole,
    /// Completed trips.
    pub iterations: usize,
    /// Source of the last data message received.
    pub last_source: Option<Rank>,
    /// Last payload held, without the trailing NUL.
    pub message: String,
}

/// Relay loop bound to one context. Owns its group handle; the context is
/// retired when the relay is dropped on every participant.
#[derive(Debug)]
pub struct RingRelay<'c> {
    group: ParticipantGroup,
    config: &'c RelayConfig,
    role: RelayRole,
    message: Vec<u8>,
    buffer: Vec<u8>,
    last_source: Option<Rank>,
    completed: usize,
}

impl<'c> RingRelay<'c> {
    /// Binds a relay to `group`, choosing the role from its rank.
    pub fn new(group: ParticipantGroup, config: &'c RelayConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            role: RelayRole::for_rank(group.rank()),
            message: config.message.clone(),
            buffer: vec![0u8; config.receive_capacity],
            last_source: None,
            completed: 0,
            group,
            config,
        })
    }

    /// Role chosen at construction.
    #[inline]
    pub fn role(&self) -> RelayRole {
        self.role
    }

    /// The group handle this relay runs in.
    #[inline]
    pub fn group(&self) -> &ParticipantGroup {
        &self.group
    }

    /// One trip: two data messages and one placeholder per participant.
    pub fn step(&mut self) -> Result<()> {
        let next = self.group.successor();
        match self.role {
            RelayRole::SendFirst => {
                self.group
                    .send(&self.message, Endpoint::Rank(next), self.config.data_tag)?;
                self.group
                    .send(&self.message, Endpoint::Null, self.config.placeholder_tag)?;
                self.receive_data()?;
            }
            RelayRole::ReceiveFirst => {
                self.receive_data()?;
                self.group.receive(
                    &mut self.buffer,
                    Source::Null,
                    TagMatch::Tag(self.config.placeholder_tag),
                )?;
                self.group
                    .send(&self.message, Endpoint::Rank(next), self.config.data_tag)?;
            }
        }
        self.completed += 1;
        trace!(
            rank = self.group.rank(),
            context = %self.group.context_id(),
            trip = self.completed,
            "relay trip complete"
        );
        Ok(())
    }

    /// Runs every configured trip.
    pub fn run(&mut self) -> Result<RelaySummary> {
        debug!(
            rank = self.group.rank(),
            context = %self.group.context_id(),
            role = ?self.role,
            iterations = self.config.iterations,
            "relay started"
        );
        for _ in 0..self.config.iterations {
            self.step()?;
        }
        Ok(self.summary())
    }

    fn receive_data(&mut self) -> Result<()> {
        let status = self.group.receive(
            &mut self.buffer,
            Source::Any,
            TagMatch::Tag(self.config.data_tag),
        )?;
        self.message.clear();
        self.message.extend_from_slice(&self.buffer[..status.count]);
        if let Endpoint::Rank(source) = status.source {
            self.last_source = Some(source);
        }
        Ok(())
    }

    fn summary(&self) -> RelaySummary {
        let text = self.message.strip_suffix(&[0]).unwrap_or(&self.message[..]);
        RelaySummary {
            context: self.group.context_id(),
            rank: self.group.rank(),
            role: self.role,
            iterations: self.completed,
            last_source: self.last_source,
            message: String::from_utf8_lossy(text).into_owned(),
        }
    }
}

/// Hybrid mode: one relay per execution unit, each in its own duplicated
/// context.
///
/// Every participant must call this. Participant 0 supplies the unit count
/// in `root_threads`; the others ignore the argument and learn it by
/// broadcast. All contexts are duplicated and a barrier taken before any
/// unit starts relaying.
pub fn run_hybrid(
    participant: &Participant,
    root_threads: Option<usize>,
    config: &RelayConfig,
) -> Result<Vec<RelaySummary>> {
    participant.require_thread_level(ThreadLevel::Multiple)?;
    config.validate()?;
    let world = participant.group();

    let mut threads = [0u64];
    if world.rank() == 0 {
        threads[0] = match root_threads {
            Some(m) if (1..=RelayConfig::MAX_THREADS).contains(&m) => m as u64,
            Some(m) => {
                let reason = format!(
                    "thread count must be in 1..={}, got {m}",
                    RelayConfig::MAX_THREADS
                );
                return Err(abort_on_config(participant, reason));
            }
            None => {
                return Err(abort_on_config(participant, "missing thread count".into()));
            }
        };
    }
    world.broadcast(&mut threads, 0)?;
    let threads = usize::try_from(threads[0])
        .map_err(|_| Error::Configuration("thread count out of range".into()))?;

    let groups = (0..threads)
        .map(|_| world.duplicate())
        .collect::<Result<Vec<_>>>()?;
    world.barrier()?;

    let rank = world.rank();
    let summaries = thread::scope(|scope| {
        let mut handles = Vec::with_capacity(threads);
        for (unit, group) in groups.into_iter().enumerate() {
            let spawned = thread::Builder::new()
                .name(format!("relay-{rank}-{unit}"))
                .spawn_scoped(scope, move || relay_unit(group, config));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    let err = Error::Spawn {
                        rank,
                        reason: err.to_string(),
                    };
                    participant.abort(ABORT_EXIT_CODE, &err.to_string());
                    return Err(err);
                }
            }
        }
        let outcomes: Vec<Result<RelaySummary>> = handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or(Err(Error::ParticipantPanicked { rank }))
            })
            .collect();
        root_cause(outcomes)
    })?;

    info!(rank, contexts = summaries.len(), iterations = config.iterations, "hybrid relay complete");
    Ok(summaries)
}

/// Body of one execution unit. A local failure aborts the group so the
/// peers in this context are not left waiting.
fn relay_unit(group: ParticipantGroup, config: &RelayConfig) -> Result<RelaySummary> {
    let mut relay = RingRelay::new(group, config)?;
    match relay.run() {
        Err(err) if !err.is_abort() => {
            debug!(rank = relay.group().rank(), context = %relay.group().context_id(), %err, "relay failed");
            relay.group().abort(err.exit_code(), &err.to_string());
            Err(err)
        }
        outcome => outcome,
    }
}

fn abort_on_config(participant: &Participant, reason: String) -> Error {
    participant.abort(ABORT_EXIT_CODE, &reason);
    Error::Configuration(reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SYNCHRONOUS_CONFIG;
    use crate::World;

    fn short(iterations: usize) -> RelayConfig {
        RelayConfig::default().with_iterations(iterations)
    }

    #[test]
    fn test_roles() {
        assert_eq!(RelayRole::for_rank(0), RelayRole::SendFirst);
        assert_eq!(RelayRole::for_rank(3), RelayRole::ReceiveFirst);
    }

    #[test]
    fn test_relay_carries_message_around_ring() {
        let config = short(5);
        let summaries = World::with_config(4, SYNCHRONOUS_CONFIG)
            .unwrap()
            .run(|p| RingRelay::new(p.group().duplicate()?, &config)?.run())
            .unwrap();
        for summary in &summaries {
            assert_eq!(summary.iterations, 5);
            assert_eq!(summary.message, "hello there");
            assert_eq!(summary.last_source, Some((summary.rank + 3) % 4));
        }
    }

    #[test]
    fn test_single_participant_relays_to_itself() {
        let config = short(3);
        let summaries = World::new(1)
            .unwrap()
            .run(|p| RingRelay::new(p.group().duplicate()?, &config)?.run())
            .unwrap();
        assert_eq!(summaries[0].last_source, Some(0));
        assert_eq!(summaries[0].role, RelayRole::SendFirst);
    }

    #[test]
    fn test_hybrid_contexts_are_distinct() {
        let config = short(10);
        let per_rank = World::new(3)
            .unwrap()
            .run(|p| run_hybrid(p, Some(4), &config))
            .unwrap();
        for summaries in &per_rank {
            assert_eq!(summaries.len(), 4);
            let mut contexts: Vec<_> = summaries.iter().map(|s| s.context).collect();
            contexts.sort();
            contexts.dedup();
            assert_eq!(contexts.len(), 4);
        }
    }

    #[test]
    fn test_missing_thread_count_aborts_group() {
        let err = World::new(3)
            .unwrap()
            .run(|p| run_hybrid(p, None, &RelayConfig::default()))
            .unwrap_err();
        assert_eq!(err, Error::Configuration("missing thread count".into()));
    }

    #[test]
    fn test_thread_count_bounded() {
        let err = World::new(2)
            .unwrap()
            .run(|p| run_hybrid(p, Some(RelayConfig::MAX_THREADS + 1), &RelayConfig::default()))
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
