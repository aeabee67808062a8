//! Launcher for a group of participants.
//!
//! A [`World`] hosts `size` participants, each on its own OS thread. They share
//! nothing but the message fabric: every participant owns its buffers and
//! reaches its peers only through its [`ParticipantGroup`].

use crate::config::FabricConfig;
use crate::error::{root_cause, Error, Result, ABORT_EXIT_CODE};
use crate::fabric::{ContextId, Fabric};
use crate::group::ParticipantGroup;
use crate::Rank;
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::Arc;
use std::thread;
use tracing::{debug, error};

/// Concurrency support levels, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ThreadLevel {
    /// Only single-threaded execution
    Single,
    /// Multi-threaded, but communication only from the participant's main thread
    Funneled,
    /// Multi-threaded, but communication serialized by the user
    Serialized,
    /// Any execution unit may communicate concurrently
    Multiple,
}

impl FromStr for ThreadLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "single" => Ok(Self::Single),
            "funneled" => Ok(Self::Funneled),
            "serialized" => Ok(Self::Serialized),
            "multiple" => Ok(Self::Multiple),
            other => Err(Error::Configuration(format!("unknown thread level {other:?}"))),
        }
    }
}

/// A fixed-size group of participants sharing one message fabric.
#[derive(Debug, Clone, Copy)]
pub struct World {
    size: usize,
    config: FabricConfig,
}

impl World {
    /// Creates a world of `size` participants with the default fabric.
    pub fn new(size: usize) -> Result<Self> {
        Self::with_config(size, FabricConfig::default())
    }

    /// Creates a world of `size` participants with a custom fabric.
    pub fn with_config(size: usize, config: FabricConfig) -> Result<Self> {
        if size == 0 {
            return Err(Error::InvalidGroupSize(size));
        }
        config.validate()?;
        Ok(Self { size, config })
    }

    /// Number of participants.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Fabric configuration.
    #[inline]
    pub fn config(&self) -> &FabricConfig {
        &self.config
    }

    /// Runs `body` once per participant, concurrently, and returns the results
    /// in rank order.
    ///
    /// A participant that fails with anything other than [`Error::Aborted`], or
    /// panics, aborts the whole group so that no peer is left waiting on it.
    /// The returned error is the root cause, not the aborts it triggered.
    pub fn run<F, R>(&self, body: F) -> Result<Vec<R>>
    where
        F: Fn(&Participant) -> Result<R> + Sync,
        R: Send,
    {
        let fabric = Arc::new(Fabric::new(self.size, self.config));
        debug!(size = self.size, config = ?self.config, "starting participants");

        let outcomes: Vec<Result<R>> = thread::scope(|scope| {
            let mut handles = Vec::with_capacity(self.size);
            let mut outcomes = Vec::with_capacity(self.size);

            for rank in 0..self.size {
                let shared = Arc::clone(&fabric);
                let body = &body;
                let spawned = thread::Builder::new()
                    .name(format!("participant-{rank}"))
                    .spawn_scoped(scope, move || host(&shared, rank, body));
                match spawned {
                    Ok(handle) => handles.push((rank, handle)),
                    Err(err) => {
                        let err = Error::Spawn {
                            rank,
                            reason: err.to_string(),
                        };
                        fabric.abort(rank, ABORT_EXIT_CODE, &err.to_string());
                        outcomes.push(Err(err));
                        break;
                    }
                }
            }

            let mut joined: Vec<Result<R>> = handles
                .into_iter()
                .map(|(rank, handle)| {
                    handle
                        .join()
                        .unwrap_or(Err(Error::ParticipantPanicked { rank }))
                })
                .collect();
            joined.append(&mut outcomes);
            joined
        });

        root_cause(outcomes)
    }
}

/// Body of one participant thread.
fn host<F, R>(fabric: &Arc<Fabric>, rank: Rank, body: &F) -> Result<R>
where
    F: Fn(&Participant) -> Result<R>,
{
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let participant = Participant::new(Arc::clone(fabric), rank)?;
        body(&participant)
    }))
    .unwrap_or(Err(Error::ParticipantPanicked { rank }));

    if let Err(err) = &outcome {
        if !err.is_abort() {
            error!(rank, %err, "participant failed");
            fabric.abort(rank, err.exit_code(), &err.to_string());
        }
    }
    outcome
}

/// One participant of a [`World`]: its identity, its handle on the world
/// context, and the thread support level it was started with.
#[derive(Debug)]
pub struct Participant {
    group: ParticipantGroup,
    thread_level: ThreadLevel,
}

impl Participant {
    fn new(fabric: Arc<Fabric>, rank: Rank) -> Result<Self> {
        let thread_level = fabric.config().thread_level;
        let context = fabric.lookup(ContextId::WORLD)?;
        Ok(Self {
            group: ParticipantGroup::new(fabric, context, rank)?,
            thread_level,
        })
    }

    /// This participant's identity.
    #[inline]
    pub fn rank(&self) -> Rank {
        self.group.rank()
    }

    /// Number of participants in the world.
    #[inline]
    pub fn size(&self) -> usize {
        self.group.size()
    }

    /// Handle on the world context.
    #[inline]
    pub fn group(&self) -> &ParticipantGroup {
        &self.group
    }

    /// Thread support level provided to this participant.
    #[inline]
    pub fn thread_level(&self) -> ThreadLevel {
        self.thread_level
    }

    /// Fails with [`Error::Capability`] and aborts the whole group when the
    /// provided thread level is weaker than `required`.
    pub fn require_thread_level(&self, required: ThreadLevel) -> Result<()> {
        if self.thread_level >= required {
            return Ok(());
        }
        let err = Error::Capability {
            required,
            provided: self.thread_level,
        };
        self.group.abort(ABORT_EXIT_CODE, &err.to_string());
        Err(err)
    }

    /// Aborts every participant of the world.
    pub fn abort(&self, code: i32, reason: &str) -> Error {
        self.group.abort(code, reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::{Source, TagMatch};

    #[test]
    fn test_results_in_rank_order() {
        let ranks = World::new(6).unwrap().run(|p| Ok(p.rank() * 2)).unwrap();
        assert_eq!(ranks, vec![0, 2, 4, 6, 8, 10]);
    }

    #[test]
    fn test_empty_world_rejected() {
        assert_eq!(World::new(0).unwrap_err(), Error::InvalidGroupSize(0));
    }

    #[test]
    fn test_failure_unblocks_waiting_peers() {
        // Rank 1 waits on a message rank 0 never sends; rank 0's failure must
        // turn into an abort that releases it.
        let err = World::new(2)
            .unwrap()
            .run(|p| {
                if p.rank() == 0 {
                    return Err(Error::Configuration("bad argument".into()));
                }
                let mut buf = [0u8; 1];
                p.group().receive(&mut buf, Source::Rank(0), TagMatch::Any)?;
                Ok(())
            })
            .unwrap_err();
        assert_eq!(err, Error::Configuration("bad argument".into()));
    }

    #[test]
    fn test_panic_becomes_error() {
        let err = World::new(3)
            .unwrap()
            .run(|p| {
                if p.rank() == 2 {
                    panic!("boom");
                }
                p.group().barrier()
            })
            .unwrap_err();
        assert_eq!(err, Error::ParticipantPanicked { rank: 2 });
    }

    #[test]
    fn test_capability_check_aborts_group() {
        let config = FabricConfig::default().with_thread_level(ThreadLevel::Funneled);
        let err = World::with_config(3, config)
            .unwrap()
            .run(|p| {
                p.require_thread_level(ThreadLevel::Multiple)?;
                Ok(())
            })
            .unwrap_err();
        assert_eq!(
            err,
            Error::Capability {
                required: ThreadLevel::Multiple,
                provided: ThreadLevel::Funneled
            }
        );
    }

    #[test]
    fn test_explicit_abort_reaches_everyone() {
        let err = World::new(4)
            .unwrap()
            .run(|p| {
                if p.rank() == 3 {
                    return Err(p.abort(9, "operator stop"));
                }
                p.group().barrier()
            })
            .unwrap_err();
        assert_eq!(
            err,
            Error::Aborted {
                origin: 3,
                code: 9,
                reason: "operator stop".into()
            }
        );
    }

    #[test]
    fn test_thread_level_parsing() {
        assert_eq!("Multiple".parse::<ThreadLevel>().unwrap(), ThreadLevel::Multiple);
        assert!(ThreadLevel::Funneled < ThreadLevel::Multiple);
        assert!("threaded".parse::<ThreadLevel>().is_err());
    }
}
