//! Shared message fabric: communication contexts and the group abort flag.

use crate::config::FabricConfig;
use crate::error::{Error, Result};
#[cfg(debug_assertions)]
use crate::invariants::debug_assert_retire_count;
use crate::mailbox::Mailbox;
use crate::Rank;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Identifier of a communication context (an isolated addressing space).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ContextId(u64);

impl ContextId {
    /// The context every participant starts in.
    pub const WORLD: ContextId = ContextId(0);

    /// Raw numeric id.
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    pub(crate) const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

/// Which set of mailboxes a message travels on.
///
/// Collectives use their own plane so that they never match a point-to-point
/// receive posted on the same context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Plane {
    PointToPoint,
    Collective,
}

/// Mailboxes of one context: `size` destinations per plane.
pub(crate) struct Context {
    id: ContextId,
    point_to_point: Vec<Mailbox>,
    collective: Vec<Mailbox>,
    retired: AtomicUsize,
    departed: Box<[AtomicBool]>,
}

impl Context {
    fn new(id: ContextId, size: usize, lane_bits: u8) -> Self {
        let plane = || (0..size).map(|_| Mailbox::new(size, lane_bits)).collect();
        Self {
            id,
            point_to_point: plane(),
            collective: plane(),
            retired: AtomicUsize::new(0),
            departed: (0..size).map(|_| AtomicBool::new(false)).collect(),
        }
    }

    #[inline]
    pub(crate) fn id(&self) -> ContextId {
        self.id
    }

    #[inline]
    pub(crate) fn mailbox(&self, plane: Plane, rank: Rank) -> &Mailbox {
        match plane {
            Plane::PointToPoint => &self.point_to_point[rank],
            Plane::Collective => &self.collective[rank],
        }
    }

    /// Whether `rank` has dropped its handle; its mailboxes are never drained again.
    #[inline]
    pub(crate) fn has_departed(&self, rank: Rank) -> bool {
        self.departed[rank].load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone)]
struct AbortRecord {
    origin: Rank,
    code: i32,
    reason: String,
}

/// State shared by every participant of one world.
pub(crate) struct Fabric {
    size: usize,
    config: FabricConfig,
    contexts: Mutex<HashMap<ContextId, Arc<Context>>>,
    next_context: AtomicU64,
    aborted: AtomicBool,
    abort_record: Mutex<Option<AbortRecord>>,
}

impl Fabric {
    pub(crate) fn new(size: usize, config: FabricConfig) -> Self {
        let mut contexts = HashMap::new();
        contexts.insert(
            ContextId::WORLD,
            Arc::new(Context::new(ContextId::WORLD, size, config.lane_bits)),
        );
        Self {
            size,
            config,
            contexts: Mutex::new(contexts),
            next_context: AtomicU64::new(1),
            aborted: AtomicBool::new(false),
            abort_record: Mutex::new(None),
        }
    }

    #[inline]
    pub(crate) fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub(crate) fn config(&self) -> &FabricConfig {
        &self.config
    }

    /// Allocates and registers a fresh context. Called by the duplicating root.
    pub(crate) fn create_context(&self) -> Arc<Context> {
        let id = ContextId(self.next_context.fetch_add(1, Ordering::Relaxed));
        let context = Arc::new(Context::new(id, self.size, self.config.lane_bits));
        self.contexts.lock().insert(id, Arc::clone(&context));
        debug!(context = %id, "context created");
        context
    }

    pub(crate) fn lookup(&self, id: ContextId) -> Result<Arc<Context>> {
        self.contexts
            .lock()
            .get(&id)
            .cloned()
            .ok_or(Error::UnknownContext(id))
    }

    /// Records that one member dropped its handle; the last one unregisters it.
    pub(crate) fn retire(&self, context: &Context, rank: Rank) {
        context.departed[rank].store(true, Ordering::Release);
        let retired = context.retired.fetch_add(1, Ordering::AcqRel) + 1;
        #[cfg(debug_assertions)]
        debug_assert_retire_count!(retired, self.size);
        if retired == self.size {
            let mut contexts = self.contexts.lock();
            contexts.remove(&context.id);
            debug!(context = %context.id, live = contexts.len(), "context retired");
        }
    }

    /// Number of registered contexts, the world context included.
    #[cfg(test)]
    pub(crate) fn live_contexts(&self) -> usize {
        self.contexts.lock().len()
    }

    /// Aborts the whole group. The first abort wins; later ones are ignored.
    pub(crate) fn abort(&self, origin: Rank, code: i32, reason: &str) -> Error {
        {
            let mut record = self.abort_record.lock();
            if record.is_none() {
                warn!(origin, code, reason, "aborting participant group");
                *record = Some(AbortRecord {
                    origin,
                    code,
                    reason: reason.to_owned(),
                });
                self.aborted.store(true, Ordering::Release);
            }
        }
        self.abort_error().unwrap_or(Error::Aborted {
            origin,
            code,
            reason: reason.to_owned(),
        })
    }

    #[inline]
    pub(crate) fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Fails with [`Error::Aborted`] once any participant has aborted.
    #[inline]
    pub(crate) fn check_abort(&self) -> Result<()> {
        if self.is_aborted() {
            if let Some(err) = self.abort_error() {
                return Err(err);
            }
        }
        Ok(())
    }

    pub(crate) fn abort_error(&self) -> Option<Error> {
        self.abort_record.lock().as_ref().map(|r| Error::Aborted {
            origin: r.origin,
            code: r.code,
            reason: r.reason.clone(),
        })
    }
}
