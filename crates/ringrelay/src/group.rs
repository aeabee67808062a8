//! Per-participant handle on one communication context.

use crate::backoff::Backoff;
use crate::config::SendMode;
use crate::datatype::{self, Element};
use crate::error::{Error, Result};
use crate::fabric::{Context, ContextId, Fabric, Plane};
use crate::mailbox::{Envelope, Inbox, Outbox, Receipt, ReceiveTicket, SendTicket};
use crate::request::{self, TransferRequest};
use crate::status::{Endpoint, Source, Status, TagMatch};
use crate::topology::RingTopology;
use crate::{Rank, Tag};
use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, trace, warn};

// Tags on the collective plane. They never meet user tags.
const BARRIER_ARRIVE_TAG: Tag = 1;
const BARRIER_RELEASE_TAG: Tag = 2;
const BROADCAST_TAG: Tag = 3;
const GATHER_TAG: Tag = 4;
const DUPLICATE_TAG: Tag = 5;

/// One participant's view of an ordered group of participants, bound to a
/// single communication context.
///
/// A `ParticipantGroup` is owned by exactly one execution unit: it is neither
/// `Clone` nor `Sync`, and it can only be moved. [`duplicate`] produces a new
/// handle on a fresh context whose messages are invisible to every other
/// context.
///
/// [`duplicate`]: ParticipantGroup::duplicate
pub struct ParticipantGroup {
    fabric: Arc<Fabric>,
    context: Arc<Context>,
    rank: Rank,
    topology: RingTopology,
    point_to_point: RefCell<Inbox>,
    collective: RefCell<Inbox>,
    outbox: RefCell<Outbox>,
    _not_sync: PhantomData<Cell<()>>,
}

impl ParticipantGroup {
    pub(crate) fn new(fabric: Arc<Fabric>, context: Arc<Context>, rank: Rank) -> Result<Self> {
        let topology = RingTopology::new(fabric.size())?;
        Ok(Self {
            fabric,
            context,
            rank,
            topology,
            point_to_point: RefCell::new(Inbox::default()),
            collective: RefCell::new(Inbox::default()),
            outbox: RefCell::new(Outbox::default()),
            _not_sync: PhantomData,
        })
    }

    // ---------------------------------------------------------------------
    // IDENTITY
    // ---------------------------------------------------------------------

    /// This participant's identity in `[0, size)`.
    #[inline]
    pub fn rank(&self) -> Rank {
        self.rank
    }

    /// Number of participants.
    #[inline]
    pub fn size(&self) -> usize {
        self.topology.size()
    }

    /// Context this handle sends and receives in.
    #[inline]
    pub fn context_id(&self) -> ContextId {
        self.context.id()
    }

    /// Ring over the group's participants.
    #[inline]
    pub fn topology(&self) -> RingTopology {
        self.topology
    }

    /// Next participant in the ring.
    #[inline]
    pub fn successor(&self) -> Rank {
        self.topology.successor(self.rank)
    }

    /// Previous participant in the ring.
    #[inline]
    pub fn predecessor(&self) -> Rank {
        self.topology.predecessor(self.rank)
    }

    /// Send completion discipline of the underlying fabric.
    #[inline]
    pub fn send_mode(&self) -> SendMode {
        self.fabric.config().send_mode
    }

    // ---------------------------------------------------------------------
    // POINT-TO-POINT
    // ---------------------------------------------------------------------

    /// Issues a send of `data` to `destination` and returns without waiting.
    ///
    /// The envelope is placed in the destination's lane right away when there
    /// is room and no earlier send to the same destination is still parked;
    /// otherwise it is parked and delivered by later progress, in issue order.
    pub fn issue_send<T: Element>(
        &self,
        data: &[T],
        destination: impl Into<Endpoint>,
        tag: Tag,
    ) -> Result<TransferRequest<'_, T>> {
        let destination = destination.into();
        self.fabric.check_abort()?;

        let dest = match destination {
            Endpoint::Null => {
                return Ok(TransferRequest::send(self, destination, tag, 0, None, None));
            }
            Endpoint::Rank(dest) => self.check_rank(dest)?,
        };

        let receipt = match self.send_mode() {
            SendMode::Buffered => None,
            SendMode::Synchronous => Some(Arc::new(Receipt::default())),
        };
        let envelope = Envelope {
            source: self.rank,
            tag,
            payload: datatype::encode_slice(data),
            receipt: receipt.clone(),
        };
        trace!(rank = self.rank, dest, tag, count = data.len(), context = %self.context_id(), "send issued");

        let parked = self.outbox.borrow_mut().submit(dest, envelope, |dest, envelope| {
            self.try_deliver(Plane::PointToPoint, dest, envelope)
        });
        Ok(TransferRequest::send(
            self,
            destination,
            tag,
            data.len(),
            parked,
            receipt,
        ))
    }

    /// Posts a receive into `buffer` and returns without waiting.
    ///
    /// The buffer contents are undefined until `wait` returns.
    pub fn issue_receive<'a, T: Element>(
        &'a self,
        buffer: &'a mut [T],
        source: impl Into<Source>,
        tag: impl Into<TagMatch>,
    ) -> Result<TransferRequest<'a, T>> {
        let source = source.into();
        let tag = tag.into();
        self.fabric.check_abort()?;

        let ticket = match source {
            Source::Null => None,
            Source::Rank(rank) => {
                self.check_rank(rank)?;
                Some(self.post(Plane::PointToPoint, source, tag))
            }
            Source::Any => Some(self.post(Plane::PointToPoint, source, tag)),
        };
        trace!(rank = self.rank, ?source, ?tag, context = %self.context_id(), "receive posted");
        Ok(TransferRequest::receive(self, buffer, ticket))
    }

    /// Blocking send: issue and wait.
    pub fn send<T: Element>(
        &self,
        data: &[T],
        destination: impl Into<Endpoint>,
        tag: Tag,
    ) -> Result<Status> {
        self.issue_send(data, destination, tag)?.wait()
    }

    /// Blocking receive: post and wait.
    pub fn receive<T: Element>(
        &self,
        buffer: &mut [T],
        source: impl Into<Source>,
        tag: impl Into<TagMatch>,
    ) -> Result<Status> {
        self.issue_receive(buffer, source, tag)?.wait()
    }

    // ---------------------------------------------------------------------
    // COLLECTIVES
    // ---------------------------------------------------------------------

    /// Creates an isolated copy of this group's addressing space.
    ///
    /// Collective: every participant must call it, in the same order relative
    /// to other collectives. Rank 0 registers the new context and announces
    /// its id to the others.
    pub fn duplicate(&self) -> Result<ParticipantGroup> {
        let context = if self.rank == 0 {
            let context = self.fabric.create_context();
            let raw = [context.id().as_u64()];
            for dest in 1..self.size() {
                self.collective_send(dest, DUPLICATE_TAG, &raw)?;
            }
            context
        } else {
            let mut raw = [0u64];
            self.collective_receive(0, DUPLICATE_TAG, &mut raw)?;
            self.fabric.lookup(ContextId::from_raw(raw[0]))?
        };
        debug!(rank = self.rank, parent = %self.context_id(), context = %context.id(), "context duplicated");
        ParticipantGroup::new(Arc::clone(&self.fabric), context, self.rank)
    }

    /// Returns once every participant of the group has entered the barrier.
    pub fn barrier(&self) -> Result<()> {
        if self.rank == 0 {
            for source in 1..self.size() {
                self.collective_receive::<u8>(source, BARRIER_ARRIVE_TAG, &mut [])?;
            }
            for dest in 1..self.size() {
                self.collective_send::<u8>(dest, BARRIER_RELEASE_TAG, &[])?;
            }
        } else {
            self.collective_send::<u8>(0, BARRIER_ARRIVE_TAG, &[])?;
            self.collective_receive::<u8>(0, BARRIER_RELEASE_TAG, &mut [])?;
        }
        Ok(())
    }

    /// Copies `data` from `root` into `data` on every other participant.
    pub fn broadcast<T: Element>(&self, data: &mut [T], root: Rank) -> Result<()> {
        self.check_rank(root)?;
        if self.rank == root {
            for dest in (0..self.size()).filter(|&r| r != root) {
                self.collective_send(dest, BROADCAST_TAG, data)?;
            }
        } else {
            self.collective_receive(root, BROADCAST_TAG, data)?;
        }
        Ok(())
    }

    /// Collects one value per participant at `root`, indexed by rank.
    ///
    /// The root receives from each rank by name, so the table is in identity
    /// order whatever order the values arrive in. Other participants get `None`.
    pub fn gather<T: Element>(&self, value: T, root: Rank) -> Result<Option<Vec<T>>> {
        self.check_rank(root)?;
        if self.rank != root {
            self.collective_send(root, GATHER_TAG, &[value])?;
            return Ok(None);
        }

        let mut table = vec![value; self.size()];
        for source in (0..self.size()).filter(|&r| r != root) {
            self.collective_receive(source, GATHER_TAG, &mut table[source..=source])?;
        }
        Ok(Some(table))
    }

    /// Aborts every participant of the world, not just this one.
    ///
    /// Returns the [`Error::Aborted`] every participant will observe.
    pub fn abort(&self, code: i32, reason: &str) -> Error {
        self.fabric.abort(self.rank, code, reason)
    }

    // ---------------------------------------------------------------------
    // CRATE-INTERNAL TRANSPORT
    // ---------------------------------------------------------------------

    #[inline]
    pub(crate) fn fabric(&self) -> &Fabric {
        &self.fabric
    }

    fn check_rank(&self, rank: Rank) -> Result<Rank> {
        if rank < self.size() {
            Ok(rank)
        } else {
            Err(Error::InvalidRank {
                rank,
                size: self.size(),
            })
        }
    }

    fn inbox(&self, plane: Plane) -> &RefCell<Inbox> {
        match plane {
            Plane::PointToPoint => &self.point_to_point,
            Plane::Collective => &self.collective,
        }
    }

    fn try_deliver(
        &self,
        plane: Plane,
        dest: Rank,
        envelope: Envelope,
    ) -> std::result::Result<(), Envelope> {
        self.context.mailbox(plane, dest).try_deliver(envelope)
    }

    fn deliver_blocking(&self, plane: Plane, dest: Rank, envelope: Envelope) -> Result<()> {
        let mut backoff = Backoff::new();
        let mut envelope = envelope;
        loop {
            match self.try_deliver(plane, dest, envelope) {
                Ok(()) => return Ok(()),
                Err(back) => envelope = back,
            }
            self.progress_all();
            self.fabric.check_abort()?;
            backoff.snooze();
        }
    }

    pub(crate) fn post(&self, plane: Plane, source: Source, tag: TagMatch) -> ReceiveTicket {
        self.inbox(plane).borrow_mut().post(source, tag)
    }

    pub(crate) fn progress(&self, plane: Plane) -> usize {
        let mailbox = self.context.mailbox(plane, self.rank);
        self.inbox(plane).borrow_mut().progress(mailbox)
    }

    /// Retries parked point-to-point sends; returns how many were delivered.
    pub(crate) fn flush_outbox(&self) -> usize {
        self.outbox
            .borrow_mut()
            .flush(|dest, envelope| self.try_deliver(Plane::PointToPoint, dest, envelope))
    }

    #[inline]
    pub(crate) fn is_parked(&self, ticket: SendTicket) -> bool {
        self.outbox.borrow().is_parked(ticket)
    }

    /// One round of everything this handle can move without blocking.
    pub(crate) fn progress_all(&self) -> usize {
        self.flush_outbox() + self.progress(Plane::PointToPoint) + self.progress(Plane::Collective)
    }

    pub(crate) fn is_matched(&self, plane: Plane, ticket: ReceiveTicket) -> bool {
        self.inbox(plane).borrow().is_matched(ticket)
    }

    pub(crate) fn cancel(&self, plane: Plane, ticket: ReceiveTicket) {
        self.inbox(plane).borrow_mut().cancel(ticket);
    }

    /// Blocks until `ticket` is matched. Both planes keep progressing so that
    /// receives posted earlier on either plane still match while we wait.
    pub(crate) fn wait_ticket(&self, plane: Plane, ticket: ReceiveTicket) -> Result<Envelope> {
        let mut backoff = Backoff::new();
        loop {
            if self.progress_all() > 0 {
                backoff.reset();
            }
            if let Some(envelope) = self.inbox(plane).borrow_mut().take(ticket) {
                return Ok(envelope);
            }
            self.fabric.check_abort()?;
            backoff.snooze();
        }
    }

    fn collective_send<T: Element>(&self, dest: Rank, tag: Tag, data: &[T]) -> Result<()> {
        let envelope = Envelope {
            source: self.rank,
            tag,
            payload: datatype::encode_slice(data),
            receipt: None,
        };
        self.deliver_blocking(Plane::Collective, dest, envelope)
    }

    fn collective_receive<T: Element>(&self, source: Rank, tag: Tag, buffer: &mut [T]) -> Result<Status> {
        let ticket = self.post(Plane::Collective, Source::Rank(source), TagMatch::Tag(tag));
        let envelope = self.wait_ticket(Plane::Collective, ticket)?;
        request::unpack(&envelope, buffer)
    }
}

impl Drop for ParticipantGroup {
    fn drop(&mut self) {
        // Parked sends were issued and must still reach their lanes, unless
        // the destination has already left the context.
        let mut backoff = Backoff::new();
        while !self.outbox.get_mut().is_empty() {
            if self.flush_outbox() > 0 {
                continue;
            }
            let context = &self.context;
            let discarded = self.outbox.get_mut().discard(|dest| context.has_departed(dest));
            if discarded > 0 {
                warn!(
                    rank = self.rank,
                    context = %self.context_id(),
                    discarded,
                    "parked sends dropped, destination already left"
                );
                continue;
            }
            if self.fabric.is_aborted() {
                warn!(rank = self.rank, context = %self.context_id(), "parked sends dropped after abort");
                break;
            }
            backoff.snooze();
        }
        let inbox = self.point_to_point.get_mut();
        let (unexpected, posted) = (inbox.unexpected_len(), inbox.posted_len());
        let undrained = !self.context.mailbox(Plane::PointToPoint, self.rank).is_empty();
        if unexpected > 0 || posted > 0 || undrained {
            debug!(
                rank = self.rank,
                context = %self.context_id(),
                unexpected,
                posted,
                undrained,
                "handle dropped with unmatched traffic"
            );
        }
        self.fabric.retire(&self.context, self.rank);
    }
}

impl std::fmt::Debug for ParticipantGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParticipantGroup")
            .field("rank", &self.rank)
            .field("size", &self.size())
            .field("context", &self.context_id())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FabricConfig;
    use crate::World;

    #[test]
    fn test_gather_is_rank_indexed() {
        let results = World::new(4)
            .unwrap()
            .run(|p| {
                let group = p.group();
                // Reverse the natural arrival order
                std::thread::sleep(std::time::Duration::from_millis(
                    (group.size() - group.rank()) as u64 * 5,
                ));
                group.gather(group.rank() as f64 * 10.0, 0)
            })
            .unwrap();
        assert_eq!(results[0], Some(vec![0.0, 10.0, 20.0, 30.0]));
        assert!(results[1..].iter().all(Option::is_none));
    }

    #[test]
    fn test_broadcast_from_nonzero_root() {
        let results = World::new(3)
            .unwrap()
            .run(|p| {
                let group = p.group();
                let mut value = [if group.rank() == 2 { 17i32 } else { 0 }];
                group.broadcast(&mut value, 2)?;
                Ok(value[0])
            })
            .unwrap();
        assert_eq!(results, vec![17, 17, 17]);
    }

    #[test]
    fn test_duplicate_shares_id_across_ranks() {
        let ids = World::new(3)
            .unwrap()
            .run(|p| {
                let dup = p.group().duplicate()?;
                assert_ne!(dup.context_id(), ContextId::WORLD);
                assert_eq!(dup.rank(), p.rank());
                Ok(dup.context_id())
            })
            .unwrap();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_invalid_destination_rejected() {
        let err = World::new(2)
            .unwrap()
            .run(|p| p.group().send(&[1u8], Endpoint::Rank(5), 0).map(|_| ()))
            .unwrap_err();
        assert_eq!(err, Error::InvalidRank { rank: 5, size: 2 });
    }

    #[test]
    fn test_collectives_do_not_match_point_to_point() {
        World::new(2)
            .unwrap()
            .run(|p| {
                let group = p.group();
                if group.rank() == 1 {
                    group.send(&[9u8], Endpoint::Rank(0), BROADCAST_TAG)?;
                }
                let mut value = [if group.rank() == 1 { 4u8 } else { 0 }];
                group.broadcast(&mut value, 1)?;
                assert_eq!(value, [4]);
                if group.rank() == 0 {
                    let mut buf = [0u8];
                    group.receive(&mut buf, Source::Rank(1), TagMatch::Tag(BROADCAST_TAG))?;
                    assert_eq!(buf, [9]);
                }
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_drop_discards_sends_to_departed_destination() {
        let config = FabricConfig::default().with_lane_bits(1);
        let results = World::with_config(2, config)
            .unwrap()
            .run(|p| {
                let group = p.group();
                if group.rank() == 0 {
                    // Two fit the lane, two park; rank 1 never receives
                    for i in 0..4u8 {
                        drop(group.issue_send(&[i], Endpoint::Rank(1), 0)?);
                    }
                }
                Ok(group.rank())
            })
            .unwrap();
        assert_eq!(results, vec![0, 1]);
    }
}
