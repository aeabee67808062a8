//! Per-participant mailboxes built from one lane per source.
//!
//! A mailbox belongs to one destination rank inside one context. Source `s`
//! always writes lane `s`, so each lane has a single producer and lane order is
//! exactly the order in which `s` sent.

#[cfg(debug_assertions)]
use crate::invariants::debug_assert_lane_source;
use crate::lane::Lane;
use crate::status::{Source, TagMatch};
use crate::{Rank, Tag};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Delivery acknowledgement for synchronous sends.
#[derive(Debug, Default)]
pub(crate) struct Receipt {
    matched: AtomicBool,
}

impl Receipt {
    #[inline]
    pub(crate) fn acknowledge(&self) {
        self.matched.store(true, Ordering::Release);
    }

    #[inline]
    pub(crate) fn is_acknowledged(&self) -> bool {
        self.matched.load(Ordering::Acquire)
    }
}

/// One message in flight.
#[derive(Debug)]
pub(crate) struct Envelope {
    pub(crate) source: Rank,
    pub(crate) tag: Tag,
    pub(crate) payload: Box<[u8]>,
    pub(crate) receipt: Option<Arc<Receipt>>,
}

impl Envelope {
    #[inline]
    fn matches(&self, source: Source, tag: TagMatch) -> bool {
        source.accepts(self.source) && tag.accepts(self.tag)
    }
}

/// Ring-decomposed inbound queue of one rank.
pub(crate) struct Mailbox {
    lanes: Vec<Lane<Envelope>>,
}

impl Mailbox {
    pub(crate) fn new(sources: usize, lane_bits: u8) -> Self {
        Self {
            lanes: (0..sources).map(|_| Lane::new(lane_bits)).collect(),
        }
    }

    /// Producer side: place `envelope` in its source's lane.
    #[inline]
    pub(crate) fn try_deliver(&self, envelope: Envelope) -> Result<(), Envelope> {
        self.lanes[envelope.source].try_push(envelope)
    }

    /// Consumer side: move every published envelope into `pending`, lane by lane.
    pub(crate) fn collect(&self, pending: &mut VecDeque<Envelope>) -> usize {
        let mut total = 0;
        for (_lane_id, lane) in self.lanes.iter().enumerate() {
            total += lane.drain(|envelope| {
                #[cfg(debug_assertions)]
                debug_assert_lane_source!(_lane_id, envelope.source);
                pending.push_back(envelope);
            });
        }
        total
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.lanes.iter().all(Lane::is_empty)
    }
}

/// Handle of a receive posted on an [`Inbox`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ReceiveTicket(u64);

#[derive(Debug)]
struct PostedReceive {
    ticket: ReceiveTicket,
    source: Source,
    tag: TagMatch,
}

/// Consumer-side matching state of one rank on one plane.
///
/// Arrivals are matched against posted receives first, in posting order; an
/// arrival no posted receive wants is kept as unexpected, and a later post
/// claims the earliest matching unexpected envelope. Matching a synchronous
/// envelope acknowledges its receipt.
#[derive(Default)]
pub(crate) struct Inbox {
    unexpected: VecDeque<Envelope>,
    posted: VecDeque<PostedReceive>,
    matched: HashMap<ReceiveTicket, Envelope>,
    arrivals: VecDeque<Envelope>,
    next_ticket: u64,
}

impl Inbox {
    /// Posts a receive, matching it at once if an unexpected envelope fits.
    pub(crate) fn post(&mut self, source: Source, tag: TagMatch) -> ReceiveTicket {
        let ticket = ReceiveTicket(self.next_ticket);
        self.next_ticket += 1;

        let earliest = self.unexpected.iter().position(|e| e.matches(source, tag));
        match earliest.and_then(|pos| self.unexpected.remove(pos)) {
            Some(envelope) => self.complete(ticket, envelope),
            None => self.posted.push_back(PostedReceive {
                ticket,
                source,
                tag,
            }),
        }
        ticket
    }

    /// Collects new arrivals from `mailbox` and routes them; returns how many arrived.
    pub(crate) fn progress(&mut self, mailbox: &Mailbox) -> usize {
        let arrived = mailbox.collect(&mut self.arrivals);
        while let Some(envelope) = self.arrivals.pop_front() {
            let wanted = self
                .posted
                .iter()
                .position(|p| envelope.matches(p.source, p.tag));
            match wanted.and_then(|pos| self.posted.remove(pos)) {
                Some(posted) => self.complete(posted.ticket, envelope),
                None => self.unexpected.push_back(envelope),
            }
        }
        arrived
    }

    #[inline]
    pub(crate) fn is_matched(&self, ticket: ReceiveTicket) -> bool {
        self.matched.contains_key(&ticket)
    }

    /// Claims the envelope matched to `ticket`, if any.
    #[inline]
    pub(crate) fn take(&mut self, ticket: ReceiveTicket) -> Option<Envelope> {
        self.matched.remove(&ticket)
    }

    /// Withdraws a receive that will never be waited on. An envelope already
    /// matched to it goes back to the front of the unexpected queue.
    ///
    /// A synchronous envelope keeps its acknowledgement: its sender may
    /// already have completed on the match, so the receipt is never revoked.
    pub(crate) fn cancel(&mut self, ticket: ReceiveTicket) {
        self.posted.retain(|p| p.ticket != ticket);
        if let Some(envelope) = self.matched.remove(&ticket) {
            self.unexpected.push_front(envelope);
        }
    }

    pub(crate) fn unexpected_len(&self) -> usize {
        self.unexpected.len()
    }

    pub(crate) fn posted_len(&self) -> usize {
        self.posted.len()
    }

    fn complete(&mut self, ticket: ReceiveTicket, envelope: Envelope) {
        if let Some(receipt) = &envelope.receipt {
            receipt.acknowledge();
        }
        self.matched.insert(ticket, envelope);
    }
}

/// Handle of a send parked in an [`Outbox`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SendTicket(u64);

#[derive(Debug)]
struct Outgoing {
    ticket: SendTicket,
    dest: Rank,
    envelope: Envelope,
}

/// Producer-side queue of envelopes whose destination lane was full.
///
/// Envelopes for one destination leave in the order they were issued, and a
/// new send never overtakes one already parked for the same destination.
/// A full lane only holds back its own destination.
#[derive(Debug, Default)]
pub(crate) struct Outbox {
    parked: VecDeque<Outgoing>,
    next_ticket: u64,
}

impl Outbox {
    /// Delivers `envelope` now if nothing is parked ahead of it, else parks it.
    pub(crate) fn submit<F>(&mut self, dest: Rank, envelope: Envelope, deliver: F) -> Option<SendTicket>
    where
        F: FnOnce(Rank, Envelope) -> Result<(), Envelope>,
    {
        let envelope = if self.parked.iter().any(|o| o.dest == dest) {
            envelope
        } else {
            match deliver(dest, envelope) {
                Ok(()) => return None,
                Err(back) => back,
            }
        };
        let ticket = SendTicket(self.next_ticket);
        self.next_ticket += 1;
        self.parked.push_back(Outgoing {
            ticket,
            dest,
            envelope,
        });
        Some(ticket)
    }

    /// Retries parked envelopes in order; returns how many left.
    pub(crate) fn flush<F>(&mut self, mut deliver: F) -> usize
    where
        F: FnMut(Rank, Envelope) -> Result<(), Envelope>,
    {
        if self.parked.is_empty() {
            return 0;
        }
        let mut blocked: Vec<Rank> = Vec::new();
        let mut still_parked = VecDeque::with_capacity(self.parked.len());
        let mut delivered = 0;
        while let Some(mut outgoing) = self.parked.pop_front() {
            if !blocked.contains(&outgoing.dest) {
                match deliver(outgoing.dest, outgoing.envelope) {
                    Ok(()) => {
                        delivered += 1;
                        continue;
                    }
                    Err(back) => {
                        outgoing.envelope = back;
                        blocked.push(outgoing.dest);
                    }
                }
            }
            still_parked.push_back(outgoing);
        }
        self.parked = still_parked;
        delivered
    }

    /// Drops every parked envelope whose destination matches; returns how many.
    pub(crate) fn discard<P>(&mut self, mut unreachable: P) -> usize
    where
        P: FnMut(Rank) -> bool,
    {
        let before = self.parked.len();
        self.parked.retain(|o| !unreachable(o.dest));
        before - self.parked.len()
    }

    #[inline]
    pub(crate) fn is_parked(&self, ticket: SendTicket) -> bool {
        self.parked.iter().any(|o| o.ticket == ticket)
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.parked.is_empty()
    }
}
