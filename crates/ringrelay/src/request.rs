//! Handles for non-blocking transfers.

use crate::backoff::Backoff;
use crate::datatype::{self, Element};
use crate::error::{Error, Result};
#[cfg(debug_assertions)]
use crate::invariants::debug_assert_posted;
use crate::fabric::Plane;
use crate::group::ParticipantGroup;
use crate::mailbox::{Envelope, Receipt, ReceiveTicket, SendTicket};
use crate::status::{Endpoint, Status};
use crate::Tag;
use serde::Serialize;
use std::sync::Arc;
use tracing::{trace, warn};

/// Lifecycle of a [`TransferRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RequestState {
    /// Issued; the transfer may or may not have happened yet.
    Posted,
    /// A `wait` has returned for this transfer.
    Completed,
}

enum Transfer<'a, T> {
    Send {
        destination: Endpoint,
        tag: Tag,
        count: usize,
        /// Set while the envelope sits in the group's outbox.
        parked: Option<SendTicket>,
        /// Present only for synchronous sends.
        receipt: Option<Arc<Receipt>>,
    },
    Receive {
        buffer: &'a mut [T],
        /// `None` for a receive from the null endpoint.
        ticket: Option<ReceiveTicket>,
    },
}

/// A posted, possibly incomplete, directed transfer.
///
/// The request only becomes [`RequestState::Completed`] through [`wait`]; it
/// never completes on its own. A receive buffer is valid only after `wait`
/// returns.
///
/// # Example
///
/// ```
/// use ringrelay::{Endpoint, Source, TagMatch, World};
///
/// let sums = World::new(2).unwrap().run(|p| {
///     let group = p.group();
///     let send = vec![group.rank() as f64 + 1.0; 4];
///     let mut recv = vec![0.0; 4];
///
///     let mut tx = group.issue_send(&send, Endpoint::Rank(group.successor()), 0)?;
///     let mut rx = group.issue_receive(&mut recv, Source::Rank(group.predecessor()), TagMatch::Any)?;
///     tx.wait()?;
///     rx.wait()?;
///     drop(rx);
///
///     Ok(recv.iter().sum::<f64>())
/// }).unwrap();
///
/// assert_eq!(sums, vec![8.0, 4.0]);
/// ```
///
/// [`wait`]: TransferRequest::wait
pub struct TransferRequest<'a, T: Element> {
    group: &'a ParticipantGroup,
    transfer: Transfer<'a, T>,
    state: RequestState,
    status: Option<Status>,
}

impl<'a, T: Element> TransferRequest<'a, T> {
    pub(crate) fn send(
        group: &'a ParticipantGroup,
        destination: Endpoint,
        tag: Tag,
        count: usize,
        parked: Option<SendTicket>,
        receipt: Option<Arc<Receipt>>,
    ) -> Self {
        Self {
            group,
            transfer: Transfer::Send {
                destination,
                tag,
                count,
                parked,
                receipt,
            },
            state: RequestState::Posted,
            status: None,
        }
    }

    pub(crate) fn receive(
        group: &'a ParticipantGroup,
        buffer: &'a mut [T],
        ticket: Option<ReceiveTicket>,
    ) -> Self {
        Self {
            group,
            transfer: Transfer::Receive { buffer, ticket },
            state: RequestState::Posted,
            status: None,
        }
    }

    /// Current state.
    #[inline]
    pub fn state(&self) -> RequestState {
        self.state
    }

    /// Returns `true` once `wait` has returned.
    #[inline]
    pub fn is_completed(&self) -> bool {
        self.state == RequestState::Completed
    }

    /// Status recorded by `wait`, if it has returned.
    #[inline]
    pub fn status(&self) -> Option<Status> {
        self.status
    }

    /// Whether [`wait`](Self::wait) would return without blocking.
    ///
    /// Drives delivery and matching forward but never changes the state.
    pub fn poll_ready(&mut self) -> Result<bool> {
        if self.is_completed() {
            return Ok(true);
        }
        self.group.fabric().check_abort()?;
        self.group.progress_all();
        match &self.transfer {
            Transfer::Send {
                parked, receipt, ..
            } => Ok(send_done(self.group, *parked, receipt.as_deref())),
            Transfer::Receive { ticket, .. } => Ok(match ticket {
                Some(ticket) => self.group.is_matched(Plane::PointToPoint, *ticket),
                None => true,
            }),
        }
    }

    /// Blocks the calling execution unit until the transfer completes.
    ///
    /// There is no timeout. Waiting again on a completed request returns the
    /// recorded status.
    pub fn wait(&mut self) -> Result<Status> {
        if let Some(status) = self.status {
            return Ok(status);
        }
        #[cfg(debug_assertions)]
        debug_assert_posted!(self.state);

        let status = match &mut self.transfer {
            Transfer::Send {
                destination,
                tag,
                count,
                parked,
                receipt,
            } => {
                wait_send(self.group, *parked, receipt.as_deref())?;
                match destination {
                    Endpoint::Null => Status::NULL,
                    Endpoint::Rank(_) => Status {
                        source: *destination,
                        tag: Some(*tag),
                        count: *count,
                    },
                }
            }
            Transfer::Receive { buffer, ticket } => match ticket {
                None => Status::NULL,
                Some(ticket) => {
                    let envelope = self.group.wait_ticket(Plane::PointToPoint, *ticket)?;
                    unpack(&envelope, buffer)?
                }
            },
        };

        self.state = RequestState::Completed;
        self.status = Some(status);
        trace!(rank = self.group.rank(), ?status, "request completed");
        Ok(status)
    }

    /// Waits on every request in order and returns their statuses.
    pub fn wait_all(requests: &mut [TransferRequest<'a, T>]) -> Result<Vec<Status>> {
        requests.iter_mut().map(TransferRequest::wait).collect()
    }
}

impl<T: Element> Drop for TransferRequest<'_, T> {
    fn drop(&mut self) {
        if self.is_completed() {
            return;
        }
        // A parked send stays in the group's outbox and is delivered by later
        // progress; only an unwaited receive has to be withdrawn.
        if let Transfer::Receive {
            ticket: Some(ticket),
            ..
        } = &self.transfer
        {
            self.group.cancel(Plane::PointToPoint, *ticket);
            warn!(rank = self.group.rank(), "posted receive dropped before wait");
        }
    }
}

fn send_done(group: &ParticipantGroup, parked: Option<SendTicket>, receipt: Option<&Receipt>) -> bool {
    parked.map_or(true, |ticket| !group.is_parked(ticket))
        && receipt.map_or(true, Receipt::is_acknowledged)
}

fn wait_send(
    group: &ParticipantGroup,
    parked: Option<SendTicket>,
    receipt: Option<&Receipt>,
) -> Result<()> {
    let mut backoff = Backoff::new();
    loop {
        // Our own receives keep matching while we block, so a peer waiting
        // on a synchronous send to us can make progress.
        if group.progress_all() > 0 {
            backoff.reset();
        }
        if send_done(group, parked, receipt) {
            return Ok(());
        }
        group.fabric().check_abort()?;
        backoff.snooze();
    }
}

/// Decodes a matched envelope into a receive buffer.
pub(crate) fn unpack<T: Element>(envelope: &Envelope, buffer: &mut [T]) -> Result<Status> {
    let incoming = datatype::element_count::<T>(&envelope.payload).ok_or(
        Error::ElementMismatch {
            bytes: envelope.payload.len(),
            element_size: T::SIZE,
        },
    )?;
    if incoming > buffer.len() {
        return Err(Error::Truncated {
            capacity: buffer.len(),
            incoming,
        });
    }
    let count = datatype::decode_into(&envelope.payload, buffer);
    Ok(Status {
        source: Endpoint::Rank(envelope.source),
        tag: Some(envelope.tag),
        count,
    })
}
