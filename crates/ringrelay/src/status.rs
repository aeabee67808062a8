//! Addressing for transfers and the status of a completed one.

use crate::{Rank, Tag};
use serde::Serialize;
use std::fmt;

/// Destination of a send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Endpoint {
    /// A participant of the group.
    Rank(Rank),
    /// The null endpoint: sending to it is a no-op that completes at once.
    Null,
}

/// Which senders a receive accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    /// Only the given participant.
    Rank(Rank),
    /// Any participant of the group.
    Any,
    /// The null endpoint: receiving from it completes at once with no data.
    Null,
}

/// Which tags a receive accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagMatch {
    /// Only the given tag.
    Tag(Tag),
    /// Any tag.
    Any,
}

impl Source {
    #[inline]
    pub(crate) fn accepts(self, rank: Rank) -> bool {
        match self {
            Self::Rank(r) => r == rank,
            Self::Any => true,
            Self::Null => false,
        }
    }
}

impl TagMatch {
    #[inline]
    pub(crate) fn accepts(self, tag: Tag) -> bool {
        match self {
            Self::Tag(t) => t == tag,
            Self::Any => true,
        }
    }
}

impl From<Rank> for Endpoint {
    fn from(rank: Rank) -> Self {
        Self::Rank(rank)
    }
}

impl From<Rank> for Source {
    fn from(rank: Rank) -> Self {
        Self::Rank(rank)
    }
}

impl From<Tag> for TagMatch {
    fn from(tag: Tag) -> Self {
        Self::Tag(tag)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rank(r) => write!(f, "{r}"),
            Self::Null => f.write_str("null"),
        }
    }
}

/// Outcome of a completed transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Status {
    /// For receives, the sender that was matched; for sends, the destination.
    pub source: Endpoint,
    /// Tag of the matched message; `None` for null transfers.
    pub tag: Option<Tag>,
    /// Number of elements transferred.
    pub count: usize,
}

impl Status {
    /// Status of a transfer to or from the null endpoint.
    pub const NULL: Status = Status {
        source: Endpoint::Null,
        tag: None,
        count: 0,
    };

    /// Returns `true` if this transfer involved the null endpoint.
    #[inline]
    pub fn is_null(&self) -> bool {
        self.source == Endpoint::Null
    }
}
