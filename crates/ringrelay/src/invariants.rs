//! Debug assertion macros for fabric invariants.
//!
//! Only active in debug builds (`#[cfg(debug_assertions)]`), so there is zero
//! overhead in release builds.

// =============================================================================
// Lane: bounded count
// =============================================================================

/// Assert that a lane never holds more envelopes than its capacity.
///
/// **Invariant**: `0 ≤ (tail - head) ≤ capacity`
///
/// Used in: `Lane::try_push()` after publishing the new tail
macro_rules! debug_assert_bounded_count {
    ($count:expr, $capacity:expr) => {
        debug_assert!(
            $count <= $capacity,
            "lane count {} exceeds capacity {}",
            $count,
            $capacity
        )
    };
}

/// Assert that head does not advance past tail.
///
/// **Invariant**: `head ≤ tail` (after drain)
///
/// Used in: `Lane::drain()` before updating head
macro_rules! debug_assert_head_not_past_tail {
    ($new_head:expr, $tail:expr) => {
        debug_assert!(
            $new_head <= $tail,
            "advancing lane head {} beyond tail {}",
            $new_head,
            $tail
        )
    };
}

// =============================================================================
// Mailbox: per-source FIFO
// =============================================================================

/// Assert that every envelope drained from lane `source` was stamped by `source`.
///
/// **Invariant**: lane `s` of any mailbox only carries envelopes from rank `s`,
/// which is what makes lane order equal to per-source send order.
///
/// Used in: `Mailbox::collect()`
macro_rules! debug_assert_lane_source {
    ($lane:expr, $stamped:expr) => {
        debug_assert!(
            $lane == $stamped,
            "lane {} carried an envelope stamped by rank {}",
            $lane,
            $stamped
        )
    };
}

// =============================================================================
// Requests: Posted → Completed only through wait
// =============================================================================

/// Assert that a request is still posted when `wait` starts completing it.
///
/// **Invariant**: `Completed` is terminal and is only entered from `wait`.
///
/// Used in: `TransferRequest::wait()`
macro_rules! debug_assert_posted {
    ($state:expr) => {
        debug_assert!(
            $state == $crate::request::RequestState::Posted,
            "request completed twice (state {:?})",
            $state
        )
    };
}

// =============================================================================
// Contexts: retirement count
// =============================================================================

/// Assert that no context is retired more times than it has members.
///
/// Used in: `Fabric::retire()`
macro_rules! debug_assert_retire_count {
    ($retired:expr, $size:expr) => {
        debug_assert!(
            $retired <= $size,
            "context retired {} times but has {} members",
            $retired,
            $size
        )
    };
}

// =============================================================================
// Re-exports for crate-internal use
// =============================================================================

pub(crate) use debug_assert_bounded_count;
pub(crate) use debug_assert_head_not_past_tail;
pub(crate) use debug_assert_lane_source;
pub(crate) use debug_assert_posted;
pub(crate) use debug_assert_retire_count;
