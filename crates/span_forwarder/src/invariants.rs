//! Debug assertion macros for queue and stream-worker invariants.
//!
//! Only active in debug builds (`#[cfg(debug_assertions)]`), so release
//! builds pay nothing.

// =============================================================================
// Queue capacity accounting
// =============================================================================

/// Assert that the reported remaining capacity never exceeds the queue size.
///
/// **Invariant**: `remaining_capacity <= queue_size`
///
/// Used in: `SpanQueue::push()` after admitting a batch
macro_rules! debug_assert_capacity_bounded {
    ($remaining:expr, $queue_size:expr) => {
        debug_assert!(
            $remaining <= $queue_size,
            "remaining capacity {} exceeds queue size {}",
            $remaining,
            $queue_size
        )
    };
}

/// Assert that a flush returned exactly the dropped span count to capacity.
///
/// **Invariant**: `in_use_after == in_use_before - dropped_spans`
///
/// Used in: `SpanQueue::drain_locked()`
macro_rules! debug_assert_flush_restored {
    ($before:expr, $dropped:expr, $after:expr) => {
        debug_assert!(
            $after == $before.saturating_sub($dropped),
            "flush dropped {} spans but in-use went from {} to {}",
            $dropped,
            $before,
            $after
        )
    };
}

// =============================================================================
// Stream worker
// =============================================================================

/// Assert that terminal cleanup runs once per worker.
///
/// **Invariant**: `mark_complete()` returns `true` exactly once
///
/// Used in: `StreamWorker::finish()`
macro_rules! debug_assert_single_completion {
    ($first:expr) => {
        debug_assert!(
            $first,
            "stream worker completed more than once"
        )
    };
}

// =============================================================================
// Re-exports for crate-internal use
// =============================================================================

pub(crate) use debug_assert_capacity_bounded;
pub(crate) use debug_assert_flush_restored;
pub(crate) use debug_assert_single_completion;
