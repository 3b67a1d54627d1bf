//! Correlation ids linking a value-request to its value-reply
//!
//! Ids are unique for the whole process and strictly increasing, so two
//! sessions living in the same process can never hand out the same id.

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CORRELATION_ID: AtomicU64 = AtomicU64::new(1);

/// Returns the next process-wide correlation id
#[inline]
pub fn next_correlation_id() -> u64 {
    NEXT_CORRELATION_ID.fetch_add(1, Ordering::Relaxed)
}
