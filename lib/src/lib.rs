//! This library models the buffer queue sitting between an emulated
//! application and the compositor of a console display service.
//!
//! * The `buffer` module describes the graphics buffers exchanged through the
//!   queue (`IgbpBuffer`) and the transform that can be attached to a frame
//!   when it is queued for presentation.
//!
//! * The `queue` module provides `BufferQueue`, the state machine that hands
//!   buffer slots from the producer (which dequeues, fills and queues them) to
//!   the consumer (which acquires, presents and releases them).
//!
//! * The `event` module provides the `WaitNotifier` trait the queue uses to
//!   wake up a producer waiting for a free buffer, and `Event`, an eventfd-based
//!   implementation of it.
//!
//! The queue performs no locking of its own: all calls into one queue must be
//! serialized by the caller. Calls made outside of an operation's
//! preconditions are programming errors and abort loudly.
pub mod buffer;
pub mod event;
pub mod queue;

use std::fmt;
use std::fmt::{Debug, Display};

use enumn::N;

pub use buffer::{IgbpBuffer, TransformFlags};
pub use event::{Event, WaitNotifier};
pub use queue::{BufferQueue, BufferStatus, ContractViolation, Slot};

/// Native window format reported to the application: ABGR8888.
pub const NATIVE_WINDOW_FORMAT_ABGR8888: u32 = 1;

/// Properties of the native window that the application can query through
/// `BufferQueue::query`.
///
/// New members may be added as the emulation progresses. Members without a
/// reply yet are still listed so they can be told apart from garbage values,
/// but querying them is fatal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, N)]
#[repr(u32)]
#[non_exhaustive]
pub enum QueryType {
    NativeWindowWidth = 0,
    NativeWindowHeight = 1,
    NativeWindowFormat = 2,
}

impl Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::QueryType;

    #[test]
    fn query_type_from_raw() {
        assert_eq!(QueryType::n(0), Some(QueryType::NativeWindowWidth));
        assert_eq!(QueryType::n(1), Some(QueryType::NativeWindowHeight));
        assert_eq!(QueryType::n(2), Some(QueryType::NativeWindowFormat));
        assert_eq!(QueryType::n(3), None);
        assert_eq!(QueryType::n(u32::MAX), None);
    }
}
