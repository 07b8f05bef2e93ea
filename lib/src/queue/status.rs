use std::fmt::{self, Debug, Display};

/// Ownership status of a buffer slot.
///
/// A slot goes through the statuses in a fixed cycle, each step being
/// performed by one side of the queue:
///
/// `Free` -(producer dequeues)-> `Dequeued` -(producer queues)-> `Queued`
/// -(consumer acquires)-> `Acquired` -(consumer releases)-> `Free`
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum BufferStatus {
    /// The buffer can be dequeued by the producer.
    #[default]
    Free,
    /// The producer owns the buffer and is rendering into it.
    Dequeued,
    /// The buffer holds a complete frame waiting to be presented.
    Queued,
    /// The consumer owns the buffer and is presenting it.
    Acquired,
}

impl BufferStatus {
    /// Returns the status following this one in the ownership cycle.
    pub fn next(self) -> Self {
        match self {
            BufferStatus::Free => BufferStatus::Dequeued,
            BufferStatus::Dequeued => BufferStatus::Queued,
            BufferStatus::Queued => BufferStatus::Acquired,
            BufferStatus::Acquired => BufferStatus::Free,
        }
    }
}

impl Display for BufferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::BufferStatus::*;

    #[test]
    fn cycle() {
        assert_eq!(Free.next(), Dequeued);
        assert_eq!(Dequeued.next(), Queued);
        assert_eq!(Queued.next(), Acquired);
        assert_eq!(Acquired.next(), Free);

        let mut status = Free;
        for _ in 0..4 {
            status = status.next();
        }
        assert_eq!(status, Free);
    }
}
