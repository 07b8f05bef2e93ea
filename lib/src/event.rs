//! Wake-up primitive used by a `BufferQueue` to notify a producer waiting for
//! a free buffer.
//!
//! The queue only ever signals its notifier: waiting happens outside of the
//! queue, on whatever primitive the host environment provides. `Event` is such
//! a primitive built on top of an eventfd, so it can also be polled by code
//! outside of Rust.

use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::sync::Arc;

use log::{trace, warn};
use nix::errno::Errno;
use nix::sys::eventfd::{EfdFlags, EventFd};

/// Something that can be signaled to tell a waiting producer that it is worth
/// trying to dequeue a buffer again.
///
/// Signaling must be safe to do at any time, whether or not anyone is actually
/// waiting, and any number of times.
pub trait WaitNotifier {
    fn signal(&self);
}

impl<N: WaitNotifier + ?Sized> WaitNotifier for Arc<N> {
    fn signal(&self) {
        (**self).signal()
    }
}

/// One-shot event: signals accumulate until a waiter wakes up, at which point
/// the event is reset.
pub struct Event {
    fd: EventFd,
}

impl Event {
    pub fn new() -> nix::Result<Self> {
        Ok(Event {
            fd: EventFd::from_flags(EfdFlags::EFD_CLOEXEC)?,
        })
    }

    /// Block until the event is signaled, then reset it. Returns the number of
    /// signals received since the last reset.
    pub fn wait(&self) -> nix::Result<u64> {
        loop {
            match self.fd.read() {
                Err(Errno::EINTR) => continue,
                res => return res,
            }
        }
    }
}

impl WaitNotifier for Event {
    fn signal(&self) {
        trace!("signaling event {}", self.fd.as_raw_fd());
        // The counter can only overflow after 2^64 - 2 signals without a
        // single wait.
        if let Err(e) = self.fd.write(1) {
            warn!("failed to signal event {}: {}", self.fd.as_raw_fd(), e);
        }
    }
}

impl AsFd for Event {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for Event {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::thread;

    #[test]
    fn signal_before_wait() {
        let event = Event::new().unwrap();
        event.signal();
        assert_eq!(event.wait().unwrap(), 1);
    }

    #[test]
    fn signals_collapse_into_one_wakeup() {
        let event = Arc::new(Event::new().unwrap());
        event.signal();
        event.signal();
        // Through the `Arc` blanket implementation.
        WaitNotifier::signal(&event);
        assert_eq!(event.wait().unwrap(), 3);
    }

    #[test]
    fn wait_for_other_thread() {
        let event = Arc::new(Event::new().unwrap());
        let signaler = {
            let event = Arc::clone(&event);
            thread::spawn(move || event.signal())
        };

        assert_eq!(event.wait().unwrap(), 1);
        signaler.join().unwrap();
    }
}
