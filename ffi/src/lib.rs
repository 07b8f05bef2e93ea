//! C FFI of the nvflinger crate.
//!
//! This crate provides a C API that emulators written in other languages can
//! use to drive the buffer queues of their display service. Queues are
//! created using [`queue::nvflinger_buffer_queue_new`], and a producer that
//! needs to wait for a buffer can do so on an event created with
//! [`event::nvflinger_event_new`].
//!
//! None of the functions of this crate lock the queue they operate on: calls
//! on a given queue must be serialized by the client. Calls that break the
//! buffer queue protocol (e.g. queuing a buffer that has not been dequeued)
//! abort the process.

pub mod event;
pub mod queue;

static INIT: std::sync::Once = std::sync::Once::new();

/// Initialize the nvflinger library. This only sets up the proper hooks for
/// logging, so although it is not a hard requirement to call this function,
/// failure to do so will result in no logs being printed.
#[no_mangle]
pub extern "C" fn nvflinger_init() {
    INIT.call_once(|| {
        #[cfg(feature = "env_logger")]
        env_logger::builder().format_timestamp(None).init();

        #[cfg(feature = "android")]
        android_logger::init_once(
            android_logger::Config::default().with_min_level(log::Level::Trace),
        );
    });
}
