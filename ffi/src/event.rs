//! Events a producer can wait on until a buffer becomes available.
//!
//! An event is created with [`nvflinger_event_new`], given to a queue with
//! [`crate::queue::nvflinger_buffer_queue_set_buffer_wait_event`], and waited
//! on either with [`nvflinger_event_wait`] or by polling the file descriptor
//! returned by [`nvflinger_event_fd`] for readability.
#![allow(non_camel_case_types)]

use log::{debug, error, warn};
use nvflinger::Event;
use std::{
    os::{raw::c_int, unix::io::AsRawFd},
    sync::Arc,
};

/// An event that can be set as the buffer wait event of a queue.
pub struct nvflinger_event {
    pub(crate) event: Arc<Event>,
}

/// Create a new event, initially not signaled.
///
/// Returns NULL if the event could not be created.
#[no_mangle]
pub extern "C" fn nvflinger_event_new() -> *mut nvflinger_event {
    match Event::new() {
        Ok(event) => {
            let event = Box::into_raw(Box::new(nvflinger_event {
                event: Arc::new(event),
            }));
            debug!("Event {:p}: created", event);
            event
        }
        Err(e) => {
            error!("Error while creating event: {}", e);
            std::ptr::null_mut()
        }
    }
}

/// Destroy `event`. Queues the event has been given to keep their own
/// reference to it, so it remains valid for them.
///
/// # Safety
///
/// `event` must be a valid pointer returned by [`nvflinger_event_new`], and
/// must not be used again after this function is called.
#[no_mangle]
pub unsafe extern "C" fn nvflinger_event_destroy(event: *mut nvflinger_event) {
    debug!("Event {:p}: destroying", event);

    if event.is_null() {
        warn!("Trying to destroy a NULL event");
        return;
    }

    drop(Box::from_raw(event));
}

/// Returns a file descriptor that becomes readable when `event` is signaled.
/// The descriptor remains owned by `event`.
///
/// # Safety
///
/// `event` must be a valid pointer returned by [`nvflinger_event_new`].
#[no_mangle]
pub unsafe extern "C" fn nvflinger_event_fd(event: *const nvflinger_event) -> c_int {
    assert!(!event.is_null());
    let event = &*event;

    event.event.as_raw_fd()
}

/// Block until `event` is signaled, then reset it.
///
/// Returns 0 in case of success, or a negative errno value if waiting failed.
///
/// # Safety
///
/// `event` must be a valid pointer returned by [`nvflinger_event_new`].
#[no_mangle]
pub unsafe extern "C" fn nvflinger_event_wait(event: *const nvflinger_event) -> c_int {
    assert!(!event.is_null());
    let event = &*event;

    match event.event.wait() {
        Ok(_) => 0,
        Err(e) => {
            error!("Error while waiting on event: {}", e);
            -(e as c_int)
        }
    }
}
