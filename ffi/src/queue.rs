//! Module for creating and driving buffer queues.
//!
//! A queue is created for a display layer using
//! [`nvflinger_buffer_queue_new`] and remains alive until given to
//! [`nvflinger_buffer_queue_destroy`]. The application side registers its
//! buffers, then dequeues, requests and queues them; the compositor side
//! acquires and releases them.
#![allow(non_camel_case_types)]

use log::{debug, error, warn};
use nix::errno::Errno;
use nvflinger::{buffer::IgbpBuffer, BufferQueue, Event, TransformFlags};
use std::{
    os::{raw::c_int, unix::io::AsRawFd},
    slice,
    sync::Arc,
};

use crate::event::nvflinger_event;

/// The buffer queue of a display layer.
pub struct nvflinger_buffer_queue {
    queue: BufferQueue<Arc<Event>>,
}

/// Create a new, empty buffer queue for layer `layer_id`.
///
/// Returns NULL if the queue could not be created.
#[no_mangle]
pub extern "C" fn nvflinger_buffer_queue_new(id: u32, layer_id: u64) -> *mut nvflinger_buffer_queue {
    let queue = match BufferQueue::new(id, layer_id) {
        Ok(queue) => queue,
        Err(e) => {
            error!("Error while creating queue for layer {}: {}", layer_id, e);
            return std::ptr::null_mut();
        }
    };

    let queue = Box::into_raw(Box::new(nvflinger_buffer_queue { queue }));
    debug!("Queue {:p}: created for layer {}", queue, layer_id);

    queue
}

/// Returns the file descriptor of the native handle event of `queue`. The
/// event is signaled when the queue is created. The descriptor remains owned
/// by `queue`.
///
/// # Safety
///
/// `queue` must be a valid queue pointer.
#[no_mangle]
pub unsafe extern "C" fn nvflinger_buffer_queue_native_handle_fd(
    queue: *const nvflinger_buffer_queue,
) -> c_int {
    assert!(!queue.is_null());
    let queue = &*queue;

    queue.queue.native_handle().as_raw_fd()
}

/// Destroy `queue`, dropping its reference to the buffer wait event if one is
/// set.
///
/// # Safety
///
/// `queue` must be a valid pointer returned by [`nvflinger_buffer_queue_new`],
/// and must not be used again after this function is called.
#[no_mangle]
pub unsafe extern "C" fn nvflinger_buffer_queue_destroy(queue: *mut nvflinger_buffer_queue) {
    debug!("Queue {:p}: destroying", queue);

    if queue.is_null() {
        warn!("Trying to destroy a NULL queue");
        return;
    }

    drop(Box::from_raw(queue));
}

/// Register `buffer` in slot `slot` of `queue`.
///
/// # Safety
///
/// `queue` must be a valid queue pointer and `buffer` must point to a valid
/// `IgbpBuffer`.
#[no_mangle]
pub unsafe extern "C" fn nvflinger_buffer_queue_set_preallocated_buffer(
    queue: *mut nvflinger_buffer_queue,
    slot: u32,
    buffer: *const IgbpBuffer,
) {
    assert!(!queue.is_null());
    assert!(!buffer.is_null());
    let queue = &mut *queue;

    queue.queue.set_preallocated_buffer(slot, *buffer);
}

/// Register the buffer described by the `len` bytes at `data`, laid out as
/// the application passes it to the display service, in slot `slot` of
/// `queue`.
///
/// Returns 0 in case of success, or `-EINVAL` if the record could not be
/// decoded, in which case nothing is registered.
///
/// # Safety
///
/// `queue` must be a valid queue pointer and `data` must point to at least
/// `len` readable bytes.
#[no_mangle]
pub unsafe extern "C" fn nvflinger_buffer_queue_set_preallocated_buffer_raw(
    queue: *mut nvflinger_buffer_queue,
    slot: u32,
    data: *const u8,
    len: usize,
) -> c_int {
    assert!(!queue.is_null());
    assert!(!data.is_null());
    let queue = &mut *queue;
    let data = slice::from_raw_parts(data, len);

    match IgbpBuffer::from_bytes(data) {
        Ok(buffer) => {
            queue.queue.set_preallocated_buffer(slot, buffer);
            0
        }
        Err(e) => {
            error!("Error while decoding buffer for slot {}: {}", slot, e);
            -(Errno::from(e) as c_int)
        }
    }
}

/// Dequeue a free buffer of size `width`x`height` from `queue`.
///
/// Returns `true` and writes the slot of the buffer into `slot` if one was
/// available. Returns `false` otherwise, in which case `slot` is left
/// untouched and the caller should wait on its buffer wait event.
///
/// # Safety
///
/// `queue` must be a valid queue pointer and `slot` must point to writable
/// memory.
#[no_mangle]
pub unsafe extern "C" fn nvflinger_buffer_queue_dequeue_buffer(
    queue: *mut nvflinger_buffer_queue,
    width: u32,
    height: u32,
    slot: *mut u32,
) -> bool {
    assert!(!queue.is_null());
    assert!(!slot.is_null());
    let queue = &mut *queue;

    match queue.queue.dequeue_buffer(width, height) {
        Some(dequeued) => {
            *slot = dequeued;
            true
        }
        None => false,
    }
}

/// Write the description of the dequeued buffer in `slot` into `buffer`.
///
/// # Safety
///
/// `queue` must be a valid queue pointer and `buffer` must point to memory
/// that can receive an `IgbpBuffer`.
#[no_mangle]
pub unsafe extern "C" fn nvflinger_buffer_queue_request_buffer(
    queue: *const nvflinger_buffer_queue,
    slot: u32,
    buffer: *mut IgbpBuffer,
) {
    assert!(!queue.is_null());
    assert!(!buffer.is_null());
    let queue = &*queue;

    *buffer = *queue.queue.request_buffer(slot);
}

/// Queue the dequeued buffer in `slot` for presentation. `transform` is a
/// combination of transform flags; unknown bits are dropped.
///
/// # Safety
///
/// `queue` must be a valid queue pointer.
#[no_mangle]
pub unsafe extern "C" fn nvflinger_buffer_queue_queue_buffer(
    queue: *mut nvflinger_buffer_queue,
    slot: u32,
    transform: u32,
) {
    assert!(!queue.is_null());
    let queue = &mut *queue;

    let flags = TransformFlags::from_bits_truncate(transform);
    if flags.bits() != transform {
        warn!(
            "Queue {:p}: ignoring unknown transform bits {:#x}",
            queue,
            transform & !flags.bits()
        );
    }

    queue.queue.queue_buffer(slot, flags);
}

/// Acquire the next queued buffer of `queue` for presentation.
///
/// Returns `true` and writes the slot and transform of the buffer into `slot`
/// and `transform` if a buffer was queued, `false` otherwise.
///
/// # Safety
///
/// `queue` must be a valid queue pointer, `slot` and `transform` must point to
/// writable memory.
#[no_mangle]
pub unsafe extern "C" fn nvflinger_buffer_queue_acquire_buffer(
    queue: *mut nvflinger_buffer_queue,
    slot: *mut u32,
    transform: *mut u32,
) -> bool {
    assert!(!queue.is_null());
    assert!(!slot.is_null());
    assert!(!transform.is_null());
    let queue = &mut *queue;

    match queue.queue.acquire_buffer() {
        Some(acquired) => {
            *slot = acquired.slot_id();
            *transform = acquired.transform().unwrap_or_default().bits();
            true
        }
        None => false,
    }
}

/// Release the acquired buffer in `slot` so it can be dequeued again.
///
/// # Safety
///
/// `queue` must be a valid queue pointer.
#[no_mangle]
pub unsafe extern "C" fn nvflinger_buffer_queue_release_buffer(
    queue: *mut nvflinger_buffer_queue,
    slot: u32,
) {
    assert!(!queue.is_null());
    let queue = &mut *queue;

    queue.queue.release_buffer(slot);
}

/// Answer query `query_type` about the native window of `queue`.
///
/// # Safety
///
/// `queue` must be a valid queue pointer.
#[no_mangle]
pub unsafe extern "C" fn nvflinger_buffer_queue_query(
    queue: *const nvflinger_buffer_queue,
    query_type: u32,
) -> u32 {
    assert!(!queue.is_null());
    let queue = &*queue;

    queue.queue.query_raw(query_type)
}

/// Set `event` as the event to signal when a buffer of `queue` may have
/// become available. The queue keeps its own reference to the event until a
/// buffer is successfully dequeued.
///
/// # Safety
///
/// `queue` must be a valid queue pointer and `event` a valid event pointer.
#[no_mangle]
pub unsafe extern "C" fn nvflinger_buffer_queue_set_buffer_wait_event(
    queue: *mut nvflinger_buffer_queue,
    event: *const nvflinger_event,
) {
    assert!(!queue.is_null());
    assert!(!event.is_null());
    let queue = &mut *queue;
    let event = &*event;

    queue.queue.set_buffer_wait_event(Arc::clone(&event.event));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{nvflinger_event_destroy, nvflinger_event_new, nvflinger_event_wait};
    use nvflinger::{buffer::IGBP_BUFFER_SIZE, NATIVE_WINDOW_FORMAT_ABGR8888};

    fn make_buffer(width: u32, height: u32) -> IgbpBuffer {
        IgbpBuffer {
            width,
            height,
            stride: width,
            ..Default::default()
        }
    }

    #[test]
    fn present_one_frame() {
        let queue = nvflinger_buffer_queue_new(0, 1);
        assert!(!queue.is_null());

        unsafe {
            let buffer = make_buffer(1280, 720);
            nvflinger_buffer_queue_set_preallocated_buffer(queue, 0, &buffer);

            let mut slot = u32::MAX;
            assert!(!nvflinger_buffer_queue_dequeue_buffer(
                queue, 640, 480, &mut slot
            ));
            assert_eq!(slot, u32::MAX);
            assert!(nvflinger_buffer_queue_dequeue_buffer(
                queue, 1280, 720, &mut slot
            ));
            assert_eq!(slot, 0);

            let mut requested = IgbpBuffer::default();
            nvflinger_buffer_queue_request_buffer(queue, slot, &mut requested);
            assert_eq!(requested, buffer);

            nvflinger_buffer_queue_queue_buffer(queue, slot, TransformFlags::FLIP_H.bits());

            let mut acquired = u32::MAX;
            let mut transform = 0;
            assert!(nvflinger_buffer_queue_acquire_buffer(
                queue,
                &mut acquired,
                &mut transform
            ));
            assert_eq!(acquired, 0);
            assert_eq!(transform, TransformFlags::FLIP_H.bits());
            assert!(!nvflinger_buffer_queue_acquire_buffer(
                queue,
                &mut acquired,
                &mut transform
            ));

            nvflinger_buffer_queue_release_buffer(queue, acquired);
            assert!(nvflinger_buffer_queue_dequeue_buffer(
                queue, 1280, 720, &mut slot
            ));

            assert_eq!(
                nvflinger_buffer_queue_query(queue, 2),
                NATIVE_WINDOW_FORMAT_ABGR8888
            );

            nvflinger_buffer_queue_destroy(queue);
        }
    }

    #[test]
    fn raw_buffer_record() {
        let queue = nvflinger_buffer_queue_new(0, 1);

        let mut record = [0u8; IGBP_BUFFER_SIZE];
        make_buffer(320, 240).write_to(&mut record);

        unsafe {
            assert_eq!(
                nvflinger_buffer_queue_set_preallocated_buffer_raw(
                    queue,
                    3,
                    record.as_ptr(),
                    record.len()
                ),
                0
            );
            assert_eq!(
                nvflinger_buffer_queue_set_preallocated_buffer_raw(
                    queue,
                    4,
                    record.as_ptr(),
                    16
                ),
                -(Errno::EINVAL as c_int)
            );

            let mut slot = 0;
            assert!(nvflinger_buffer_queue_dequeue_buffer(
                queue, 320, 240, &mut slot
            ));
            assert_eq!(slot, 3);
            // Slot 4 was never registered.
            assert!(!nvflinger_buffer_queue_dequeue_buffer(
                queue, 320, 240, &mut slot
            ));

            nvflinger_buffer_queue_destroy(queue);
        }
    }

    #[test]
    fn release_wakes_up_waiter() {
        let queue = nvflinger_buffer_queue_new(0, 1);
        let event = nvflinger_event_new();
        assert!(!event.is_null());

        unsafe {
            nvflinger_buffer_queue_set_preallocated_buffer(queue, 0, &make_buffer(64, 64));

            let mut slot = 0;
            assert!(nvflinger_buffer_queue_dequeue_buffer(queue, 64, 64, &mut slot));
            nvflinger_buffer_queue_queue_buffer(queue, slot, 0);
            assert!(!nvflinger_buffer_queue_dequeue_buffer(queue, 64, 64, &mut slot));

            nvflinger_buffer_queue_set_buffer_wait_event(queue, event);
            let (mut acquired, mut transform) = (0, 0);
            assert!(nvflinger_buffer_queue_acquire_buffer(
                queue,
                &mut acquired,
                &mut transform
            ));
            nvflinger_buffer_queue_release_buffer(queue, acquired);

            // The release signaled the event, so this returns immediately.
            assert_eq!(nvflinger_event_wait(event), 0);
            assert!(nvflinger_buffer_queue_dequeue_buffer(queue, 64, 64, &mut slot));

            // The queue still holds its own reference until destroyed.
            nvflinger_event_destroy(event);
            nvflinger_buffer_queue_destroy(queue);
        }
    }

    #[test]
    fn native_handle_is_readable() {
        let queue = nvflinger_buffer_queue_new(0, 1);
        assert!(!queue.is_null());

        unsafe {
            let fd = nvflinger_buffer_queue_native_handle_fd(queue);
            assert!(fd >= 0);

            // Signaled once at creation, so reading does not block.
            let mut counter = [0u8; 8];
            assert_eq!(
                nix::unistd::read(fd, &mut counter),
                Ok(counter.len())
            );
            assert_eq!(u64::from_ne_bytes(counter), 1);

            nvflinger_buffer_queue_destroy(queue);
        }
    }
}
