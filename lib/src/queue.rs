//! The buffer queue shared between an application (the producer) and the
//! compositor (the consumer) for one display layer.
//!
//! Buffers are registered once by the application and then circulate between
//! both sides:
//!
//! * The producer dequeues a free buffer of the size it wants to render to,
//!   looks up its description, renders into it and queues it.
//! * The consumer acquires the next queued buffer, presents it, and releases
//!   it so it can be dequeued again.
//!
//! When no buffer is available, the producer can hand the queue a
//! `WaitNotifier` and wait on it: the queue signals it every time a buffer may
//! have become available (a new buffer is registered or a buffer is released),
//! and drops it once the producer successfully dequeues a buffer.
//!
//! Each queue also owns a native handle event, signaled once at creation,
//! which the display service hands out to the application.
pub mod slot;
pub mod status;

pub use slot::Slot;
pub use status::BufferStatus;

use std::fmt::{self, Debug, Display};

use log::{debug, error, info, warn};
use thiserror::Error;

use crate::buffer::{IgbpBuffer, TransformFlags};
use crate::event::{Event, WaitNotifier};
use crate::{QueryType, NATIVE_WINDOW_FORMAT_ABGR8888};

/// Queue operations that can be rejected for being called out of order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    SetPreallocatedBuffer,
    RequestBuffer,
    QueueBuffer,
    ReleaseBuffer,
    SetBufferWaitEvent,
    Query,
}

impl Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Debug::fmt(self, f)
    }
}

/// Calls made outside of the preconditions of a queue operation. These are
/// bugs in the caller and are always fatal.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContractViolation {
    #[error("{op}: no buffer registered in slot {slot}")]
    UnknownSlot { op: Operation, slot: u32 },
    #[error("{op}: slot {slot} is {actual}, expected {expected}")]
    InvalidStatus {
        op: Operation,
        slot: u32,
        expected: BufferStatus,
        actual: BufferStatus,
    },
    #[error("{op}: a buffer wait event is already set, only a single waiter is supported")]
    WaitEventAlreadySet { op: Operation },
    #[error("{op}: query {query} is not implemented")]
    UnimplementedQuery { op: Operation, query: QueryType },
    #[error("{op}: unknown query type {query}")]
    UnknownQuery { op: Operation, query: u32 },
}

fn fatal(violation: ContractViolation) -> ! {
    error!("{}", violation);
    panic!("{}", violation);
}

/// Buffer queue of a display layer. `N` is the type of notifier used to wake
/// up a producer waiting for a buffer.
pub struct BufferQueue<N: WaitNotifier> {
    id: u32,
    layer_id: u64,
    /// Registered buffers, in registration order. Lookups are done by linear
    /// scan as the first matching slot in this order must win.
    slots: Vec<Slot>,
    buffer_wait_event: Option<N>,
    native_handle: Event,
}

impl<N: WaitNotifier> BufferQueue<N> {
    /// Create an empty queue for layer `layer_id`. Fails if the native handle
    /// event cannot be created.
    pub fn new(id: u32, layer_id: u64) -> nix::Result<Self> {
        let native_handle = Event::new()?;
        native_handle.signal();

        Ok(BufferQueue {
            id,
            layer_id,
            slots: Vec::new(),
            buffer_wait_event: None,
            native_handle,
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn layer_id(&self) -> u64 {
        self.layer_id
    }

    /// The native handle event of this queue. It is signaled when the queue
    /// is created.
    pub fn native_handle(&self) -> &Event {
        &self.native_handle
    }

    /// Returns the slot registered as `slot_id`, if any.
    pub fn slot(&self, slot_id: u32) -> Option<&Slot> {
        self.slots.iter().find(|slot| slot.slot_id == slot_id)
    }

    /// Returns all the registered slots, in registration order.
    pub fn slots(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter()
    }

    /// Number of buffers that can currently be dequeued, whatever their size.
    pub fn num_free(&self) -> usize {
        self.count_status(BufferStatus::Free)
    }

    /// Number of buffers waiting to be acquired by the consumer.
    pub fn num_queued(&self) -> usize {
        self.count_status(BufferStatus::Queued)
    }

    fn count_status(&self, status: BufferStatus) -> usize {
        self.slots.iter().filter(|slot| slot.status == status).count()
    }

    fn slot_mut(&mut self, op: Operation, slot_id: u32) -> Result<&mut Slot, ContractViolation> {
        self.slots
            .iter_mut()
            .find(|slot| slot.slot_id == slot_id)
            .ok_or(ContractViolation::UnknownSlot { op, slot: slot_id })
    }

    fn signal_buffer_wait_event(&self) {
        if let Some(event) = &self.buffer_wait_event {
            debug!("Layer {}: signaling buffer wait event", self.layer_id);
            event.signal();
        }
    }

    /// Register `buffer` in slot `slot_id`. The buffer starts free.
    ///
    /// Registering a slot id twice replaces the buffer of that slot, which
    /// must be free at that time.
    pub fn set_preallocated_buffer(&mut self, slot_id: u32, buffer: IgbpBuffer) {
        self.try_set_preallocated_buffer(slot_id, buffer)
            .unwrap_or_else(|e| fatal(e))
    }

    fn try_set_preallocated_buffer(
        &mut self,
        slot_id: u32,
        buffer: IgbpBuffer,
    ) -> Result<(), ContractViolation> {
        let layer_id = self.layer_id;
        info!(
            "Layer {}: adding {}x{} graphics buffer in slot {}",
            layer_id, buffer.width, buffer.height, slot_id
        );

        match self.slots.iter_mut().find(|slot| slot.slot_id == slot_id) {
            Some(slot) => {
                slot.expect_status(Operation::SetPreallocatedBuffer, BufferStatus::Free)?;
                warn!("Layer {}: replacing buffer of slot {}", layer_id, slot_id);
                slot.buffer = buffer;
            }
            None => self.slots.push(Slot::new(slot_id, buffer)),
        }

        self.signal_buffer_wait_event();

        Ok(())
    }

    /// Find a free buffer of exactly `width`x`height` and give it to the
    /// producer. Buffers are considered in registration order.
    ///
    /// Returns `None` if no such buffer is available right now, in which case
    /// the producer is expected to wait on its notifier and try again.
    pub fn dequeue_buffer(&mut self, width: u32, height: u32) -> Option<u32> {
        let slot = self
            .slots
            .iter_mut()
            .find(|slot| slot.status == BufferStatus::Free && slot.buffer.matches(width, height))?;

        // The producer got its buffer, so it is not waiting anymore.
        self.buffer_wait_event = None;

        slot.advance();
        debug!(
            "Layer {}: dequeued slot {} ({}x{})",
            self.layer_id, slot.slot_id, width, height
        );

        Some(slot.slot_id)
    }

    /// Returns the description of the buffer in `slot_id`, which must have
    /// been dequeued.
    pub fn request_buffer(&self, slot_id: u32) -> &IgbpBuffer {
        self.try_request_buffer(slot_id)
            .unwrap_or_else(|e| fatal(e))
    }

    fn try_request_buffer(&self, slot_id: u32) -> Result<&IgbpBuffer, ContractViolation> {
        let op = Operation::RequestBuffer;
        let slot = self
            .slot(slot_id)
            .ok_or(ContractViolation::UnknownSlot { op, slot: slot_id })?;
        slot.expect_status(op, BufferStatus::Dequeued)?;

        Ok(&slot.buffer)
    }

    /// Hand the dequeued buffer in `slot_id` over for presentation with
    /// `transform`.
    pub fn queue_buffer(&mut self, slot_id: u32, transform: TransformFlags) {
        self.try_queue_buffer(slot_id, transform)
            .unwrap_or_else(|e| fatal(e))
    }

    fn try_queue_buffer(
        &mut self,
        slot_id: u32,
        transform: TransformFlags,
    ) -> Result<(), ContractViolation> {
        let op = Operation::QueueBuffer;
        let slot = self.slot_mut(op, slot_id)?;
        slot.expect_status(op, BufferStatus::Dequeued)?;

        slot.advance();
        slot.transform = Some(transform);
        debug!(
            "Layer {}: queued slot {} with transform {:?}",
            self.layer_id, slot_id, transform
        );

        Ok(())
    }

    /// Take the first queued buffer for presentation. Never blocks: returns
    /// `None` if there is nothing to present.
    pub fn acquire_buffer(&mut self) -> Option<&Slot> {
        let layer_id = self.layer_id;
        let slot = self
            .slots
            .iter_mut()
            .find(|slot| slot.status == BufferStatus::Queued)?;

        slot.advance();
        debug!("Layer {}: acquired slot {}", layer_id, slot.slot_id);

        Some(&*slot)
    }

    /// Give the buffer in `slot_id`, which must have been acquired, back to
    /// the producer.
    pub fn release_buffer(&mut self, slot_id: u32) {
        self.try_release_buffer(slot_id)
            .unwrap_or_else(|e| fatal(e))
    }

    fn try_release_buffer(&mut self, slot_id: u32) -> Result<(), ContractViolation> {
        let op = Operation::ReleaseBuffer;
        let slot = self.slot_mut(op, slot_id)?;
        slot.expect_status(op, BufferStatus::Acquired)?;

        slot.advance();
        debug!("Layer {}: released slot {}", self.layer_id, slot_id);

        self.signal_buffer_wait_event();

        Ok(())
    }

    /// Answer a query about the native window backing this queue.
    pub fn query(&self, query: QueryType) -> u32 {
        self.try_query(query).unwrap_or_else(|e| fatal(e))
    }

    fn try_query(&self, query: QueryType) -> Result<u32, ContractViolation> {
        warn!("Layer {}: (stubbed) query {}", self.layer_id, query);
        match query {
            QueryType::NativeWindowFormat => Ok(NATIVE_WINDOW_FORMAT_ABGR8888),
            QueryType::NativeWindowWidth | QueryType::NativeWindowHeight => {
                Err(ContractViolation::UnimplementedQuery {
                    op: Operation::Query,
                    query,
                })
            }
        }
    }

    /// Same as `query`, for a query type received as a raw value.
    pub fn query_raw(&self, query: u32) -> u32 {
        self.try_query_raw(query).unwrap_or_else(|e| fatal(e))
    }

    fn try_query_raw(&self, query: u32) -> Result<u32, ContractViolation> {
        let query = QueryType::n(query).ok_or(ContractViolation::UnknownQuery {
            op: Operation::Query,
            query,
        })?;

        self.try_query(query)
    }

    /// Set the notifier to signal when a buffer may have become available.
    /// Only one producer can wait at a time: a notifier must not already be
    /// set.
    pub fn set_buffer_wait_event(&mut self, event: N) {
        self.try_set_buffer_wait_event(event)
            .unwrap_or_else(|e| fatal(e))
    }

    fn try_set_buffer_wait_event(&mut self, event: N) -> Result<(), ContractViolation> {
        if self.buffer_wait_event.is_some() {
            return Err(ContractViolation::WaitEventAlreadySet {
                op: Operation::SetBufferWaitEvent,
            });
        }

        debug!("Layer {}: buffer wait event set", self.layer_id);
        self.buffer_wait_event = Some(event);

        Ok(())
    }

    /// Returns whether a notifier is currently set.
    pub fn has_buffer_wait_event(&self) -> bool {
        self.buffer_wait_event.is_some()
    }
}
