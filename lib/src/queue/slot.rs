use super::{BufferStatus, ContractViolation, Operation};
use crate::buffer::{IgbpBuffer, TransformFlags};

/// A buffer registered with a queue, along with its current ownership status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub(super) slot_id: u32,
    pub(super) buffer: IgbpBuffer,
    pub(super) status: BufferStatus,
    /// Only set from the moment the buffer is queued until it is released.
    pub(super) transform: Option<TransformFlags>,
}

impl Slot {
    pub(super) fn new(slot_id: u32, buffer: IgbpBuffer) -> Self {
        Slot {
            slot_id,
            buffer,
            status: BufferStatus::Free,
            transform: None,
        }
    }

    pub fn slot_id(&self) -> u32 {
        self.slot_id
    }

    pub fn buffer(&self) -> &IgbpBuffer {
        &self.buffer
    }

    pub fn status(&self) -> BufferStatus {
        self.status
    }

    /// Transform requested by the producer when queuing the buffer. `None`
    /// unless the buffer is currently `Queued` or `Acquired`.
    pub fn transform(&self) -> Option<TransformFlags> {
        self.transform
    }

    /// Check that the slot is in `expected` status before performing `op` on it.
    pub(super) fn expect_status(
        &self,
        op: Operation,
        expected: BufferStatus,
    ) -> Result<(), ContractViolation> {
        if self.status != expected {
            return Err(ContractViolation::InvalidStatus {
                op,
                slot: self.slot_id,
                expected,
                actual: self.status,
            });
        }

        Ok(())
    }

    /// Move the slot to the next status of the ownership cycle. This is the
    /// only way the status of a slot can change.
    pub(super) fn advance(&mut self) {
        self.status = self.status.next();
        if self.status == BufferStatus::Free {
            self.transform = None;
        }
    }
}
