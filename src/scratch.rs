//! Per-tuple scratch space for parameter conversion.

use crate::driver::ParamBind;

/// Reusable parameter slots.
///
/// Slots are handed out in bind order and recycled by [`reset`](Self::reset)
/// after every tuple, so a long scan or bulk modify converts values without
/// allocating once the buffers have grown to the widest tuple.
#[derive(Debug, Default)]
pub struct TupleScratch {
    slots: Vec<ParamBind>,
    len: usize,
}

impl TupleScratch {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            slots: Vec::with_capacity(n),
            len: 0,
        }
    }

    /// Start a new tuple.
    pub fn reset(&mut self) {
        self.len = 0;
    }

    /// Next cleared slot.
    pub fn next_slot(&mut self) -> &mut ParamBind {
        if self.len == self.slots.len() {
            self.slots.push(ParamBind::default());
        }
        let idx = self.len;
        self.len += 1;
        let slot = &mut self.slots[idx];
        slot.reset();
        slot
    }

    /// Slots filled since the last reset.
    pub fn params(&self) -> &[ParamBind] {
        &self.slots[..self.len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_are_recycled() {
        let mut scratch = TupleScratch::with_capacity(2);
        scratch.next_slot().buffer.extend_from_slice(b"abc");
        scratch.next_slot().is_null = true;
        assert_eq!(scratch.params().len(), 2);
        let cap = scratch.params()[0].buffer.capacity();

        scratch.reset();
        assert!(scratch.params().is_empty());
        let slot = scratch.next_slot();
        assert!(slot.buffer.is_empty());
        assert!(slot.buffer.capacity() >= cap);
        assert_eq!(scratch.params().len(), 1);
    }
}
