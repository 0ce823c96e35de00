/// Master-side receive buffer for `gather_from_slaves`: one fixed-size
/// slot per slave, filled in rank order. An owned `Vec<Vec<u8>>` — no
/// manual lifetime management is needed, it drops normally with the
/// `Controller`.
pub struct SlaveGatherBuffer {
    slots: Vec<Vec<u8>>,
    slot_size: usize,
}

impl SlaveGatherBuffer {
    pub fn new(num_slaves: usize, slot_size: usize) -> SlaveGatherBuffer {
        SlaveGatherBuffer {
            slots: vec![vec![0u8; slot_size]; num_slaves],
            slot_size,
        }
    }

    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    pub fn num_slots(&self) -> usize {
        self.slots.len()
    }

    pub fn slot_mut(&mut self, index: usize) -> &mut [u8] {
        &mut self.slots[index]
    }

    pub fn slot(&self, index: usize) -> &[u8] {
        &self.slots[index]
    }
}
