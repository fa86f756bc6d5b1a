/// Fixed-capacity receive buffer.
///
/// Bytes are appended at the end of the filled region, and consumed from the front. Consuming
/// moves whatever is left over back to the start, so the buffer always begins with the oldest
/// unparsed byte.
pub struct RecvBuffer {
    data: Box<[u8]>,
    used: usize,
}

impl RecvBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity].into_boxed_slice(),
            used: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn len(&self) -> usize {
        self.used
    }

    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    pub fn is_full(&self) -> bool {
        self.used == self.data.len()
    }

    /// The received, not yet consumed, bytes.
    pub fn filled(&self) -> &[u8] {
        &self.data[..self.used]
    }

    /// Unused space to receive into, see [`Self::advance`].
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.used..]
    }

    /// Mark `count` bytes of the spare space as received.
    pub fn advance(&mut self, count: usize) {
        assert!(count <= self.data.len() - self.used, "advance past capacity");
        self.used += count;
    }

    /// Append as much of `bytes` as fits, returning how many bytes were taken.
    pub fn extend(&mut self, bytes: &[u8]) -> usize {
        let count = bytes.len().min(self.data.len() - self.used);
        self.spare_mut()[..count].copy_from_slice(&bytes[..count]);
        self.used += count;
        count
    }

    /// Drop the first `count` bytes, moving the remainder to the front.
    pub fn consume(&mut self, count: usize) {
        let count = count.min(self.used);
        self.data.copy_within(count..self.used, 0);
        self.used -= count;
    }

    pub fn clear(&mut self) {
        self.used = 0;
    }
}
