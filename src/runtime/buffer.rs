/// Growable byte buffer with a consumed prefix, so draining from the
/// front is O(1) and the storage is reused between reads.
///
/// Capacity doubles until 16 MiB and then grows linearly in 16 MiB
/// steps.
pub struct ByteBuffer {
    data: Vec<u8>,
    skip: usize,
}

const GROW_LIMIT: usize = 16 * 1024 * 1024;

impl ByteBuffer {
    pub fn new() -> Self {
        ByteBuffer {
            data: Vec::new(),
            skip: 0,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        ByteBuffer {
            data: Vec::with_capacity(capacity),
            skip: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len() - self.skip
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.skip..]
    }

    pub fn push(&mut self, bytes: &[u8]) {
        let need = self.data.len() + bytes.len();
        if need > self.data.capacity() {
            self.reclaim();
            let mut cap = self.data.capacity().max(512);
            while cap < self.data.len() + bytes.len() {
                if cap < GROW_LIMIT {
                    cap *= 2;
                } else {
                    cap += GROW_LIMIT;
                }
            }
            self.data.reserve_exact(cap - self.data.len());
        }
        self.data.extend_from_slice(bytes);
    }

    /// Consumes `count` bytes from the front.
    pub fn advance(&mut self, count: usize) {
        debug_assert!(count <= self.len());
        self.skip += count.min(self.len());
        if self.skip == self.data.len() {
            self.data.clear();
            self.skip = 0;
        }
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.skip = 0;
    }

    /// Moves the live tail to the origin so the dead prefix is reusable.
    fn reclaim(&mut self) {
        if self.skip == 0 {
            return;
        }
        self.data.drain(..self.skip);
        self.skip = 0;
    }
}

impl Default for ByteBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_advance_roundtrip() {
        let mut b = ByteBuffer::new();
        b.push(b"hello ");
        b.push(b"world");
        assert_eq!(b.as_slice(), b"hello world");
        b.advance(6);
        assert_eq!(b.as_slice(), b"world");
        b.push(b"!");
        assert_eq!(b.as_slice(), b"world!");
        b.advance(6);
        assert!(b.is_empty());
        assert_eq!(b.skip, 0);
    }

    #[test]
    fn prefix_is_reclaimed_on_growth() {
        let mut b = ByteBuffer::with_capacity(16);
        b.push(&[0xAA; 12]);
        b.advance(10);
        b.push(&[0xBB; 30]);
        assert_eq!(b.len(), 32);
        assert_eq!(&b.as_slice()[..2], &[0xAA, 0xAA]);
        assert_eq!(b.as_slice()[2], 0xBB);
    }
}
