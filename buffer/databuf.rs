// Byte buffer with independent head and tail slack.
//
// Outgoing packets are assembled by reserving the 3 byte packet prefix at
// the front and appending headers at the back. Incoming bytes are appended
// at the back and consumed from the front one packet at a time, so the
// live region moves forward without a memmove per packet.
use std::collections::TryReserveError;
use std::fmt;
use std::ops::{Deref, DerefMut};

#[derive(Default, Clone)]
pub struct ByteBuffer {
    data: Vec<u8>,
    head: usize,
}

impl ByteBuffer {
    pub fn new() -> Self {
        ByteBuffer {
            data: Vec::new(),
            head: 0,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        ByteBuffer {
            data: Vec::with_capacity(capacity),
            head: 0,
        }
    }

    /// Number of live bytes.
    pub fn len(&self) -> usize {
        self.data.len() - self.head
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes that can be appended before the backing storage reallocates.
    pub fn tail_room(&self) -> usize {
        self.data.capacity() - self.data.len()
    }

    /// Bytes that can be prepended without moving the live region.
    pub fn head_room(&self) -> usize {
        self.head
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.head..]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data[self.head..]
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.head = 0;
    }

    /// Grow the live region by `n` zeroed bytes at the front and return them.
    pub fn reserve_begin(&mut self, n: usize) -> Result<&mut [u8], TryReserveError> {
        if self.head >= n {
            self.head -= n;
        } else {
            let missing = n - self.head;
            let old_len = self.data.len();
            self.data.try_reserve(missing)?;
            self.data.resize(old_len + missing, 0);
            self.data.copy_within(self.head..old_len, n);
            self.head = 0;
        }
        let region = &mut self.data[self.head..self.head + n];
        region.fill(0);
        Ok(region)
    }

    /// Grow the live region by `n` zeroed bytes at the end and return them.
    pub fn reserve_end(&mut self, n: usize) -> Result<&mut [u8], TryReserveError> {
        // Reclaim consumed head space before the backing vector grows.
        if self.head > 0 && self.head >= self.len() && self.tail_room() < n {
            self.compact();
        }
        self.data.try_reserve(n)?;
        let start = self.data.len();
        self.data.resize(start + n, 0);
        Ok(&mut self.data[start..])
    }

    /// Drop up to `n` bytes from the front of the live region.
    pub fn remove_begin(&mut self, n: usize) {
        let n = n.min(self.len());
        self.head += n;
        if self.head == self.data.len() {
            self.clear();
        }
    }

    /// Drop up to `n` bytes from the end of the live region. Capacity is kept.
    pub fn remove_end(&mut self, n: usize) {
        let n = n.min(self.len());
        let new_len = self.data.len() - n;
        self.data.truncate(new_len);
        if self.head == self.data.len() {
            self.clear();
        }
    }

    pub fn append(&mut self, bytes: &[u8]) -> Result<(), TryReserveError> {
        self.reserve_end(bytes.len())?.copy_from_slice(bytes);
        Ok(())
    }

    /// Move the live region to the start of the backing storage.
    pub fn compact(&mut self) {
        if self.head > 0 {
            self.data.drain(..self.head);
            self.head = 0;
        }
    }
}

impl Deref for ByteBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl DerefMut for ByteBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.as_mut_slice()
    }
}

impl fmt::Debug for ByteBuffer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ByteBuffer")
            .field("len", &self.len())
            .field("head_room", &self.head_room())
            .field("tail_room", &self.tail_room())
            .finish()
    }
}

impl From<&[u8]> for ByteBuffer {
    fn from(bytes: &[u8]) -> Self {
        ByteBuffer {
            data: bytes.to_vec(),
            head: 0,
        }
    }
}
