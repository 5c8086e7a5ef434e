//! Growable Ring Buffer Implementation

use crate::error::RingBufferError;

/// Default initial capacity (4 KiB of serial input)
pub const DEFAULT_CAPACITY: usize = 4096;

/// Capacity growth rule: `capacity' = capacity * multiplier + constant`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrowthPolicy {
    /// Factor applied to the current capacity
    pub multiplier: usize,
    /// Amount added after scaling
    pub constant: usize,
}

impl GrowthPolicy {
    /// Create a growth policy, rejecting formulas that cannot grow
    pub fn new(multiplier: usize, constant: usize) -> Result<Self, RingBufferError> {
        if multiplier == 0 {
            return Err(RingBufferError::InvalidArgument(
                "growth multiplier must be at least 1",
            ));
        }
        if multiplier == 1 && constant == 0 {
            return Err(RingBufferError::InvalidArgument(
                "growth policy never increases capacity",
            ));
        }
        Ok(Self {
            multiplier,
            constant,
        })
    }

    /// Apply the formula once
    fn next(&self, capacity: usize) -> Result<usize, RingBufferError> {
        capacity
            .checked_mul(self.multiplier)
            .and_then(|c| c.checked_add(self.constant))
            .ok_or(RingBufferError::CapacityOverflow)
    }
}

impl Default for GrowthPolicy {
    fn default() -> Self {
        Self {
            multiplier: 2,
            constant: 0,
        }
    }
}

/// Growable circular buffer
///
/// Items are appended at `tail` and consumed from `head`. When a write does
/// not fit, the storage is reallocated and the live content is compacted to
/// the start of the new storage. The buffer never shrinks on its own.
///
/// The buffer is not internally synchronised; share it behind a lock.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    /// Backing storage, its length is the capacity
    storage: Vec<T>,
    /// Read position
    head: usize,
    /// Write position
    tail: usize,
    /// Number of buffered items
    size: usize,
    /// How to grow when a write does not fit
    growth: GrowthPolicy,
}

impl<T: Copy + Default> RingBuffer<T> {
    /// Create a buffer with an explicit growth policy
    pub fn new(capacity: usize, growth: GrowthPolicy) -> Result<Self, RingBufferError> {
        if capacity == 0 {
            return Err(RingBufferError::InvalidArgument(
                "initial capacity must be non-zero",
            ));
        }
        Ok(Self {
            storage: vec![T::default(); capacity],
            head: 0,
            tail: 0,
            size: 0,
            growth,
        })
    }

    /// Create a buffer from raw growth parameters
    pub fn with_growth(
        capacity: usize,
        multiplier: usize,
        constant: usize,
    ) -> Result<Self, RingBufferError> {
        Self::new(capacity, GrowthPolicy::new(multiplier, constant)?)
    }

    /// Create a buffer that doubles when full
    pub fn with_capacity(capacity: usize) -> Result<Self, RingBufferError> {
        Self::new(capacity, GrowthPolicy::default())
    }

    /// Number of buffered items
    pub fn len(&self) -> usize {
        self.size
    }

    /// Check if buffer is empty
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Check if the next write will have to grow the storage
    pub fn is_full(&self) -> bool {
        self.size == self.capacity()
    }

    /// Current capacity
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Growth policy in use
    pub fn growth(&self) -> GrowthPolicy {
        self.growth
    }

    /// Append one item, growing first if the buffer is full
    pub fn put(&mut self, item: T) -> Result<(), RingBufferError> {
        self.reserve(1)?;
        self.storage[self.tail] = item;
        self.tail = (self.tail + 1) % self.capacity();
        self.size += 1;
        Ok(())
    }

    /// Append a run of items, growing first if they do not fit
    pub fn put_slice(&mut self, items: &[T]) -> Result<(), RingBufferError> {
        if items.is_empty() {
            return Ok(());
        }
        self.reserve(items.len())?;

        let capacity = self.capacity();
        let first = items.len().min(capacity - self.tail);
        self.storage[self.tail..self.tail + first].copy_from_slice(&items[..first]);
        self.storage[..items.len() - first].copy_from_slice(&items[first..]);

        self.tail = (self.tail + items.len()) % capacity;
        self.size += items.len();
        Ok(())
    }

    /// Remove and return the front item
    pub fn get(&mut self) -> Result<T, RingBufferError> {
        if self.size == 0 {
            return Err(RingBufferError::Empty);
        }
        let item = self.storage[self.head];
        self.advance(1);
        Ok(item)
    }

    /// Remove and return `count` items from the front
    pub fn get_many(&mut self, count: usize) -> Result<Vec<T>, RingBufferError> {
        self.check_available(count)?;
        let mut items = vec![T::default(); count];
        self.copy_front(&mut items);
        self.advance(count);
        Ok(items)
    }

    /// Fill `dest` from the front of the buffer, returning the count copied
    pub fn get_into(&mut self, dest: &mut [T]) -> Result<usize, RingBufferError> {
        self.check_available(dest.len())?;
        self.copy_front(dest);
        self.advance(dest.len());
        Ok(dest.len())
    }

    /// Drop `count` items from the front without copying them
    pub fn skip(&mut self, count: usize) -> Result<(), RingBufferError> {
        self.check_available(count)?;
        self.advance(count);
        Ok(())
    }

    /// Front item without removing it
    pub fn peek(&self) -> Result<T, RingBufferError> {
        if self.size == 0 {
            return Err(RingBufferError::Empty);
        }
        Ok(self.storage[self.head])
    }

    /// Item at `offset` from the front without removing it
    pub fn peek_at(&self, offset: usize) -> Result<T, RingBufferError> {
        if offset >= self.size {
            return Err(RingBufferError::OutOfRange {
                requested: offset + 1,
                available: self.size,
            });
        }
        Ok(self.at(offset))
    }

    /// Iterate over buffered items, front first, without consuming them
    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        (0..self.size).map(move |offset| self.at(offset))
    }

    /// Drop everything
    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
        self.size = 0;
    }

    fn at(&self, offset: usize) -> T {
        self.storage[(self.head + offset) % self.capacity()]
    }

    fn check_available(&self, count: usize) -> Result<(), RingBufferError> {
        if count > self.size {
            return Err(RingBufferError::OutOfRange {
                requested: count,
                available: self.size,
            });
        }
        Ok(())
    }

    /// Copy `dest.len()` items from the front. Caller checked availability.
    fn copy_front(&self, dest: &mut [T]) {
        let count = dest.len();
        let first = count.min(self.capacity() - self.head);
        dest[..first].copy_from_slice(&self.storage[self.head..self.head + first]);
        dest[first..].copy_from_slice(&self.storage[..count - first]);
    }

    fn advance(&mut self, count: usize) {
        self.size -= count;
        if self.size == 0 {
            self.head = 0;
            self.tail = 0;
        } else {
            self.head = (self.head + count) % self.capacity();
        }
    }

    /// Make room for `additional` more items
    fn reserve(&mut self, additional: usize) -> Result<(), RingBufferError> {
        if additional <= self.capacity() - self.size {
            return Ok(());
        }
        let required = self
            .size
            .checked_add(additional)
            .ok_or(RingBufferError::CapacityOverflow)?;

        let mut capacity = self.capacity();
        while capacity < required {
            capacity = self.growth.next(capacity)?;
        }

        let mut storage = vec![T::default(); capacity];
        self.copy_front(&mut storage[..self.size]);
        self.storage = storage;
        self.head = 0;
        self.tail = self.size;
        Ok(())
    }
}

impl<T: Copy + Default + PartialEq> RingBuffer<T> {
    /// Offset from the front of the first item equal to `item`
    pub fn index_of(&self, item: &T) -> Option<usize> {
        (0..self.size).find(|&offset| self.at(offset) == *item)
    }

    /// Offset from the front of the first occurrence of `sequence`
    ///
    /// A partial match that fails resumes at the item after the failed
    /// candidate's start, so overlapping prefixes are not skipped. An empty
    /// sequence matches at offset 0.
    pub fn index_of_sequence(&self, sequence: &[T]) -> Option<usize> {
        if sequence.is_empty() {
            return Some(0);
        }

        let mut start = 0;
        let mut matched = 0;
        while start + sequence.len() <= self.size {
            if self.at(start + matched) == sequence[matched] {
                matched += 1;
                if matched == sequence.len() {
                    return Some(start);
                }
            } else {
                start += 1;
                matched = 0;
            }
        }
        None
    }

    /// Check whether any buffered item equals `item`
    pub fn contains(&self, item: &T) -> bool {
        self.index_of(item).is_some()
    }
}
