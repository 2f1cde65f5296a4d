//! Fixed-capacity ring buffer used by the continuous ranging window.

/// Ring buffer over `[T; N]` with a runtime capacity of at most `N`
///
/// The buffer is always "full": `fill` seeds every slot and `push` overwrites
/// the oldest one. Reads are relative to the newest element, so callers never
/// compute wrapped indices themselves.
#[derive(Clone, Copy)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct RingBuffer<T: Copy, const N: usize> {
    items: [T; N],
    capacity: usize,
    /// Slot of the newest element
    newest: usize,
}

impl<T: Copy, const N: usize> RingBuffer<T, N> {
    /// Creates a buffer with `capacity` slots (clamped to `1..=N`) all set to `value`
    pub fn with_capacity(capacity: usize, value: T) -> Self {
        Self {
            items: [value; N],
            capacity: capacity.clamp(1, N),
            newest: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Sets every slot to `value`
    pub fn fill(&mut self, value: T) {
        self.items[..self.capacity].fill(value);
    }

    /// Overwrites the oldest element
    pub fn push(&mut self, value: T) {
        self.newest = (self.newest + 1) % self.capacity;
        self.items[self.newest] = value;
    }

    /// Element `age` pushes ago (0 = newest); wraps around the capacity
    pub fn latest(&self, age: usize) -> T {
        let age = age % self.capacity;
        let slot = (self.newest + self.capacity - age) % self.capacity;
        self.items[slot]
    }

    /// The `n` newest elements, newest first
    pub fn iter_latest(&self, n: usize) -> impl Iterator<Item = T> + '_ {
        (0..n.min(self.capacity)).map(move |age| self.latest(age))
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[test]
    fn push_overwrites_oldest() {
        let mut ring: RingBuffer<u32, 8> = RingBuffer::with_capacity(3, 0);
        ring.push(1);
        ring.push(2);
        ring.push(3);
        ring.push(4);
        let latest: Vec<u32> = ring.iter_latest(3).collect();
        assert_eq!(latest, vec![4, 3, 2]);
    }

    #[test]
    fn fill_seeds_all_slots() {
        let mut ring: RingBuffer<u8, 4> = RingBuffer::with_capacity(4, 0);
        ring.push(9);
        ring.fill(5);
        assert!(ring.iter_latest(4).all(|v| v == 5));
    }

    #[test]
    fn ages_wrap_without_underflow() {
        let mut ring: RingBuffer<u32, 4> = RingBuffer::with_capacity(2, 0);
        ring.push(10);
        ring.push(20);
        assert_eq!(ring.latest(0), 20);
        assert_eq!(ring.latest(1), 10);
        assert_eq!(ring.latest(2), 20);
        assert_eq!(ring.latest(3), 10);
    }

    #[test]
    fn capacity_is_clamped() {
        let ring: RingBuffer<u32, 4> = RingBuffer::with_capacity(10, 0);
        assert_eq!(ring.capacity(), 4);
        let ring: RingBuffer<u32, 4> = RingBuffer::with_capacity(0, 0);
        assert_eq!(ring.capacity(), 1);
    }
}
