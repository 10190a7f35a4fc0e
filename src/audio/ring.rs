use std::collections::VecDeque;

/// Fixed-capacity FIFO that evicts its oldest entry when full
///
/// Used for the pre-roll buffer ring and the post-roll loudness window. A
/// capacity of zero is allowed and keeps nothing.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append `item`, returning the entry it evicted, if any
    pub fn push(&mut self, item: T) -> Option<T> {
        if self.capacity == 0 {
            return Some(item);
        }
        let evicted = if self.items.len() == self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    /// Entries from oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_within_capacity() {
        let mut ring = RingBuffer::new(3);
        assert!(ring.is_empty());
        assert_eq!(ring.push(1), None);
        assert_eq!(ring.push(2), None);
        assert_eq!(ring.iter().copied().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_overflow_evicts_oldest_first() {
        let mut ring = RingBuffer::new(3);
        for i in 1..=3 {
            ring.push(i);
        }
        assert_eq!(ring.push(4), Some(1));
        assert_eq!(ring.push(5), Some(2));
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.iter().copied().collect::<Vec<_>>(), vec![3, 4, 5]);
    }

    #[test]
    fn test_never_exceeds_capacity() {
        let mut ring = RingBuffer::new(4);
        for i in 0..100 {
            ring.push(i);
            assert!(ring.len() <= 4);
        }
        assert_eq!(ring.iter().copied().collect::<Vec<_>>(), vec![96, 97, 98, 99]);
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let mut ring = RingBuffer::new(0);
        assert_eq!(ring.push("a"), Some("a"));
        assert!(ring.is_empty());
    }
}
