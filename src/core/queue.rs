//! # Outbound Queue
//!
//! FIFO of packets waiting to be written to a connection.
//!
//! The front buffer is drained in place by partial writes and only removed once it is
//! empty. Removed slots are left dead behind the head index and reclaimed in one pass
//! when the storage exceeds [`COMPACT_MIN_SLOTS`] and more than a quarter of it is dead,
//! so a dequeue never shifts the remaining packets.

use crate::core::buffer::ByteBuffer;

/// Storage size below which dead slots are never reclaimed
pub const COMPACT_MIN_SLOTS: usize = 50;

/// Pending packets for one connection
#[derive(Debug, Default)]
pub struct OutboundQueue {
    slots: Vec<Option<ByteBuffer>>,
    head: usize,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, buffer: ByteBuffer) {
        self.slots.push(Some(buffer));
    }

    /// Oldest pending packet
    pub fn front(&self) -> Option<&ByteBuffer> {
        self.slots.get(self.head).and_then(Option::as_ref)
    }

    pub fn front_mut(&mut self) -> Option<&mut ByteBuffer> {
        self.slots.get_mut(self.head).and_then(Option::as_mut)
    }

    /// Remove the front packet if every byte of it has been written
    pub fn dequeue_if_fully_drained(&mut self) -> Option<ByteBuffer> {
        if !self.front()?.is_empty() {
            return None;
        }
        let buffer = self.slots[self.head].take();
        self.head += 1;
        self.maybe_compact();
        buffer
    }

    /// Number of live packets
    pub fn len(&self) -> usize {
        self.slots.len() - self.head
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Readable bytes across every live packet
    pub fn pending_bytes(&self) -> usize {
        self.slots[self.head..]
            .iter()
            .flatten()
            .map(ByteBuffer::readable_len)
            .sum()
    }

    fn maybe_compact(&mut self) {
        if self.head == self.slots.len() {
            self.slots.clear();
            self.head = 0;
            return;
        }
        if self.slots.len() > COMPACT_MIN_SLOTS && self.head * 4 > self.slots.len() {
            self.slots.drain(..self.head);
            self.head = 0;
        }
    }

    #[cfg(test)]
    fn storage_len(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(bytes: &[u8]) -> ByteBuffer {
        ByteBuffer::from_slice(bytes)
    }

    #[test]
    fn test_partial_drain_keeps_front() {
        let mut queue = OutboundQueue::new();
        queue.enqueue(packet(&[1, 2, 3]));
        queue.enqueue(packet(&[4]));

        queue.front_mut().unwrap().drain(2).unwrap();
        assert!(queue.dequeue_if_fully_drained().is_none());
        assert_eq!(queue.pending_bytes(), 2);

        queue.front_mut().unwrap().drain(1).unwrap();
        assert!(queue.dequeue_if_fully_drained().is_some());
        assert_eq!(queue.front().unwrap().readable_slice(), &[4]);
    }

    #[test]
    fn test_partial_writes_preserve_order() {
        let mut queue = OutboundQueue::new();
        queue.enqueue(packet(b"abc"));
        queue.enqueue(packet(b"defg"));
        queue.enqueue(packet(b"hi"));

        let mut wire = Vec::new();
        while let Some(front) = queue.front_mut() {
            let n = front.readable_len().min(2);
            wire.extend_from_slice(&front.readable_slice()[..n]);
            front.drain(n).unwrap();
            queue.dequeue_if_fully_drained();
        }
        assert_eq!(wire, b"abcdefghi");
        assert!(queue.is_empty());
    }

    #[test]
    fn test_compaction_bounds_dead_slots() {
        let mut queue = OutboundQueue::new();
        for i in 0..100u8 {
            queue.enqueue(packet(&[i]));
        }
        for _ in 0..30 {
            queue.front_mut().unwrap().drain(1).unwrap();
            queue.dequeue_if_fully_drained().unwrap();
        }
        // 26 dead of 100 triggered a compaction, four dead slots since
        assert_eq!(queue.len(), 70);
        assert_eq!(queue.storage_len(), 74);
        assert_eq!(queue.front().unwrap().readable_slice(), &[30]);
    }

    #[test]
    fn test_small_queue_not_compacted() {
        let mut queue = OutboundQueue::new();
        for i in 0..10u8 {
            queue.enqueue(packet(&[i]));
        }
        for _ in 0..9 {
            queue.front_mut().unwrap().drain(1).unwrap();
            queue.dequeue_if_fully_drained().unwrap();
        }
        assert_eq!(queue.storage_len(), 10);
        assert_eq!(queue.len(), 1);
    }
}
