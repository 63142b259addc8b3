use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use ringbridge_protocol::Packet;
use tracing::warn;

/// Bounded FIFO packet queue with evict-oldest overflow behavior.
///
/// When a push would exceed capacity, the oldest packets are dropped until
/// the queue is strictly below capacity and the failed-enqueue counter is
/// incremented once per drop. Surviving packets keep their order.
#[derive(Debug)]
pub struct PacketQueue {
    inner: Mutex<VecDeque<Packet>>,
    capacity: usize,
    failed_to_enqueue: AtomicU64,
}

impl PacketQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity.max(1).min(8192))),
            capacity: capacity.max(1),
            failed_to_enqueue: AtomicU64::new(0),
        }
    }

    pub fn push(&self, packet: Packet) {
        let mut queue = self.inner.lock().expect("packet queue poisoned");
        if queue.len() >= self.capacity {
            warn!(capacity = self.capacity, "queue full, dropping oldest packets");
            while queue.len() >= self.capacity {
                queue.pop_front();
                self.failed_to_enqueue.fetch_add(1, Ordering::Relaxed);
            }
        }
        queue.push_back(packet);
    }

    pub fn pop(&self) -> Option<Packet> {
        self.inner.lock().expect("packet queue poisoned").pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("packet queue poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn failed_to_enqueue(&self) -> u64 {
        self.failed_to_enqueue.load(Ordering::Relaxed)
    }
}
