//! Outgoing and pending packet queues.
//!
//! Each queue sits behind its own lock and the two locks are never held at
//! the same time. The outgoing queue also owns the xid counter so that xid
//! order always matches queue order.

use crate::packet::{Packet, Request};
use parking_lot::Mutex;
use std::collections::VecDeque;
use zk_wire::{OpCode, AUTH_XID, PING_XID};

struct Outgoing {
    packets: VecDeque<Packet>,
    next_xid: i32,
}

/// Packets waiting to be written to the socket
pub struct OutgoingQueue {
    inner: Mutex<Outgoing>,
}

impl OutgoingQueue {
    /// Create an empty queue; the first counted xid is 1
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Outgoing {
                packets: VecDeque::new(),
                next_xid: 1,
            }),
        }
    }

    /// Assign an xid, build the packet and append it.
    ///
    /// `accept` is evaluated under the queue lock; when it returns false the
    /// built packet is handed back instead of being queued.
    pub(crate) fn enqueue(
        &self,
        request: Request,
        accept: impl FnOnce() -> bool,
    ) -> Result<i32, Packet> {
        let mut inner = self.inner.lock();
        let xid = match request.op {
            OpCode::Ping => PING_XID,
            OpCode::Auth => AUTH_XID,
            _ => {
                let xid = inner.next_xid;
                // counted xids stay positive so they never meet a sentinel
                inner.next_xid = match xid.checked_add(1) {
                    Some(next) => next,
                    None => 1,
                };
                xid
            }
        };

        let packet = Packet::from_request(xid, request);
        if !accept() {
            return Err(packet);
        }
        inner.packets.push_back(packet);
        Ok(xid)
    }

    /// Install `batch` at the head in one step, keeping its order
    pub(crate) fn prime(&self, batch: Vec<Packet>) {
        let mut inner = self.inner.lock();
        for packet in batch.into_iter().rev() {
            inner.packets.push_front(packet);
        }
    }

    /// Remove the head packet
    pub(crate) fn pop_front(&self) -> Option<Packet> {
        self.inner.lock().packets.pop_front()
    }

    /// Empty the queue, returning its former contents in order
    pub(crate) fn drain_all(&self) -> Vec<Packet> {
        self.inner.lock().packets.drain(..).collect()
    }

    /// Whether nothing is waiting to be written
    pub fn is_empty(&self) -> bool {
        self.inner.lock().packets.is_empty()
    }

    /// Number of queued packets
    pub fn len(&self) -> usize {
        self.inner.lock().packets.len()
    }

    /// Xids of queued packets in send order (`None` for the handshake)
    pub fn xids(&self) -> Vec<Option<i32>> {
        self.inner.lock().packets.iter().map(Packet::xid).collect()
    }
}

impl Default for OutgoingQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Packets written to the socket and awaiting a reply, in send order
pub struct PendingQueue {
    inner: Mutex<VecDeque<Packet>>,
}

impl PendingQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
        }
    }

    /// Append a fully written packet
    pub(crate) fn push_back(&self, packet: Packet) {
        self.inner.lock().push_back(packet);
    }

    /// Remove the oldest packet
    pub(crate) fn pop_head(&self) -> Option<Packet> {
        self.inner.lock().pop_front()
    }

    /// Empty the queue, returning its former contents in order
    pub(crate) fn drain_all(&self) -> Vec<Packet> {
        self.inner.lock().drain(..).collect()
    }

    /// Whether no reply is outstanding
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Number of outstanding replies
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Xids of outstanding packets, oldest first
    pub fn xids(&self) -> Vec<Option<i32>> {
        self.inner.lock().iter().map(Packet::xid).collect()
    }
}

impl Default for PendingQueue {
    fn default() -> Self {
        Self::new()
    }
}
