//! TX package queue: the ordered queue of outbound packages and the
//! packet-append engine that fragments posted messages across them.
//!
//! Invariants (enforced by construction, never violated across calls):
//! the queue is never empty; the head is the package currently handed to
//! the transport; every non-tail package is finalized; the tail is either
//! finalized (ready to xfer once it becomes head) or still accumulating
//! packets.

use std::collections::VecDeque;

use crate::package::Package;
use crate::packet::{self, Channel};

/// Ordered queue of outbound packages plus the next-id allocator.
pub struct TxQueue {
    frame_size: usize,
    packages: VecDeque<Package>,
    next_id: u8,
    /// Whether the current head's content has already been handed to the
    /// transport for a data xfer whose outcome (ack/nack) is still
    /// outstanding. While true, a `post` must not mutate the head in place
    /// — see [`TxQueue::append_message`].
    head_dispatched: bool,
}

fn next_id(current: u8) -> u8 {
    if current == u8::MAX { 1 } else { current + 1 }
}

impl TxQueue {
    /// A fresh queue: one empty, finalized package with id 1.
    pub fn new(frame_size: usize) -> Self {
        let mut packages = VecDeque::new();
        packages.push_back(Package::init_empty(1, frame_size));
        Self { frame_size, packages, next_id: next_id(1), head_dispatched: false }
    }

    /// The head package — the one currently handed to (or about to be
    /// handed to) the transport for the next data xfer.
    pub fn head(&self) -> &Package {
        self.packages.front().expect("tx queue is never empty")
    }

    /// The bytes of the head package, marking it dispatched: from this
    /// point until the pending ack/nack resolves, any newly posted message
    /// is routed to a fresh tail rather than mutating this package (it may
    /// already be in flight on the wire).
    pub fn head_bytes_for_dispatch(&mut self) -> Vec<u8> {
        self.head_dispatched = true;
        self.head().as_bytes().to_vec()
    }

    /// Number of packages currently queued (depth, for statistics).
    pub fn depth(&self) -> usize {
        self.packages.len()
    }

    fn tail_mut(&mut self) -> &mut Package {
        self.packages.back_mut().expect("tx queue is never empty")
    }

    /// Finalize the current tail and start a new, empty tail with the next id.
    pub fn enqueue_new_empty(&mut self) {
        self.tail_mut().finalize();
        let id = self.next_id;
        self.next_id = next_id(id);
        self.packages.push_back(Package::init_empty(id, self.frame_size));
    }

    /// Fragment `bytes` into one or more packets on `channel`, appending
    /// them across as many tail packages as needed.
    pub fn append_message(&mut self, channel: Channel, mut bytes: &[u8]) {
        if self.packages.len() == 1 && self.head_dispatched {
            // The sole package is in flight; don't mutate what the peer may
            // already be validating. Start a genuinely separate tail.
            self.enqueue_new_empty();
        }
        while !bytes.is_empty() {
            let consumed = self.append_packet_to_tail(channel, bytes);
            if consumed == 0 {
                self.enqueue_new_empty();
                continue;
            }
            bytes = &bytes[consumed..];
            self.tail_mut().finalize();
        }
    }

    /// Write as much of `remaining` as fits into the tail as one packet.
    /// Returns the number of message bytes consumed, or 0 if not even a
    /// packet header fits in the tail's free space.
    fn append_packet_to_tail(&mut self, channel: Channel, remaining: &[u8]) -> usize {
        let tail = self.tail_mut();
        let free = tail.free_space_bytes();
        if free <= packet::HEADER_LEN {
            return 0;
        }
        let max_payload = free - packet::HEADER_LEN;
        let frag_len = remaining.len().min(max_payload);
        let complete = frag_len == remaining.len();
        let total = packet::HEADER_LEN + frag_len;
        let written = packet::write(&mut tail.free_space_mut()[..total], channel, complete, &remaining[..frag_len]);
        tail.commit_written(written);
        frag_len
    }

    /// Advance the queue past a positively-acknowledged head. Returns
    /// `true` iff there is more data queued behind the (now dropped) head
    /// — i.e. the transport should start the next data xfer immediately.
    pub fn advance_on_ack(&mut self) -> bool {
        self.head_dispatched = false;
        if self.packages.len() > 1 {
            self.packages.pop_front();
            true
        } else {
            let id = self.next_id;
            self.next_id = next_id(id);
            self.packages.front_mut().expect("tx queue is never empty").reset_empty(id);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::Validation;

    const FRAME: usize = 64; // payload room = 57

    #[test]
    fn fresh_queue_has_one_empty_package() {
        let q = TxQueue::new(FRAME);
        assert_eq!(q.depth(), 1);
        assert_eq!(q.head().id(), 1);
        assert!(matches!(Package::validate(q.head().as_bytes()), Validation::Valid(0)));
    }

    #[test]
    fn small_message_fits_in_one_package() {
        let mut q = TxQueue::new(FRAME);
        q.append_message(0x0005, &[0x11, 0x22, 0x33]);
        assert_eq!(q.depth(), 1);
        let (packet, _) = packet::parse(q.head().payload()).unwrap();
        assert_eq!(packet.channel, 0x0005);
        assert!(packet.complete);
        assert_eq!(packet.payload, &[0x11, 0x22, 0x33]);
    }

    #[test]
    fn large_message_fragments_across_two_packages() {
        // payload room 57, packet header 4 -> first packet carries 53 bytes exactly.
        let mut q = TxQueue::new(FRAME);
        let data: Vec<u8> = (0..100u16).map(|b| b as u8).collect();
        q.append_message(1, &data);
        assert_eq!(q.depth(), 2);

        // First (now-dropped-on-ack) package: packet with complete=0, 53 bytes.
        let head_bytes = q.head().as_bytes().to_vec();
        q.advance_on_ack();
        let (p1, _) = packet::parse(&head_bytes[3..3 + 57]).unwrap();
        assert!(!p1.complete);
        assert_eq!(p1.payload.len(), 53);
        assert_eq!(p1.payload, &data[..53]);

        let (p2, _) = packet::parse(q.head().payload()).unwrap();
        assert!(p2.complete);
        assert_eq!(p2.payload, &data[53..]);
    }

    #[test]
    fn advance_on_ack_with_single_element_reuses_and_reids() {
        let mut q = TxQueue::new(FRAME);
        let first_id = q.head().id();
        let more = q.advance_on_ack();
        assert!(!more);
        assert_eq!(q.depth(), 1);
        assert_ne!(q.head().id(), first_id);
        assert!(matches!(Package::validate(q.head().as_bytes()), Validation::Valid(0)));
    }

    #[test]
    fn post_after_head_dispatched_does_not_corrupt_in_flight_package() {
        // Simulates: the head goes out on the wire (dispatched), then a
        // consumer posts before the ack for that round comes back. The
        // in-flight bytes must stay exactly as sent; the new message must
        // land on a separate package instead of silently overwriting it.
        let mut q = TxQueue::new(FRAME);
        let sent = q.head_bytes_for_dispatch();

        q.append_message(7, b"late arrival");
        assert_eq!(q.depth(), 2, "a dispatched head must not absorb a concurrent post");
        assert_eq!(q.head().as_bytes(), &sent[..], "in-flight head must be unchanged");

        let more = q.advance_on_ack();
        assert!(more, "the freshly posted package must still be waiting behind the acked head");
        let (p, _) = packet::parse(q.head().payload()).unwrap();
        assert_eq!(p.channel, 7);
        assert_eq!(p.payload, b"late arrival");
    }

    #[test]
    fn post_before_dispatch_may_still_use_the_head() {
        let mut q = TxQueue::new(FRAME);
        q.append_message(7, b"still fresh");
        assert_eq!(q.depth(), 1, "nothing was dispatched yet, so the head is still ours to fill");
        let (p, _) = packet::parse(q.head().payload()).unwrap();
        assert_eq!(p.payload, b"still fresh");
    }

    #[test]
    fn advance_on_ack_with_multiple_elements_drops_head() {
        let mut q = TxQueue::new(FRAME);
        q.append_message(1, &[0u8; 100]); // forces a second package
        assert_eq!(q.depth(), 2);
        let second_id = q.packages[1].id();
        let more = q.advance_on_ack();
        assert!(more);
        assert_eq!(q.depth(), 1);
        assert_eq!(q.head().id(), second_id);
    }

    #[test]
    fn id_wraps_from_0xff_to_1_never_zero() {
        let mut q = TxQueue::new(FRAME);
        q.next_id = 0xFF;
        q.enqueue_new_empty();
        assert_eq!(q.packages.back().unwrap().id(), 0xFF);
        q.enqueue_new_empty();
        assert_eq!(q.packages.back().unwrap().id(), 1);
    }

    #[test]
    fn every_non_tail_package_is_valid_after_fragmentation() {
        let mut q = TxQueue::new(FRAME);
        q.append_message(2, &[0xAAu8; 200]);
        for i in 0..q.depth() - 1 {
            assert!(matches!(Package::validate(q.packages[i].as_bytes()), Validation::Valid(_)));
        }
    }
}
