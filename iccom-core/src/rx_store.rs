//! RX message store: per-channel ordered lists of messages under
//! construction and finalized, with commit/rollback of a single package's
//! worth of uncommitted deltas and a ready-callback registry.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::packet::Channel;

/// What a consumer callback did with the buffer it was handed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// The callback took the buffer; the store must not touch it again.
    Taken,
    /// The callback only borrowed the buffer; the store drops it.
    Borrowed,
}

/// A reassembled (or in-progress) message.
#[derive(Debug, Clone)]
pub struct Message {
    /// Per-channel monotone id (wraps, 0 reserved).
    pub id: u32,
    /// The message bytes accumulated so far.
    pub bytes: Vec<u8>,
    /// Bytes appended since the last commit; invisible to consumers while > 0.
    pub uncommitted_length: usize,
    /// Set once a packet with the complete flag has been applied.
    pub finalized: bool,
}

impl Message {
    fn new(id: u32) -> Self {
        Self { id, bytes: Vec::new(), uncommitted_length: 0, finalized: false }
    }

    /// `true` iff this message is done and has nothing pending commit —
    /// the only state in which it may be handed to a consumer.
    pub fn is_ready(&self) -> bool {
        self.finalized && self.uncommitted_length == 0
    }
}

/// Errors from [`RxStore::append_to_message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendError {
    /// No message with that id exists on that channel.
    NoSuchMessage,
    /// The target message is already finalized; no further appends allowed.
    AlreadyFinalized,
}

struct ChannelRecord {
    messages: Vec<Message>,
    next_id: u32,
    callback: Option<Callback>,
}

impl ChannelRecord {
    fn new() -> Self {
        Self { messages: Vec::new(), next_id: 1, callback: None }
    }

    fn alloc_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id = if self.next_id == u32::MAX { 1 } else { self.next_id + 1 };
        id
    }

    fn find_mut(&mut self, id: u32) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == id)
    }
}

/// A consumer ready-callback: invoked with `(channel, bytes)`, returns
/// whether it took ownership of `bytes`.
pub type Callback = Box<dyn FnMut(Channel, Vec<u8>) -> Ownership + Send>;

/// Per-channel ordered message storage plus the ready-callback registry.
///
/// Internally mutex-guarded: structural changes (channel lookup/creation,
/// list mutation, callback registration) hold the lock; the byte-copy for
/// a single append is done with the target message's buffer temporarily
/// swapped out, so the lock is free for the duration of the copy (see
/// spec's "RX-store unlocked-copy optimization" design note). This is safe
/// under the invariant that only the transport (frame state machine)
/// context mutates in-progress messages — consumer context only reads or
/// pops finalized ones.
pub struct RxStore {
    inner: Mutex<Inner>,
}

struct Inner {
    channels: HashMap<Channel, ChannelRecord>,
    global_callback: Option<Callback>,
    finalized_since_commit: usize,
}

impl RxStore {
    /// An empty store.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                channels: HashMap::new(),
                global_callback: None,
                finalized_since_commit: 0,
            }),
        }
    }

    /// Create a new message on `channel` and return its id. Allocates the
    /// channel record if this is the first message ever seen on it.
    pub fn create_message_in_channel(&self, channel: Channel) -> u32 {
        let mut guard = self.inner.lock().unwrap();
        let record = guard.channels.entry(channel).or_insert_with(ChannelRecord::new);
        let id = record.alloc_id();
        record.messages.push(Message::new(id));
        id
    }

    /// The last message on `channel`, if it exists and is not finalized —
    /// the open message new packets for that channel should append to.
    pub fn last_unfinalized_id(&self, channel: Channel) -> Option<u32> {
        let guard = self.inner.lock().unwrap();
        let record = guard.channels.get(&channel)?;
        let last = record.messages.last()?;
        if last.finalized { None } else { Some(last.id) }
    }

    /// Append `bytes` to the named message, releasing the lock around the
    /// copy itself. Sets `finalized` if `final_flag` is set.
    pub fn append_to_message(
        &self,
        channel: Channel,
        msg_id: u32,
        bytes: &[u8],
        final_flag: bool,
    ) -> Result<(), AppendError> {
        // Phase 1 (locked): take the message's buffer out so the copy below
        // runs without holding the store lock.
        let mut taken = {
            let mut guard = self.inner.lock().unwrap();
            let record = guard
                .channels
                .get_mut(&channel)
                .ok_or(AppendError::NoSuchMessage)?;
            let msg = record.find_mut(msg_id).ok_or(AppendError::NoSuchMessage)?;
            if msg.finalized {
                return Err(AppendError::AlreadyFinalized);
            }
            std::mem::take(&mut msg.bytes)
        };

        // Phase 2 (unlocked): the actual byte copy.
        taken.extend_from_slice(bytes);

        // Phase 3 (locked): put the buffer back and update bookkeeping.
        let mut guard = self.inner.lock().unwrap();
        let record = guard.channels.get_mut(&channel).ok_or(AppendError::NoSuchMessage)?;
        let msg = record.find_mut(msg_id).ok_or(AppendError::NoSuchMessage)?;
        msg.bytes = taken;
        msg.uncommitted_length += bytes.len();
        if final_flag {
            msg.finalized = true;
            guard.finalized_since_commit += 1;
        }
        Ok(())
    }

    /// Commit every pending delta: clears `uncommitted_length` everywhere
    /// and resets the finalized-since-commit counter. Returns how many
    /// messages were newly finalized this round (for scheduling dispatch).
    pub fn commit_all(&self) -> usize {
        let mut guard = self.inner.lock().unwrap();
        for record in guard.channels.values_mut() {
            for msg in &mut record.messages {
                msg.uncommitted_length = 0;
            }
        }
        let finalized = guard.finalized_since_commit;
        guard.finalized_since_commit = 0;
        finalized
    }

    /// Undo every uncommitted delta: shrink `bytes`/`length` back by
    /// `uncommitted_length`, clear `finalized` on messages that had one,
    /// and zero every `uncommitted_length`.
    pub fn rollback_all(&self) {
        let mut guard = self.inner.lock().unwrap();
        for record in guard.channels.values_mut() {
            for msg in &mut record.messages {
                if msg.uncommitted_length > 0 {
                    let new_len = msg.bytes.len() - msg.uncommitted_length;
                    msg.bytes.truncate(new_len);
                    msg.finalized = false;
                    msg.uncommitted_length = 0;
                }
            }
        }
        guard.finalized_since_commit = 0;
    }

    /// Pop the oldest ready message (finalized, nothing uncommitted) on
    /// `channel`, if any.
    pub fn pop_first_ready(&self, channel: Channel) -> Option<Message> {
        let mut guard = self.inner.lock().unwrap();
        let record = guard.channels.get_mut(&channel)?;
        let idx = record.messages.iter().position(Message::is_ready)?;
        Some(record.messages.remove(idx))
    }

    /// Register (or clear, by passing `None`) the ready-callback for
    /// `channel`. `channel = None` addresses the global fallback.
    pub fn set_channel_callback(&self, channel: Option<Channel>, callback: Option<Callback>) {
        let mut guard = self.inner.lock().unwrap();
        match channel {
            None => guard.global_callback = callback,
            Some(ch) => {
                let record = guard.channels.entry(ch).or_insert_with(ChannelRecord::new);
                record.callback = callback;
            }
        }
    }

    /// Walk every channel in order and invoke the chosen callback (per
    /// channel if set, else global, else skip) for every ready message,
    /// removing each message as it's delivered. Within one channel,
    /// messages are delivered in finalization order.
    ///
    /// The store lock is never held across a callback invocation: per
    /// spec, a slow consumer callback may only block other consumers on
    /// other channels, not the transport context appending new packets or
    /// `Engine::close` joining that context. This follows the same
    /// take-it-out-unlocked-put-it-back shape as `append_to_message`'s
    /// unlocked copy, applied to the callback closures instead of a byte
    /// buffer. Returns the number of messages delivered, for the stats
    /// "messages ready" gauge.
    pub fn deliver_ready_to_consumers(&self) -> usize {
        let channels_with_ready: Vec<Channel> = {
            let guard = self.inner.lock().unwrap();
            guard
                .channels
                .iter()
                .filter(|(_, r)| r.messages.iter().any(Message::is_ready))
                .map(|(&ch, _)| ch)
                .collect()
        };

        let mut global_callback = self.inner.lock().unwrap().global_callback.take();
        let mut delivered_count = 0;

        for channel in channels_with_ready {
            let (mut channel_callback, ready): (Option<Callback>, Vec<(u32, Vec<u8>)>) = {
                let mut guard = self.inner.lock().unwrap();
                let Some(record) = guard.channels.get_mut(&channel) else { continue };
                let callback = record.callback.take();
                let ready = record
                    .messages
                    .iter()
                    .filter(|m| m.is_ready())
                    .map(|m| (m.id, m.bytes.clone()))
                    .collect();
                (callback, ready)
            };

            // Unlocked: invoke callbacks oldest-first (finalization order).
            let mut delivered_ids = Vec::with_capacity(ready.len());
            for (id, bytes) in ready {
                let Some(cb) = channel_callback.as_mut().or(global_callback.as_mut()) else { break };
                let outcome = cb(channel, bytes);
                let _ = outcome; // Taken vs Borrowed only matters for a C FFI boundary;
                                 // in safe Rust the buffer is simply dropped either way.
                delivered_ids.push(id);
            }
            delivered_count += delivered_ids.len();

            let mut guard = self.inner.lock().unwrap();
            if let Some(record) = guard.channels.get_mut(&channel) {
                record.callback = channel_callback;
                for id in delivered_ids {
                    if let Some(i) = record.messages.iter().position(|m| m.id == id) {
                        record.messages.remove(i);
                    }
                }
            }
        }

        self.inner.lock().unwrap().global_callback = global_callback;
        delivered_count
    }
}

impl Default for RxStore {
    fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_append_builds_a_message() {
        let store = RxStore::new();
        let id = store.create_message_in_channel(5);
        store.append_to_message(5, id, b"hel", false).unwrap();
        store.append_to_message(5, id, b"lo", true).unwrap();
        store.commit_all();

        let msg = store.pop_first_ready(5).unwrap();
        assert_eq!(msg.bytes, b"hello");
        assert!(msg.finalized);
    }

    #[test]
    fn uncommitted_message_is_not_ready() {
        let store = RxStore::new();
        let id = store.create_message_in_channel(1);
        store.append_to_message(1, id, b"x", true).unwrap();
        // Not committed yet: invisible to consumers.
        assert!(store.pop_first_ready(1).is_none());
        store.commit_all();
        assert!(store.pop_first_ready(1).is_some());
    }

    #[test]
    fn rollback_undoes_uncommitted_append_and_unfinalizes() {
        let store = RxStore::new();
        let id = store.create_message_in_channel(1);
        store.append_to_message(1, id, b"abc", false).unwrap();
        store.commit_all();
        store.append_to_message(1, id, b"def", true).unwrap();
        store.rollback_all();

        // the committed "abc" must survive; the uncommitted "def" must not,
        // and finalized must be cleared since it was set by the rolled-back append.
        assert!(store.pop_first_ready(1).is_none());
        let id2 = store.last_unfinalized_id(1).unwrap();
        assert_eq!(id2, id);
    }

    #[test]
    fn append_to_finalized_message_fails() {
        let store = RxStore::new();
        let id = store.create_message_in_channel(1);
        store.append_to_message(1, id, b"a", true).unwrap();
        let err = store.append_to_message(1, id, b"b", false).unwrap_err();
        assert_eq!(err, AppendError::AlreadyFinalized);
    }

    #[test]
    fn append_to_missing_message_fails() {
        let store = RxStore::new();
        let err = store.append_to_message(1, 99, b"a", false).unwrap_err();
        assert_eq!(err, AppendError::NoSuchMessage);
    }

    #[test]
    fn per_channel_callback_overrides_global() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let store = RxStore::new();
        let global_hits = Arc::new(AtomicUsize::new(0));
        let channel_hits = Arc::new(AtomicUsize::new(0));

        {
            let hits = global_hits.clone();
            store.set_channel_callback(None, Some(Box::new(move |_ch, _bytes| {
                hits.fetch_add(1, Ordering::SeqCst);
                Ownership::Borrowed
            })));
        }
        {
            let hits = channel_hits.clone();
            store.set_channel_callback(Some(3), Some(Box::new(move |_ch, _bytes| {
                hits.fetch_add(1, Ordering::SeqCst);
                Ownership::Borrowed
            })));
        }

        let id = store.create_message_in_channel(3);
        store.append_to_message(3, id, b"hi", true).unwrap();
        store.commit_all();
        store.deliver_ready_to_consumers();

        assert_eq!(channel_hits.load(Ordering::SeqCst), 1);
        assert_eq!(global_hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn slow_callback_does_not_block_the_transport_context() {
        use std::sync::mpsc;
        use std::sync::Arc;
        use std::time::Duration;

        let store = Arc::new(RxStore::new());
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (parked_tx, parked_rx) = mpsc::channel::<()>();

        // Channel 1's callback blocks until told to continue, simulating a
        // slow consumer.
        store.set_channel_callback(
            Some(1),
            Some(Box::new(move |_ch, _bytes| {
                parked_tx.send(()).unwrap();
                release_rx.recv().unwrap();
                Ownership::Borrowed
            })),
        );
        let id1 = store.create_message_in_channel(1);
        store.append_to_message(1, id1, b"slow", true).unwrap();
        store.commit_all();

        let dispatcher = {
            let store = store.clone();
            std::thread::spawn(move || store.deliver_ready_to_consumers())
        };

        // Wait for the dispatcher to be parked inside channel 1's callback,
        // then prove the store lock is free: a concurrent transport-context
        // style mutation on a different channel must not block on it.
        parked_rx.recv_timeout(Duration::from_secs(5)).expect("callback never started");
        let id2 = store.create_message_in_channel(2);
        store.append_to_message(2, id2, b"fast", true).unwrap();
        store.commit_all();

        release_tx.send(()).unwrap();
        let delivered = dispatcher.join().unwrap();
        assert_eq!(delivered, 1);
        assert!(store.pop_first_ready(2).is_some());
    }

    #[test]
    fn wraps_id_allocator_skipping_zero() {
        let store = RxStore::new();
        {
            let mut guard = store.inner.lock().unwrap();
            guard.channels.insert(9, ChannelRecord { messages: Vec::new(), next_id: u32::MAX, callback: None });
        }
        let id = store.create_message_in_channel(9);
        assert_eq!(id, u32::MAX);
        let id2 = store.create_message_in_channel(9);
        assert_eq!(id2, 1);
    }
}
