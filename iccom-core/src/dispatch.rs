//! Consumer dispatch: a single cooperative worker that drains finalized RX
//! messages and invokes per-channel callbacks off the transport critical
//! path.
//!
//! Ordering guarantee: within one channel, callbacks run in the order
//! their messages finalized (enforced by [`crate::rx_store::RxStore`]).
//! Across channels, no ordering is promised.

use std::sync::atomic::Ordering;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::rx_store::RxStore;
use crate::stats::Stats;

/// Spawn the dispatcher thread. It blocks on `wake` and, each time it's
/// woken, drains every channel's ready messages once. The thread exits
/// (and is joinable) once every `Sender` half of `wake` has been dropped —
/// that's how [`crate::engine::Engine::close`] cancels it without a
/// separate shutdown flag.
pub fn spawn(rx_store: Arc<RxStore>, stats: Arc<Stats>, wake: Receiver<()>) -> JoinHandle<()> {
    std::thread::spawn(move || {
        while wake.recv().is_ok() {
            let delivered = rx_store.deliver_ready_to_consumers();
            stats.messages_ready.fetch_sub(delivered as u64, Ordering::Relaxed);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rx_store::Ownership;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    #[test]
    fn worker_drains_on_wake_and_exits_when_sender_dropped() {
        let rx_store = Arc::new(RxStore::new());
        let delivered = Arc::new(AtomicUsize::new(0));
        {
            let delivered = delivered.clone();
            rx_store.set_channel_callback(None, Some(Box::new(move |_ch, _bytes| {
                delivered.fetch_add(1, Ordering::SeqCst);
                Ownership::Borrowed
            })));
        }

        let id = rx_store.create_message_in_channel(1);
        rx_store.append_to_message(1, id, b"hi", true).unwrap();
        rx_store.commit_all();

        let stats = Arc::new(crate::stats::Stats::default());
        stats.messages_ready.fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = mpsc::channel();
        let handle = spawn(rx_store, stats.clone(), rx);
        tx.send(()).unwrap();

        drop(tx); // signals the worker to stop after draining
        handle.join().unwrap();
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }
}
