//! Engine façade: lifecycle (`init`/`close`), the consumer API (`post`,
//! `flush`, `read`, `set_channel_callback`, `remove_channel_callback`,
//! `is_running`), and the glue that wires the frame state machine to an
//! injected [`SymSpi`] transport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::config::EngineConfig;
use crate::error::IccomError;
use crate::frame::FrameMachine;
use crate::governor::ErrorGovernor;
use crate::packet::{Channel, MAX_CHANNEL};
use crate::rx_store::{Callback, RxStore};
use crate::stats::{Snapshot, Stats};
use crate::transport::SymSpi;
use crate::tx_queue::TxQueue;
use crate::{dispatch, governor};

fn check_channel(channel: Channel) -> Result<(), IccomError> {
    if channel > MAX_CHANNEL {
        Err(IccomError::InvalidChannel)
    } else {
        Ok(())
    }
}

/// A running ICCom engine: one TX queue, one RX store, a frame state
/// machine driving a transport on a dedicated thread, and a dispatcher
/// thread delivering finalized messages to consumer callbacks.
pub struct Engine {
    tx_queue: Arc<Mutex<TxQueue>>,
    rx_store: Arc<RxStore>,
    stats: Arc<Stats>,
    closing: Arc<AtomicBool>,
    transport_thread: Mutex<Option<JoinHandle<()>>>,
    dispatch_sender: Mutex<Option<mpsc::Sender<()>>>,
    dispatch_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    /// Start the engine: spawn the dispatcher and the transport-driving
    /// thread, and hand the transport its initial data xfer.
    pub fn init<T>(config: EngineConfig, transport: T) -> Engine
    where
        T: SymSpi + 'static,
    {
        let tx_queue = Arc::new(Mutex::new(TxQueue::new(config.data_xfer_size)));
        let rx_store = Arc::new(RxStore::new());
        let stats = Arc::new(Stats::default());
        let closing = Arc::new(AtomicBool::new(false));

        let (dispatch_tx, dispatch_rx) = mpsc::channel();
        let dispatch_thread = dispatch::spawn(rx_store.clone(), stats.clone(), dispatch_rx);

        let governor = ErrorGovernor::new(
            config.bad_data_threshold_per_sec,
            config.duplicated_threshold_per_sec,
            config.parsing_failed_threshold_per_sec,
            config.transport_fault_threshold_per_sec,
        );

        let mut frame = FrameMachine::new(
            config.ack_xfer_size,
            tx_queue.clone(),
            rx_store.clone(),
            stats.clone(),
            governor,
            dispatch_tx.clone(),
        );

        let transport_closing = closing.clone();
        let transport_thread = std::thread::spawn(move || {
            run_transport_loop(transport, &mut frame, &transport_closing);
        });

        Engine {
            tx_queue,
            rx_store,
            stats,
            closing,
            transport_thread: Mutex::new(Some(transport_thread)),
            dispatch_sender: Mutex::new(Some(dispatch_tx)),
            dispatch_thread: Mutex::new(Some(dispatch_thread)),
        }
    }

    /// Queue `bytes` for delivery on `channel`.
    pub fn post(&self, channel: Channel, bytes: &[u8]) -> Result<(), IccomError> {
        self.ensure_running()?;
        check_channel(channel)?;
        if bytes.is_empty() {
            return Err(IccomError::EmptyData);
        }
        self.stats.consumer_bytes_received.fetch_add(bytes.len() as u64, Ordering::Relaxed);
        self.tx_queue.lock().unwrap().append_message(channel, bytes);
        Ok(())
    }

    /// Force a package boundary so a just-posted message doesn't sit
    /// waiting behind a future `post` sharing the same tail package.
    pub fn flush(&self) -> Result<(), IccomError> {
        self.ensure_running()?;
        self.tx_queue.lock().unwrap().enqueue_new_empty();
        Ok(())
    }

    /// Pop the next ready message on `channel`, if any, as `(bytes, id)`.
    pub fn read(&self, channel: Channel) -> Result<Option<(Vec<u8>, u32)>, IccomError> {
        self.ensure_running()?;
        check_channel(channel)?;
        let popped = self.rx_store.pop_first_ready(channel);
        if popped.is_some() {
            self.stats.messages_ready.fetch_sub(1, Ordering::Relaxed);
        }
        Ok(popped.map(|m| (m.bytes, m.id)))
    }

    /// Install (or, passing `None`, clear) the ready-callback for
    /// `channel`, or for every channel with no callback of its own if
    /// `channel` is `None` (the `ANY` sentinel).
    pub fn set_channel_callback(&self, channel: Option<Channel>, callback: Option<Callback>) -> Result<(), IccomError> {
        if let Some(ch) = channel {
            check_channel(ch)?;
        }
        self.rx_store.set_channel_callback(channel, callback);
        Ok(())
    }

    /// Remove the ready-callback for `channel` (or the global fallback if
    /// `channel` is `None`).
    pub fn remove_channel_callback(&self, channel: Option<Channel>) -> Result<(), IccomError> {
        self.set_channel_callback(channel, None)
    }

    /// `true` until [`Engine::close`] has been called.
    pub fn is_running(&self) -> bool {
        !self.closing.load(Ordering::SeqCst)
    }

    /// A point-in-time snapshot of the engine's statistics.
    pub fn stats(&self) -> Snapshot {
        self.stats.snapshot(self.tx_queue.lock().unwrap().depth())
    }

    fn ensure_running(&self) -> Result<(), IccomError> {
        if self.closing.load(Ordering::SeqCst) {
            Err(IccomError::Closing)
        } else {
            Ok(())
        }
    }

    /// Idempotent shutdown: stop serving new API calls, join the transport
    /// thread, then cancel and join the dispatcher.
    pub fn close(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return; // already closing/closed
        }
        if let Some(handle) = self.transport_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
        // Dropping our sender, now that the transport thread (which held
        // the only other clone) has exited, lets the dispatcher's `recv`
        // return an error and the worker loop end.
        self.dispatch_sender.lock().unwrap().take();
        if let Some(handle) = self.dispatch_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_transport_loop<T: SymSpi>(mut transport: T, frame: &mut FrameMachine, closing: &AtomicBool) {
    let mut next = frame.initial_xfer();
    while !closing.load(Ordering::SeqCst) {
        match transport.exchange(&next) {
            Ok(received) => next = frame.on_xfer_done(&received).bytes,
            Err(e) => {
                log::debug!("transport exchange failed: {e:?}");
                next = frame.on_xfer_failed().bytes;
            }
        }
    }
}

/// Re-exported so callers reporting throttled errors from a custom
/// transport can reuse the same governor/report machinery the engine uses
/// internally.
pub use governor::Report;
