//! Frame state machine: alternates between a data half-xfer and an ack
//! half-xfer on the underlying transport, handling peer ACK/NACK, local
//! CRC verdicts, and duplicate suppression.

use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::governor::{log_report, ErrorGovernor, ErrorKind};
use crate::package::{Package, Validation};
use crate::packet;
use crate::rx_store::RxStore;
use crate::stats::Stats;
use crate::tx_queue::TxQueue;

/// Which half-frame is expected next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Expecting/sending a data-xfer sized frame.
    Data,
    /// Expecting/sending an ack-xfer sized frame.
    Ack,
}

/// What the frame state machine wants the transport to do next.
pub struct NextXfer {
    /// Bytes to send for the next half-xfer.
    pub bytes: Vec<u8>,
    /// Whether the caller should start that xfer without waiting for an
    /// external trigger (spec.md §4.6's `start_immediately`).
    pub start_immediately: bool,
}

/// Drives the data/ack half-frame cycle. Owned exclusively by the
/// transport callback context — per spec.md §5, this context never
/// reenters, so `FrameMachine` needs no internal locking of its own state
/// (`stage`, `last_rx_id`, the governor); it only locks the structures it
/// shares with the consumer and dispatcher contexts.
pub struct FrameMachine {
    stage: Stage,
    last_rx_id: Option<u8>,
    ack_xfer_size: usize,
    tx_queue: Arc<Mutex<TxQueue>>,
    rx_store: Arc<RxStore>,
    stats: Arc<Stats>,
    governor: ErrorGovernor,
    dispatch_tx: Sender<()>,
    epoch: Instant,
}

impl FrameMachine {
    /// Build a frame machine in its initial `DataStage`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ack_xfer_size: usize,
        tx_queue: Arc<Mutex<TxQueue>>,
        rx_store: Arc<RxStore>,
        stats: Arc<Stats>,
        governor: ErrorGovernor,
        dispatch_tx: Sender<()>,
    ) -> Self {
        Self {
            stage: Stage::Data,
            last_rx_id: None,
            ack_xfer_size,
            tx_queue,
            rx_store,
            stats,
            governor,
            dispatch_tx,
            epoch: Instant::now(),
        }
    }

    /// The bytes to use for the very first xfer (always a data xfer: the
    /// queue's head package).
    pub fn initial_xfer(&self) -> Vec<u8> {
        self.tx_queue.lock().unwrap().head_bytes_for_dispatch()
    }

    /// Current stage, for statistics/tests.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn record(&mut self, kind: ErrorKind) {
        if let Some(report) = self.governor.record_event(kind, self.now_ms()) {
            log_report(&report);
        }
    }

    /// Parse every packet out of `pkg`'s payload and apply each to the RX
    /// store. Stops cleanly when the payload window is exhausted; any
    /// leftover that can't form a full packet is a parse error and the
    /// caller must roll back everything this call touched.
    fn apply_package(&self, pkg: &Package) -> Result<(), ()> {
        let mut remaining = pkg.payload();
        while !remaining.is_empty() {
            let (p, consumed) = packet::parse(remaining).map_err(|_| ())?;

            let msg_id = match self.rx_store.last_unfinalized_id(p.channel) {
                Some(id) => id,
                None => self.rx_store.create_message_in_channel(p.channel),
            };
            self.rx_store
                .append_to_message(p.channel, msg_id, p.payload, p.complete)
                .map_err(|_| ())?;

            self.stats.packets_received_ok.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            remaining = &remaining[consumed..];
        }
        Ok(())
    }

    /// Handle a completed xfer (`received` is what the peer sent back).
    /// Returns the next xfer to perform.
    pub fn on_xfer_done(&mut self, received: &[u8]) -> NextXfer {
        self.stats.xfer_count.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.stats.xfer_bytes.fetch_add(received.len() as u64, std::sync::atomic::Ordering::Relaxed);

        match self.stage {
            Stage::Data => self.on_data_xfer_done(received),
            Stage::Ack => self.on_ack_xfer_done(received),
        }
    }

    fn on_data_xfer_done(&mut self, received: &[u8]) -> NextXfer {
        self.stats.packages_xfered.fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        let verdict = Package::validate(received);
        let Validation::Valid(_) = verdict else {
            self.stats.packages_bad.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            self.record(ErrorKind::BadDataReceived);
            self.stage = Stage::Ack;
            return NextXfer { bytes: Package::nack_frame(self.ack_xfer_size), start_immediately: true };
        };

        let pkg = Package::from_validated(received);

        if Some(pkg.id()) == self.last_rx_id {
            self.stats.packages_duplicated.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            self.record(ErrorKind::DuplicatedReceived);
            self.stage = Stage::Ack;
            return NextXfer { bytes: Package::ack_frame(self.ack_xfer_size), start_immediately: true };
        }

        if self.apply_package(&pkg).is_err() {
            self.rx_store.rollback_all();
            self.stats.packages_parse_failed.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            self.record(ErrorKind::ParsingFailed);
            self.stage = Stage::Ack;
            return NextXfer { bytes: Package::nack_frame(self.ack_xfer_size), start_immediately: true };
        }

        let newly_finalized = self.rx_store.commit_all();
        self.last_rx_id = Some(pkg.id());
        self.stats.packages_ok.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        if newly_finalized > 0 {
            self.stats.messages_received_ok.fetch_add(newly_finalized as u64, std::sync::atomic::Ordering::Relaxed);
            self.stats.messages_ready.fetch_add(newly_finalized as u64, std::sync::atomic::Ordering::Relaxed);
            let _ = self.dispatch_tx.send(());
        }
        self.stage = Stage::Ack;
        NextXfer { bytes: Package::ack_frame(self.ack_xfer_size), start_immediately: true }
    }

    fn on_ack_xfer_done(&mut self, received: &[u8]) -> NextXfer {
        let positive = Package::is_ack(received, self.ack_xfer_size);
        let mut queue = self.tx_queue.lock().unwrap();
        let start_immediately = if positive {
            queue.advance_on_ack()
        } else {
            true
        };
        let bytes = queue.head_bytes_for_dispatch();
        drop(queue);
        self.stage = Stage::Data;
        NextXfer { bytes, start_immediately }
    }

    /// Handle a transport-level failure: record it, force a NACK, and
    /// align back up with the peer on the ack half.
    pub fn on_xfer_failed(&mut self) -> NextXfer {
        self.stats.packages_failed.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.record(ErrorKind::TransportFault);
        self.stage = Stage::Ack;
        NextXfer { bytes: Package::nack_frame(self.ack_xfer_size), start_immediately: true }
    }
}
