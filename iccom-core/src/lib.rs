//! ICCom: a reliable, multi-channel, message-oriented transport framed
//! atop a symmetric full-duplex byte-exchange link (the kind of link a
//! SymSPI driver provides).
//!
//! This crate is the protocol engine only: the frame/package state
//! machine, the wire formats, the TX queue, the RX reassembly store, CRC
//! integrity, duplicate suppression, the two-phase data+ack xfer cycle,
//! and consumer-notification dispatch. Bring your own transport by
//! implementing [`transport::SymSpi`].
//!
//! Encryption, authentication, per-channel flow control, and message
//! priorities are explicitly out of scope — see the module docs for what
//! each piece actually does.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod crc;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod frame;
pub mod governor;
pub mod package;
pub mod packet;
pub mod rx_store;
pub mod stats;
pub mod transport;
pub mod tx_queue;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::IccomError;
pub use packet::{Channel, MAX_CHANNEL};
pub use rx_store::{Callback, Ownership};
pub use transport::SymSpi;
