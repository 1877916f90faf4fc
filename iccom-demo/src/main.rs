//! In-memory ICCom demo.
//!
//! # What this does
//!
//! 1. Build an in-memory `SymSpiPair` — there's no real SymSPI hardware
//!    here, so two [`Loopback`] halves hand each other's data-xfer/ack-xfer
//!    buffers back and forth synchronously instead.
//! 2. Spin up two [`iccom_core::Engine`]s, A and B, one per half.
//! 3. Post a few messages on a couple of channels from each side.
//! 4. Read them back on the other side and print a short transcript, plus
//!    each side's statistics.
//!
//! # Run
//! ```
//! cargo run -p iccom-demo
//! ```

use std::sync::mpsc::{self, Receiver, RecvError, Sender};
use std::time::{Duration, Instant};

use iccom_core::transport::SymSpi;
use iccom_core::{Engine, EngineConfig};

const DATA_XFER_SIZE: usize = 64;
const ACK_XFER_SIZE: usize = 1;

/// One half of an in-memory full-duplex pair: every `exchange` hands its
/// outgoing bytes to the peer and blocks for the peer's next outgoing bytes.
struct Loopback {
    to_peer: Sender<Vec<u8>>,
    from_peer: Receiver<Vec<u8>>,
}

impl SymSpi for Loopback {
    type Error = RecvError;
    fn exchange(&mut self, out: &[u8]) -> Result<Vec<u8>, Self::Error> {
        let _ = self.to_peer.send(out.to_vec());
        self.from_peer.recv()
    }
}

fn loopback_pair() -> (Loopback, Loopback) {
    let (a_to_b, b_from_a) = mpsc::channel();
    let (b_to_a, a_from_b) = mpsc::channel();
    (
        Loopback { to_peer: a_to_b, from_peer: a_from_b },
        Loopback { to_peer: b_to_a, from_peer: b_from_a },
    )
}

fn wait_for<T>(deadline: Instant, mut poll: impl FnMut() -> Option<T>) -> T {
    loop {
        if let Some(v) = poll() {
            return v;
        }
        assert!(Instant::now() < deadline, "timed out waiting for a message");
        std::thread::sleep(Duration::from_millis(2));
    }
}

fn main() {
    env_logger::init();

    let (half_a, half_b) = loopback_pair();
    let engine_a = Engine::init(EngineConfig::new(DATA_XFER_SIZE, ACK_XFER_SIZE), half_a);
    let engine_b = Engine::init(EngineConfig::new(DATA_XFER_SIZE, ACK_XFER_SIZE), half_b);

    println!("ICCom demo: two engines over an in-memory loopback link");

    // A -> B on channel 5, a short message that fits in one packet.
    engine_a.post(5, b"hello from A").expect("post");
    // A -> B on channel 6, long enough to fragment across packages.
    let long_message: Vec<u8> = (0..120u16).map(|b| b as u8).collect();
    engine_a.post(6, &long_message).expect("post");
    // B -> A on channel 9.
    engine_b.post(9, b"ack from B").expect("post");

    let deadline = Instant::now() + Duration::from_secs(5);

    let (bytes, id) = wait_for(deadline, || engine_b.read(5).unwrap());
    println!("B received on channel 5 (msg #{id}): {:?}", String::from_utf8_lossy(&bytes));

    let (bytes, id) = wait_for(deadline, || engine_b.read(6).unwrap());
    println!("B received on channel 6 (msg #{id}, {} bytes): matches={}", bytes.len(), bytes == long_message);

    let (bytes, id) = wait_for(deadline, || engine_a.read(9).unwrap());
    println!("A received on channel 9 (msg #{id}): {:?}", String::from_utf8_lossy(&bytes));

    println!("\n--- engine A ---\n{}", engine_a.stats());
    println!("\n--- engine B ---\n{}", engine_b.stats());

    engine_a.close();
    engine_b.close();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_pair_exchanges_both_directions() {
        let (mut a, mut b) = loopback_pair();
        let handle = std::thread::spawn(move || a.exchange(&[1, 2, 3]).unwrap());
        let from_a = b.exchange(&[4, 5, 6]).unwrap();
        assert_eq!(from_a, vec![1, 2, 3]);
        assert_eq!(handle.join().unwrap(), vec![4, 5, 6]);
    }
}
