//! Pluggable transport layer.
//!
//! Implement [`SymSpi`] over a real symmetric full-duplex link (a SymSPI
//! driver, a loopback pair for tests, anything that can exchange a fixed
//! number of bytes both ways at once) to drive an [`crate::engine::Engine`].
//!
//! Unlike a plain byte-stream `Transport` (send + recv as separate calls,
//! the shape `layer-mtproto`'s transport trait uses), a symmetric SPI link
//! exchanges bytes in both directions in the same physical operation —
//! there is no way to send without also receiving. [`SymSpi::exchange`]
//! models that atomically: every call both transmits `out` and returns
//! whatever the peer transmitted back.

use std::fmt;

/// A symmetric full-duplex byte-exchange transport.
///
/// `out.len()` tells the implementation which half-frame is being sent
/// (data-xfer size or ack-xfer size); the returned buffer must be the same
/// length.
pub trait SymSpi: Send {
    /// The error type returned when an exchange fails at the transport level.
    type Error: fmt::Debug + Send + 'static;

    /// Exchange `out.len()` bytes with the peer, returning what the peer sent back.
    fn exchange(&mut self, out: &[u8]) -> Result<Vec<u8>, Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal loopback pair used by unit tests elsewhere in this crate:
    /// whatever is written to `inbox` is returned by the next `exchange`.
    pub struct LoopbackHalf {
        pub inbox: Vec<u8>,
    }

    impl SymSpi for LoopbackHalf {
        type Error = std::convert::Infallible;
        fn exchange(&mut self, _out: &[u8]) -> Result<Vec<u8>, Self::Error> {
            Ok(std::mem::take(&mut self.inbox))
        }
    }

    #[test]
    fn loopback_half_returns_preloaded_inbox() {
        let mut half = LoopbackHalf { inbox: vec![1, 2, 3] };
        let got = half.exchange(&[0, 0, 0]).unwrap();
        assert_eq!(got, vec![1, 2, 3]);
        // drained after one exchange
        assert_eq!(half.exchange(&[0, 0, 0]).unwrap(), Vec::<u8>::new());
    }
}
