//! Package codec: the fixed-size frame exchanged during a data half-xfer.
//!
//! ```text
//! [ payload_length: u16 BE ] [ id: u8 ] [ payload bytes ... ] [ fill = 0xFF ... ] [ crc32: u32 LE ]
//! ```
//!
//! `payload_length` must be `<= frame_size - OVERHEAD`. Unused payload
//! bytes between the declared payload and the CRC trailer must be `0xFF`.
//! The CRC32 (see [`crate::crc`]) covers every byte before the trailer.

use crate::crc::crc32;

/// Header (length + id) plus trailer (CRC32) overhead outside the payload area.
pub const OVERHEAD: usize = 2 + 1 + 4;

/// Fill byte written into unused payload space.
pub const FILL_BYTE: u8 = 0xFF;

/// Positive acknowledgement value for a one-byte ack xfer.
pub const ACK_BYTE: u8 = 0xD0;

/// Negative acknowledgement value for a one-byte ack xfer.
pub const NACK_BYTE: u8 = 0xE1;

/// A fixed-size package buffer. Owns its bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    buf: Vec<u8>,
}

/// Outcome of [`Package::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validation {
    /// The frame is structurally sound; carries the declared payload length.
    Valid(usize),
    /// The frame failed a length, fill, or CRC check.
    Invalid,
}

impl Package {
    /// Capacity of the payload area for a package of `frame_size` bytes.
    pub fn capacity(frame_size: usize) -> usize {
        frame_size.saturating_sub(OVERHEAD)
    }

    /// Allocate a finalized, empty package: `payload_length = 0`, the given
    /// `id`, payload area filled with `0xFF`, CRC computed.
    pub fn init_empty(id: u8, frame_size: usize) -> Self {
        let mut pkg = Self { buf: vec![0u8; frame_size] };
        pkg.set_payload_length_unchecked(0);
        pkg.buf[2] = id;
        for b in &mut pkg.buf[3..frame_size - 4] {
            *b = FILL_BYTE;
        }
        pkg.write_crc();
        pkg
    }

    fn frame_size(&self) -> usize {
        self.buf.len()
    }

    fn set_payload_length_unchecked(&mut self, len: u16) {
        self.buf[0..2].copy_from_slice(&len.to_be_bytes());
    }

    /// Overwrite the declared payload length field.
    pub fn set_payload_length(&mut self, len: usize) {
        self.set_payload_length_unchecked(len as u16);
    }

    /// Read back the declared payload length. `ok` is false if the stored
    /// value exceeds this package's payload capacity.
    pub fn get_payload_length(&self) -> (usize, bool) {
        let len = u16::from_be_bytes([self.buf[0], self.buf[1]]) as usize;
        let ok = len <= Self::capacity(self.frame_size());
        (len, ok)
    }

    /// The package's id field (non-zero, wraps).
    pub fn id(&self) -> u8 {
        self.buf[2]
    }

    /// Bytes free between the current payload end and the CRC trailer.
    pub fn free_space_bytes(&self) -> usize {
        let (len, ok) = self.get_payload_length();
        if !ok {
            return 0;
        }
        Self::capacity(self.frame_size()) - len
    }

    /// Mutable view of the free payload area (for writing new packets into it).
    pub fn free_space_mut(&mut self) -> &mut [u8] {
        let (len, _) = self.get_payload_length();
        let start = 3 + len;
        let end = self.frame_size() - 4;
        &mut self.buf[start..end]
    }

    /// Read-only view of the declared payload bytes.
    pub fn payload(&self) -> &[u8] {
        let (len, _) = self.get_payload_length();
        &self.buf[3..3 + len]
    }

    /// Write `src` into the free payload area and advance the declared
    /// payload length. Returns the number of bytes actually written (may be
    /// less than `src.len()` if there isn't enough room; 0 if none at all).
    /// Caller must call [`Package::finalize`] afterwards.
    pub fn append_raw(&mut self, src: &[u8]) -> usize {
        let free = self.free_space_bytes();
        let n = free.min(src.len());
        if n == 0 {
            return 0;
        }
        let (len, _) = self.get_payload_length();
        self.buf[3 + len..3 + len + n].copy_from_slice(&src[..n]);
        self.set_payload_length(len + n);
        n
    }

    /// Advance the declared payload length by `n` without copying — used
    /// when the caller already wrote bytes directly via
    /// [`Package::free_space_mut`].
    pub fn commit_written(&mut self, n: usize) {
        let (len, _) = self.get_payload_length();
        self.set_payload_length(len + n);
    }

    /// Reset this package in place to an empty, finalized state carrying a
    /// new id — reuses the existing buffer instead of allocating one.
    pub fn reset_empty(&mut self, id: u8) {
        let frame_size = self.frame_size();
        self.set_payload_length_unchecked(0);
        self.buf[2] = id;
        for b in &mut self.buf[3..frame_size - 4] {
            *b = FILL_BYTE;
        }
        self.write_crc();
    }

    fn write_crc(&mut self) {
        let end = self.frame_size() - 4;
        let crc = crc32(&self.buf[..end]);
        self.buf[end..].copy_from_slice(&crc.to_le_bytes());
    }

    /// Fill remaining free bytes with `0xFF` and recompute the CRC.
    pub fn finalize(&mut self) {
        let (len, _) = self.get_payload_length();
        let fill_start = 3 + len;
        let fill_end = self.frame_size() - 4;
        for b in &mut self.buf[fill_start..fill_end] {
            *b = FILL_BYTE;
        }
        self.write_crc();
    }

    /// Raw bytes of this package, ready to hand to the transport.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Validate a raw received data-xfer frame without mutating it.
    pub fn validate(frame: &[u8]) -> Validation {
        if frame.len() < OVERHEAD {
            return Validation::Invalid;
        }
        let len = u16::from_be_bytes([frame[0], frame[1]]) as usize;
        let capacity = Self::capacity(frame.len());
        if len > capacity {
            return Validation::Invalid;
        }
        let fill_start = 3 + len;
        let fill_end = frame.len() - 4;
        if frame[fill_start..fill_end].iter().any(|&b| b != FILL_BYTE) {
            return Validation::Invalid;
        }
        let stored_crc = u32::from_le_bytes(frame[fill_end..].try_into().unwrap());
        if crc32(&frame[..fill_end]) != stored_crc {
            return Validation::Invalid;
        }
        Validation::Valid(len)
    }

    /// Reconstruct a `Package` from a validated raw frame (for tests and
    /// for the frame state machine once it has already validated the bytes).
    pub fn from_validated(frame: &[u8]) -> Self {
        Self { buf: frame.to_vec() }
    }

    /// True iff `frame` is a single-byte ack-xfer frame carrying [`ACK_BYTE`].
    pub fn is_ack(frame: &[u8], ack_xfer_size: usize) -> bool {
        frame.len() == ack_xfer_size && frame.first() == Some(&ACK_BYTE)
    }

    /// Build the raw bytes of an ack-xfer frame.
    pub fn ack_frame(ack_xfer_size: usize) -> Vec<u8> {
        let mut buf = vec![FILL_BYTE; ack_xfer_size];
        buf[0] = ACK_BYTE;
        buf
    }

    /// Build the raw bytes of a nack-xfer frame.
    pub fn nack_frame(ack_xfer_size: usize) -> Vec<u8> {
        let mut buf = vec![FILL_BYTE; ack_xfer_size];
        buf[0] = NACK_BYTE;
        buf
    }
}
