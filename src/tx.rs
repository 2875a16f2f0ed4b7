//! Transaction wire format. A serialized transaction is header ‖ input ‖
//! signature, packed back-to-back in the arena, so every accessor works on a
//! raw byte slice at an arbitrary offset.

use tiny_keccak::{Hasher, KangarooTwelve};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

// Wire integers are little-endian and byte-aligned; re-exported so callers
// can build headers without naming zerocopy.
pub use zerocopy::little_endian::{I64, U16, U32};

use crate::config::MAX_TRANSACTION_SIZE;

/// 256-bit KangarooTwelve digest of a serialized transaction.
/// All-zero is the "unoccupied" sentinel and never a real digest.
pub type Digest = [u8; 32];

pub const DIGEST_SIZE: usize = 32;

pub const SIGNATURE_SIZE: usize = 64;

/// Largest allowed transfer amount.
pub const MAX_AMOUNT: i64 = 1_000_000_000_000_000;

/// Fixed transaction prefix. Little-endian, byte-aligned: the arena packs
/// transactions with no padding, so the header must be readable at any offset.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct TxHeader {
    pub source_public_key: [u8; 32],
    pub destination_public_key: [u8; 32],
    pub amount: I64,
    pub tick: U32,
    pub input_type: U16,
    pub input_size: U16,
}

pub const TX_HEADER_SIZE: usize = 80;

const _: () = {
    assert!(core::mem::size_of::<TxHeader>() == TX_HEADER_SIZE);
    assert!(core::mem::align_of::<TxHeader>() == 1);
};

/// Largest input payload that still fits [`MAX_TRANSACTION_SIZE`].
pub const MAX_INPUT_SIZE: usize = MAX_TRANSACTION_SIZE - TX_HEADER_SIZE - SIGNATURE_SIZE;

/// Borrowed view of one serialized transaction.
///
/// The slice must cover exactly `total_size()` bytes; [`TxView::parse`]
/// enforces that before any accessor can run.
#[derive(Debug, Clone, Copy)]
pub struct TxView<'a> {
    header: &'a TxHeader,
    bytes: &'a [u8],
}

impl<'a> TxView<'a> {
    /// Interpret the start of `bytes` as a transaction. Returns `None` if the
    /// slice is too short for the header or the declared total size.
    #[inline]
    pub fn parse(bytes: &'a [u8]) -> Option<Self> {
        let (header, _) = TxHeader::ref_from_prefix(bytes).ok()?;
        let total = TX_HEADER_SIZE + header.input_size.get() as usize + SIGNATURE_SIZE;
        if bytes.len() < total {
            return None;
        }
        Some(Self {
            header,
            bytes: &bytes[..total],
        })
    }

    #[inline(always)]
    pub fn header(&self) -> &'a TxHeader {
        self.header
    }

    #[inline(always)]
    pub fn tick(&self) -> u32 {
        self.header().tick.get()
    }

    #[inline(always)]
    pub fn amount(&self) -> i64 {
        self.header().amount.get()
    }

    #[inline(always)]
    pub fn input_type(&self) -> u16 {
        self.header().input_type.get()
    }

    #[inline(always)]
    pub fn input(&self) -> &'a [u8] {
        let input_size = self.header().input_size.get() as usize;
        &self.bytes[TX_HEADER_SIZE..TX_HEADER_SIZE + input_size]
    }

    #[inline(always)]
    pub fn signature(&self) -> &'a [u8] {
        &self.bytes[self.bytes.len() - SIGNATURE_SIZE..]
    }

    /// Serialized length: header + declared input + signature.
    #[inline(always)]
    pub fn total_size(&self) -> usize {
        self.bytes.len()
    }

    #[inline(always)]
    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Structural validity: amount in range, input within bound. Signature
    /// verification happens upstream of storage.
    #[inline]
    pub fn check_validity(&self) -> bool {
        let header = self.header();
        let amount = header.amount.get();
        amount >= 0 && amount <= MAX_AMOUNT && (header.input_size.get() as usize) <= MAX_INPUT_SIZE
    }

    /// KangarooTwelve-256 over the full serialized bytes.
    pub fn digest(&self) -> Digest {
        let mut k12 = KangarooTwelve::new(b"");
        k12.update(self.bytes);
        let mut out = [0u8; DIGEST_SIZE];
        k12.finalize(&mut out);
        out
    }
}

/// Total serialized size a header describes, without materializing a view.
#[inline(always)]
pub fn total_size_of(header: &TxHeader) -> usize {
    TX_HEADER_SIZE + header.input_size.get() as usize + SIGNATURE_SIZE
}

/// Assemble a serialized transaction. `header.input_size` must match
/// `input.len()`; used by message assembly and tests.
pub fn encode_transaction(header: &TxHeader, input: &[u8], signature: &[u8; SIGNATURE_SIZE]) -> Vec<u8> {
    debug_assert_eq!(header.input_size.get() as usize, input.len());
    let mut bytes = Vec::with_capacity(total_size_of(header));
    bytes.extend_from_slice(header.as_bytes());
    bytes.extend_from_slice(input);
    bytes.extend_from_slice(signature);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tx(tick: u32, amount: i64, input: &[u8]) -> Vec<u8> {
        let header = TxHeader {
            source_public_key: [1u8; 32],
            destination_public_key: [2u8; 32],
            amount: I64::new(amount),
            tick: U32::new(tick),
            input_type: U16::new(0),
            input_size: U16::new(input.len() as u16),
        };
        encode_transaction(&header, input, &[7u8; SIGNATURE_SIZE])
    }

    #[test]
    fn test_parse_roundtrip() {
        let bytes = sample_tx(42, 500, b"hello");
        let tx = TxView::parse(&bytes).unwrap();
        assert_eq!(tx.tick(), 42);
        assert_eq!(tx.amount(), 500);
        assert_eq!(tx.input(), b"hello");
        assert_eq!(tx.signature(), &[7u8; SIGNATURE_SIZE]);
        assert_eq!(tx.total_size(), TX_HEADER_SIZE + 5 + SIGNATURE_SIZE);
        assert!(tx.check_validity());
    }

    #[test]
    fn test_parse_rejects_truncated() {
        let bytes = sample_tx(1, 0, b"payload");
        assert!(TxView::parse(&bytes[..bytes.len() - 1]).is_none());
        assert!(TxView::parse(&bytes[..10]).is_none());
    }

    #[test]
    fn test_parse_at_unaligned_offset() {
        let inner = sample_tx(9, 3, b"abc");
        let mut buf = vec![0u8; 1];
        buf.extend_from_slice(&inner);
        let tx = TxView::parse(&buf[1..]).unwrap();
        assert_eq!(tx.tick(), 9);
    }

    #[test]
    fn test_validity_bounds() {
        let bytes = sample_tx(1, -1, b"");
        assert!(!TxView::parse(&bytes).unwrap().check_validity());

        let bytes = sample_tx(1, MAX_AMOUNT + 1, b"");
        assert!(!TxView::parse(&bytes).unwrap().check_validity());

        let bytes = sample_tx(1, MAX_AMOUNT, b"");
        assert!(TxView::parse(&bytes).unwrap().check_validity());
    }

    #[test]
    fn test_digest_is_stable_and_input_sensitive() {
        let a = sample_tx(5, 10, b"same");
        let b = sample_tx(5, 10, b"same");
        let c = sample_tx(5, 10, b"diff");
        let da = TxView::parse(&a).unwrap().digest();
        let db = TxView::parse(&b).unwrap().digest();
        let dc = TxView::parse(&c).unwrap().digest();
        assert_eq!(da, db);
        assert_ne!(da, dc);
        assert_ne!(da, [0u8; DIGEST_SIZE]);
    }
}
