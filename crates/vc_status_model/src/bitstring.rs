//! Fixed-length bit array with a stable, round-trip-exact encoding.
//!
//! `spec.md` §4.1 leaves the encoding opaque to the core so long as it is
//! stable; this implementation uses base64(zlib(bits)), the same shape real
//! Bitstring Status List / StatusList2021 credentials use on the wire.

use std::fmt;

use base64::{
    engine::general_purpose::STANDARD_NO_PAD,
    Engine,
};
use bitvec::{
    order::Lsb0,
    vec::BitVec,
};
use flate2::{
    read::ZlibDecoder,
    write::ZlibEncoder,
    Compression,
};
use std::io::{
    Read,
    Write,
};

#[derive(Clone, PartialEq, Eq)]
pub struct Bitstring {
    bits: BitVec<u8, Lsb0>,
}

impl fmt::Debug for Bitstring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bitstring")
            .field("len", &self.bits.len())
            .field("popcount", &self.popcount())
            .finish()
    }
}

impl Bitstring {
    pub fn new(length: usize) -> Self {
        Self {
            bits: BitVec::repeat(false, length),
        }
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn get(&self, i: usize) -> bool {
        self.bits[i]
    }

    pub fn set(&mut self, i: usize, v: bool) {
        self.bits.set(i, v);
    }

    /// Number of set bits. Recomputed from scratch rather than cached, so any
    /// reader can independently verify `assignedBlockCount`.
    pub fn popcount(&self) -> usize {
        self.bits.count_ones()
    }

    /// First unassigned (`false`) index at or after `from`, if any.
    pub fn next_unset(&self, from: usize) -> Option<usize> {
        (from..self.bits.len()).find(|&i| !self.bits[i])
    }

    pub fn encode(&self) -> String {
        let bytes = self.bits.clone().into_vec();
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&bytes)
            .expect("writing to an in-memory buffer cannot fail");
        let compressed = encoder
            .finish()
            .expect("finishing an in-memory zlib stream cannot fail");
        STANDARD_NO_PAD.encode(compressed)
    }

    pub fn decode(s: &str, length: usize) -> anyhow::Result<Self> {
        let compressed = STANDARD_NO_PAD
            .decode(s)
            .map_err(|e| anyhow::anyhow!("invalid base64 in bitstring: {e}"))?;
        let mut decoder = ZlibDecoder::new(&compressed[..]);
        let mut bytes = Vec::new();
        decoder
            .read_to_end(&mut bytes)
            .map_err(|e| anyhow::anyhow!("invalid zlib stream in bitstring: {e}"))?;
        let mut bits = BitVec::<u8, Lsb0>::from_vec(bytes);
        anyhow::ensure!(
            bits.len() >= length,
            "decoded bitstring shorter than expected length {length}"
        );
        bits.truncate(length);
        Ok(Self { bits })
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn new_is_all_zero() {
        let bs = Bitstring::new(64);
        assert_eq!(bs.popcount(), 0);
        for i in 0..64 {
            assert!(!bs.get(i));
        }
    }

    #[test]
    fn set_and_get_roundtrip() {
        let mut bs = Bitstring::new(16);
        bs.set(3, true);
        bs.set(15, true);
        assert!(bs.get(3));
        assert!(bs.get(15));
        assert!(!bs.get(0));
        assert_eq!(bs.popcount(), 2);
    }

    #[test]
    fn next_unset_finds_first_gap() {
        let mut bs = Bitstring::new(8);
        bs.set(0, true);
        bs.set(1, true);
        assert_eq!(bs.next_unset(0), Some(2));
        bs.set(2, true);
        bs.set(3, true);
        bs.set(4, true);
        bs.set(5, true);
        bs.set(6, true);
        bs.set(7, true);
        assert_eq!(bs.next_unset(0), None);
    }

    proptest! {
        #[test]
        fn encode_decode_roundtrips(len in 8usize..=4096, sets in prop::collection::vec(0usize..4096, 0..64)) {
            let len = (len / 8) * 8;
            prop_assume!(len > 0);
            let mut bs = Bitstring::new(len);
            for i in sets {
                if i < len {
                    bs.set(i, true);
                }
            }
            let encoded = bs.encode();
            let decoded = Bitstring::decode(&encoded, len).unwrap();
            prop_assert_eq!(bs, decoded);
        }
    }
}
