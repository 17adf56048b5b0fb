use std::fmt::Debug;
use std::time::{SystemTime, UNIX_EPOCH};

use itertools::izip;
use rand::Rng;
use sha1::{Digest, Sha1};

/// Width in bytes of every identifier and distance in the overlay (160 bits).
pub const ID_LEN: usize = 20;

/// A 160-bit Kademlia identifier: a node id, an infohash, or a XOR distance.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Id(pub [u8; ID_LEN]);

impl Id {
    pub const ZERO: Id = Id([0u8; ID_LEN]);

    pub fn new(bytes: [u8; ID_LEN]) -> Self {
        Id(bytes)
    }

    /// Elementwise XOR, the overlay's distance metric.
    pub fn distance(&self, rhs: &Id) -> Id {
        let mut res = Id::ZERO;
        for (a, b, r) in izip!(&self.0, &rhs.0, &mut res.0) {
            *r = a ^ b;
        }
        res
    }

    /// Interprets the 20 bytes as a big-endian unsigned integer for ordering.
    /// `Id` already derives `Ord` over the byte array, which is equivalent to
    /// big-endian unsigned comparison, but this makes the intent explicit at
    /// call sites that reason about the id as a number (bucket splitting).
    pub fn to_big_uint(&self) -> U161 {
        U161::from_id(self)
    }

    pub fn hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses a 40-character hex string. Any other length, or non-hex content,
    /// yields `None` rather than a partially-decoded id.
    pub fn from_hex(s: &str) -> Option<Id> {
        if s.len() != ID_LEN * 2 {
            return None;
        }
        let mut out = [0u8; ID_LEN];
        hex::decode_to_slice(s, &mut out).ok()?;
        Some(Id(out))
    }

    /// Builds an id from a byte slice of exactly `ID_LEN` bytes. Used at
    /// KRPC decode boundaries, where a peer-supplied id/target/info_hash
    /// field is only a byte string until its length is checked.
    pub fn from_slice(s: &[u8]) -> Option<Id> {
        let bytes: [u8; ID_LEN] = s.try_into().ok()?;
        Some(Id(bytes))
    }

    /// Generates a fresh id. Cryptographic unpredictability is not required
    /// here (ids only steer routing, they authenticate nothing), so a SHA-1
    /// of a high resolution timestamp plus a PRNG draw is sufficient entropy.
    pub fn random() -> Id {
        let mut rng = rand::thread_rng();
        Self::random_with(&mut rng)
    }

    pub fn random_with<R: Rng + ?Sized>(rng: &mut R) -> Id {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();

        let mut hasher = Sha1::new();
        hasher.update(now.as_nanos().to_be_bytes());
        hasher.update(rng.gen::<u64>().to_be_bytes());
        let digest = hasher.finalize();

        let mut out = [0u8; ID_LEN];
        out.copy_from_slice(&digest[..ID_LEN]);
        Id(out)
    }
}

impl Debug for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Id").field(&self.hex()).finish()
    }
}

/// Minimal 161-bit non-negative integer, just wide enough to hold bucket
/// boundaries (`max` can equal 2^160, one bit past the widest id). Only the
/// handful of operations the routing trie needs are implemented.
#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Ord, Debug)]
pub struct U161 {
    /// Bit 160, set only by `U161::TWO_POW_160`.
    high: bool,
    bytes: [u8; ID_LEN],
}

impl U161 {
    pub const ZERO: U161 = U161 { high: false, bytes: [0u8; ID_LEN] };

    pub fn two_pow_160() -> U161 {
        U161 { high: true, bytes: [0u8; ID_LEN] }
    }

    pub fn from_id(id: &Id) -> U161 {
        U161 { high: false, bytes: id.0 }
    }

    /// Truncating conversion back to an `Id`; only valid when `high` is unset,
    /// which holds for every bucket boundary we ever turn back into a
    /// concrete owner comparison (bucket splitting only compares
    /// `to_big_uint`, it never materializes 2^160 as an id).
    pub fn as_id(&self) -> Id {
        Id(self.bytes)
    }

    pub fn midpoint(min: &U161, max: &U161) -> U161 {
        // (min + max) / 2, computed with an explicit carry so the (min+max)
        // overflow into the 161st bit is never lost before the right shift.
        let mut sum = [0u16; ID_LEN];
        let mut carry = 0u16;
        for i in (0..ID_LEN).rev() {
            let s = min.bytes[i] as u16 + max.bytes[i] as u16 + carry;
            sum[i] = s & 0xff;
            carry = s >> 8;
        }
        let top_bit = (min.high as u16) + (max.high as u16) + carry;

        let mut out = [0u8; ID_LEN];
        let mut carry_down = (top_bit & 1) as u16;
        for i in 0..ID_LEN {
            let v = (carry_down << 8) | sum[i];
            out[i] = (v >> 1) as u8;
            carry_down = v & 1;
        }
        U161 { high: false, bytes: out }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn xor_distance_is_symmetric_and_zero_on_diagonal() {
        let a = Id::random();
        let b = Id::random();
        assert_eq!(a.distance(&b), b.distance(&a));
        assert_eq!(a.distance(&a), Id::ZERO);
    }

    #[test_log::test]
    fn xor_distance_identity() {
        let a = Id([1; ID_LEN]);
        let zero = Id::ZERO;
        assert_eq!(a.distance(&a), zero);
        assert_eq!(a.distance(&zero), a);
        assert_eq!(zero.distance(&a), a);
    }

    #[test_log::test]
    fn hex_round_trip() {
        for _ in 0..8 {
            let id = Id::random();
            assert_eq!(Id::from_hex(&id.hex()), Some(id));
        }
    }

    #[test_log::test]
    fn from_hex_rejects_wrong_length() {
        let s39 = "1".repeat(39);
        let s41 = "1".repeat(41);
        assert_eq!(Id::from_hex(&s39), None);
        assert_eq!(Id::from_hex(&s41), None);
    }

    #[test_log::test]
    fn from_hex_accepts_exact_length() {
        let s = "11".repeat(20);
        assert!(Id::from_hex(&s).is_some());
    }

    #[test_log::test]
    fn midpoint_of_full_range_is_half() {
        let min = U161::ZERO;
        let max = U161::two_pow_160();
        let mid = U161::midpoint(&min, &max);
        // 2^160 / 2 == 2^159, i.e. 0x80 followed by 19 zero bytes.
        let mut expected = [0u8; ID_LEN];
        expected[0] = 0x80;
        assert_eq!(mid.as_id(), Id(expected));
    }
}
