use instant::Instant;

use crate::config::RoutingConfig;
use crate::contact::{encode_contact, Contact, Status};
use crate::id::{Id, U161, ID_LEN};

/// A contiguous `[min, max)` sub-range of the id space holding at most
/// `bucket_size` contacts.
pub struct Bucket {
    min: U161,
    max: U161,
    contacts: Vec<Contact>,
    last_updated: Instant,
}

impl Bucket {
    fn whole_range() -> Self {
        Bucket {
            min: U161::ZERO,
            max: U161::two_pow_160(),
            contacts: Vec::new(),
            last_updated: Instant::now(),
        }
    }

    fn contains_range(&self, id: &Id) -> bool {
        let v = U161::from_id(id);
        v >= self.min && v < self.max
    }

    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    pub fn range(&self) -> (U161, U161) {
        (self.min, self.max)
    }

    pub fn last_updated(&self) -> Instant {
        self.last_updated
    }

    /// If `contact.id` is already present, refreshes it in place and reports
    /// success; otherwise leaves the bucket untouched.
    fn replace_if_present(&mut self, contact: &Contact) -> bool {
        if let Some(slot) = self.contacts.iter_mut().find(|c| c.id == contact.id) {
            *slot = contact.clone();
            self.last_updated = Instant::now();
            true
        } else {
            false
        }
    }

    fn push(&mut self, contact: Contact) {
        self.contacts.push(contact);
        self.last_updated = Instant::now();
    }
}

fn bit_length(mut x: u8) -> u32 {
    let mut j = 0;
    while x != 0 {
        x >>= 1;
        j += 1;
    }
    j
}

/// A node's routing table: its own id plus an ordered, space-covering list
/// of buckets. Only the positionally-last bucket may ever split, which is
/// what keeps the bucket count bounded by `max_buckets`.
pub struct RoutingTrie {
    owner: Id,
    config: RoutingConfig,
    buckets: Vec<Bucket>,
    size: usize,
}

impl RoutingTrie {
    pub fn new(owner: Id, config: RoutingConfig) -> Self {
        RoutingTrie {
            owner,
            config,
            buckets: vec![Bucket::whole_range()],
            size: 0,
        }
    }

    pub fn owner(&self) -> &Id {
        &self.owner
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn num_buckets(&self) -> usize {
        self.buckets.len()
    }

    pub fn buckets(&self) -> &[Bucket] {
        &self.buckets
    }

    /// Index of the byte at which `id` first differs from `self.owner`
    /// (159 when the ids are identical).
    fn raw_bucket_index(&self, id: &Id) -> usize {
        let mut i = 0;
        while i < ID_LEN && self.owner.0[i] == id.0[i] {
            i += 1;
        }
        if i == ID_LEN {
            return 8 * ID_LEN - 1;
        }
        let x = self.owner.0[i] ^ id.0[i];
        let j = bit_length(x);
        8 * i + (8 - j as usize)
    }

    /// `raw_bucket_index`, clamped to the current bucket list (the last
    /// bucket absorbs every index beyond its own range).
    fn clamped_bucket_index(&self, id: &Id) -> usize {
        let idx = self.raw_bucket_index(id);
        idx.min(self.buckets.len() - 1)
    }

    /// Looks up and, if the table is at capacity for `contact`'s bucket,
    /// splits and retries exactly as far as the source allows (bounded
    /// naturally by `max_buckets`, never by an explicit retry counter).
    pub fn insert(&mut self, contact: Contact) -> bool {
        let idx = self.clamped_bucket_index(&contact.id);

        if self.buckets[idx].replace_if_present(&contact) {
            return true;
        }
        if self.buckets[idx].contacts.len() < self.config.bucket_size {
            self.buckets[idx].push(contact);
            self.size += 1;
            return true;
        }
        if idx == self.buckets.len() - 1 && self.buckets.len() < self.config.max_buckets {
            self.split(idx);
            return self.insert(contact);
        }
        false
    }

    /// Splits bucket `idx` at its midpoint, growing the table by one bucket.
    /// The half containing `owner` keeps the original slot; the other half
    /// is appended to the end of the list (the list is never kept sorted by
    /// range).
    fn split(&mut self, idx: usize) {
        let (min, max) = self.buckets[idx].range();
        let mid = U161::midpoint(&min, &max);
        let owner_num = self.owner.to_big_uint();

        let mut new_bucket = if owner_num >= mid {
            let nb = Bucket {
                min: mid,
                max,
                contacts: Vec::new(),
                last_updated: Instant::now(),
            };
            self.buckets[idx].max = mid;
            nb
        } else {
            let nb = Bucket {
                min,
                max: mid,
                contacts: Vec::new(),
                last_updated: Instant::now(),
            };
            self.buckets[idx].min = mid;
            nb
        };

        let (moved, kept): (Vec<_>, Vec<_>) = self.buckets[idx]
            .contacts
            .drain(..)
            .partition(|c| new_bucket.contains_range(&c.id));
        self.buckets[idx].contacts = kept;
        new_bucket.contacts = moved;

        self.buckets.push(new_bucket);
    }

    /// Collects up to `max_search_results` locally known `Good` contacts
    /// closest to `target`, walking outward from its bucket. Order reflects
    /// traversal, not XOR distance; callers that need distance ordering
    /// sort the result themselves.
    pub fn find_local_closest(&self, target: &Id) -> Vec<Contact> {
        let p = self.clamped_bucket_index(target);
        let limit = self.config.max_search_results;
        let mut result = Vec::new();
        let mut offset = 0usize;

        while offset < self.buckets.len() && result.len() < limit {
            if let Some(i) = p.checked_sub(offset) {
                Self::collect_good(&self.buckets[i], limit, &mut result);
            }
            if offset > 0 {
                let j = p + offset;
                if j < self.buckets.len() {
                    Self::collect_good(&self.buckets[j], limit, &mut result);
                }
            }
            offset += 1;
        }
        result
    }

    fn collect_good(bucket: &Bucket, limit: usize, out: &mut Vec<Contact>) {
        for c in &bucket.contacts {
            if out.len() >= limit {
                break;
            }
            if c.status == Status::Good {
                out.push(c.clone());
            }
        }
    }

    /// Encodes the routing snapshot blob:
    /// `owner_id ‖ payload_len (u32 LE) ‖ concat(encode_contact(c) for c in every bucket)`.
    pub fn encode_snapshot(&self) -> Vec<u8> {
        let mut payload = Vec::new();
        for bucket in &self.buckets {
            for contact in &bucket.contacts {
                encode_contact(&mut payload, contact);
            }
        }
        let mut out = Vec::with_capacity(ID_LEN + 4 + payload.len());
        out.extend_from_slice(&self.owner.0);
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&payload);
        out
    }

    /// Inverse of `encode_snapshot`: returns the owning id and the decoded
    /// contact stream, or `None` if the header is truncated or the declared
    /// length does not fit in the remaining bytes.
    pub fn decode_snapshot(blob: &[u8]) -> Option<(Id, Vec<Contact>)> {
        if blob.len() < ID_LEN + 4 {
            return None;
        }
        let mut owner_bytes = [0u8; ID_LEN];
        owner_bytes.copy_from_slice(&blob[0..ID_LEN]);
        let len = u32::from_le_bytes(blob[ID_LEN..ID_LEN + 4].try_into().ok()?) as usize;
        let payload = blob.get(ID_LEN + 4..ID_LEN + 4 + len)?;
        Some((Id(owner_bytes), crate::contact::decode_contacts(payload)))
    }
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, SocketAddrV4};

    use super::*;

    fn addr(n: u8) -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, n), 6881)
    }

    fn assert_invariants(trie: &RoutingTrie) {
        let mut sum = 0usize;
        let mut cursor = U161::ZERO;
        assert!(trie.num_buckets() <= trie.config.max_buckets);
        for b in &trie.buckets {
            assert_eq!(b.min, cursor, "bucket ranges must be contiguous");
            assert!(b.max > b.min);
            assert!(b.contacts.len() <= trie.config.bucket_size);
            for c in &b.contacts {
                assert!(b.contains_range(&c.id), "contact must lie within its bucket");
            }
            sum += b.contacts.len();
            cursor = b.max;
        }
        assert_eq!(cursor, U161::two_pow_160(), "ranges must cover the whole space");
        assert_eq!(sum, trie.len());
    }

    #[test_log::test]
    fn bucket_round_trip_many_distances() {
        let owner = Id::from_hex("0000000000000000000000000000000011111111").unwrap();
        let mut trie = RoutingTrie::new(owner, RoutingConfig::default());

        let shifted_hexes = [
            "0000000000000000000000000000000000000001",
            "0000000000000000000000000000000000000010",
            "0000000000000000000000000000000000000100",
            "0000000000000000000000000000000000001000",
            "0000000000000000000000000000000000010000",
            "0000000000000000000000000000000000100000",
            "0000000000000000000000000000000001000000",
            "0000000000000000000000000000000010000000",
            "0000000000000000000000000000000011111111",
            "0000000000000000000000000000000100000000",
            "0000000000000000000000000000001000000000",
            "0000000000000000000000000000010000000000",
            "0000000000000000000000000000100000000000",
            "0000000000000000000000000001000000000000",
            "0000000000000000000000000010000000000000",
            "0000000000000000000000000100000000000000",
            "0000000000000000000000001000000000000000",
        ];
        for (i, hex) in shifted_hexes.iter().enumerate() {
            let id = Id::from_hex(hex).expect("valid test id");
            trie.insert(Contact::new(id, addr(i as u8 + 1)));
        }

        assert_invariants(&trie);
        let results = trie.find_local_closest(&owner);
        assert!(results.len() >= 8);
    }

    #[test_log::test]
    fn splitting_accommodates_two_k_random_ids() {
        let owner = Id::random();
        let mut trie = RoutingTrie::new(owner, RoutingConfig::default());

        for i in 0..16u8 {
            trie.insert(Contact::new(Id::random(), addr(i)));
        }

        assert_invariants(&trie);
        assert_eq!(trie.len(), 16);
        assert!(trie.num_buckets() >= 2);
    }

    #[test_log::test]
    fn ninth_far_contact_is_dropped_once_its_bucket_is_no_longer_last() {
        // owner has the top bit set; every id with that bit clear shares the
        // same first differing byte (0) and always maps to bucket 0,
        // regardless of the rest of the id (the XOR's top bit alone decides
        // bit_length). Once a split pushes a "near" bucket in after it,
        // bucket 0 stops being the last bucket and can never split again.
        let mut owner_bytes = [0u8; ID_LEN];
        owner_bytes[0] = 0x80;
        let owner = Id(owner_bytes);
        let mut trie = RoutingTrie::new(owner, RoutingConfig::default());

        for i in 0..9u8 {
            let mut bytes = [0u8; ID_LEN];
            bytes[0] = 0x7f; // top bit clear: opposite half from owner
            bytes[ID_LEN - 1] = i;
            trie.insert(Contact::new(Id(bytes), addr(i)));
        }

        assert_invariants(&trie);
        assert_eq!(trie.num_buckets(), 2);
        assert_eq!(trie.len(), 8, "the 9th far contact must be dropped, not split in");
        assert_eq!(trie.buckets[0].contacts.len(), 8);
    }

    #[test_log::test]
    fn snapshot_round_trips() {
        let owner = Id::random();
        let mut trie = RoutingTrie::new(owner, RoutingConfig::default());
        for i in 0..5u8 {
            trie.insert(Contact::new(Id::random(), addr(i)));
        }
        let blob = trie.encode_snapshot();
        let (decoded_owner, contacts) = RoutingTrie::decode_snapshot(&blob).unwrap();
        assert_eq!(decoded_owner, owner);
        assert_eq!(contacts.len(), trie.len());
    }
}
