use std::net::{Ipv4Addr, SocketAddrV4};

use instant::Instant;

use crate::id::{Id, ID_LEN};

/// Wire size of a compact contact: 20-byte id + 4-byte IPv4 + 2-byte port.
pub const CONTACT_LEN: usize = ID_LEN + 6;

/// How trustworthy a routing-table entry currently looks. Only `Good`
/// contacts are offered up by `find_local_closest`.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum Status {
    Good,
    Questionable1,
    Questionable2,
    Bad,
}

/// A remote participant in the overlay.
#[derive(Clone, Debug)]
pub struct Contact {
    pub id: Id,
    pub addr: SocketAddrV4,
    pub status: Status,
    pub last_seen: Instant,
}

impl Contact {
    pub fn new(id: Id, addr: SocketAddrV4) -> Self {
        Contact {
            id,
            addr,
            status: Status::Good,
            last_seen: Instant::now(),
        }
    }

    /// A bootstrap-time placeholder: we know the address of a well-known
    /// router but not its real id, so a random one stands in until the first
    /// reply supplies the authoritative value.
    pub fn synthetic(addr: SocketAddrV4) -> Self {
        Self::new(Id::random(), addr)
    }

    pub fn ip(&self) -> Ipv4Addr {
        *self.addr.ip()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }
}

impl PartialEq for Contact {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for Contact {}

/// Encodes one contact as `id ‖ ip ‖ port` (26 bytes), appending to `out`.
pub fn encode_contact(out: &mut Vec<u8>, c: &Contact) {
    out.extend_from_slice(&c.id.0);
    out.extend_from_slice(&c.ip().octets());
    out.extend_from_slice(&c.port().to_be_bytes());
}

/// Encodes a whole contact list as the concatenated compact stream used for
/// the `nodes` field of `find_node`/`get_peers` responses.
pub fn encode_contacts<'a>(contacts: impl IntoIterator<Item = &'a Contact>) -> Vec<u8> {
    let mut out = Vec::new();
    for c in contacts {
        encode_contact(&mut out, c);
    }
    out
}

/// Decodes a compact contact stream in 26-byte strides. Any trailing bytes
/// shorter than one record are silently discarded rather than treated as
/// an error: KRPC peers are not required to pad.
pub fn decode_contacts(buf: &[u8]) -> Vec<Contact> {
    buf.chunks_exact(CONTACT_LEN)
        .map(|rec| {
            let mut id_bytes = [0u8; ID_LEN];
            id_bytes.copy_from_slice(&rec[0..ID_LEN]);
            let ip = Ipv4Addr::new(rec[ID_LEN], rec[ID_LEN + 1], rec[ID_LEN + 2], rec[ID_LEN + 3]);
            let port = u16::from_be_bytes([rec[ID_LEN + 4], rec[ID_LEN + 5]]);
            Contact::new(Id(id_bytes), SocketAddrV4::new(ip, port))
        })
        .collect()
}

/// Encodes a compact peer address: 4-byte IPv4 + 2-byte port (6 bytes), the
/// `values` entries of a `get_peers` response.
pub fn encode_peer(addr: &SocketAddrV4) -> [u8; 6] {
    let mut out = [0u8; 6];
    out[0..4].copy_from_slice(&addr.ip().octets());
    out[4..6].copy_from_slice(&addr.port().to_be_bytes());
    out
}

pub fn decode_peer(buf: &[u8]) -> Option<SocketAddrV4> {
    if buf.len() != 6 {
        return None;
    }
    let ip = Ipv4Addr::new(buf[0], buf[1], buf[2], buf[3]);
    let port = u16::from_be_bytes([buf[4], buf[5]]);
    Some(SocketAddrV4::new(ip, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_contact(last_octet: u8) -> Contact {
        Contact::new(
            Id::random(),
            SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, last_octet), 6881),
        )
    }

    #[test_log::test]
    fn contact_round_trips_modulo_status_and_last_seen() {
        let originals = vec![sample_contact(1), sample_contact(2), sample_contact(3)];
        let encoded = encode_contacts(&originals);
        let decoded = decode_contacts(&encoded);

        assert_eq!(decoded.len(), originals.len());
        for (a, b) in originals.iter().zip(decoded.iter()) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.addr, b.addr);
            assert_eq!(b.status, Status::Good);
        }
    }

    #[test_log::test]
    fn decode_short_tail_is_dropped() {
        let buf = vec![0u8; CONTACT_LEN - 1];
        assert!(decode_contacts(&buf).is_empty());
    }

    #[test_log::test]
    fn decode_one_past_a_record_yields_one_contact() {
        let buf = vec![0u8; CONTACT_LEN + 1];
        assert_eq!(decode_contacts(&buf).len(), 1);
    }

    #[test_log::test]
    fn peer_address_round_trips() {
        let addr = SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 4242);
        let encoded = encode_peer(&addr);
        assert_eq!(decode_peer(&encoded), Some(addr));
    }
}
