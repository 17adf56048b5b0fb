use std::net::Ipv4Addr;
use std::time::{SystemTime, UNIX_EPOCH};

use instant::Instant;
use rand::RngCore;
use sha1::{Digest, Sha1};

/// A short-lived secret used to mint `get_peers` tokens without having to
/// remember one per contact: a token's validity is tied to the secret
/// generation it was minted from, not to any per-contact bookkeeping. The
/// `started_at` wall-clock timestamp is folded into every token minted from
/// this generation, so "wall time" is part of the hash without making
/// validation depend on the exact instant a given token was minted.
#[derive(Clone, Copy)]
struct Secret {
    bytes: [u8; 20],
    started_at_secs: u64,
}

impl Secret {
    fn random() -> Self {
        let mut bytes = [0u8; 20];
        rand::thread_rng().fill_bytes(&mut bytes);
        let started_at_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        Secret { bytes, started_at_secs }
    }
}

/// Mints and validates `get_peers`/`announce_peer` tokens. Keeps the
/// current and previous secret generation so a token minted just before a
/// rotation is still accepted.
pub struct TokenAuthority {
    current: Secret,
    previous: Secret,
    rotated_at: Instant,
}

impl TokenAuthority {
    pub fn new() -> Self {
        let current = Secret::random();
        TokenAuthority {
            current,
            previous: current,
            rotated_at: Instant::now(),
        }
    }

    /// Call on the updater's periodic rotation tick.
    pub fn rotate(&mut self) {
        self.previous = self.current;
        self.current = Secret::random();
        self.rotated_at = Instant::now();
    }

    pub fn rotated_at(&self) -> Instant {
        self.rotated_at
    }

    /// `sha1(ip ‖ wall_time_of_generation ‖ secret)`, hex-encoded. The
    /// wall-time component is the generation's own start time rather than
    /// the instant of minting, so every token minted from the same
    /// generation hashes identically and validation can recompute it later.
    fn mint_with(secret: &Secret, ip: Ipv4Addr) -> String {
        let mut hasher = Sha1::new();
        hasher.update(ip.octets());
        hasher.update(secret.started_at_secs.to_be_bytes());
        hasher.update(secret.bytes);
        hex::encode(hasher.finalize())
    }

    pub fn mint(&self, ip: Ipv4Addr) -> String {
        Self::mint_with(&self.current, ip)
    }

    /// A token is valid for `ip` if it matches either generation's mint for
    /// that ip. Tokens are time-sensitive only through secret rotation;
    /// validation recomputes against both known generations.
    pub fn validate(&self, token: &str, ip: Ipv4Addr) -> bool {
        token == Self::mint_with(&self.current, ip) || token == Self::mint_with(&self.previous, ip)
    }
}

impl Default for TokenAuthority {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn token_bound_to_source_ip() {
        let auth = TokenAuthority::new();
        let token = auth.mint(Ipv4Addr::new(10, 0, 0, 1));
        assert!(auth.validate(&token, Ipv4Addr::new(10, 0, 0, 1)));
        assert!(!auth.validate(&token, Ipv4Addr::new(10, 0, 0, 2)));
    }

    #[test_log::test]
    fn token_survives_one_rotation() {
        let mut auth = TokenAuthority::new();
        let ip = Ipv4Addr::new(10, 0, 0, 1);
        let token = auth.mint(ip);
        auth.rotate();
        assert!(auth.validate(&token, ip));
        auth.rotate();
        assert!(!auth.validate(&token, ip));
    }

    #[test_log::test]
    fn garbage_token_rejected() {
        let auth = TokenAuthority::new();
        assert!(!auth.validate("not-a-real-token", Ipv4Addr::new(10, 0, 0, 1)));
    }
}
