//! Provably fair multiplier derivation.
//!
//! Each round's crash target comes from `H = HMAC-SHA256(seed, seed)` where
//! the seed is the previous round's commitment hash, so the hashes form an
//! append-only chain anchored at the configured genesis. The server commits
//! to `H` the moment the previous round settles; the published formula lets
//! any player replay the whole chain and reproduce every historical target.
//!
//! Verification formula: if `int(H, 16) % 33 == 0` the round busts instantly
//! at 1.00x. Otherwise, with `h` the first 13 hex digits of `H` and
//! `E = 2^52`, the target is `min(floor((100·E − h) / (E − h)) / 100,
//! ceiling)`. The ceiling clamp is part of the formula — a clamped round is
//! still reproducible by a verifier, unlike a hidden resample.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// One round in every `INSTANT_CRASH_MODULUS` busts at 1.00x; this is the
/// house edge of the scheme.
const INSTANT_CRASH_MODULUS: u64 = 33;

/// Bits of the digest used as the curve fraction.
const FRACTION_BITS: u32 = 52;

/// Outcome of deriving one round from its seed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Derivation {
    /// Hex digest committing to this round; seed for the next.
    pub commitment_hash: String,
    /// Crash target in multiplier cents, always ≥ 100.
    pub multiplier_cents: u64,
    /// The digest hit the instant-crash modulus.
    pub instant_crash: bool,
    /// The raw target exceeded the ceiling and was clamped.
    pub clamped: bool,
}

/// Deterministic multiplier generator over the commitment chain.
#[derive(Clone, Debug)]
pub struct FairnessChain {
    ceiling_cents: u64,
}

impl FairnessChain {
    pub fn new(max_multiplier: f64) -> Self {
        Self {
            ceiling_cents: (max_multiplier * 100.0).round() as u64,
        }
    }

    /// Derive the next round's commitment hash and crash target from a seed.
    /// Pure: the same seed always yields the same derivation.
    pub fn derive(&self, seed_hash: &str) -> Derivation {
        // HMAC keyed and messaged with the same seed, per the published formula.
        let mut mac = HmacSha256::new_from_slice(seed_hash.as_bytes())
            .expect("hmac accepts keys of any length");
        mac.update(seed_hash.as_bytes());
        let digest = mac.finalize().into_bytes();
        let commitment_hash = hex::encode(&digest);

        // int(H, 16) % 33, folded over the digest bytes.
        let modulus = digest
            .iter()
            .fold(0u64, |acc, &b| (acc * 256 + u64::from(b)) % INSTANT_CRASH_MODULUS);
        if modulus == 0 {
            return Derivation {
                commitment_hash,
                multiplier_cents: 100,
                instant_crash: true,
                clamped: false,
            };
        }

        // First 13 hex digits of the digest: 6 full bytes plus a high nibble.
        let mut h: u64 = 0;
        for &b in &digest[..6] {
            h = (h << 8) | u64::from(b);
        }
        h = (h << 4) | u64::from(digest[6] >> 4);

        let e: u128 = 1 << FRACTION_BITS;
        let raw = (100 * e - u128::from(h)) / (e - u128::from(h));
        let clamped = raw > u128::from(self.ceiling_cents);
        Derivation {
            commitment_hash,
            multiplier_cents: if clamped { self.ceiling_cents } else { raw as u64 },
            instant_crash: false,
            clamped,
        }
    }

    /// Replay a recorded chain from its genesis seed, checking every
    /// (commitment hash, multiplier cents) pair.
    pub fn verify_chain(&self, genesis: &str, rounds: &[(String, u64)]) -> bool {
        let mut seed = genesis.to_string();
        for (hash, cents) in rounds {
            let derived = self.derive(&seed);
            if &derived.commitment_hash != hash || derived.multiplier_cents != *cents {
                return false;
            }
            seed = derived.commitment_hash;
        }
        true
    }
}
