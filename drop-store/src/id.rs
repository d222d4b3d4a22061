//! Content-derived short identifiers.
//!
//! The compressed payload hash seeds a deterministic generator, so the same bytes
//! always land under the same identifier.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::ObjectId;

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

const FNV_OFFSET: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

fn fnv1a32(input: &str) -> u32 {
    input.bytes().fold(FNV_OFFSET, |hash, byte| {
        (hash ^ u32::from(byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Derive an identifier of `length` lowercase alphanumerics from a content hash
pub fn derive_identifier(hash: &str, length: usize) -> ObjectId {
    let mut rng = ChaCha8Rng::seed_from_u64(u64::from(fnv1a32(hash)));
    let id: String = (0..length)
        .map(|_| char::from(ALPHABET[rng.gen_range(0..ALPHABET.len())]))
        .collect();
    ObjectId(id)
}
