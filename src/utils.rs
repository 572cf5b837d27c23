use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha1::{Digest, Sha1};
use uuid::Uuid;

pub(crate) const DEFAULT_MAGIC_KEY: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// `base64(SHA-1(challenge || magic))`, used on both sides of the handshake.
pub(crate) fn accept_digest(challenge_key: &str, magic: Option<&[u8]>) -> String {
    let mut hasher = Sha1::new();
    hasher.update(challenge_key.as_bytes());
    hasher.update(magic.unwrap_or(DEFAULT_MAGIC_KEY));
    BASE64_STANDARD.encode(hasher.finalize())
}

/// 16 random bytes, base64 encoded, sent as `Sec-Websocket-Key`.
pub(crate) fn generate_challenge_key() -> String {
    let bytes: [u8; 16] = StdRng::from_rng(rand::thread_rng()).random();
    BASE64_STANDARD.encode(bytes)
}

/// 4 random bytes used as a per-frame masking key.
pub(crate) fn generate_mask_key() -> [u8; 4] {
    StdRng::from_rng(rand::thread_rng()).random()
}

/// Random identity for a freshly accepted connection or an unnamed pool node.
pub(crate) fn generate_id() -> String {
    let buf: [u8; 16] = StdRng::from_rng(rand::thread_rng()).random();
    Uuid::new_v8(buf).to_string()
}

/// XOR `payload` in place with `key`, tiling the key with modular indexing.
/// Symmetric: masking twice with the same key restores the original bytes.
pub(crate) fn xor_mask(payload: &mut [u8], key: &[u8]) {
    if key.is_empty() {
        return;
    }
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i % key.len()];
    }
}

/// Combine a private, connection-wide mask with the per-frame wire key: the effective
/// key is the private bytes XOR-tiled with the wire key tiled to the private length.
/// With no private mask configured, the wire key is used as-is.
pub(crate) fn effective_mask(wire_key: [u8; 4], private: Option<&[u8]>) -> Vec<u8> {
    match private {
        None => wire_key.to_vec(),
        Some(private) => private
            .iter()
            .enumerate()
            .map(|(i, b)| b ^ wire_key[i % 4])
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_round_trip() {
        let key = generate_mask_key();
        let original = b"the quick brown fox".to_vec();
        let mut payload = original.clone();
        xor_mask(&mut payload, &key);
        assert_ne!(payload, original);
        xor_mask(&mut payload, &key);
        assert_eq!(payload, original);
    }

    #[test]
    fn effective_mask_with_no_private_key_is_wire_key() {
        let wire = [1u8, 2, 3, 4];
        assert_eq!(effective_mask(wire, None), wire.to_vec());
    }

    #[test]
    fn effective_mask_tiles_private_key_over_wire_key() {
        let wire = [0xAAu8, 0xBB, 0xCC, 0xDD];
        let private = b"bytes length is times 4!";
        let effective = effective_mask(wire, Some(private));
        assert_eq!(effective.len(), private.len());
        for (i, b) in effective.iter().enumerate() {
            assert_eq!(*b, private[i] ^ wire[i % 4]);
        }
    }

    #[test]
    fn accept_digest_matches_known_rfc6455_example() {
        // From RFC 6455 §1.3.
        let digest = accept_digest("dGhlIHNhbXBsZSBub25jZQ==", None);
        assert_eq!(digest, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }
}
