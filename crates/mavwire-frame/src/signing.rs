//! v2 frame signing.
//!
//! The signature is the first 6 bytes of
//! `SHA-256(key || header || payload || checksum || link_id || timestamp)`.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{BufMut, BytesMut};
use sha2::{Digest, Sha256};

use crate::codec::{put_header, Frame};

/// 32-byte shared secret.
pub type SigningKey = [u8; 32];

/// 2015-01-01 00:00:00 UTC as a Unix timestamp.
const SIGNATURE_EPOCH_SECS: u64 = 1_420_070_400;

/// Compute the 6-byte signature of `frame` for the given link and timestamp.
///
/// `frame` must already carry its final header flags and checksum.
pub fn compute_signature(key: &SigningKey, frame: &Frame, link_id: u8, timestamp: u64) -> [u8; 6] {
    let mut content = BytesMut::with_capacity(frame.wire_size());
    put_header(frame, &mut content);
    content.put_slice(frame.wire_payload());
    content.put_u16_le(frame.checksum);
    content.put_u8(link_id);
    content.put_uint_le(timestamp & 0xFFFF_FFFF_FFFF, 6);

    let digest = Sha256::new()
        .chain_update(key)
        .chain_update(&content)
        .finalize();
    let mut out = [0u8; 6];
    out.copy_from_slice(&digest[..6]);
    out
}

/// Check the signature carried by `frame`.
pub fn verify(key: &SigningKey, frame: &Frame) -> bool {
    match &frame.signature {
        Some(sig) => compute_signature(key, frame, sig.link_id, sig.timestamp) == sig.signature,
        None => false,
    }
}

/// Current time in signature units (10 µs since 2015-01-01).
pub fn timestamp_now() -> u64 {
    let since_unix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0);
    since_unix.saturating_sub(SIGNATURE_EPOCH_SECS * 1_000_000) / 10
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::codec::{Message, Signature, Version, INCOMPAT_FLAG_SIGNED};

    fn signed_frame(key: &SigningKey) -> Frame {
        let mut frame = Frame {
            version: Version::V2,
            incompat_flags: INCOMPAT_FLAG_SIGNED,
            compat_flags: 0,
            sequence: 1,
            system_id: 1,
            component_id: 1,
            message: Message::new(0, Bytes::from_static(b"payload")),
            checksum: 0,
            signature: None,
        };
        frame.checksum = frame.compute_checksum(50);
        let signature = compute_signature(key, &frame, 3, 1000);
        frame.signature = Some(Signature {
            link_id: 3,
            timestamp: 1000,
            signature,
        });
        frame
    }

    #[test]
    fn signature_verifies_with_same_key() {
        let key = [7u8; 32];
        assert!(verify(&key, &signed_frame(&key)));
    }

    #[test]
    fn signature_rejects_other_key_and_tampering() {
        let key = [7u8; 32];
        let frame = signed_frame(&key);
        assert!(!verify(&[8u8; 32], &frame));

        let mut tampered = frame.clone();
        tampered.sequence = 2;
        assert!(!verify(&key, &tampered));
    }

    #[test]
    fn timestamp_is_after_epoch() {
        // 2024-01-01 is ~2.8e13 ticks after the signature epoch.
        assert!(timestamp_now() > 28_000_000_000_000);
    }
}
