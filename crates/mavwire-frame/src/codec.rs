use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Start-of-frame marker for v1 frames.
pub const MAGIC_V1: u8 = 0xFE;
/// Start-of-frame marker for v2 frames.
pub const MAGIC_V2: u8 = 0xFD;

/// v1 header: magic, length, sequence, system, component, message id.
pub const HEADER_LEN_V1: usize = 6;
/// v2 header: magic, length, incompat, compat, sequence, system, component, message id (3B).
pub const HEADER_LEN_V2: usize = 10;
pub const CHECKSUM_LEN: usize = 2;
/// Link id (1) + timestamp (6) + signature (6).
pub const SIGNATURE_LEN: usize = 13;
/// Largest payload a frame can carry (the length field is one byte).
pub const MAX_PAYLOAD_LEN: usize = 255;

/// v2 incompatibility flag: the frame carries a signature.
pub const INCOMPAT_FLAG_SIGNED: u8 = 0x01;

/// Wire protocol version of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Version {
    V1,
    V2,
}

impl Version {
    /// The number written into HEARTBEAT `mavlink_version`-style fields.
    pub fn number(self) -> u8 {
        match self {
            Version::V1 => 1,
            Version::V2 => 2,
        }
    }
}

/// A decoded application message: id plus raw field bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: u32,
    pub payload: Bytes,
}

impl Message {
    pub fn new(id: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            id,
            payload: payload.into(),
        }
    }
}

/// v2 frame signature block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    pub link_id: u8,
    /// 10 µs ticks since 2015-01-01 00:00:00 UTC (48 bits on the wire).
    pub timestamp: u64,
    pub signature: [u8; 6],
}

/// One wire-protocol unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub version: Version,
    pub incompat_flags: u8,
    pub compat_flags: u8,
    pub sequence: u8,
    pub system_id: u8,
    pub component_id: u8,
    pub message: Message,
    pub checksum: u16,
    pub signature: Option<Signature>,
}

impl Frame {
    /// The total wire size of this frame.
    pub fn wire_size(&self) -> usize {
        let header = match self.version {
            Version::V1 => HEADER_LEN_V1,
            Version::V2 => HEADER_LEN_V2,
        };
        let signature = if self.signature.is_some() {
            SIGNATURE_LEN
        } else {
            0
        };
        header + self.wire_payload().len() + CHECKSUM_LEN + signature
    }

    /// Payload bytes as serialized.
    ///
    /// v2 frames never carry trailing zero bytes on the wire (one byte is
    /// always kept), so a frame whose payload was zero-padded after decoding
    /// encodes, checksums and signs exactly like the frame it came from.
    pub fn wire_payload(&self) -> &[u8] {
        let payload = self.message.payload.as_ref();
        match self.version {
            Version::V1 => payload,
            Version::V2 => {
                let keep = payload
                    .iter()
                    .rposition(|&b| b != 0)
                    .map_or(1, |last| last + 1)
                    .min(payload.len());
                &payload[..keep]
            }
        }
    }

    /// Checksum over header (without magic), payload and `crc_extra`.
    pub fn compute_checksum(&self, crc_extra: u8) -> u16 {
        let mut header = BytesMut::with_capacity(HEADER_LEN_V2);
        put_header(self, &mut header);

        let mut crc = 0xFFFF;
        for &byte in header[1..].iter().chain(self.wire_payload()) {
            crc = crc_accumulate(crc, byte);
        }
        crc_accumulate(crc, crc_extra)
    }
}

/// Fold one byte into a CRC-16/MCRF4XX accumulator (initial value `0xFFFF`).
pub fn crc_accumulate(crc: u16, byte: u8) -> u16 {
    let mut tmp = byte ^ (crc & 0xFF) as u8;
    tmp ^= tmp << 4;
    let tmp = u16::from(tmp);
    (crc >> 8) ^ (tmp << 8) ^ (tmp << 3) ^ (tmp >> 4)
}

pub(crate) fn put_header(frame: &Frame, dst: &mut BytesMut) {
    let len = frame.wire_payload().len() as u8;
    match frame.version {
        Version::V1 => {
            dst.put_u8(MAGIC_V1);
            dst.put_u8(len);
            dst.put_u8(frame.sequence);
            dst.put_u8(frame.system_id);
            dst.put_u8(frame.component_id);
            dst.put_u8(frame.message.id as u8);
        }
        Version::V2 => {
            dst.put_u8(MAGIC_V2);
            dst.put_u8(len);
            dst.put_u8(frame.incompat_flags);
            dst.put_u8(frame.compat_flags);
            dst.put_u8(frame.sequence);
            dst.put_u8(frame.system_id);
            dst.put_u8(frame.component_id);
            dst.put_uint_le(u64::from(frame.message.id), 3);
        }
    }
}

/// Encode a frame into the wire format, as-is.
///
/// Checksum and signature are written from the frame fields; nothing is
/// recomputed here.
pub fn encode_frame(frame: &Frame, dst: &mut BytesMut) -> Result<()> {
    let size = frame.wire_payload().len();
    if size > MAX_PAYLOAD_LEN {
        return Err(FrameError::PayloadTooLarge {
            size,
            max: MAX_PAYLOAD_LEN,
        });
    }
    match frame.version {
        Version::V1 if frame.message.id > 0xFF => {
            return Err(FrameError::MessageIdOutOfRange(frame.message.id));
        }
        Version::V2 if frame.message.id > 0x00FF_FFFF => {
            return Err(FrameError::MessageIdOutOfRange(frame.message.id));
        }
        _ => {}
    }

    dst.reserve(frame.wire_size());
    put_header(frame, dst);
    dst.put_slice(frame.wire_payload());
    dst.put_u16_le(frame.checksum);
    if let (Version::V2, Some(sig)) = (frame.version, &frame.signature) {
        dst.put_u8(sig.link_id);
        dst.put_uint_le(sig.timestamp & 0xFFFF_FFFF_FFFF, 6);
        dst.put_slice(&sig.signature);
    }
    Ok(())
}

/// Split one frame off the front of `src`.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// Leading bytes that cannot start a frame are consumed and reported as a
/// single [`FrameError::InvalidMagic`]. Checksums and signatures are not
/// verified here.
pub fn decode_frame(src: &mut BytesMut) -> Result<Option<Frame>> {
    if src.is_empty() {
        return Ok(None);
    }

    if src[0] != MAGIC_V1 && src[0] != MAGIC_V2 {
        let skipped = src
            .iter()
            .position(|&b| b == MAGIC_V1 || b == MAGIC_V2)
            .unwrap_or(src.len());
        src.advance(skipped);
        return Err(FrameError::InvalidMagic { skipped });
    }

    let version = if src[0] == MAGIC_V1 {
        Version::V1
    } else {
        Version::V2
    };
    let header_len = match version {
        Version::V1 => HEADER_LEN_V1,
        Version::V2 => HEADER_LEN_V2,
    };
    if src.len() < header_len {
        return Ok(None); // Need more data
    }

    let payload_len = usize::from(src[1]);
    let signed = version == Version::V2 && src[2] & INCOMPAT_FLAG_SIGNED != 0;
    let total = header_len + payload_len + CHECKSUM_LEN + if signed { SIGNATURE_LEN } else { 0 };
    if src.len() < total {
        return Ok(None); // Need more data
    }

    let mut raw = src.split_to(total);
    raw.advance(2);
    let (incompat_flags, compat_flags) = match version {
        Version::V1 => (0, 0),
        Version::V2 => (raw.get_u8(), raw.get_u8()),
    };
    let sequence = raw.get_u8();
    let system_id = raw.get_u8();
    let component_id = raw.get_u8();
    let id = match version {
        Version::V1 => u32::from(raw.get_u8()),
        Version::V2 => raw.get_uint_le(3) as u32,
    };
    let payload = raw.split_to(payload_len).freeze();
    let checksum = raw.get_u16_le();
    let signature = if signed {
        let link_id = raw.get_u8();
        let timestamp = raw.get_uint_le(6);
        let mut signature = [0u8; 6];
        raw.copy_to_slice(&mut signature);
        Some(Signature {
            link_id,
            timestamp,
            signature,
        })
    } else {
        None
    };

    if incompat_flags & !INCOMPAT_FLAG_SIGNED != 0 {
        return Err(FrameError::UnsupportedIncompatFlags(incompat_flags));
    }

    Ok(Some(Frame {
        version,
        incompat_flags,
        compat_flags,
        sequence,
        system_id,
        component_id,
        message: Message { id, payload },
        checksum,
        signature,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(version: Version, id: u32, payload: &'static [u8]) -> Frame {
        let mut frame = Frame {
            version,
            incompat_flags: 0,
            compat_flags: 0,
            sequence: 7,
            system_id: 1,
            component_id: 200,
            message: Message::new(id, Bytes::from_static(payload)),
            checksum: 0,
            signature: None,
        };
        frame.checksum = frame.compute_checksum(50);
        frame
    }

    #[test]
    fn crc_matches_mcrf4xx_check_value() {
        let crc = b"123456789"
            .iter()
            .fold(0xFFFF, |crc, &b| crc_accumulate(crc, b));
        assert_eq!(crc, 0x6F91);
    }

    #[test]
    fn test_encode_decode_v2() {
        let frame = sample(Version::V2, 0x01_0203, b"hello");
        let mut buf = BytesMut::new();
        encode_frame(&frame, &mut buf).unwrap();
        assert_eq!(buf.len(), frame.wire_size());
        assert_eq!(&buf[7..10], &[0x03, 0x02, 0x01]);

        let decoded = decode_frame(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, frame);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_encode_decode_v1() {
        let frame = sample(Version::V1, 0, b"\x01\x02\x03");
        let mut buf = BytesMut::new();
        encode_frame(&frame, &mut buf).unwrap();
        assert_eq!(buf[0], MAGIC_V1);
        assert_eq!(buf.len(), HEADER_LEN_V1 + 3 + CHECKSUM_LEN);

        let decoded = decode_frame(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_decode_incomplete_frame() {
        let frame = sample(Version::V2, 0, b"abc");
        let mut full = BytesMut::new();
        encode_frame(&frame, &mut full).unwrap();

        let mut partial = BytesMut::from(&full[..full.len() - 1]);
        assert!(decode_frame(&mut partial).unwrap().is_none());
        assert_eq!(partial.len(), full.len() - 1, "nothing consumed");
    }

    #[test]
    fn test_decode_skips_garbage_once() {
        let frame = sample(Version::V2, 0, b"abc");
        let mut buf = BytesMut::from(&[0x00, 0x11, 0x22][..]);
        encode_frame(&frame, &mut buf).unwrap();

        let err = decode_frame(&mut buf).unwrap_err();
        assert!(matches!(err, FrameError::InvalidMagic { skipped: 3 }));
        assert_eq!(decode_frame(&mut buf).unwrap().unwrap(), frame);
    }

    #[test]
    fn test_signed_frame_layout() {
        let mut frame = sample(Version::V2, 0, b"abc");
        frame.incompat_flags = INCOMPAT_FLAG_SIGNED;
        frame.signature = Some(Signature {
            link_id: 4,
            timestamp: 0x0000_0102_0304_0506,
            signature: [9; 6],
        });
        let mut buf = BytesMut::new();
        encode_frame(&frame, &mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_LEN_V2 + 3 + CHECKSUM_LEN + SIGNATURE_LEN);

        let decoded = decode_frame(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.signature, frame.signature);
    }

    #[test]
    fn test_unknown_incompat_flags_consume_frame() {
        let mut frame = sample(Version::V2, 0, b"abc");
        frame.incompat_flags = 0x80;
        let mut buf = BytesMut::new();
        encode_frame(&frame, &mut buf).unwrap();

        let err = decode_frame(&mut buf).unwrap_err();
        assert!(matches!(err, FrameError::UnsupportedIncompatFlags(0x80)));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_v2_wire_payload_drops_trailing_zeros() {
        let padded = sample(Version::V2, 0, b"\x05\x00\x07\x00\x00");
        assert_eq!(padded.wire_payload(), b"\x05\x00\x07");

        let mut trimmed = padded.clone();
        trimmed.message.payload = Bytes::from_static(b"\x05\x00\x07");
        assert_eq!(padded.compute_checksum(50), trimmed.compute_checksum(50));

        let mut a = BytesMut::new();
        let mut b = BytesMut::new();
        encode_frame(&padded, &mut a).unwrap();
        encode_frame(&trimmed, &mut b).unwrap();
        assert_eq!(a, b);

        assert_eq!(sample(Version::V2, 0, b"\x00\x00").wire_payload(), b"\x00");
        assert_eq!(sample(Version::V2, 0, b"").wire_payload(), b"");
        assert_eq!(sample(Version::V1, 0, b"\x01\x00").wire_payload(), b"\x01\x00");
    }

    #[test]
    fn test_encode_rejects_oversize_and_wide_ids() {
        let mut buf = BytesMut::new();
        let mut frame = sample(Version::V2, 0, b"");
        frame.message.payload = Bytes::from(vec![1u8; 256]);
        assert!(matches!(
            encode_frame(&frame, &mut buf),
            Err(FrameError::PayloadTooLarge { size: 256, .. })
        ));

        let frame = sample(Version::V1, 300, b"x");
        assert!(matches!(
            encode_frame(&frame, &mut buf),
            Err(FrameError::MessageIdOutOfRange(300))
        ));
    }
}
