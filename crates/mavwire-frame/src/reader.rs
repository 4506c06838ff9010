use std::io::{ErrorKind, Read};

use bytes::BytesMut;

use crate::codec::{decode_frame, Frame, Version};
use crate::config::CodecConfig;
use crate::error::{FrameError, Result};
use crate::signing;

const INITIAL_BUFFER_CAPACITY: usize = 4 * 1024;
const READ_CHUNK_SIZE: usize = 2 * 1024;

/// Reads complete, validated frames from any `Read` stream.
///
/// Handles partial reads internally; callers always get complete frames.
/// A corrupt frame is consumed and reported as a recoverable error; the
/// next call resumes with the following bytes.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    config: CodecConfig,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, CodecConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: CodecConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Read the next complete frame (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached and
    /// `Err(FrameError::Io)` on transport failure; see
    /// [`FrameError::is_recoverable`] for everything else.
    pub fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = decode_frame(&mut self.buf)? {
                return self.validate(frame);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                return Err(FrameError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    fn validate(&self, mut frame: Frame) -> Result<Frame> {
        let full_len = match &self.config.dialect {
            Some(dialect) => {
                let desc = dialect
                    .get(frame.message.id)
                    .ok_or(FrameError::UnknownMessage(frame.message.id))?;

                let expected = frame.compute_checksum(desc.crc_extra);
                if expected != frame.checksum {
                    return Err(FrameError::Checksum {
                        id: frame.message.id,
                        expected,
                        actual: frame.checksum,
                    });
                }
                usize::from(desc.payload_len)
            }
            None => 0,
        };

        if let Some(key) = &self.config.in_key {
            if frame.version == Version::V1 || frame.signature.is_none() {
                return Err(FrameError::SignatureMissing);
            }
            if !signing::verify(key, &frame) {
                return Err(FrameError::SignatureMismatch);
            }
        }

        // Signatures and checksums cover the wire payload; pad only afterwards.
        if frame.message.payload.len() < full_len {
            let mut padded = BytesMut::from(frame.message.payload.as_ref());
            padded.resize(full_len, 0);
            frame.message.payload = padded.freeze();
        }

        Ok(frame)
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current reader configuration.
    pub fn config(&self) -> &CodecConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::Arc;

    use bytes::BytesMut;

    use super::*;
    use crate::codec::{encode_frame, Message};
    use crate::dialect::{Dialect, HEARTBEAT};
    use crate::writer::FrameWriter;

    fn config() -> CodecConfig {
        CodecConfig {
            dialect: Some(Arc::new(Dialect::minimal())),
            out_system_id: 1,
            out_component_id: 1,
            ..CodecConfig::default()
        }
    }

    fn wire_of(messages: &[Message], cfg: CodecConfig) -> Vec<u8> {
        let mut writer = FrameWriter::with_config(Vec::new(), cfg);
        for msg in messages {
            writer.write_message(msg).unwrap();
        }
        writer.into_inner()
    }

    fn heartbeat(tag: u8) -> Message {
        Message::new(0, vec![tag, 0, 0, 0, 2, 3, 81, 4, 3])
    }

    #[test]
    fn read_single_frame() {
        let wire = wire_of(&[heartbeat(1)], config());
        let mut reader = FrameReader::with_config(Cursor::new(wire), config());

        let frame = reader.read_frame().unwrap();
        assert_eq!(frame.message, heartbeat(1));
        assert_eq!(frame.system_id, 1);
    }

    #[test]
    fn truncated_payload_is_padded_back() {
        let short = Message::new(0, vec![5, 0, 0, 0, 0, 0, 0, 0, 0]);
        let wire = wire_of(&[short.clone()], config());
        assert_eq!(wire[1], 1, "v2 payload should be truncated on the wire");

        let mut reader = FrameReader::with_config(Cursor::new(wire), config());
        let frame = reader.read_frame().unwrap();
        assert_eq!(frame.message, short);
    }

    #[test]
    fn bad_checksum_is_recoverable_and_skipped() {
        let mut wire = wire_of(&[heartbeat(1)], config());
        let crc_at = wire.len() - 2;
        wire[crc_at] ^= 0xFF;
        wire.extend(wire_of(&[heartbeat(2)], config()));

        let mut reader = FrameReader::with_config(Cursor::new(wire), config());
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::Checksum { id: 0, .. }));
        assert!(err.is_recoverable());

        let frame = reader.read_frame().unwrap();
        assert_eq!(frame.message, heartbeat(2));
    }

    #[test]
    fn unknown_message_is_reported() {
        let mut frame = Frame {
            version: Version::V2,
            incompat_flags: 0,
            compat_flags: 0,
            sequence: 0,
            system_id: 1,
            component_id: 1,
            message: Message::new(9999, vec![1u8]),
            checksum: 0,
            signature: None,
        };
        frame.checksum = frame.compute_checksum(0);
        let mut wire = BytesMut::new();
        encode_frame(&frame, &mut wire).unwrap();

        let mut reader = FrameReader::with_config(Cursor::new(wire.to_vec()), config());
        assert!(matches!(
            reader.read_frame(),
            Err(FrameError::UnknownMessage(9999))
        ));
    }

    #[test]
    fn no_dialect_skips_checksum() {
        let mut wire = wire_of(&[heartbeat(1)], config());
        let crc_at = wire.len() - 2;
        wire[crc_at] ^= 0xFF;

        let mut reader = FrameReader::new(Cursor::new(wire));
        let frame = reader.read_frame().unwrap();
        assert_eq!(frame.message.id, HEARTBEAT.id);
    }

    #[test]
    fn signed_frames_verify() {
        let key = [0x42; 32];
        let cfg = CodecConfig {
            in_key: Some(key),
            out_key: Some(key),
            out_signature_link_id: 9,
            ..config()
        };
        let wire = wire_of(&[heartbeat(1), heartbeat(2)], cfg.clone());

        let mut reader = FrameReader::with_config(Cursor::new(wire), cfg);
        let first = reader.read_frame().unwrap();
        let second = reader.read_frame().unwrap();
        assert_eq!(first.signature.map(|s| s.link_id), Some(9));
        assert!(second.signature.unwrap().timestamp > first.signature.unwrap().timestamp);
    }

    #[test]
    fn unsigned_frame_rejected_when_key_required() {
        let wire = wire_of(&[heartbeat(1)], config());
        let cfg = CodecConfig {
            in_key: Some([1; 32]),
            ..config()
        };
        let mut reader = FrameReader::with_config(Cursor::new(wire), cfg);
        assert!(matches!(
            reader.read_frame(),
            Err(FrameError::SignatureMissing)
        ));
    }

    #[test]
    fn wrong_key_is_mismatch() {
        let cfg_out = CodecConfig {
            out_key: Some([1; 32]),
            ..config()
        };
        let wire = wire_of(&[heartbeat(1)], cfg_out);
        let cfg_in = CodecConfig {
            in_key: Some([2; 32]),
            ..config()
        };
        let mut reader = FrameReader::with_config(Cursor::new(wire), cfg_in);
        assert!(matches!(
            reader.read_frame(),
            Err(FrameError::SignatureMismatch)
        ));
    }

    #[test]
    fn connection_closed_cleanly() {
        let mut reader = FrameReader::new(Cursor::new(Vec::<u8>::new()));
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn connection_closed_mid_frame() {
        let wire = wire_of(&[heartbeat(1)], config());
        let mut reader =
            FrameReader::with_config(Cursor::new(wire[..wire.len() - 3].to_vec()), config());
        assert!(matches!(
            reader.read_frame(),
            Err(FrameError::ConnectionClosed)
        ));
    }

    #[test]
    fn partial_read_handling() {
        let wire = wire_of(&[heartbeat(4)], config());
        let byte_reader = ByteByByteReader {
            bytes: wire,
            pos: 0,
        };
        let mut reader = FrameReader::with_config(byte_reader, config());

        let frame = reader.read_frame().unwrap();
        assert_eq!(frame.message, heartbeat(4));
    }

    #[derive(Debug)]
    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    #[test]
    fn interrupted_read_retries() {
        let wire = wire_of(&[heartbeat(8)], config());
        let reader = InterruptedThenData {
            interrupted: false,
            inner: Cursor::new(wire),
        };
        let mut framed = FrameReader::with_config(reader, config());
        assert_eq!(framed.read_frame().unwrap().message, heartbeat(8));
    }

    struct InterruptedThenData {
        interrupted: bool,
        inner: Cursor<Vec<u8>>,
    }

    impl Read for InterruptedThenData {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            self.inner.read(buf)
        }
    }

    #[test]
    fn roundtrip_over_socket_pair() {
        let (left, right) = std::os::unix::net::UnixStream::pair().unwrap();
        let (_, mut writer) = config().build(std::io::empty(), left).unwrap();
        let (mut reader, _) = config().build(right, std::io::sink()).unwrap();

        for tag in 0..16u8 {
            writer.write_message(&heartbeat(tag + 1)).unwrap();
        }
        for tag in 0..16u8 {
            let frame = reader.read_frame().unwrap();
            assert_eq!(frame.message, heartbeat(tag + 1));
            assert_eq!(frame.sequence, tag);
        }
    }
}
