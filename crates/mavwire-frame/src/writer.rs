use std::io::{ErrorKind, Write};

use bytes::BytesMut;

use crate::codec::{encode_frame, Frame, Message, Signature, INCOMPAT_FLAG_SIGNED};
use crate::config::CodecConfig;
use crate::error::{FrameError, Result};
use crate::signing;

const INITIAL_BUFFER_CAPACITY: usize = 512;

/// Writes complete frames to any `Write` stream.
///
/// Messages are stamped with this writer's sequence counter and sender
/// identity, and signed when an output key is configured.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    config: CodecConfig,
    sequence: u8,
    last_timestamp: u64,
}

impl<T: Write> FrameWriter<T> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, CodecConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: T, config: CodecConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
            sequence: 0,
            last_timestamp: 0,
        }
    }

    /// Wrap `message` in a new frame and write it (blocking).
    ///
    /// The message must be part of the dialect: its CRC extra seeds the
    /// checksum.
    pub fn write_message(&mut self, message: &Message) -> Result<()> {
        let desc = self
            .config
            .dialect
            .as_ref()
            .and_then(|dialect| dialect.get(message.id))
            .copied()
            .ok_or(FrameError::UnknownMessage(message.id))?;

        let mut frame = Frame {
            version: self.config.out_version,
            incompat_flags: 0,
            compat_flags: 0,
            sequence: self.sequence,
            system_id: self.config.out_system_id,
            component_id: self.config.out_component_id,
            message: message.clone(),
            checksum: 0,
            signature: None,
        };
        if self.config.out_key.is_some() {
            frame.incompat_flags |= INCOMPAT_FLAG_SIGNED;
        }
        frame.checksum = frame.compute_checksum(desc.crc_extra);

        if let Some(key) = self.config.out_key {
            let link_id = self.config.out_signature_link_id;
            let timestamp = self.next_timestamp();
            frame.signature = Some(Signature {
                link_id,
                timestamp,
                signature: signing::compute_signature(&key, &frame, link_id, timestamp),
            });
        }

        self.write_frame(&frame)?;
        self.sequence = self.sequence.wrapping_add(1);
        Ok(())
    }

    /// Write a complete frame verbatim (blocking).
    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.buf.clear();
        encode_frame(frame, &mut self.buf)?;

        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }

        self.flush()
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    // Signature timestamps must strictly increase per link.
    fn next_timestamp(&mut self) -> u64 {
        let ts = signing::timestamp_now().max(self.last_timestamp + 1);
        self.last_timestamp = ts;
        ts
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current writer configuration.
    pub fn config(&self) -> &CodecConfig {
        &self.config
    }
}
