use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;

use crate::codec::Version;
use crate::dialect::Dialect;
use crate::error::{FrameError, Result};
use crate::reader::FrameReader;
use crate::signing::SigningKey;
use crate::writer::FrameWriter;

/// Configuration for one codec instance (a reader/writer pair on a stream).
#[derive(Clone)]
pub struct CodecConfig {
    /// Message table used to verify checksums and encode messages.
    pub dialect: Option<Arc<Dialect>>,
    /// Key that incoming frames must be signed with.
    pub in_key: Option<SigningKey>,
    /// Version of outgoing frames.
    pub out_version: Version,
    /// System id stamped on outgoing messages. Must be non-zero.
    pub out_system_id: u8,
    /// Component id stamped on outgoing messages.
    pub out_component_id: u8,
    /// Link id placed in outgoing signatures.
    pub out_signature_link_id: u8,
    /// Key used to sign outgoing frames (v2 only).
    pub out_key: Option<SigningKey>,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            dialect: None,
            in_key: None,
            out_version: Version::V2,
            out_system_id: 255,
            out_component_id: 1,
            out_signature_link_id: 0,
            out_key: None,
        }
    }
}

impl CodecConfig {
    /// Reject configurations no codec can honor.
    pub fn validate(&self) -> Result<()> {
        if self.out_system_id == 0 {
            return Err(FrameError::InvalidConfig(
                "out_system_id must be between 1 and 255".to_string(),
            ));
        }
        if self.out_key.is_some() && self.out_version == Version::V1 {
            return Err(FrameError::InvalidConfig(
                "signing requires v2 output".to_string(),
            ));
        }
        Ok(())
    }

    /// Validate and bind a reader/writer pair to the two stream halves.
    pub fn build<R: Read, W: Write>(
        &self,
        reader: R,
        writer: W,
    ) -> Result<(FrameReader<R>, FrameWriter<W>)> {
        self.validate()?;
        Ok((
            FrameReader::with_config(reader, self.clone()),
            FrameWriter::with_config(writer, self.clone()),
        ))
    }
}

impl fmt::Debug for CodecConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecConfig")
            .field("dialect_messages", &self.dialect.as_ref().map(|d| d.len()))
            .field("in_key", &self.in_key.as_ref().map(|_| "<redacted>"))
            .field("out_version", &self.out_version)
            .field("out_system_id", &self.out_system_id)
            .field("out_component_id", &self.out_component_id)
            .field("out_signature_link_id", &self.out_signature_link_id)
            .field("out_key", &self.out_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
