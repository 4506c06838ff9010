use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::BytesMut;
use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use mavwire_frame::encode_frame;
use mavwire_node::Event;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    /// Received frames re-encoded to their wire bytes; other events are skipped.
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize, Default)]
struct EventOutput<'a> {
    event: &'static str,
    channel: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sequence: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_id: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    component_id: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    signed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    timestamp: String,
}

impl<'a> EventOutput<'a> {
    fn from_event(event: &'a Event) -> Self {
        let base = Self {
            event: event.name(),
            channel: event.channel().label(),
            timestamp: now_unix_seconds(),
            ..Self::default()
        };
        match event {
            Event::ChannelOpen { .. } | Event::ChannelClose { .. } => base,
            Event::Frame(frame) => Self {
                version: Some(frame.frame.version.number()),
                sequence: Some(frame.frame.sequence),
                system_id: Some(frame.system_id()),
                component_id: Some(frame.component_id()),
                message_id: Some(frame.message().id),
                payload: Some(to_hex(&frame.message().payload)),
                signed: Some(frame.frame.signature.is_some()),
                ..base
            },
            Event::ParseError { error, .. } => Self {
                error: Some(error.to_string()),
                ..base
            },
            Event::StreamRequested {
                system_id,
                component_id,
                ..
            } => Self {
                system_id: Some(*system_id),
                component_id: Some(*component_id),
                ..base
            },
        }
    }

    fn detail(&self) -> String {
        if let Some(error) = &self.error {
            return error.clone();
        }
        self.payload.clone().unwrap_or_default()
    }
}

pub fn print_event(event: &Event, format: OutputFormat) {
    if let OutputFormat::Raw = format {
        if let Event::Frame(frame) = event {
            let mut wire = BytesMut::new();
            if encode_frame(&frame.frame, &mut wire).is_ok() {
                print_raw(&wire);
            }
        }
        return;
    }

    let out = EventOutput::from_event(event);
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["EVENT", "CHANNEL", "SYSTEM", "COMPONENT", "MESSAGE", "DETAIL"])
                .add_row(vec![
                    out.event.to_string(),
                    out.channel.to_string(),
                    optional(out.system_id),
                    optional(out.component_id),
                    optional(out.message_id),
                    out.detail(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let mut line = format!("{} channel={}", out.event, out.channel);
            if let (Some(system), Some(component)) = (out.system_id, out.component_id) {
                line.push_str(&format!(" from={system}/{component}"));
            }
            if let Some(id) = out.message_id {
                line.push_str(&format!(" msg={id} seq={}", out.sequence.unwrap_or(0)));
            }
            let detail = out.detail();
            if !detail.is_empty() {
                line.push_str(&format!(" {detail}"));
            }
            println!("{line}");
        }
        OutputFormat::Raw => {}
    }
}

#[derive(Serialize)]
pub struct SentOutput<'a> {
    pub channel: &'a str,
    pub message_id: u32,
    pub payload_size: usize,
    pub system_id: u8,
    pub component_id: u8,
}

pub fn print_sent(sent: &SentOutput<'_>, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(sent).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_header(vec!["CHANNEL", "MESSAGE", "SIZE", "FROM"])
                .add_row(vec![
                    sent.channel.to_string(),
                    sent.message_id.to_string(),
                    sent.payload_size.to_string(),
                    format!("{}/{}", sent.system_id, sent.component_id),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "sent msg={} size={} on {}",
                sent.message_id, sent.payload_size, sent.channel
            );
        }
        OutputFormat::Raw => {}
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

pub fn to_hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{b:02x}")).collect()
}

fn optional<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_is_lowercase_and_padded() {
        assert_eq!(to_hex(&[0x00, 0x0a, 0xff]), "000aff");
        assert_eq!(to_hex(&[]), "");
    }
}
