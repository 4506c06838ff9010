use std::sync::Arc;
use std::time::{Duration, Instant};

use mavwire_frame::{
    Dialect, Message, MessageDescriptor, Version, HEARTBEAT, MAX_PAYLOAD_LEN, REQUEST_DATA_STREAM,
};
use mavwire_node::{Channel, Event, Node, NodeConfig};
use mavwire_transport::{CustomEndpoint, Endpoint};

use crate::cmd::{client_endpoint, parse_duration, parse_hex, parse_key, SendArgs};
use crate::exit::{
    frame_error, node_error, transport_error, CliError, CliResult, DATA_INVALID, FAILURE,
    SUCCESS, TIMEOUT, USAGE,
};
use crate::output::{print_sent, OutputFormat, SentOutput};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let payload = parse_hex(&args.payload)?;
    let dialect = dialect_for(args.msg_id, args.crc_extra, payload.len())?;
    let out_key = args.signing_key.as_deref().map(parse_key).transpose()?;

    // Connect up front so a refused connection fails fast instead of timing out.
    let client = client_endpoint(&args.addr)?;
    let (label, stream) = client
        .accept()
        .map_err(|err| transport_error("connect failed", err))?
        .ok_or_else(|| CliError::new(FAILURE, "connect failed: no stream"))?;
    let endpoint: Arc<dyn Endpoint> = Arc::new(CustomEndpoint::new(label, stream));

    let node = Node::new(NodeConfig {
        endpoints: vec![endpoint],
        dialect: Some(Arc::new(dialect)),
        out_version: if args.v1 { Version::V1 } else { Version::V2 },
        out_system_id: args.system_id,
        out_component_id: args.component_id,
        out_key,
        event_capacity: 16,
        ..NodeConfig::default()
    })
    .map_err(|err| node_error("node start failed", err))?;

    let channel = wait_for_open(&node, timeout)?;
    let message = Message::new(args.msg_id, payload);
    node.write_message_to(&channel, &message)
        .map_err(|err| node_error("send failed", err))?;

    print_sent(
        &SentOutput {
            channel: channel.label(),
            message_id: message.id,
            payload_size: message.payload.len(),
            system_id: args.system_id,
            component_id: args.component_id,
        },
        format,
    );

    node.close();
    Ok(SUCCESS)
}

fn wait_for_open(node: &Node, timeout: Duration) -> CliResult<Arc<Channel>> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(CliError::new(
                TIMEOUT,
                format!("channel did not open within {timeout:?}"),
            ));
        }
        match node.recv_event_timeout(remaining) {
            Some(Event::ChannelOpen { channel }) => return Ok(channel),
            Some(Event::ChannelClose { channel }) => {
                return Err(CliError::new(
                    FAILURE,
                    format!("channel {channel} closed before sending"),
                ))
            }
            Some(_) | None => continue,
        }
    }
}

/// Built-in dialect, extended with the target message when `crc_extra` is given.
fn dialect_for(msg_id: u32, crc_extra: Option<u8>, payload_len: usize) -> CliResult<Dialect> {
    if payload_len > MAX_PAYLOAD_LEN {
        return Err(CliError::new(
            DATA_INVALID,
            format!("payload is {payload_len} bytes, at most {MAX_PAYLOAD_LEN} allowed"),
        ));
    }

    let builtin = [HEARTBEAT, REQUEST_DATA_STREAM];
    let Some(crc_extra) = crc_extra else {
        if builtin.iter().any(|desc| desc.id == msg_id) {
            return Ok(Dialect::minimal());
        }
        return Err(CliError::new(
            USAGE,
            format!("message {msg_id} is not built in; pass --crc-extra"),
        ));
    };

    let custom = MessageDescriptor {
        id: msg_id,
        name: "custom",
        crc_extra,
        payload_len: payload_len as u8,
    };
    Dialect::new(builtin.into_iter().chain([custom]))
        .map_err(|err| frame_error("invalid message", err))
}
