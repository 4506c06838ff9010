use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mavwire_frame::Dialect;
use mavwire_node::{Event, HeartbeatConfig, Node, NodeConfig, StreamRequestConfig};
use tracing::info;

use crate::cmd::{parse_duration, parse_key, server_endpoint, ListenArgs};
use crate::exit::{node_error, CliError, CliResult, SUCCESS};
use crate::output::{print_event, OutputFormat};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

pub fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let heartbeat = args
        .heartbeat
        .as_deref()
        .map(parse_duration)
        .transpose()?
        .map(|period| HeartbeatConfig {
            period,
            ..HeartbeatConfig::default()
        });
    let in_key = args.signing_key.as_deref().map(parse_key).transpose()?;
    let endpoint = server_endpoint(&args.addr)?;

    let node = Node::new(NodeConfig {
        endpoints: vec![endpoint],
        dialect: (!args.unchecked).then(|| Arc::new(Dialect::minimal())),
        in_key,
        out_system_id: args.system_id,
        heartbeat,
        stream_request: args.stream_requests.then(|| StreamRequestConfig {
            frequency: args.stream_frequency,
            ..StreamRequestConfig::default()
        }),
        ..NodeConfig::default()
    })
    .map_err(|err| node_error("node start failed", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut frames = 0usize;
    while running.load(Ordering::SeqCst) {
        let Some(event) = node.recv_event_timeout(POLL_INTERVAL) else {
            continue;
        };

        if let (Event::Frame(frame), Some(ids)) = (&event, &args.msg_ids) {
            if !ids.contains(&frame.message().id) {
                continue;
            }
        }
        print_event(&event, format);

        if let Event::Frame(_) = event {
            frames = frames.saturating_add(1);
            if args.count.is_some_and(|count| frames >= count) {
                break;
            }
        }
    }

    info!(frames, "shutting down");
    node.close();
    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| {
        CliError::new(
            crate::exit::INTERNAL,
            format!("signal handler setup failed: {err}"),
        )
    })
}
