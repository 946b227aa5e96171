//! Command line client for a coordination service.
//!
//! Opens one session through the zk session engine, runs a single command
//! against it and prints every watcher event and reply that comes back.

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use zk_session::{
    ChannelConsumer, ClientConnection, ConnectionState, Delivery, EventType, Packet, Request,
};
use zk_wire::{ErrorCode, ExistsRequest, ExistsResponse, GetDataRequest, GetDataResponse, OpCode};

mod config;
mod logging;

use config::{parse_auth, CliConfig};
use logging::ZkLogFormatter;

/// Coordination service client driving a single session
#[derive(Parser, Debug)]
#[command(name = "zk-client", version, about = "Coordination service session client")]
struct Args {
    /// Connect string, e.g. 127.0.0.1:2181,127.0.0.1:2182/app
    #[arg(long)]
    servers: Option<String>,

    /// Configuration file path
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Requested session timeout, e.g. 30s
    #[arg(long)]
    session_timeout: Option<humantime::Duration>,

    /// Credential as scheme:credential (repeatable)
    #[arg(long)]
    auth: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect and keep the session alive
    Ping {
        /// How long to stay connected, e.g. 10s
        #[arg(long, default_value = "10s")]
        duration: humantime::Duration,
    },
    /// Read a node's data
    Get {
        path: String,
        /// Leave a data watch and wait for it to fire
        #[arg(long)]
        watch: bool,
    },
    /// Check whether a node exists
    Exists {
        path: String,
        /// Leave an exists watch and wait for it to fire
        #[arg(long)]
        watch: bool,
    },
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::new("warn")
        .add_directive(format!("zk_client={}", args.log_level).parse()?)
        .add_directive(format!("zk_session={}", args.log_level).parse()?)
        .add_directive(format!("zk_wire={}", args.log_level).parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .event_format(ZkLogFormatter::new("zk-client"))
        .init();

    info!("Starting zk client v{}", env!("CARGO_PKG_VERSION"));

    let mut cli_config = CliConfig::load_from_file(&args.config)?;
    if let Some(servers) = &args.servers {
        cli_config.servers = servers.clone();
        // a connect string given on the command line carries its own chroot
        cli_config.chroot = None;
    }
    if let Some(timeout) = args.session_timeout {
        cli_config.session_timeout_ms = Duration::from(timeout).as_millis() as u64;
    }
    for entry in &args.auth {
        parse_auth(entry)?;
        cli_config.auth.push(entry.clone());
    }

    let config = cli_config.to_client_config()?;
    let chroot = config.chroot.clone();
    let session_timeout = config.session_timeout;

    let (consumer, mut deliveries) = ChannelConsumer::new();
    let conn = ClientConnection::new(config, Arc::new(consumer))
        .context("failed to create client connection")?;
    conn.start();

    let outcome = match wait_connected(&conn, session_timeout).await {
        Ok(()) => run_command(&conn, &mut deliveries, args.command, chroot.as_deref()).await,
        Err(e) => Err(e),
    };

    conn.close().await;
    // completions produced by close itself
    while let Ok(delivery) = deliveries.try_recv() {
        print_delivery(&delivery);
    }

    let stats = conn.stats();
    info!(
        "Session closed: frames sent={} received={} bytes sent={} received={} connect attempts={}",
        stats.frames_sent,
        stats.frames_received,
        stats.bytes_sent,
        stats.bytes_received,
        stats.connect_attempts
    );

    outcome
}

async fn wait_connected(conn: &ClientConnection, limit: Duration) -> anyhow::Result<()> {
    let mut state_rx = conn.subscribe_state();
    let reached = *tokio::time::timeout(
        limit,
        state_rx.wait_for(|state| *state == ConnectionState::Connected || !state.is_alive()),
    )
    .await
    .map_err(|_| anyhow!("no server reachable within {:?}", limit))?
    .map_err(|_| anyhow!("connection task stopped"))?;

    if reached != ConnectionState::Connected {
        return Err(anyhow!("session ended in state {}", reached));
    }

    crate::component_info!(
        "cli",
        "Connected with session 0x{:x}, negotiated timeout {:?}",
        conn.session_id(),
        conn.negotiated_timeout().unwrap_or_default()
    );
    Ok(())
}

async fn run_command(
    conn: &ClientConnection,
    deliveries: &mut UnboundedReceiver<Delivery>,
    command: Command,
    chroot: Option<&str>,
) -> anyhow::Result<()> {
    let (request, watch, is_exists) = match command {
        Command::Ping { duration } => return keep_alive(conn, deliveries, duration.into()).await,
        Command::Get { path, watch } => {
            let server_path = server_path(chroot, &path)?;
            let request = Request::new(OpCode::GetData)
                .with_record(GetDataRequest {
                    path: server_path.clone(),
                    watch,
                })
                .with_response(GetDataResponse::default())
                .with_paths(path, server_path);
            (request, watch, false)
        }
        Command::Exists { path, watch } => {
            let server_path = server_path(chroot, &path)?;
            let request = Request::new(OpCode::Exists)
                .with_record(ExistsRequest {
                    path: server_path.clone(),
                    watch,
                })
                .with_response(ExistsResponse::default())
                .with_paths(path, server_path);
            (request, watch, true)
        }
    };

    let xid = conn.submit(request);
    debug!("Submitted request xid {}", xid);

    let mut replied = false;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, closing session");
                return Ok(());
            }
            delivery = deliveries.recv() => {
                let Some(delivery) = delivery else {
                    return Err(anyhow!("event stream closed"));
                };
                print_delivery(&delivery);

                match delivery {
                    Delivery::Packet(packet) if packet.xid() == Some(xid) => {
                        replied = true;
                        let rc = ErrorCode::from_code(packet.err().unwrap_or_default());
                        // exists leaves a watch on a missing node too
                        let watch_left = rc == ErrorCode::Ok || (is_exists && rc == ErrorCode::NoNode);
                        if !watch || !watch_left {
                            return Ok(());
                        }
                    }
                    Delivery::Event(event) if replied && event.event_type != EventType::None => {
                        return Ok(());
                    }
                    Delivery::Event(event) if !conn.state().is_alive() => {
                        return Err(anyhow!("session lost: {}", event));
                    }
                    _ => {}
                }
            }
        }
    }
}

async fn keep_alive(
    conn: &ClientConnection,
    deliveries: &mut UnboundedReceiver<Delivery>,
    duration: Duration,
) -> anyhow::Result<()> {
    let deadline = tokio::time::sleep(duration);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => return Ok(()),
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, closing session");
                return Ok(());
            }
            delivery = deliveries.recv() => {
                match delivery {
                    Some(delivery) => print_delivery(&delivery),
                    None => return Err(anyhow!("event stream closed")),
                }
                if !conn.state().is_alive() {
                    return Err(anyhow!("session ended in state {}", conn.state()));
                }
            }
        }
    }
}

fn server_path(chroot: Option<&str>, path: &str) -> anyhow::Result<String> {
    if !path.starts_with('/') {
        return Err(anyhow!("path {:?} must start with /", path));
    }
    Ok(match chroot {
        Some(chroot) if path == "/" => chroot.to_string(),
        Some(chroot) => format!("{}{}", chroot, path),
        None => path.to_string(),
    })
}

fn print_delivery(delivery: &Delivery) {
    match delivery {
        Delivery::Event(event) => println!("{}", event),
        Delivery::Packet(packet) => print_packet(packet),
    }
}

fn print_packet(packet: &Packet) {
    let rc = packet.err().unwrap_or_default();
    let path = packet.client_path.as_deref().unwrap_or("-");
    if rc != 0 {
        println!("{} {}: {:?}", op_name(packet), path, ErrorCode::from_code(rc));
        return;
    }

    if let Some(response) = packet.response_as::<GetDataResponse>() {
        let data = response
            .data
            .as_deref()
            .map(|d| String::from_utf8_lossy(d).into_owned())
            .unwrap_or_else(|| "null".to_string());
        println!("{} {}: {} (version {})", op_name(packet), path, data, response.stat.version);
    } else if let Some(response) = packet.response_as::<ExistsResponse>() {
        println!(
            "{} {}: exists (version {}, children {})",
            op_name(packet),
            path,
            response.stat.version,
            response.stat.num_children
        );
    } else {
        crate::component_warn!("cli", "Reply for xid {:?} carries no known response", packet.xid());
    }
}

fn op_name(packet: &Packet) -> String {
    packet
        .op()
        .map(|op| format!("{:?}", op))
        .unwrap_or_else(|| "Connect".to_string())
}
