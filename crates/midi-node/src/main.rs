//! `midi-node`: a sender and receiver worker pair that publish and consume
//! MIDI over a UDP multicast group, with Hello/HelloReply peer discovery and
//! round-trip-time measurement.
//!
//! There's no GUI here -- discovered devices, RTT samples, and routing
//! updates are logged as they cross the control plane instead of feeding a
//! dialog. Anything wanting to drive routing or port selection programmatically
//! can watch the log stream or extend `run_ui_sink` to feed another collaborator.

mod config;
mod control;
mod receiver;
mod registry;
mod sender;
mod transport;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use config::NodeConfig;
use control::{queue, Command, Info, WorkerMessage};

#[derive(Parser, Debug)]
#[command(name = "midi-node", about = "MIDI over LAN sender/receiver daemon")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "config/node.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = if args.config.exists() {
        let config_str = tokio::fs::read_to_string(&args.config)
            .await
            .with_context(|| format!("reading config file {}", args.config.display()))?;
        toml::from_str(&config_str).with_context(|| format!("parsing config file {}", args.config.display()))?
    } else {
        info!(path = %args.config.display(), "no config file found, using defaults");
        NodeConfig {
            host: Default::default(),
            network: Default::default(),
            midi: Default::default(),
        }
    };

    let hostname = config.resolved_hostname();

    let (sender_tx, sender_rx) = queue();
    let (receiver_tx, receiver_rx) = queue();
    let (ui_tx, mut ui_rx) = queue();

    let sender_settings = sender::SenderSettings {
        hostname: hostname.clone(),
        interface: config.network.interface,
        enable_loopback: config.network.enable_loopback,
        ignore_midi_clock: config.midi.ignore_midi_clock,
        save_cpu_time: config.midi.save_cpu_time,
        input_ports: config.midi.input_ports.clone(),
    };
    let receiver_settings = receiver::ReceiverSettings {
        interface: config.network.interface,
        save_cpu_time: config.midi.save_cpu_time,
    };

    info!(hostname = %hostname, interface = ?config.network.interface, "midi-node starting");

    let cancel = CancellationToken::new();

    let sender_handle = {
        let to_receiver = receiver_tx.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                result = sender::run(sender_settings, sender_rx, to_receiver) => {
                    if let Err(e) = result {
                        error!("sender worker exited: {e}");
                    }
                }
                _ = cancel.cancelled() => {}
            }
        })
    };

    let receiver_handle = {
        let to_sender = sender_tx.clone();
        let to_ui = ui_tx.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                result = receiver::run(receiver_settings, receiver_rx, to_sender, to_ui) => {
                    if let Err(e) = result {
                        error!("receiver worker exited: {e}");
                    }
                }
                _ = cancel.cancelled() => {}
            }
        })
    };

    // Route the configured output routing table to the receiver, same path
    // a live "set routing" command would take.
    if !config.midi.output_ports.is_empty() {
        let _ = receiver_tx
            .send(WorkerMessage::Command(Command::SetMidiOutputPorts(
                config.midi.output_ports.clone(),
            )))
            .await;
    }

    let ui_handle = tokio::spawn(async move { run_ui_sink(&mut ui_rx).await });

    tokio::signal::ctrl_c().await?;
    info!("shutting down...");

    let _ = sender_tx.send(WorkerMessage::Command(Command::Stop)).await;
    let _ = receiver_tx.send(WorkerMessage::Command(Command::Stop)).await;

    cancel.cancel();

    sender_handle.abort();
    receiver_handle.abort();
    ui_handle.abort();

    Ok(())
}

/// Stands in for the graphical front end: logs discovered devices, RTT
/// samples, and routing changes as workers publish them.
async fn run_ui_sink(ui_rx: &mut control::QueueRx) {
    while let Some(message) = ui_rx.recv().await {
        match message {
            WorkerMessage::Info(Info::RemoteMidiDevices(devices)) => {
                info!(?devices, "remote MIDI devices updated");
            }
            WorkerMessage::Info(Info::RoundTripTimes(rtts)) => {
                for (ip, samples) in &rtts {
                    if let Some(latest) = samples.back() {
                        info!(%ip, rtt_seconds = latest, samples = samples.len(), "round trip time updated");
                    }
                }
            }
            WorkerMessage::Info(Info::RoutingInformation(routing)) => {
                info!(?routing, "routing table updated");
            }
            WorkerMessage::Info(other) => {
                warn!(?other, "unexpected info message on ui queue");
            }
            WorkerMessage::Command(_) => {
                warn!("unexpected command on ui queue");
            }
        }
    }
}
