//! The sender worker: owns open MIDI input ports, emits Hello beacons,
//! answers Hellos with HelloReply, and publishes MIDI events.

use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::net::UdpSocket;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use midi_ports::InputPort;
use midi_protocol::packets::{Hello, HelloReply};

use crate::control::{Command, Info, QueueRx, QueueTx, WorkerMessage};
use crate::transport::{self, multicast_dest};

const HELLO_INTERVAL: Duration = Duration::from_secs(10);
const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(100);
const CPU_SAVE_INTERVAL: Duration = Duration::from_millis(1);

/// Mutable configuration the sender worker is restarted with; commands
/// that require a fresh socket update this and trigger a restart.
pub struct SenderSettings {
    pub hostname: String,
    pub interface: Option<Ipv4Addr>,
    pub enable_loopback: bool,
    pub ignore_midi_clock: bool,
    pub save_cpu_time: bool,
    /// (MIDI device name, network name).
    pub input_ports: Vec<(String, String)>,
}

pub async fn run(mut settings: SenderSettings, mut cmd_rx: QueueRx, to_receiver: QueueTx) -> Result<()> {
    let mut restart = true;

    while restart {
        restart = false;

        let socket = transport::build_sender_socket(settings.interface, settings.enable_loopback)?;
        let dest = multicast_dest();

        let mut opened_inputs = open_inputs(&settings.input_ports);

        let mut running = true;
        let mut paused = false;
        let mut last_hello: Option<Instant> = None;

        while running {
            match cmd_rx.try_recv() {
                Ok(WorkerMessage::Command(cmd)) => match cmd {
                    Command::Restart => {
                        running = false;
                        restart = true;
                        continue;
                    }
                    Command::Pause => {
                        debug!("sender: pausing");
                        paused = true;
                    }
                    Command::Resume => {
                        paused = false;
                        let skipped: usize = opened_inputs.iter().map(|(p, _)| p.discard_pending()).sum();
                        info!(skipped, "sender: resumed, discarded pending MIDI accumulated while paused");
                    }
                    Command::Stop => {
                        debug!("sender: stopping");
                        running = false;
                    }
                    Command::SetMidiInputPorts(ports) => {
                        for (port, _) in opened_inputs.drain(..) {
                            port.close();
                        }
                        settings.input_ports = ports;
                        opened_inputs = open_inputs(&settings.input_ports);
                    }
                    Command::SetNetworkInterface(interface) => {
                        settings.interface = interface;
                        running = false;
                        restart = true;
                        continue;
                    }
                    Command::SetEnableLoopbackInterface(enabled) => {
                        settings.enable_loopback = enabled;
                        running = false;
                        restart = true;
                        continue;
                    }
                    Command::SetIgnoreMidiClock(v) => settings.ignore_midi_clock = v,
                    Command::SetSaveCpuTime(v) => settings.save_cpu_time = v,
                    // Receiver-only commands delivered on the shared command
                    // type; harmless no-ops here.
                    Command::SetMidiOutputPorts(_) | Command::ClearStoredRemoteMidiDevices => {}
                },
                Ok(WorkerMessage::Info(Info::ReceivedHelloPacket { remote_ip, id, .. })) => {
                    send_hello_reply(&socket, dest, id, remote_ip, &settings).await;
                }
                Ok(WorkerMessage::Info(_)) => {}
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => {
                    warn!("sender: command queue closed, stopping");
                    running = false;
                }
            }

            let now = Instant::now();
            if last_hello.map(|t| now.duration_since(t) >= HELLO_INTERVAL).unwrap_or(true) {
                last_hello = Some(now);
                send_hello(&socket, dest, &settings, &opened_inputs, &to_receiver).await;
            }

            if paused {
                sleep(PAUSE_POLL_INTERVAL).await;
                continue;
            }

            send_pending_midi(&socket, dest, &settings, &opened_inputs).await;

            if settings.save_cpu_time {
                sleep(CPU_SAVE_INTERVAL).await;
            }
        }

        for (port, _) in opened_inputs {
            port.close();
        }
    }

    Ok(())
}

fn open_inputs(ports: &[(String, String)]) -> Vec<(InputPort, String)> {
    let mut opened = Vec::with_capacity(ports.len());
    for (device_name, network_name) in ports {
        match InputPort::open(device_name) {
            Ok(port) => opened.push((port, network_name.clone())),
            Err(e) => warn!("sender: could not open MIDI input '{device_name}': {e}"),
        }
    }
    opened
}

async fn send_hello(
    socket: &UdpSocket,
    dest: std::net::SocketAddrV4,
    settings: &SenderSettings,
    opened_inputs: &[(InputPort, String)],
    to_receiver: &QueueTx,
) {
    let device_names: Vec<String> = opened_inputs.iter().map(|(_, name)| name.clone()).collect();
    let hello = Hello::new(settings.hostname.clone(), device_names);
    let sent_at = Instant::now();

    debug!(id = hello.id, "sender: sending Hello");
    if let Err(e) = socket.send_to(&hello.encode(), dest).await {
        warn!("sender: could not send Hello: {e}");
        return;
    }

    let _ = to_receiver
        .send(WorkerMessage::Info(Info::HelloPacketInfo { id: hello.id, sent_at }))
        .await;
}

async fn send_hello_reply(
    socket: &UdpSocket,
    dest: std::net::SocketAddrV4,
    id: u32,
    remote_ip: Ipv4Addr,
    settings: &SenderSettings,
) {
    debug!(id, %remote_ip, "sender: sending HelloReply");
    // Only the id/remote_ip pair and the hostname are ever populated here;
    // device_names stays empty on a HelloReply, matching the beacon it answers.
    let reply = HelloReply::new(id, remote_ip, settings.hostname.clone(), Vec::new());
    if let Err(e) = socket.send_to(&reply.encode(), dest).await {
        warn!("sender: could not send HelloReply: {e}");
    }
}

async fn send_pending_midi(
    socket: &UdpSocket,
    dest: std::net::SocketAddrV4,
    settings: &SenderSettings,
    opened_inputs: &[(InputPort, String)],
) {
    for (port, network_name) in opened_inputs {
        for msg in port.iter_pending() {
            if settings.ignore_midi_clock && midi_ports::is_clock(&msg.data) {
                continue;
            }
            let packet = midi_protocol::packets::encode_midi(network_name, &msg.data);
            if let Err(e) = socket.send_to(&packet, dest).await {
                error!("sender: could not send MIDI message: {e}");
            }
        }
    }
}
