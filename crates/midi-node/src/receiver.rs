//! The receiver worker: consumes the multicast group, correlates Hello /
//! HelloReply traffic for RTT, maintains the remote-device registry, and
//! dispatches routed MIDI to local output ports.

use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::sleep;
use tracing::{debug, error, warn};

use midi_ports::OutputPort;
use midi_protocol::packets::{decode, Packet};

use crate::control::{Command, Info, QueueRx, QueueTx, WorkerMessage};
use crate::registry::{PendingHelloLedger, RemoteDeviceRegistry, RoutingTable, RttRegistry};
use crate::transport;

const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(100);
const CPU_SAVE_INTERVAL: Duration = Duration::from_millis(1);
const RECV_BUFFER_SIZE: usize = 4096;

pub struct ReceiverSettings {
    pub interface: Option<Ipv4Addr>,
    pub save_cpu_time: bool,
}

pub async fn run(
    mut settings: ReceiverSettings,
    mut cmd_rx: QueueRx,
    to_sender: QueueTx,
    to_ui: QueueTx,
) -> Result<()> {
    let mut devices = RemoteDeviceRegistry::new();
    let mut rtts = RttRegistry::new();
    let mut pending_hellos = PendingHelloLedger::new();
    let mut routing = RoutingTable::new();

    let mut restart = true;

    while restart {
        restart = false;

        let mut outputs = open_outputs();
        let socket = transport::build_receiver_socket(settings.interface)?;

        let mut running = true;
        let mut paused = false;
        let mut buf = [0u8; RECV_BUFFER_SIZE];

        while running {
            match cmd_rx.try_recv() {
                Ok(WorkerMessage::Command(cmd)) => match cmd {
                    Command::ClearStoredRemoteMidiDevices => {
                        debug!("receiver: clearing stored remote MIDI devices");
                        devices.clear();
                        let _ = to_ui
                            .send(WorkerMessage::Info(Info::RemoteMidiDevices(devices.snapshot())))
                            .await;
                    }
                    Command::Pause => {
                        debug!("receiver: pausing");
                        paused = true;
                    }
                    Command::Resume => {
                        debug!("receiver: resuming");
                        paused = false;
                    }
                    Command::Restart => {
                        running = false;
                        restart = true;
                        continue;
                    }
                    Command::Stop => {
                        debug!("receiver: stopping");
                        running = false;
                    }
                    Command::SetNetworkInterface(interface) => {
                        // Unlike Restart, this doesn't skip the rest of the
                        // iteration -- the current receive/dispatch pass
                        // still runs to completion before the loop exits.
                        settings.interface = interface;
                        running = false;
                        restart = true;
                    }
                    Command::SetSaveCpuTime(v) => settings.save_cpu_time = v,
                    Command::SetMidiOutputPorts(routes) => {
                        let mut table: std::collections::HashMap<String, std::collections::HashSet<String>> =
                            std::collections::HashMap::new();
                        for (network_name, output_port_name) in routes {
                            table.entry(network_name).or_default().insert(output_port_name);
                        }
                        routing.replace(table);
                        let _ = to_ui
                            .send(WorkerMessage::Info(Info::RoutingInformation(routing.snapshot())))
                            .await;
                    }
                    // Sender-only commands delivered on the shared command type.
                    Command::SetMidiInputPorts(_)
                    | Command::SetEnableLoopbackInterface(_)
                    | Command::SetIgnoreMidiClock(_) => {}
                },
                Ok(WorkerMessage::Info(Info::HelloPacketInfo { id, sent_at })) => {
                    pending_hellos.insert(id, sent_at);
                }
                Ok(WorkerMessage::Info(Info::RoutingInformation(table))) => {
                    routing.replace(table);
                }
                Ok(WorkerMessage::Info(_)) => {}
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => {
                    warn!("receiver: command queue closed, stopping");
                    running = false;
                }
            }

            match socket.try_recv_from(&mut buf) {
                Ok((len, addr)) => {
                    let origin_ip = match addr.ip() {
                        std::net::IpAddr::V4(ip) => ip,
                        std::net::IpAddr::V6(_) => {
                            warn!("receiver: dropped packet from non-IPv4 peer {addr}");
                            continue;
                        }
                    };
                    match decode(&buf[..len]) {
                        Ok(Packet::Hello(hello)) => {
                            handle_hello(hello, origin_ip, &mut devices, &mut pending_hellos, &to_sender, &to_ui).await;
                        }
                        Ok(Packet::HelloReply(reply)) => {
                            handle_hello_reply(
                                reply,
                                origin_ip,
                                settings.interface,
                                &mut devices,
                                &mut rtts,
                                &mut pending_hellos,
                                &to_ui,
                            )
                            .await;
                        }
                        Ok(Packet::Midi(msg)) => {
                            dispatch_midi(&msg.device_name, &msg.midi_data, &routing, &mut outputs);
                        }
                        Err(e) => {
                            warn!("receiver: dropped invalid packet from {origin_ip}: {e}");
                        }
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => {
                    error!("receiver: socket error: {e}");
                }
            }

            if paused {
                sleep(PAUSE_POLL_INTERVAL).await;
                continue;
            }

            if settings.save_cpu_time {
                sleep(CPU_SAVE_INTERVAL).await;
            }
        }

        for (_, port) in outputs {
            port.close();
        }
    }

    Ok(())
}

fn open_outputs() -> std::collections::HashMap<String, OutputPort> {
    let mut outputs = std::collections::HashMap::new();
    let names = match midi_ports::list_output_names() {
        Ok(names) => names,
        Err(e) => {
            error!("receiver: could not enumerate MIDI output ports: {e}");
            return outputs;
        }
    };
    for name in names {
        match OutputPort::open(&name) {
            Ok(port) => {
                outputs.insert(name, port);
            }
            Err(e) => warn!("receiver: could not open MIDI output port '{name}': {e}"),
        }
    }
    outputs
}

async fn handle_hello(
    hello: midi_protocol::packets::Hello,
    origin_ip: Ipv4Addr,
    devices: &mut RemoteDeviceRegistry,
    pending_hellos: &mut PendingHelloLedger,
    to_sender: &QueueTx,
    to_ui: &QueueTx,
) {
    let hostname = if hello.hostname == "unknown" {
        origin_ip.to_string()
    } else {
        hello.hostname.clone()
    };

    let _ = to_sender
        .send(WorkerMessage::Info(Info::ReceivedHelloPacket {
            remote_ip: origin_ip,
            id: hello.id,
            received_at: Instant::now(),
        }))
        .await;

    if !hello.device_names.is_empty() && devices.merge(&hostname, &hello.device_names) {
        let _ = to_ui
            .send(WorkerMessage::Info(Info::RemoteMidiDevices(devices.snapshot())))
            .await;
    }

    pending_hellos.evict_expired(Instant::now());
}

async fn handle_hello_reply(
    reply: midi_protocol::packets::HelloReply,
    origin_ip: Ipv4Addr,
    our_interface: Option<Ipv4Addr>,
    devices: &mut RemoteDeviceRegistry,
    rtts: &mut RttRegistry,
    pending_hellos: &mut PendingHelloLedger,
    to_ui: &QueueTx,
) {
    // The reply is only ours if it answers a Hello we originated -- that's
    // what `remote_ip` records, not the reply's actual sender (`origin_ip`).
    // With no interface configured there's no local address to match
    // against, so every reply is filtered out; an interface must be set for
    // RTT measurement to work, same as upstream.
    if our_interface != Some(reply.remote_ip) {
        debug!(
            configured = ?our_interface,
            reply_target = %reply.remote_ip,
            "receiver: HelloReply not addressed to this interface, dropping"
        );
        return;
    }

    let Some(sent_at) = pending_hellos.take(reply.id) else {
        warn!(id = reply.id, from = %origin_ip, "receiver: HelloReply with no matching Hello, dropping");
        return;
    };

    let rtt = Instant::now().saturating_duration_since(sent_at).as_secs_f64();
    rtts.record(origin_ip, rtt);
    let _ = to_ui
        .send(WorkerMessage::Info(Info::RoundTripTimes(rtts.snapshot())))
        .await;

    let hostname = if reply.hostname == "unknown" {
        origin_ip.to_string()
    } else {
        reply.hostname.clone()
    };
    if !reply.device_names.is_empty() && devices.merge(&hostname, &reply.device_names) {
        let _ = to_ui
            .send(WorkerMessage::Info(Info::RemoteMidiDevices(devices.snapshot())))
            .await;
    }
}

fn dispatch_midi(
    device_name: &str,
    midi_data: &[u8],
    routing: &RoutingTable,
    outputs: &mut std::collections::HashMap<String, OutputPort>,
) {
    let Some(output_names) = routing.outputs_for(device_name) else {
        return;
    };
    for output_name in output_names {
        if let Some(port) = outputs.get_mut(output_name) {
            if let Err(e) = port.send(midi_data) {
                error!("receiver: failed to send MIDI to output port '{output_name}': {e}");
            }
        }
    }
}
