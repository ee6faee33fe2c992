//! Control-plane messages passed between the node orchestrator and the
//! sender/receiver workers over bounded queues.
//!
//! Each queue carries a [`WorkerMessage`], which is either a [`Command`]
//! (orchestrator → worker) or an [`Info`] (worker → orchestrator, or
//! worker → worker for the Hello/HelloReply handoff). Folding each
//! command's data directly into its enum variant -- rather than a bare
//! `command` tag plus an untyped payload -- means an invalid combination
//! simply can't be constructed.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::Ipv4Addr;
use std::time::Instant;

use tokio::sync::mpsc;

/// Depth of every control-plane queue. Kept small: these carry configuration
/// changes and bookkeeping handoffs, never MIDI or packet data.
pub const QUEUE_DEPTH: usize = 128;

pub type QueueTx = mpsc::Sender<WorkerMessage>;
pub type QueueRx = mpsc::Receiver<WorkerMessage>;

pub fn queue() -> (QueueTx, QueueRx) {
    mpsc::channel(QUEUE_DEPTH)
}

#[derive(Debug, Clone)]
pub enum WorkerMessage {
    Command(Command),
    Info(Info),
}

#[derive(Debug, Clone)]
pub enum Command {
    Restart,
    Pause,
    Resume,
    Stop,
    /// (input device name, network name) pairs. Replaces the whole set.
    SetMidiInputPorts(Vec<(String, String)>),
    /// (network name, output port name) pairs. Replaces the whole set.
    SetMidiOutputPorts(Vec<(String, String)>),
    /// `None` binds all interfaces / restores the default route.
    SetNetworkInterface(Option<Ipv4Addr>),
    SetEnableLoopbackInterface(bool),
    SetIgnoreMidiClock(bool),
    SetSaveCpuTime(bool),
    ClearStoredRemoteMidiDevices,
}

#[derive(Debug, Clone)]
pub enum Info {
    /// A Hello was just sent: its id and the monotonic instant it went out.
    HelloPacketInfo { id: u32, sent_at: Instant },
    /// A HelloReply should be sent back to `remote_ip`, answering the Hello
    /// with the given id that was received at `received_at`.
    ReceivedHelloPacket {
        remote_ip: Ipv4Addr,
        id: u32,
        received_at: Instant,
    },
    RemoteMidiDevices(HashMap<String, HashSet<String>>),
    RoundTripTimes(HashMap<Ipv4Addr, VecDeque<f64>>),
    RoutingInformation(HashMap<String, HashSet<String>>),
}
