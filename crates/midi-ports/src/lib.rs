//! MIDI input/output port backend.
//!
//! Wraps [`midir`], whose inputs are callback-driven, behind a pollable
//! interface so the node's sender loop can drain pending messages the same
//! way it drains its command queue: non-blocking, once per tick.

use std::sync::mpsc::{Receiver, Sender, TryRecvError};

use anyhow::{anyhow, Context, Result};
use midir::{MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};

/// MIDI realtime clock message (0xF8), sent continuously by synced gear and
/// almost always unwanted on a shared network bus.
const CLOCK_STATUS: u8 = 0xF8;

/// One message read off an input port.
#[derive(Debug, Clone)]
pub struct RawMidiMessage {
    pub timestamp_us: u64,
    pub data: Vec<u8>,
}

/// True if `data` is a MIDI clock message.
pub fn is_clock(data: &[u8]) -> bool {
    data.first() == Some(&CLOCK_STATUS)
}

fn client_name(prefix: &str) -> String {
    format!("midi-over-lan-{prefix}")
}

/// List the names of available MIDI input ports.
pub fn list_input_names() -> Result<Vec<String>> {
    let midi_in = MidiInput::new(&client_name("scan-in")).context("initializing MIDI input")?;
    Ok(midi_in
        .ports()
        .iter()
        .filter_map(|p| midi_in.port_name(p).ok())
        .collect())
}

/// List the names of available MIDI output ports.
pub fn list_output_names() -> Result<Vec<String>> {
    let midi_out = MidiOutput::new(&client_name("scan-out")).context("initializing MIDI output")?;
    Ok(midi_out
        .ports()
        .iter()
        .filter_map(|p| midi_out.port_name(p).ok())
        .collect())
}

/// An open MIDI input port. Incoming messages are pulled via
/// [`InputPort::iter_pending`]; the midir callback that actually receives
/// them runs on its own backend thread and only ever pushes onto a channel.
pub struct InputPort {
    name: String,
    connection: Option<MidiInputConnection<()>>,
    incoming: Receiver<RawMidiMessage>,
}

impl InputPort {
    /// Open the input port whose name matches `name` exactly.
    pub fn open(name: &str) -> Result<Self> {
        let midi_in = MidiInput::new(&client_name("in")).context("initializing MIDI input")?;
        let ports = midi_in.ports();
        let port = ports
            .iter()
            .find(|p| midi_in.port_name(p).map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| anyhow!("MIDI input port '{name}' not found"))?;

        let (tx, rx): (Sender<RawMidiMessage>, Receiver<RawMidiMessage>) =
            std::sync::mpsc::channel();

        let connection = midi_in
            .connect(
                port,
                "midi-over-lan-in",
                move |timestamp_us, data, _| {
                    // Dropped messages here mean the port has been closed
                    // and the receiver end is already gone.
                    let _ = tx.send(RawMidiMessage {
                        timestamp_us,
                        data: data.to_vec(),
                    });
                },
                (),
            )
            .map_err(|e| anyhow!("connecting MIDI input '{name}': {e}"))?;

        Ok(Self {
            name: name.to_string(),
            connection: Some(connection),
            incoming: rx,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Drain every message that has arrived since the last call, without
    /// blocking.
    pub fn iter_pending(&self) -> Vec<RawMidiMessage> {
        let mut out = Vec::new();
        loop {
            match self.incoming.try_recv() {
                Ok(msg) => out.push(msg),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break,
            }
        }
        out
    }

    /// Discard everything currently queued without returning it. Used when
    /// resuming a paused sender, so stale messages captured while paused
    /// aren't flushed onto the network all at once.
    pub fn discard_pending(&self) -> usize {
        self.iter_pending().len()
    }

    pub fn close(mut self) {
        if let Some(conn) = self.connection.take() {
            conn.close();
        }
    }
}

/// An open MIDI output port.
pub struct OutputPort {
    name: String,
    connection: Option<MidiOutputConnection>,
}

impl OutputPort {
    /// Open the output port whose name matches `name` exactly.
    pub fn open(name: &str) -> Result<Self> {
        let midi_out = MidiOutput::new(&client_name("out")).context("initializing MIDI output")?;
        let ports = midi_out.ports();
        let port = ports
            .iter()
            .find(|p| midi_out.port_name(p).map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| anyhow!("MIDI output port '{name}' not found"))?;

        let connection = midi_out
            .connect(port, "midi-over-lan-out")
            .map_err(|e| anyhow!("connecting MIDI output '{name}': {e}"))?;

        Ok(Self {
            name: name.to_string(),
            connection: Some(connection),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn send(&mut self, data: &[u8]) -> Result<()> {
        let conn = self
            .connection
            .as_mut()
            .ok_or_else(|| anyhow!("output port '{}' is closed", self.name))?;
        conn.send(data)
            .map_err(|e| anyhow!("sending to output port '{}': {e}", self.name))
    }

    pub fn close(mut self) {
        if let Some(conn) = self.connection.take() {
            conn.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_messages_are_identified() {
        assert!(is_clock(&[0xF8]));
        assert!(!is_clock(&[0x90, 0x3C, 0x40]));
        assert!(!is_clock(&[]));
    }
}
