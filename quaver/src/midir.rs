//! Receiver and transmitter implementations backed by `midir` system MIDI
//! ports.
//!
//! Only compiled with the `midir-io` feature enabled.

use std::sync::{Arc, Mutex};

use midir::{MidiInput, MidiInputConnection, MidiInputPort, MidiOutput, MidiOutputPort};

use quaver_core::MidiMessage;

use crate::device::{Receiver, SharedReceiver, SharedTransmitter, Transmitter};
use crate::{Error, Result};

pub use midir::MidiOutputConnection;

impl Receiver for MidiOutputConnection {
    fn send(&mut self, message: &MidiMessage, _timestamp: i64) {
        // Meta messages have no wire representation
        if message.is_meta() {
            return;
        }
        let _ = MidiOutputConnection::send(self, message.bytes());
    }
}

/// Connect a system MIDI output port and wrap it as a [`SharedReceiver`].
pub fn connect_output(
    output: MidiOutput,
    port: &MidiOutputPort,
    port_name: &str,
) -> Result<SharedReceiver> {
    let connection = output
        .connect(port, port_name)
        .map_err(|_| Error::Unavailable("failed to connect midi output port"))?;
    Ok(Arc::new(Mutex::new(connection)))
}

/// A [`Transmitter`] fed by a system MIDI input port.
///
/// Incoming bytes are decoded into messages and forwarded, with the
/// microsecond timestamp midir provides, to whatever receiver is currently
/// attached. Unrecognized byte sequences are dropped.
pub struct MidirTransmitter {
    _connection: MidiInputConnection<()>,
    receiver: Arc<Mutex<Option<SharedReceiver>>>,
}

impl MidirTransmitter {
    /// Connect a system MIDI input port.
    pub fn connect(
        input: MidiInput,
        port: &MidiInputPort,
        port_name: &str,
    ) -> Result<MidirTransmitter> {
        let receiver: Arc<Mutex<Option<SharedReceiver>>> = Arc::new(Mutex::new(None));
        let callback_receiver = Arc::clone(&receiver);
        let connection = input
            .connect(
                port,
                port_name,
                move |timestamp, raw, _| {
                    let Ok(message) = MidiMessage::decode(raw) else {
                        return;
                    };
                    let attached = callback_receiver.lock().unwrap().clone();
                    if let Some(receiver) = attached {
                        receiver.lock().unwrap().send(&message, timestamp as i64);
                    }
                },
                (),
            )
            .map_err(|_| Error::Unavailable("failed to connect midi input port"))?;
        Ok(MidirTransmitter {
            _connection: connection,
            receiver,
        })
    }

    /// Like [`connect`](MidirTransmitter::connect), but already wrapped as a
    /// [`SharedTransmitter`].
    pub fn connect_shared(
        input: MidiInput,
        port: &MidiInputPort,
        port_name: &str,
    ) -> Result<SharedTransmitter> {
        Ok(Arc::new(Mutex::new(Self::connect(input, port, port_name)?)))
    }
}

impl Transmitter for MidirTransmitter {
    fn set_receiver(&mut self, receiver: Option<SharedReceiver>) {
        *self.receiver.lock().unwrap() = receiver;
    }

    fn receiver(&self) -> Option<SharedReceiver> {
        self.receiver.lock().unwrap().clone()
    }

    fn close(&mut self) {
        *self.receiver.lock().unwrap() = None;
    }
}
