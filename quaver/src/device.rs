//! The device seams of the sequencer: where MIDI messages leave for the
//! outside world and where they come in from.
//!
//! A [`Receiver`] is anything that consumes timestamped messages (a synth, a
//! system MIDI port, a test channel); a [`Transmitter`] is anything that
//! produces them (a keyboard, a virtual port). Devices are shared as
//! `Arc<Mutex<dyn ...>>` trait objects and looked up by name through a
//! [`DeviceRegistry`] handle, which is passed into the sequencer explicitly
//! rather than living in process-global state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use quaver_core::MidiMessage;

use crate::{Error, Result};

/// The timestamp value meaning "no timestamp available".
pub const TIMESTAMP_UNKNOWN: i64 = -1;

/// Consumes timestamped MIDI messages.
///
/// `timestamp` is in microseconds, with [`TIMESTAMP_UNKNOWN`] meaning
/// unspecified. The sequencer always passes `0` when dispatching playback
/// events.
pub trait Receiver: Send {
    /// Deliver a message.
    fn send(&mut self, message: &MidiMessage, timestamp: i64);

    /// Release any resources held by the receiver. Messages sent after
    /// closing are discarded.
    fn close(&mut self) {}
}

/// A receiver shared between threads.
pub type SharedReceiver = Arc<Mutex<dyn Receiver>>;

/// Produces MIDI messages and forwards them to at most one receiver.
pub trait Transmitter: Send {
    /// Attach a receiver, detaching the previous one if any.
    fn set_receiver(&mut self, receiver: Option<SharedReceiver>);

    /// The currently attached receiver.
    fn receiver(&self) -> Option<SharedReceiver>;

    /// Release any resources held by the transmitter.
    fn close(&mut self) {}
}

/// A transmitter shared between threads.
pub type SharedTransmitter = Arc<Mutex<dyn Transmitter>>;

/// A [`Receiver`] that forwards every message into a crossbeam channel.
///
/// The easiest way to observe sequencer output from another thread:
///
/// ```
/// use quaver::ChannelReceiver;
///
/// let (receiver, messages) = ChannelReceiver::shared();
/// // hand `receiver` to a sequencer, then drain `messages`
/// # drop((receiver, messages));
/// ```
pub struct ChannelReceiver {
    sender: Option<crossbeam_channel::Sender<(MidiMessage, i64)>>,
}

impl ChannelReceiver {
    /// Create a channel receiver and the receiving end of its channel.
    pub fn new() -> (
        ChannelReceiver,
        crossbeam_channel::Receiver<(MidiMessage, i64)>,
    ) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (
            ChannelReceiver {
                sender: Some(sender),
            },
            receiver,
        )
    }

    /// Like [`new`](ChannelReceiver::new), but already wrapped as a
    /// [`SharedReceiver`].
    pub fn shared() -> (
        SharedReceiver,
        crossbeam_channel::Receiver<(MidiMessage, i64)>,
    ) {
        let (receiver, messages) = Self::new();
        (Arc::new(Mutex::new(receiver)), messages)
    }
}

impl Receiver for ChannelReceiver {
    fn send(&mut self, message: &MidiMessage, timestamp: i64) {
        if let Some(sender) = &self.sender {
            let _ = sender.send((message.clone(), timestamp));
        }
    }

    fn close(&mut self) {
        self.sender = None;
    }
}

/// A [`Transmitter`] fed programmatically.
///
/// Useful for tests and for applications that generate MIDI themselves; the
/// production counterpart backed by system MIDI ports lives in the `midir`
/// bridge module.
#[derive(Default)]
pub struct VirtualTransmitter {
    receiver: Option<SharedReceiver>,
}

impl VirtualTransmitter {
    /// Create a transmitter with no receiver attached.
    pub fn new() -> VirtualTransmitter {
        VirtualTransmitter::default()
    }

    /// Like [`new`](VirtualTransmitter::new), but already wrapped as a
    /// [`SharedTransmitter`].
    pub fn shared() -> Arc<Mutex<VirtualTransmitter>> {
        Arc::new(Mutex::new(VirtualTransmitter::new()))
    }

    /// Deliver a message to the attached receiver, if any.
    pub fn feed(&self, message: &MidiMessage, timestamp: i64) {
        if let Some(receiver) = &self.receiver {
            receiver.lock().unwrap().send(message, timestamp);
        }
    }
}

impl Transmitter for VirtualTransmitter {
    fn set_receiver(&mut self, receiver: Option<SharedReceiver>) {
        self.receiver = receiver;
    }

    fn receiver(&self) -> Option<SharedReceiver> {
        self.receiver.clone()
    }

    fn close(&mut self) {
        self.receiver = None;
    }
}

/// A name→device map for receivers and transmitters.
///
/// The registry is a cheap cloneable handle; all clones see the same devices.
/// The sequencer consults it in `update_device_connections` to attach itself
/// to everything registered.
#[derive(Clone, Default)]
pub struct DeviceRegistry {
    inner: Arc<Mutex<Registry>>,
}

#[derive(Default)]
struct Registry {
    receivers: HashMap<String, SharedReceiver>,
    transmitters: HashMap<String, SharedTransmitter>,
}

impl DeviceRegistry {
    /// Create an empty registry.
    pub fn new() -> DeviceRegistry {
        DeviceRegistry::default()
    }

    /// Register a receiver under `name`, replacing any previous holder of the
    /// name.
    pub fn add_receiver(&self, name: impl Into<String>, receiver: SharedReceiver) {
        self.inner
            .lock()
            .unwrap()
            .receivers
            .insert(name.into(), receiver);
    }

    /// Remove and return the receiver registered under `name`.
    pub fn remove_receiver(&self, name: &str) -> Option<SharedReceiver> {
        self.inner.lock().unwrap().receivers.remove(name)
    }

    /// Look up the receiver registered under `name`.
    pub fn receiver(&self, name: &str) -> Result<SharedReceiver> {
        self.inner
            .lock()
            .unwrap()
            .receivers
            .get(name)
            .cloned()
            .ok_or(Error::Unavailable("no receiver registered under that name"))
    }

    /// Register a transmitter under `name`, replacing any previous holder of
    /// the name.
    pub fn add_transmitter(&self, name: impl Into<String>, transmitter: SharedTransmitter) {
        self.inner
            .lock()
            .unwrap()
            .transmitters
            .insert(name.into(), transmitter);
    }

    /// Remove and return the transmitter registered under `name`.
    pub fn remove_transmitter(&self, name: &str) -> Option<SharedTransmitter> {
        self.inner.lock().unwrap().transmitters.remove(name)
    }

    /// Look up the transmitter registered under `name`.
    pub fn transmitter(&self, name: &str) -> Result<SharedTransmitter> {
        self.inner
            .lock()
            .unwrap()
            .transmitters
            .get(name)
            .cloned()
            .ok_or(Error::Unavailable(
                "no transmitter registered under that name",
            ))
    }

    /// The names of all registered receivers.
    pub fn receiver_names(&self) -> Vec<String> {
        self.inner.lock().unwrap().receivers.keys().cloned().collect()
    }

    /// The names of all registered transmitters.
    pub fn transmitter_names(&self) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .transmitters
            .keys()
            .cloned()
            .collect()
    }

    /// A snapshot of every registered receiver.
    pub fn receivers(&self) -> Vec<SharedReceiver> {
        self.inner.lock().unwrap().receivers.values().cloned().collect()
    }

    /// A snapshot of every registered transmitter.
    pub fn transmitters(&self) -> Vec<SharedTransmitter> {
        self.inner
            .lock()
            .unwrap()
            .transmitters
            .values()
            .cloned()
            .collect()
    }
}
