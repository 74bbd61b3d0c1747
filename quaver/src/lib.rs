//! # Overview
//!
//! `quaver` is a MIDI toolkit: it reads and writes Standard MIDI Files into
//! an in-memory [`Sequence`] model (via [`quaver_smf`]), and plays that model
//! back (or records into it) in real time through a [`Sequencer`] with
//! configurable tempo, looping, per-track mute/solo and event listeners.
//!
//! Playing a file into a channel you can drain from any thread:
//!
//! ```no_run
//! use quaver::{ChannelReceiver, DeviceRegistry, Sequencer};
//!
//! let mut sequencer = Sequencer::new(DeviceRegistry::new());
//! let (receiver, messages) = ChannelReceiver::shared();
//! sequencer.add_receiver(receiver);
//!
//! sequencer.open().unwrap();
//! sequencer.set_sequence(quaver_smf::load("song.mid").unwrap());
//! sequencer.start().unwrap();
//! ```
//!
//! With the `midir-io` feature enabled, the same sequencer drives real system
//! MIDI ports through the `midir` bridge module: register an output port as a
//! receiver and a `MidirTransmitter` as an input, call
//! [`Sequencer::update_device_connections`], and recording captures whatever
//! the connected keyboard plays.
//!
//! The message and file layers are re-exported, so depending on `quaver`
//! alone is enough for most uses.

mod device;
mod sequencer;

#[cfg(feature = "midir-io")]
pub mod midir;

pub use quaver_core;
pub use quaver_smf;

pub use crate::device::{
    ChannelReceiver, DeviceRegistry, Receiver, SharedReceiver, SharedTransmitter, Transmitter,
    VirtualTransmitter, TIMESTAMP_UNKNOWN,
};
pub use crate::sequencer::{ListenerId, Sequencer, LOOP_CONTINUOUSLY};
pub use quaver_core::{
    MessageKind, MetaMessage, MidiMessage, ShortMessage, SysexMessage,
};
pub use quaver_smf::{DivisionType, MidiEvent, Sequence, Track};

/// The errors surfaced by the sequencer runtime.
///
/// The codec and the message constructors report their own, more detailed
/// error types; at this level everything collapses into the two conditions a
/// caller can meaningfully react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Malformed or out-of-range MIDI data: a bad message, file, sequence or
    /// parameter.
    #[error("invalid midi data: {0}")]
    InvalidData(&'static str),
    /// A required device or state is missing: no such receiver or
    /// transmitter is registered, or the sequencer is not open.
    #[error("midi unavailable: {0}")]
    Unavailable(&'static str),
}

impl From<quaver_core::InvalidData> for Error {
    fn from(err: quaver_core::InvalidData) -> Error {
        Error::InvalidData(err.message())
    }
}

impl From<quaver_smf::Error> for Error {
    fn from(err: quaver_smf::Error) -> Error {
        Error::InvalidData(err.kind().message())
    }
}

/// The result type used by the sequencer runtime.
pub type Result<T> = std::result::Result<T, Error>;
