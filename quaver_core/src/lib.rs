//! Defines the common MIDI message types used across the `quaver` crate family.
//!
//! A [`MidiMessage`] is one of three things: a [`ShortMessage`] (a channel or
//! system message of at most 3 bytes), a [`SysexMessage`] (a system-exclusive
//! dump) or a [`MetaMessage`] (file-only metadata such as tempo changes and
//! track names).
//!
//! Every message stores its exact serialized bytes, status byte included, and
//! every constructor validates its input, so a message that exists is a
//! message that can be written out verbatim.
//!
//! # Constructing messages
//!
//! ```
//! use quaver_core::ShortMessage;
//!
//! // A note-on for middle C on channel 0, velocity 100.
//! let msg = ShortMessage::channel_message(ShortMessage::NOTE_ON, 0, 60, 100).unwrap();
//! assert_eq!(msg.bytes(), &[0x90, 60, 100]);
//! ```
//!
//! # Decoding live MIDI bytes
//!
//! Bytes arriving from a live connection (a keyboard, a virtual port) can be
//! turned into a message with [`MidiMessage::decode()`]:
//!
//! ```
//! use quaver_core::MidiMessage;
//!
//! let msg = MidiMessage::decode(&[0x90, 0x40, 0x20]).unwrap();
//! assert_eq!(msg.status(), 0x90);
//! ```
//!
//! Note that a live `0xFF` status is a System Reset, not a meta event: meta
//! events only exist inside Standard MIDI Files and are never produced by
//! `decode`.

use core::fmt;

mod message;

pub use crate::message::{
    MessageKind, MetaMessage, MidiMessage, ShortMessage, SysexMessage,
};

/// The error produced when constructing or decoding a malformed MIDI message.
///
/// Carries a static description of the exact rule that was violated.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct InvalidData(pub &'static str);

impl InvalidData {
    /// The human-readable description of the violated constraint.
    #[inline]
    pub fn message(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for InvalidData {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "invalid midi data: {}", self.0)
    }
}

impl std::error::Error for InvalidData {}

/// The result type used by message constructors.
pub type Result<T> = core::result::Result<T, InvalidData>;

#[cfg(test)]
mod test;
