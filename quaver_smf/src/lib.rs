//! # Overview
//!
//! `quaver_smf` reads and writes Standard MIDI Files (`.mid`) into and out of
//! an owned, mutable in-memory model: a [`Sequence`] of [`Track`]s of
//! [`MidiEvent`]s, each event pairing a [`MidiMessage`] with an absolute tick.
//!
//! Parsing a `.mid` file is one call:
//!
//! ```no_run
//! let sequence = quaver_smf::load("song.mid").unwrap();
//! for (i, track) in sequence.tracks.iter().enumerate() {
//!     println!("track {} has {} events", i, track.len());
//! }
//! ```
//!
//! and writing one back out is another:
//!
//! ```no_run
//! # let sequence = quaver_smf::load("song.mid").unwrap();
//! quaver_smf::save(&sequence, 1, "rewritten.mid").unwrap();
//! ```
//!
//! The byte-level entry points [`parse`] and [`encode`] work on in-memory
//! buffers and report precise [`Error`]s instead of `io::Error`.
//!
//! # The model
//!
//! Events carry absolute ticks, not the file's relative delta times, so
//! editing a track never requires fixing up neighboring events. A track in
//! playable shape ends with exactly one end-of-track meta event;
//! [`Track::sort_events`] establishes that shape and the deterministic order
//! of simultaneous events (controllers before note-ons before note-offs).
//! The reader normalizes every track it returns.
//!
//! # About features
//!
//! - `parallel` (enabled by default)
//!
//!   Use multiple threads to encode large files. Disabling this feature
//!   removes the dependency on `rayon`.
//!
//! - `strict`
//!
//!   By default the reader plows through a fair amount of corruption:
//!   truncated varlen integers, length fields that disagree with the actual
//!   data, RIFF chunks that overrun the file. With `strict` enabled these
//!   become [`ErrorKind::Malformed`] errors instead.

mod prelude {
    pub(crate) use crate::error::{Error, ErrorKind, Result, ResultExt};
    pub(crate) use crate::primitive::{
        read_slice, read_u16, read_u32, read_u8, read_varlen, read_varlen_slice, write_varlen,
        write_varlen_slice,
    };
}

#[macro_use]
mod error;

mod event;
mod primitive;
mod riff;
mod sequence;
mod smf;
mod track;

pub use quaver_core;

pub use crate::{
    error::{Error, ErrorKind, Result},
    event::MidiEvent,
    sequence::{DivisionType, Sequence},
    smf::{encode, file_types, load, parse, save, write},
    track::Track,
};
pub use quaver_core::{MetaMessage, MidiMessage, ShortMessage, SysexMessage};

#[cfg(test)]
mod test;
