//! Timestamped events and their ordering.

use core::cmp::Ordering;

use quaver_core::MidiMessage;

/// A single event in a track: a MIDI message and the absolute tick at which it
/// fires.
///
/// Ticks are absolute rather than relative so that events can be re-sorted,
/// merged across tracks and sought through without rewriting their neighbors;
/// the reader and writer convert from and to the on-disk delta times.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MidiEvent {
    /// The message fired by this event. The event owns its message.
    pub message: MidiMessage,
    /// Absolute tick at which the message fires.
    pub tick: i64,
}

impl MidiEvent {
    /// Create an event from a message and an absolute tick.
    #[inline]
    pub fn new(message: impl Into<MidiMessage>, tick: i64) -> MidiEvent {
        MidiEvent {
            message: message.into(),
            tick,
        }
    }

    /// The message fired by this event.
    #[inline]
    pub fn message(&self) -> &MidiMessage {
        &self.message
    }

    /// The absolute tick at which this event fires.
    #[inline]
    pub fn tick(&self) -> i64 {
        self.tick
    }

    /// Move this event to a different tick.
    #[inline]
    pub fn set_tick(&mut self, tick: i64) {
        self.tick = tick;
    }
}

/// Total order over events: ascending tick, with simultaneous events ordered
/// by descending status class.
///
/// The status-class tie-break makes meta, system and controller messages fire
/// before note-ons, and note-ons before note-offs, when they share a tick.
/// Without it, a note ending exactly where the next one starts (or a program
/// change sharing a tick with the note it should affect) would dispatch in
/// whatever order the events happened to be stored.
pub(crate) fn event_order(a: &MidiEvent, b: &MidiEvent) -> Ordering {
    a.tick
        .cmp(&b.tick)
        .then_with(|| status_class(b).cmp(&status_class(a)))
}

/// The high nibble of the first serialized byte: `0xF0` for meta/sysex/system
/// messages down through `0x90` for note-on and `0x80` for note-off.
#[inline]
fn status_class(event: &MidiEvent) -> u8 {
    event.message.status() & 0xF0
}
