//! A single track: an ordered list of timestamped events.

use quaver_core::{MetaMessage, MidiMessage};

use crate::event::{event_order, MidiEvent};

/// An ordered, mutable sequence of [`MidiEvent`]s.
///
/// A track in playable shape ends with exactly one end-of-track meta event,
/// placed one tick after the last real event (or at tick 0 for an empty
/// track). [`sort_events()`](Track::sort_events) establishes that shape; `add`
/// and `remove` do not maintain it on their own.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Track {
    events: Vec<MidiEvent>,
}

impl Track {
    /// Create an empty track.
    #[inline]
    pub fn new() -> Track {
        Track { events: Vec::new() }
    }

    /// Append an event to the track.
    #[inline]
    pub fn add(&mut self, event: MidiEvent) {
        self.events.push(event);
    }

    /// Remove and return the event at `index`, or `None` if out of range.
    #[inline]
    pub fn remove(&mut self, index: usize) -> Option<MidiEvent> {
        if index < self.events.len() {
            Some(self.events.remove(index))
        } else {
            None
        }
    }

    /// The event at `index`.
    #[inline]
    pub fn get(&self, index: usize) -> Option<&MidiEvent> {
        self.events.get(index)
    }

    /// The event at `index`, mutably.
    #[inline]
    pub fn get_mut(&mut self, index: usize) -> Option<&mut MidiEvent> {
        self.events.get_mut(index)
    }

    /// The number of events in the track.
    #[inline]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// `true` if the track holds no events.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// All events in storage order.
    #[inline]
    pub fn events(&self) -> &[MidiEvent] {
        &self.events
    }

    /// The tick of the last event, or 0 for an empty track.
    ///
    /// After [`sort_events()`](Track::sort_events) this is the tick of the
    /// end-of-track marker, i.e. the duration of the track.
    #[inline]
    pub fn ticks(&self) -> i64 {
        self.events.last().map(|ev| ev.tick).unwrap_or(0)
    }

    /// Normalize the track into playable shape.
    ///
    /// Removes every end-of-track event, stable-sorts the rest (ascending
    /// tick, simultaneous events by the status-class priority), then appends a
    /// single end-of-track marker one tick past the last event (at tick 0 if
    /// the track is empty).
    pub fn sort_events(&mut self) {
        self.events.retain(|ev| !ev.message.is_end_of_track());
        self.events.sort_by(event_order);
        let end_tick = match self.events.last() {
            Some(last) => last.tick + 1,
            None => 0,
        };
        self.events.push(MidiEvent::new(
            MidiMessage::Meta(MetaMessage::end_of_track()),
            end_tick,
        ));
    }

    /// Keep only the events for which `keep` returns `true`.
    #[inline]
    pub fn retain(&mut self, keep: impl FnMut(&MidiEvent) -> bool) {
        self.events.retain(keep);
    }

    /// Iterate over the events in storage order.
    #[inline]
    pub fn iter(&self) -> core::slice::Iter<'_, MidiEvent> {
        self.events.iter()
    }
}

impl IntoIterator for Track {
    type IntoIter = std::vec::IntoIter<MidiEvent>;
    type Item = MidiEvent;
    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.events.into_iter()
    }
}

impl<'a> IntoIterator for &'a Track {
    type IntoIter = core::slice::Iter<'a, MidiEvent>;
    type Item = &'a MidiEvent;
    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

impl FromIterator<MidiEvent> for Track {
    fn from_iter<I: IntoIterator<Item = MidiEvent>>(iter: I) -> Track {
        Track {
            events: iter.into_iter().collect(),
        }
    }
}
