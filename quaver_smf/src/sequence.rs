//! The in-memory model of a whole MIDI sequence.

use crate::prelude::*;
use crate::track::Track;

/// How the ticks of a sequence map onto time.
///
/// PPQ divisions count ticks per quarter note, so the wall-clock length of a
/// tick follows the tempo. SMPTE divisions count ticks per frame at a fixed
/// frame rate, so ticks have a fixed wall-clock length regardless of tempo.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DivisionType {
    /// Tempo-based timing: `resolution` ticks per quarter note.
    Ppq,
    /// 24 frames per second.
    Smpte24,
    /// 25 frames per second.
    Smpte25,
    /// 29.97 frames per second (30 drop-frame).
    Smpte30Drop,
    /// 30 frames per second.
    Smpte30,
}

/// Tolerance when resolving a raw frame rate to a division type.
const FRAME_RATE_TOLERANCE: f64 = 1e-5;

impl DivisionType {
    /// The frame rate of an SMPTE division, or `None` for PPQ.
    pub fn frames_per_second(&self) -> Option<f64> {
        match self {
            DivisionType::Ppq => None,
            DivisionType::Smpte24 => Some(24.0),
            DivisionType::Smpte25 => Some(25.0),
            DivisionType::Smpte30Drop => Some(29.97),
            DivisionType::Smpte30 => Some(30.0),
        }
    }

    /// Resolve a raw division value to a division type, with `0.0` standing
    /// for PPQ. Frame rates are matched with a `1e-5` tolerance.
    pub fn from_frame_rate(rate: f64) -> Option<DivisionType> {
        let candidates = [
            (0.0, DivisionType::Ppq),
            (24.0, DivisionType::Smpte24),
            (25.0, DivisionType::Smpte25),
            (29.97, DivisionType::Smpte30Drop),
            (30.0, DivisionType::Smpte30),
        ];
        candidates
            .iter()
            .find(|(value, _)| (rate - value).abs() < FRAME_RATE_TOLERANCE)
            .map(|(_, div)| *div)
    }
}

/// A collection of tracks sharing a division type and resolution.
///
/// The sequence exclusively owns its tracks, each track its events, and each
/// event its message; tracks are never shared between sequences.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Sequence {
    division: DivisionType,
    resolution: u16,
    /// The tracks of this sequence.
    pub tracks: Vec<Track>,
}

impl Sequence {
    /// Create an empty sequence.
    ///
    /// `resolution` is ticks per quarter note for PPQ (at most `0x7FFF`) or
    /// ticks per frame for SMPTE divisions (at most `0xFF`).
    pub fn new(division: DivisionType, resolution: u16) -> Result<Sequence> {
        let max = match division {
            DivisionType::Ppq => 0x7FFF,
            _ => 0xFF,
        };
        ensure!(
            resolution <= max,
            err_invalid!("resolution out of range for division type")
        );
        Ok(Sequence {
            division,
            resolution,
            tracks: Vec::new(),
        })
    }

    /// Create a sequence with `track_count` empty tracks.
    pub fn with_tracks(
        division: DivisionType,
        resolution: u16,
        track_count: usize,
    ) -> Result<Sequence> {
        let mut seq = Sequence::new(division, resolution)?;
        seq.tracks.resize_with(track_count, Track::new);
        Ok(seq)
    }

    /// The division type of this sequence.
    #[inline]
    pub fn division_type(&self) -> DivisionType {
        self.division
    }

    /// The resolution: ticks per quarter note (PPQ) or per frame (SMPTE).
    #[inline]
    pub fn resolution(&self) -> u16 {
        self.resolution
    }

    /// Append a fresh empty track and return it.
    pub fn create_track(&mut self) -> &mut Track {
        self.tracks.push(Track::new());
        self.tracks.last_mut().unwrap()
    }

    /// Remove and return the track at `index`, or `None` if out of range.
    pub fn delete_track(&mut self, index: usize) -> Option<Track> {
        if index < self.tracks.len() {
            Some(self.tracks.remove(index))
        } else {
            None
        }
    }

    /// The length of the longest track, in ticks.
    pub fn tick_length(&self) -> i64 {
        self.tracks.iter().map(Track::ticks).max().unwrap_or(0)
    }

    /// The duration of the sequence in microseconds.
    ///
    /// For PPQ sequences this assumes the default tempo of 120 beats per
    /// minute (two quarter notes per second); tempo change events are not
    /// consulted. SMPTE sequences have tempo-independent tick lengths.
    pub fn microsecond_length(&self) -> i64 {
        let divisor = match self.division.frames_per_second() {
            None => 2.0,
            Some(fps) => fps,
        };
        (1_000_000.0 * self.tick_length() as f64 / (divisor * self.resolution as f64)) as i64
    }
}
