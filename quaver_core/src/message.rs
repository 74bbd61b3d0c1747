//! Midi message definitions.

use crate::{InvalidData, Result};

/// A general MIDI message.
///
/// # About MIDI
///
/// MIDI messages fall into three classes, and the distinction matters because
/// different transports carry different classes:
///
/// - Channel messages (`NoteOn`, `ControlChange`, `PitchBend`, ...) and system
///   messages (`SongPosition`, `TimingClock`, ...), both at most 3 bytes long,
///   are carried by live connections and by `.mid` files alike. These are
///   [`ShortMessage`]s.
/// - System-exclusive dumps are arbitrary-length byte payloads framed by
///   `0xF0`/`0xF7`. These are [`SysexMessage`]s.
/// - Meta messages (`Tempo`, `TrackName`, `EndOfTrack`, ...) exist only inside
///   `.mid` files; a live connection never produces one. These are
///   [`MetaMessage`]s.
///
/// Rather than a deep inheritance tree, `MidiMessage` is a flat sum of the
/// three variants: all downstream dispatch (tempo detection, sysex framing,
/// realtime filtering) branches on the tag.
///
/// Every variant stores its exact serialized bytes, so [`bytes()`] is always a
/// cheap borrow and cloning a message is a deep copy of those bytes.
///
/// [`bytes()`]: MidiMessage::bytes
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum MidiMessage {
    /// A channel or system message of 1 to 3 bytes.
    Short(ShortMessage),
    /// A system-exclusive message, including its leading `0xF0`/`0xF7` byte.
    Sysex(SysexMessage),
    /// A meta message, only meaningful inside Standard MIDI Files.
    Meta(MetaMessage),
}

impl MidiMessage {
    /// The serialized bytes of this message, status byte included.
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        match self {
            MidiMessage::Short(msg) => msg.bytes(),
            MidiMessage::Sysex(msg) => msg.bytes(),
            MidiMessage::Meta(msg) => msg.bytes(),
        }
    }

    /// The status byte of this message.
    ///
    /// Sysex messages report their leading byte (`0xF0` or `0xF7`) and meta
    /// messages always report `0xFF`.
    #[inline]
    pub fn status(&self) -> u8 {
        self.bytes()[0]
    }

    /// The total serialized length of this message in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes().len()
    }

    /// `true` if the message serializes to zero bytes. Never the case for a
    /// validly constructed message; present for completeness.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes().is_empty()
    }

    /// Classifies `self` into one of the defined MIDI message classes.
    #[inline]
    pub fn classify(&self) -> MessageKind {
        match self {
            MidiMessage::Short(msg) => match msg.status() {
                0x80..=0xEF => MessageKind::Channel,
                0xF0..=0xF7 => MessageKind::SystemCommon,
                _ => MessageKind::SystemRealtime,
            },
            MidiMessage::Sysex(_) => MessageKind::SystemCommon,
            MidiMessage::Meta(_) => MessageKind::Meta,
        }
    }

    /// Returns `true` if this message is a channel message.
    #[inline]
    pub fn is_channel(&self) -> bool {
        self.classify().is_channel()
    }

    /// Returns `true` if this message is a System Common or System Realtime
    /// message.
    #[inline]
    pub fn is_system(&self) -> bool {
        self.classify().is_system()
    }

    /// Returns `true` if this message is a meta message.
    #[inline]
    pub fn is_meta(&self) -> bool {
        self.classify().is_meta()
    }

    /// The channel of this message, if it is a channel message.
    #[inline]
    pub fn channel(&self) -> Option<u8> {
        match self {
            MidiMessage::Short(msg) if self.is_channel() => Some(msg.channel()),
            _ => None,
        }
    }

    /// If this message is a tempo meta event, the tempo in microseconds per
    /// quarter note.
    #[inline]
    pub fn tempo_micros(&self) -> Option<u32> {
        match self {
            MidiMessage::Meta(msg) => msg.tempo_micros(),
            _ => None,
        }
    }

    /// Returns `true` if this message is the end-of-track meta event.
    #[inline]
    pub fn is_end_of_track(&self) -> bool {
        match self {
            MidiMessage::Meta(msg) => msg.is_end_of_track(),
            _ => false,
        }
    }

    /// Decode a sequence of bytes received from a live MIDI connection.
    ///
    /// `0xF0`/`0xF7` leading bytes produce a [`SysexMessage`]; anything else
    /// must be a complete, valid short message. A live `0xFF` status is the
    /// System Reset realtime message, never a meta event.
    pub fn decode(data: &[u8]) -> Result<MidiMessage> {
        let status = *data
            .first()
            .ok_or(InvalidData("empty midi message"))?;
        match status {
            0xF0 | 0xF7 => Ok(MidiMessage::Sysex(SysexMessage::new(status, &data[1..])?)),
            _ => {
                let len = ShortMessage::data_length(status)?;
                if data.len() < len + 1 {
                    return Err(InvalidData("truncated short message"));
                }
                let data1 = if len >= 1 { data[1] } else { 0 };
                let data2 = if len >= 2 { data[2] } else { 0 };
                Ok(MidiMessage::Short(ShortMessage::new(status, data1, data2)?))
            }
        }
    }
}

impl From<ShortMessage> for MidiMessage {
    #[inline]
    fn from(msg: ShortMessage) -> MidiMessage {
        MidiMessage::Short(msg)
    }
}
impl From<SysexMessage> for MidiMessage {
    #[inline]
    fn from(msg: SysexMessage) -> MidiMessage {
        MidiMessage::Sysex(msg)
    }
}
impl From<MetaMessage> for MidiMessage {
    #[inline]
    fn from(msg: MetaMessage) -> MidiMessage {
        MidiMessage::Meta(msg)
    }
}

/// A classification of a [`MidiMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// A channel message, associated to a particular MIDI channel.
    Channel,
    /// A System Common message.
    SystemCommon,
    /// A System Realtime message (status `0xF8..=0xFF`), usually only sent on
    /// live connections.
    SystemRealtime,
    /// A meta message, only present in static `.mid` files.
    Meta,
}

impl MessageKind {
    /// Returns `true` if `self` is `Channel`.
    #[inline]
    pub fn is_channel(&self) -> bool {
        matches!(self, MessageKind::Channel)
    }

    /// Returns `true` if `self` is `SystemCommon` or `SystemRealtime`.
    #[inline]
    pub fn is_system(&self) -> bool {
        matches!(self, MessageKind::SystemCommon | MessageKind::SystemRealtime)
    }

    /// Returns `true` if `self` is `Meta`.
    #[inline]
    pub fn is_meta(&self) -> bool {
        matches!(self, MessageKind::Meta)
    }
}

/// A channel or system MIDI message of at most 3 bytes.
///
/// The status byte determines how many data bytes follow it: note and
/// controller messages carry 2, program change and channel pressure carry 1,
/// and most system messages carry none. Constructors validate the status
/// against this table and the data bytes against the 7-bit range.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub struct ShortMessage {
    bytes: [u8; 3],
    len: u8,
}

impl ShortMessage {
    /// Command nibble for a note-off channel message.
    pub const NOTE_OFF: u8 = 0x80;
    /// Command nibble for a note-on channel message.
    pub const NOTE_ON: u8 = 0x90;
    /// Command nibble for a polyphonic key pressure channel message.
    pub const POLY_PRESSURE: u8 = 0xA0;
    /// Command nibble for a control change channel message.
    pub const CONTROL_CHANGE: u8 = 0xB0;
    /// Command nibble for a program change channel message.
    pub const PROGRAM_CHANGE: u8 = 0xC0;
    /// Command nibble for a channel pressure channel message.
    pub const CHANNEL_PRESSURE: u8 = 0xD0;
    /// Command nibble for a pitch bend channel message.
    pub const PITCH_BEND: u8 = 0xE0;

    /// Status byte for an MTC quarter-frame system message.
    pub const MTC_QUARTER_FRAME: u8 = 0xF1;
    /// Status byte for a song position pointer system message.
    pub const SONG_POSITION: u8 = 0xF2;
    /// Status byte for a song select system message.
    pub const SONG_SELECT: u8 = 0xF3;
    /// Status byte for a tune request system message.
    pub const TUNE_REQUEST: u8 = 0xF6;
    /// Status byte for the timing clock realtime message.
    pub const TIMING_CLOCK: u8 = 0xF8;
    /// Status byte for the start realtime message.
    pub const START: u8 = 0xFA;
    /// Status byte for the continue realtime message.
    pub const CONTINUE: u8 = 0xFB;
    /// Status byte for the stop realtime message.
    pub const STOP: u8 = 0xFC;
    /// Status byte for the active sensing realtime message.
    pub const ACTIVE_SENSING: u8 = 0xFE;
    /// Status byte for the system reset realtime message.
    pub const SYSTEM_RESET: u8 = 0xFF;

    /// Create a short message from a status byte and up to two data bytes.
    ///
    /// The status byte selects how many of `data1`/`data2` are actually part
    /// of the message; excess arguments are ignored. Fails if the status has
    /// no defined length (e.g. `0xF0`, which starts a sysex message, or a
    /// data byte in status position) or if a required data byte is outside
    /// `0..=0x7F`.
    pub fn new(status: u8, data1: u8, data2: u8) -> Result<ShortMessage> {
        let data_len = Self::data_length(status)?;
        if data_len >= 1 && data1 > 0x7F {
            return Err(InvalidData("data byte 1 out of range"));
        }
        if data_len >= 2 && data2 > 0x7F {
            return Err(InvalidData("data byte 2 out of range"));
        }
        let mut bytes = [status, 0, 0];
        if data_len >= 1 {
            bytes[1] = data1;
        }
        if data_len >= 2 {
            bytes[2] = data2;
        }
        Ok(ShortMessage {
            bytes,
            len: data_len as u8 + 1,
        })
    }

    /// Create a channel message from a command nibble, a channel and up to two
    /// data bytes.
    ///
    /// `command` must lie in `0x80..=0xEF` (its own low nibble is discarded)
    /// and `channel` in `0..=15`.
    pub fn channel_message(command: u8, channel: u8, data1: u8, data2: u8) -> Result<ShortMessage> {
        if !(0x80..=0xEF).contains(&command) {
            return Err(InvalidData("command out of range"));
        }
        if channel > 0x0F {
            return Err(InvalidData("channel out of range"));
        }
        Self::new((command & 0xF0) | channel, data1, data2)
    }

    /// How many data bytes follow the given status byte.
    ///
    /// Fails for statuses that do not start a short message: data bytes in
    /// status position, sysex framing bytes (`0xF0`/`0xF7`), and the
    /// undefined system common statuses `0xF4`/`0xF5`.
    pub fn data_length(status: u8) -> Result<usize> {
        match status & 0xF0 {
            // Channel messages
            0x80 | 0x90 | 0xA0 | 0xB0 | 0xE0 => Ok(2),
            0xC0 | 0xD0 => Ok(1),
            0xF0 => match status {
                0xF6 | 0xF8 | 0xF9 | 0xFA..=0xFD | 0xFE | 0xFF => Ok(0),
                0xF1 | 0xF3 => Ok(1),
                0xF2 => Ok(2),
                _ => Err(InvalidData("status byte has no defined message length")),
            },
            _ => Err(InvalidData("data byte in status position")),
        }
    }

    /// The serialized bytes of this message.
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    /// The status byte.
    #[inline]
    pub fn status(&self) -> u8 {
        self.bytes[0]
    }

    /// The total serialized length in bytes (status byte included).
    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// `true` if the message serializes to zero bytes; never the case.
    #[inline]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// The command part of the status byte.
    ///
    /// For channel messages this is the high nibble (`NOTE_ON`, ...); for
    /// system messages it is the full status byte.
    #[inline]
    pub fn command(&self) -> u8 {
        if self.bytes[0] < 0xF0 {
            self.bytes[0] & 0xF0
        } else {
            self.bytes[0]
        }
    }

    /// The channel nibble of the status byte. Only meaningful for channel
    /// messages (status below `0xF0`).
    #[inline]
    pub fn channel(&self) -> u8 {
        self.bytes[0] & 0x0F
    }

    /// The first data byte, or 0 if the message has none.
    #[inline]
    pub fn data1(&self) -> u8 {
        self.bytes[1]
    }

    /// The second data byte, or 0 if the message has none.
    #[inline]
    pub fn data2(&self) -> u8 {
        self.bytes[2]
    }
}

/// A system-exclusive message.
///
/// The stored bytes are the leading framing byte (`0xF0` for a packet start,
/// `0xF7` for a continuation or escape) followed by the opaque payload.
#[derive(Clone, PartialEq, Eq, Debug, Hash)]
pub struct SysexMessage {
    bytes: Vec<u8>,
}

impl SysexMessage {
    /// Status byte that starts a system-exclusive packet.
    pub const START: u8 = 0xF0;
    /// Status byte that continues (or ends) a system-exclusive packet.
    pub const CONTINUATION: u8 = 0xF7;

    /// Create a sysex message from a framing byte and its payload.
    pub fn new(status: u8, data: &[u8]) -> Result<SysexMessage> {
        if status != Self::START && status != Self::CONTINUATION {
            return Err(InvalidData("sysex message must start with F0 or F7"));
        }
        let mut bytes = Vec::with_capacity(1 + data.len());
        bytes.push(status);
        bytes.extend_from_slice(data);
        Ok(SysexMessage { bytes })
    }

    /// Create a sysex message from its full serialized bytes (framing byte
    /// included).
    pub fn from_bytes(bytes: Vec<u8>) -> Result<SysexMessage> {
        match bytes.first() {
            Some(&Self::START) | Some(&Self::CONTINUATION) => Ok(SysexMessage { bytes }),
            Some(_) => Err(InvalidData("sysex message must start with F0 or F7")),
            None => Err(InvalidData("empty sysex message")),
        }
    }

    /// The serialized bytes, framing byte included.
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The framing byte (`0xF0` or `0xF7`).
    #[inline]
    pub fn status(&self) -> u8 {
        self.bytes[0]
    }

    /// The payload, excluding the framing byte.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.bytes[1..]
    }

    /// The total serialized length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// `true` if the message serializes to zero bytes; never the case.
    #[inline]
    pub fn is_empty(&self) -> bool {
        false
    }
}

/// A meta message, as stored in Standard MIDI Files.
///
/// The serialized layout is `[0xFF, type, varlen(payload length), payload]`.
/// Meta messages carry file-level metadata (tempo, track names, the mandatory
/// end-of-track marker) and are never sent over a live connection.
#[derive(Clone, PartialEq, Eq, Debug, Hash)]
pub struct MetaMessage {
    bytes: Vec<u8>,
}

impl MetaMessage {
    /// Meta type byte of the end-of-track marker.
    pub const END_OF_TRACK: u8 = 0x2F;
    /// Meta type byte of a tempo change.
    pub const TEMPO: u8 = 0x51;

    /// Create a meta message from its type byte and payload.
    ///
    /// `kind` must lie in `0..=0x7F`.
    pub fn new(kind: u8, data: &[u8]) -> Result<MetaMessage> {
        if kind > 0x7F {
            return Err(InvalidData("meta type byte out of range"));
        }
        if data.len() >= 1 << 28 {
            return Err(InvalidData("meta payload length exceeds 28 bits"));
        }
        let mut bytes = Vec::with_capacity(2 + 4 + data.len());
        bytes.push(0xFF);
        bytes.push(kind);
        push_varlen(&mut bytes, data.len() as u32);
        bytes.extend_from_slice(data);
        Ok(MetaMessage { bytes })
    }

    /// Create a meta message from its full serialized bytes.
    ///
    /// The payload length is derived by walking the variable-length quantity
    /// starting at offset 2; everything after it is taken as payload, so a
    /// length field that disagrees with the actual byte count is tolerated.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<MetaMessage> {
        if bytes.len() < 3 {
            return Err(InvalidData("meta message shorter than 3 bytes"));
        }
        if bytes[0] != 0xFF {
            return Err(InvalidData("meta message must start with FF"));
        }
        if bytes[1] > 0x7F {
            return Err(InvalidData("meta type byte out of range"));
        }
        // Walk the varlen; the byte with a clear top bit terminates it.
        let mut pos = 2;
        while pos < bytes.len() && bytes[pos] & 0x80 != 0 {
            pos += 1;
        }
        if pos >= bytes.len() {
            return Err(InvalidData("unterminated meta payload length"));
        }
        Ok(MetaMessage { bytes })
    }

    /// The serialized bytes: `[0xFF, type, varlen, payload]`.
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Always `0xFF`.
    #[inline]
    pub fn status(&self) -> u8 {
        0xFF
    }

    /// The meta type byte.
    #[inline]
    pub fn kind(&self) -> u8 {
        self.bytes[1]
    }

    /// The payload bytes, after the length field.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.bytes[self.payload_offset()..]
    }

    /// The total serialized length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// `true` if the message serializes to zero bytes; never the case.
    #[inline]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Returns `true` if this is the end-of-track marker.
    #[inline]
    pub fn is_end_of_track(&self) -> bool {
        self.bytes == [0xFF, Self::END_OF_TRACK, 0x00]
    }

    /// If this is a tempo change, the tempo in microseconds per quarter note.
    ///
    /// A tempo change is exactly 6 bytes long: `FF 51 03` followed by a
    /// 24-bit big-endian microsecond count.
    pub fn tempo_micros(&self) -> Option<u32> {
        if self.bytes.len() == 6 && self.bytes[1] == Self::TEMPO && self.bytes[2] == 0x03 {
            Some(u32::from_be_bytes([
                0,
                self.bytes[3],
                self.bytes[4],
                self.bytes[5],
            ]))
        } else {
            None
        }
    }

    /// Create a tempo change meta message from microseconds per quarter note.
    pub fn tempo(micros_per_quarter: u32) -> Result<MetaMessage> {
        if micros_per_quarter >= 1 << 24 {
            return Err(InvalidData("tempo exceeds 24 bits"));
        }
        Self::new(Self::TEMPO, &micros_per_quarter.to_be_bytes()[1..])
    }

    /// Create the end-of-track marker.
    pub fn end_of_track() -> MetaMessage {
        MetaMessage {
            bytes: vec![0xFF, Self::END_OF_TRACK, 0x00],
        }
    }

    fn payload_offset(&self) -> usize {
        let mut pos = 2;
        while self.bytes[pos] & 0x80 != 0 {
            pos += 1;
        }
        pos + 1
    }
}

/// Append a variable-length quantity in the minimum number of bytes.
fn push_varlen(out: &mut Vec<u8>, value: u32) {
    let mut buf = [0u8; 4];
    let mut idx = 3;
    buf[3] = (value & 0x7F) as u8;
    let mut rest = value >> 7;
    while rest != 0 {
        idx -= 1;
        buf[idx] = (rest & 0x7F) as u8 | 0x80;
        rest >>= 7;
    }
    out.extend_from_slice(&buf[idx..]);
}
