//! Reading and writing of the Standard MIDI File packaging of sequences.

use std::io;
use std::path::Path;

use quaver_core::{MetaMessage, MidiMessage, ShortMessage, SysexMessage};

use crate::event::MidiEvent;
use crate::prelude::*;
use crate::riff;
use crate::sequence::{DivisionType, Sequence};
use crate::track::Track;

/// "MThd"
const HEADER_MAGIC: u32 = 0x4D54_6864;
/// "MTrk"
const TRACK_MAGIC: u32 = 0x4D54_726B;

/// How many bytes per event to estimate when allocating a track chunk buffer.
///
/// A value that is too large overallocates, one that is too small forces the
/// buffer to grow. Delta + status + two data bytes puts the common note
/// events at 4 bytes, and short deltas pull the real-world average a bit
/// below that.
const EVENT_TO_BYTES: f32 = 3.4;

/// How many estimated body bytes a file must have before multithreaded
/// encoding is worth its overhead.
#[cfg(feature = "parallel")]
const PARALLEL_ENABLE_THRESHOLD: usize = 3 * 1024;

/// Parse a Standard MIDI File (or an RMID RIFF wrapper around one) into a
/// [`Sequence`].
///
/// Declared track chunk lengths are not trusted: each track is read up to its
/// end-of-track meta event. Every track is normalized with
/// [`Track::sort_events`] as it is read.
pub fn parse(raw: &[u8]) -> Result<Sequence> {
    let mut raw = match raw.get(..4) {
        Some(b"RIFF") => riff::unwrap(raw)?,
        Some(b"MThd") => raw,
        _ => bail!(err_invalid!("not a midi file")),
    };
    let raw = &mut raw;

    let magic = read_u32(raw).context(err_invalid!("failed to read header chunk"))?;
    ensure!(magic == HEADER_MAGIC, err_invalid!("not a midi file"));
    let header_len = read_u32(raw).context(err_invalid!("failed to read header length"))?;
    ensure!(header_len >= 6, err_invalid!("header chunk too short"));
    let format = read_u16(raw).context(err_invalid!("failed to read file format"))?;
    ensure!(format <= 2, err_invalid!("unknown midi file format"));
    let track_count = read_u16(raw).context(err_invalid!("failed to read track count"))?;
    ensure!(track_count > 0, err_invalid!("midi file has no tracks"));
    let division = read_u16(raw).context(err_invalid!("failed to read division"))?;
    // Headers longer than 6 bytes are legal; skip the excess
    read_slice(raw, header_len as usize - 6).context(err_invalid!("truncated header chunk"))?;

    let (division, resolution) = decode_division(division)?;
    let mut sequence = Sequence::new(division, resolution)?;
    for _ in 0..track_count {
        let mut track = read_track(raw)?;
        track.sort_events();
        sequence.tracks.push(track);
    }
    Ok(sequence)
}

/// Read a Standard MIDI File from a path.
///
/// Codec failures are reported as [`io::ErrorKind::InvalidData`].
pub fn load<P: AsRef<Path>>(path: P) -> io::Result<Sequence> {
    let raw = std::fs::read(path)?;
    parse(&raw).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
}

/// Decode the header division field into a division type and resolution.
///
/// The top bit selects between PPQ (clear: the low 15 bits are ticks per
/// quarter note) and SMPTE (set: the high byte is the negated frame rate, the
/// low byte is ticks per frame).
fn decode_division(division: u16) -> Result<(DivisionType, u16)> {
    if division & 0x8000 != 0 {
        let resolution = division & 0xFF;
        let frames = 256 - ((division >> 8) & 0xFF) as i32;
        let division = match frames {
            24 => DivisionType::Smpte24,
            25 => DivisionType::Smpte25,
            29 => DivisionType::Smpte30Drop,
            30 => DivisionType::Smpte30,
            _ => bail!(err_invalid!("unsupported smpte frame rate")),
        };
        Ok((division, resolution))
    } else {
        Ok((DivisionType::Ppq, division & 0x7FFF))
    }
}

/// The inverse of [`decode_division`].
fn encode_division(division: DivisionType, resolution: u16) -> u16 {
    match division.frames_per_second() {
        None => resolution & 0x7FFF,
        Some(_) => {
            let frames: i16 = match division {
                DivisionType::Smpte24 => 24,
                DivisionType::Smpte25 => 25,
                DivisionType::Smpte30Drop => 29,
                _ => 30,
            };
            (((-frames) << 8) as u16) | (resolution & 0xFF)
        }
    }
}

/// Read one track chunk into a track of absolute-tick events.
fn read_track(raw: &mut &[u8]) -> Result<Track> {
    let magic = read_u32(raw).context(err_invalid!("failed to read track chunk"))?;
    ensure!(magic == TRACK_MAGIC, err_invalid!("expected track chunk"));
    // The declared chunk length is notoriously unreliable; the end-of-track
    // event is the authority on where the track stops.
    let _declared_len = read_u32(raw).context(err_invalid!("failed to read track length"))?;

    let mut track = Track::new();
    let mut running_status: Option<u8> = None;
    let mut ticks: i64 = 0;
    loop {
        ticks += read_varlen(raw).context(err_invalid!("failed to read event deltatime"))? as i64;
        let first = read_u8(raw).context(err_invalid!("failed to read event status"))?;
        let message: MidiMessage = match first {
            0x00..=0x7F => match running_status {
                Some(status) if status < 0xF0 => read_channel_message(raw, status, first)?,
                Some(status) => read_system_data(raw, status, first)?,
                None => bail!(err_invalid!("data byte with no running status active")),
            },
            0x80..=0xEF => {
                let data1 = read_u8(raw).context(err_invalid!("truncated channel message"))?;
                running_status = Some(first);
                read_channel_message(raw, first, data1)?
            }
            0xF0 | 0xF7 => {
                running_status = None;
                let data = read_varlen_slice(raw).context(err_invalid!("truncated sysex event"))?;
                SysexMessage::new(first, data)?.into()
            }
            0xFF => {
                running_status = None;
                let kind = read_u8(raw).context(err_invalid!("failed to read meta type"))?;
                let data = read_varlen_slice(raw).context(err_invalid!("truncated meta event"))?;
                let meta = MetaMessage::new(kind, data)?;
                let done = kind == MetaMessage::END_OF_TRACK;
                track.add(MidiEvent::new(meta, ticks));
                if done {
                    break;
                }
                continue;
            }
            _ => {
                // System common and realtime, 0xF1..=0xF6 / 0xF8..=0xFE
                let data_len = ShortMessage::data_length(first)
                    .context(err_invalid!("invalid event status"))?;
                let data1 = if data_len >= 1 {
                    read_u8(raw).context(err_invalid!("truncated system message"))?
                } else {
                    0
                };
                let data2 = if data_len >= 2 {
                    read_u8(raw).context(err_invalid!("truncated system message"))?
                } else {
                    0
                };
                running_status = Some(first);
                ShortMessage::new(first, data1, data2)?.into()
            }
        };
        track.add(MidiEvent::new(message, ticks));
    }
    Ok(track)
}

/// Finish a channel message whose status and first data byte are known.
fn read_channel_message(raw: &mut &[u8], status: u8, data1: u8) -> Result<MidiMessage> {
    match status & 0xF0 {
        0x80 | 0x90 | 0xA0 | 0xB0 | 0xE0 => {
            let data2 = read_u8(raw).context(err_invalid!("truncated channel message"))?;
            Ok(ShortMessage::new(status, data1, data2)?.into())
        }
        0xC0 | 0xD0 => Ok(ShortMessage::new(status, data1, 0)?.into()),
        _ => bail!(err_invalid!("invalid channel status")),
    }
}

/// Finish a system message running into a stray data byte.
fn read_system_data(raw: &mut &[u8], status: u8, data1: u8) -> Result<MidiMessage> {
    // `status` was accepted when it was first read, so the length lookup
    // cannot fail here.
    let data_len = ShortMessage::data_length(status).context(err_invalid!("invalid event status"))?;
    match data_len {
        2 => {
            let data2 = read_u8(raw).context(err_invalid!("truncated system message"))?;
            Ok(ShortMessage::new(status, data1, data2)?.into())
        }
        1 => Ok(ShortMessage::new(status, data1, 0)?.into()),
        _ => Ok(ShortMessage::new(status, 0, 0)?.into()),
    }
}

/// The file types the given sequence can be written as: type 1 always, type 0
/// only for single-track sequences.
pub fn file_types(sequence: &Sequence) -> &'static [u8] {
    if sequence.tracks.len() > 1 {
        &[1]
    } else {
        &[0, 1]
    }
}

/// Encode a sequence as the bytes of a complete Standard MIDI File.
///
/// `format` must be one of [`file_types`] for this sequence. Tracks are
/// expected to be in tick order (see [`Track::sort_events`]); an event that
/// jumps backwards in time is an error. System realtime messages (status
/// `0xF8` and above) are silently dropped, with their delta time folded into
/// the following event.
pub fn encode(sequence: &Sequence, format: u8) -> Result<Vec<u8>> {
    ensure!(
        file_types(sequence).contains(&format),
        err_invalid!("unsupported midi file type for this sequence")
    );

    let division = encode_division(sequence.division_type(), sequence.resolution());
    let mut out = Vec::with_capacity(
        14 + sequence
            .tracks
            .iter()
            .map(|track| 8 + (track.len() as f32 * EVENT_TO_BYTES) as usize)
            .sum::<usize>(),
    );
    out.extend_from_slice(b"MThd");
    out.extend_from_slice(&6u32.to_be_bytes());
    out.extend_from_slice(&(format as u16).to_be_bytes());
    out.extend_from_slice(&(sequence.tracks.len() as u16).to_be_bytes());
    out.extend_from_slice(&division.to_be_bytes());

    #[cfg(feature = "parallel")]
    {
        let event_count: usize = sequence.tracks.iter().map(Track::len).sum();
        if (event_count as f32 * EVENT_TO_BYTES) > PARALLEL_ENABLE_THRESHOLD as f32 {
            use rayon::prelude::*;

            let chunks = sequence
                .tracks
                .par_iter()
                .map(encode_track_chunk)
                .collect::<Result<Vec<_>>>()?;
            for chunk in chunks {
                out.extend_from_slice(&chunk);
            }
            return Ok(out);
        }
    }

    for track in &sequence.tracks {
        let chunk = encode_track_chunk(track)?;
        out.extend_from_slice(&chunk);
    }
    Ok(out)
}

/// Encode and write a sequence to a `std::io::Write` writer.
///
/// Codec failures are reported as [`io::ErrorKind::InvalidInput`].
pub fn write<W: io::Write>(sequence: &Sequence, format: u8, mut out: W) -> io::Result<()> {
    let bytes =
        encode(sequence, format).map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
    out.write_all(&bytes)
}

/// Encode and write a sequence to a file.
pub fn save<P: AsRef<Path>>(sequence: &Sequence, format: u8, path: P) -> io::Result<()> {
    write(sequence, format, std::fs::File::create(path)?)
}

/// Encode a single track as an `MTrk` chunk, header included.
fn encode_track_chunk(track: &Track) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(8 + (track.len() as f32 * EVENT_TO_BYTES) as usize);
    buf.extend_from_slice(b"MTrk\0\0\0\0");

    let mut last_tick: i64 = 0;
    let mut ended = false;
    for event in track {
        if let MidiMessage::Short(msg) = &event.message {
            // Realtime messages have no place in a file; their delta folds
            // into the next event
            if msg.status() >= 0xF8 {
                continue;
            }
        }
        let delta = event.tick - last_tick;
        ensure!(delta >= 0, err_invalid!("track events not in tick order"));
        ensure!(delta < 1 << 28, err_invalid!("delta time exceeds 28 bits"));
        write_varlen(&mut buf, delta as u32);
        last_tick = event.tick;
        match &event.message {
            MidiMessage::Sysex(msg) => {
                buf.push(msg.status());
                write_varlen_slice(&mut buf, msg.data())?;
            }
            other => buf.extend_from_slice(other.bytes()),
        }
        ended = event.message.is_end_of_track();
    }
    if !ended {
        buf.extend_from_slice(&[0x00, 0xFF, MetaMessage::END_OF_TRACK, 0x00]);
    }

    let body_len = buf.len() - 8;
    ensure!(
        u32::try_from(body_len).is_ok(),
        err_invalid!("track chunk size exceeds 32 bit range")
    );
    buf[4..8].copy_from_slice(&(body_len as u32).to_be_bytes());
    Ok(buf)
}
