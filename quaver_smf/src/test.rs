use crate::{
    encode, file_types, parse, DivisionType, MetaMessage, MidiEvent, MidiMessage, Sequence,
    ShortMessage, Track,
};

fn note_on(channel: u8, key: u8, vel: u8) -> MidiMessage {
    ShortMessage::channel_message(ShortMessage::NOTE_ON, channel, key, vel)
        .unwrap()
        .into()
}

fn note_off(channel: u8, key: u8, vel: u8) -> MidiMessage {
    ShortMessage::channel_message(ShortMessage::NOTE_OFF, channel, key, vel)
        .unwrap()
        .into()
}

/// The events of a track, with the terminal end-of-track stripped.
fn body(track: &Track) -> Vec<MidiEvent> {
    track
        .iter()
        .filter(|ev| !ev.message.is_end_of_track())
        .cloned()
        .collect()
}

#[test]
fn varlen_roundtrip() {
    let mut buf = Vec::new();
    for value in [
        0u32, 1, 0x40, 0x7F, 0x80, 0x81, 0x1234, 0x3FFF, 0x4000, 0x1F_FFFF, 0x20_0000,
        0x0FFF_FFFF,
    ] {
        buf.clear();
        crate::primitive::write_varlen(&mut buf, value);
        assert!(buf.len() <= 4);
        // All but the last byte carry the continuation bit
        for &byte in &buf[..buf.len() - 1] {
            assert!(byte & 0x80 != 0);
        }
        assert_eq!(buf.last().unwrap() & 0x80, 0);
        let mut cursor = &buf[..];
        assert_eq!(crate::primitive::read_varlen(&mut cursor).unwrap(), value);
        assert!(cursor.is_empty());
    }
}

#[test]
fn varlen_minimum_length() {
    let mut buf = Vec::new();
    crate::primitive::write_varlen(&mut buf, 0);
    assert_eq!(buf, [0x00]);
    buf.clear();
    crate::primitive::write_varlen(&mut buf, 0x80);
    assert_eq!(buf, [0x81, 0x00]);
    buf.clear();
    crate::primitive::write_varlen(&mut buf, 480);
    assert_eq!(buf, [0x83, 0x60]);
}

#[test]
fn type0_roundtrip_is_byte_exact() {
    let mut sequence = Sequence::new(DivisionType::Ppq, 480).unwrap();
    let track = sequence.create_track();
    track.add(MidiEvent::new(note_on(0, 60, 100), 0));
    track.add(MidiEvent::new(note_off(0, 60, 0), 480));

    let bytes = encode(&sequence, 0).unwrap();
    let expected_header = [
        0x4D, 0x54, 0x68, 0x64, 0x00, 0x00, 0x00, 0x06, 0x00, 0x00, 0x00, 0x01, 0x01, 0xE0,
    ];
    assert_eq!(&bytes[..14], &expected_header);
    let expected_track = [
        b'M', b'T', b'r', b'k', 0x00, 0x00, 0x00, 0x0D, // 13-byte body
        0x00, 0x90, 0x3C, 0x64, // note on at delta 0
        0x83, 0x60, 0x80, 0x3C, 0x00, // note off at delta 480
        0x00, 0xFF, 0x2F, 0x00, // forced end of track
    ];
    assert_eq!(&bytes[14..], &expected_track);

    let reread = parse(&bytes).unwrap();
    assert_eq!(reread.division_type(), DivisionType::Ppq);
    assert_eq!(reread.resolution(), 480);
    assert_eq!(reread.tracks.len(), 1);
    assert_eq!(body(&reread.tracks[0]), body(&sequence.tracks[0]));
}

#[test]
fn running_status_decode() {
    // Three note-ons and two vel-0 note-offs, all riding the same status byte
    let mut file = Vec::new();
    file.extend_from_slice(&[
        0x4D, 0x54, 0x68, 0x64, 0x00, 0x00, 0x00, 0x06, 0x00, 0x00, 0x00, 0x01, 0x01, 0xE0,
    ]);
    let body_bytes: &[u8] = &[
        0x00, 0x90, 0x3C, 0x64, // explicit status
        0x0A, 0x3E, 0x64, // running status
        0x0A, 0x40, 0x64, 0x0A, 0x3C, 0x00, 0x0A, 0x3E, 0x00, // still running
        0x00, 0xFF, 0x2F, 0x00,
    ];
    file.extend_from_slice(b"MTrk");
    file.extend_from_slice(&(body_bytes.len() as u32).to_be_bytes());
    file.extend_from_slice(body_bytes);

    let sequence = parse(&file).unwrap();
    let events = body(&sequence.tracks[0]);
    assert_eq!(events.len(), 5);
    let statuses: Vec<u8> = events.iter().map(|ev| ev.message.status()).collect();
    assert_eq!(statuses, [0x90, 0x90, 0x90, 0x90, 0x90]);
    let ticks: Vec<i64> = events.iter().map(|ev| ev.tick).collect();
    assert_eq!(ticks, [0, 10, 20, 30, 40]);
}

#[test]
fn smpte30_division_roundtrip() {
    let mut file = Vec::new();
    file.extend_from_slice(&[
        0x4D, 0x54, 0x68, 0x64, 0x00, 0x00, 0x00, 0x06, 0x00, 0x00, 0x00, 0x01, 0xE2, 0x50,
    ]);
    file.extend_from_slice(&[
        b'M', b'T', b'r', b'k', 0x00, 0x00, 0x00, 0x04, 0x00, 0xFF, 0x2F, 0x00,
    ]);

    let sequence = parse(&file).unwrap();
    assert_eq!(sequence.division_type(), DivisionType::Smpte30);
    assert_eq!(sequence.resolution(), 0x50);

    let rewritten = encode(&sequence, 0).unwrap();
    assert_eq!(&rewritten[12..14], &[0xE2, 0x50]);
}

#[test]
fn division_decode_rejects_unknown_frame_rate() {
    // 256 - 0xD0 = 48 frames per second, which is not a thing
    let file = [
        0x4D, 0x54, 0x68, 0x64, 0x00, 0x00, 0x00, 0x06, 0x00, 0x00, 0x00, 0x01, 0xD0, 0x50,
    ];
    assert!(parse(&file).is_err());
}

#[test]
fn division_type_from_frame_rate() {
    assert_eq!(DivisionType::from_frame_rate(0.0), Some(DivisionType::Ppq));
    assert_eq!(
        DivisionType::from_frame_rate(29.97),
        Some(DivisionType::Smpte30Drop)
    );
    assert_eq!(
        DivisionType::from_frame_rate(29.970001),
        Some(DivisionType::Smpte30Drop)
    );
    assert_eq!(DivisionType::from_frame_rate(29.9), None);
    assert_eq!(DivisionType::from_frame_rate(31.0), None);
}

#[test]
fn sort_tie_break_orders_simultaneous_events() {
    let mut track = Track::new();
    track.add(MidiEvent::new(note_off(0, 60, 0), 100));
    track.add(MidiEvent::new(note_on(0, 60, 100), 100));
    track.add(MidiEvent::new(
        MidiMessage::from(
            ShortMessage::channel_message(ShortMessage::CONTROL_CHANGE, 0, 7, 100).unwrap(),
        ),
        100,
    ));
    track.sort_events();

    let commands: Vec<u8> = body(&track)
        .iter()
        .map(|ev| ev.message.status() & 0xF0)
        .collect();
    assert_eq!(commands, [0xB0, 0x90, 0x80]);
}

#[test]
fn sort_normalizes_end_of_track() {
    let mut track = Track::new();
    // Two stray end-of-track events and out-of-order notes
    track.add(MidiEvent::new(MetaMessage::end_of_track(), 5));
    track.add(MidiEvent::new(note_on(0, 64, 90), 200));
    track.add(MidiEvent::new(MetaMessage::end_of_track(), 50));
    track.add(MidiEvent::new(note_on(0, 60, 90), 100));
    track.sort_events();

    assert_eq!(track.len(), 3);
    let last = track.get(2).unwrap();
    assert!(last.message.is_end_of_track());
    assert_eq!(last.tick, 201);
    assert_eq!(track.ticks(), 201);
    // Non-terminal events are in non-decreasing tick order
    assert!(track.get(0).unwrap().tick <= track.get(1).unwrap().tick);

    let mut empty = Track::new();
    empty.sort_events();
    assert_eq!(empty.len(), 1);
    assert_eq!(empty.ticks(), 0);
}

#[test]
fn realtime_messages_are_dropped_on_write() {
    let mut sequence = Sequence::new(DivisionType::Ppq, 96).unwrap();
    let track = sequence.create_track();
    track.add(MidiEvent::new(note_on(0, 60, 100), 0));
    // A timing clock halfway through; its delta folds into the note-off
    track.add(MidiEvent::new(
        MidiMessage::from(ShortMessage::new(ShortMessage::TIMING_CLOCK, 0, 0).unwrap()),
        48,
    ));
    track.add(MidiEvent::new(note_off(0, 60, 0), 96));

    let bytes = encode(&sequence, 0).unwrap();
    let track_body = &bytes[14 + 8..];
    assert_eq!(
        track_body,
        [
            0x00, 0x90, 0x3C, 0x64, // note on
            0x60, 0x80, 0x3C, 0x00, // note off at delta 96, clock gone
            0x00, 0xFF, 0x2F, 0x00,
        ]
    );

    // The reader accepts realtime events inside a track just fine
    let mut file = bytes[..14].to_vec();
    let body_bytes: &[u8] = &[
        0x00, 0x90, 0x3C, 0x64, 0x30, 0xF8, 0x30, 0x80, 0x3C, 0x00, 0x00, 0xFF, 0x2F, 0x00,
    ];
    file.extend_from_slice(b"MTrk");
    file.extend_from_slice(&(body_bytes.len() as u32).to_be_bytes());
    file.extend_from_slice(body_bytes);
    let reread = parse(&file).unwrap();
    assert_eq!(body(&reread.tracks[0]).len(), 3);
}

#[test]
fn sysex_events_roundtrip() {
    let mut sequence = Sequence::new(DivisionType::Ppq, 96).unwrap();
    let track = sequence.create_track();
    track.add(MidiEvent::new(
        MidiMessage::Sysex(
            crate::SysexMessage::new(0xF0, &[0x7E, 0x7F, 0x09, 0x01, 0xF7]).unwrap(),
        ),
        0,
    ));

    let bytes = encode(&sequence, 0).unwrap();
    let track_body = &bytes[14 + 8..];
    assert_eq!(
        track_body,
        [
            0x00, 0xF0, 0x05, 0x7E, 0x7F, 0x09, 0x01, 0xF7, // status, varlen, payload
            0x00, 0xFF, 0x2F, 0x00,
        ]
    );

    let reread = parse(&bytes).unwrap();
    assert_eq!(body(&reread.tracks[0]), body(&sequence.tracks[0]));
}

#[test]
fn meta_events_roundtrip() {
    let mut sequence = Sequence::new(DivisionType::Ppq, 480).unwrap();
    let track = sequence.create_track();
    track.add(MidiEvent::new(MetaMessage::tempo(500_000).unwrap(), 0));
    track.add(MidiEvent::new(
        MetaMessage::new(0x03, b"piano").unwrap(),
        0,
    ));
    track.add(MidiEvent::new(note_on(0, 60, 100), 0));
    track.add(MidiEvent::new(note_off(0, 60, 0), 480));

    let bytes = encode(&sequence, 1).unwrap();
    let reread = parse(&bytes).unwrap();
    let events = body(&reread.tracks[0]);
    assert_eq!(events.len(), 4);
    assert_eq!(events[0].message.tempo_micros(), Some(500_000));
}

#[test]
fn multitrack_write_and_file_types() {
    let mut sequence = Sequence::with_tracks(DivisionType::Ppq, 96, 2).unwrap();
    assert_eq!(file_types(&sequence), &[1]);
    sequence.tracks[0].add(MidiEvent::new(MetaMessage::tempo(600_000).unwrap(), 0));
    sequence.tracks[1].add(MidiEvent::new(note_on(1, 72, 64), 0));
    sequence.tracks[1].add(MidiEvent::new(note_off(1, 72, 0), 96));

    // Type 0 is refused for a multi-track sequence
    assert!(encode(&sequence, 0).is_err());
    assert!(encode(&sequence, 2).is_err());

    let bytes = encode(&sequence, 1).unwrap();
    assert_eq!(&bytes[8..10], &[0x00, 0x01]);
    assert_eq!(&bytes[10..12], &[0x00, 0x02]);
    let reread = parse(&bytes).unwrap();
    assert_eq!(reread.tracks.len(), 2);
    assert_eq!(body(&reread.tracks[1]), body(&sequence.tracks[1]));

    let single = Sequence::with_tracks(DivisionType::Ppq, 96, 1).unwrap();
    assert_eq!(file_types(&single), &[0, 1]);
}

#[test]
fn unordered_track_is_refused_by_writer() {
    let mut sequence = Sequence::new(DivisionType::Ppq, 96).unwrap();
    let track = sequence.create_track();
    track.add(MidiEvent::new(note_on(0, 60, 100), 100));
    track.add(MidiEvent::new(note_off(0, 60, 0), 50));
    assert!(encode(&sequence, 0).is_err());
}

#[test]
fn not_a_midi_file() {
    assert!(parse(b"").is_err());
    assert!(parse(b"GIF89a whatever this is").is_err());
    // Right magic, truncated header
    assert!(parse(&[0x4D, 0x54, 0x68, 0x64, 0x00, 0x00]).is_err());
    // Declares a track that never appears
    assert!(parse(&[
        0x4D, 0x54, 0x68, 0x64, 0x00, 0x00, 0x00, 0x06, 0x00, 0x00, 0x00, 0x01, 0x00, 0x60,
    ])
    .is_err());
}

#[test]
fn header_with_excess_length_is_skipped() {
    let mut file = Vec::new();
    file.extend_from_slice(&[
        0x4D, 0x54, 0x68, 0x64, 0x00, 0x00, 0x00, 0x08, 0x00, 0x00, 0x00, 0x01, 0x00, 0x60,
        0xAB, 0xCD, // two extra header bytes
    ]);
    file.extend_from_slice(&[
        b'M', b'T', b'r', b'k', 0x00, 0x00, 0x00, 0x04, 0x00, 0xFF, 0x2F, 0x00,
    ]);
    let sequence = parse(&file).unwrap();
    assert_eq!(sequence.resolution(), 0x60);
}

#[test]
fn track_length_field_is_not_trusted() {
    let mut file = Vec::new();
    file.extend_from_slice(&[
        0x4D, 0x54, 0x68, 0x64, 0x00, 0x00, 0x00, 0x06, 0x00, 0x00, 0x00, 0x01, 0x00, 0x60,
    ]);
    // Length field claims 2 bytes; the actual body is 8
    file.extend_from_slice(&[
        b'M', b'T', b'r', b'k', 0x00, 0x00, 0x00, 0x02, 0x00, 0x90, 0x3C, 0x64, 0x00, 0xFF, 0x2F,
        0x00,
    ]);
    let sequence = parse(&file).unwrap();
    assert_eq!(body(&sequence.tracks[0]).len(), 1);
}

#[test]
fn rmid_wrapper_is_unwrapped() {
    let mut smf = Vec::new();
    smf.extend_from_slice(&[
        0x4D, 0x54, 0x68, 0x64, 0x00, 0x00, 0x00, 0x06, 0x00, 0x00, 0x00, 0x01, 0x00, 0x60,
    ]);
    smf.extend_from_slice(&[
        b'M', b'T', b'r', b'k', 0x00, 0x00, 0x00, 0x04, 0x00, 0xFF, 0x2F, 0x00,
    ]);

    let mut riff = Vec::new();
    riff.extend_from_slice(b"RIFF");
    riff.extend_from_slice(&((4 + 8 + smf.len()) as u32).to_le_bytes());
    riff.extend_from_slice(b"RMID");
    riff.extend_from_slice(b"data");
    riff.extend_from_slice(&(smf.len() as u32).to_le_bytes());
    riff.extend_from_slice(&smf);

    let sequence = parse(&riff).unwrap();
    assert_eq!(sequence.tracks.len(), 1);
    assert_eq!(sequence.resolution(), 0x60);
}

#[test]
fn sequence_length_queries() {
    let mut sequence = Sequence::new(DivisionType::Ppq, 480).unwrap();
    let track = sequence.create_track();
    track.add(MidiEvent::new(note_on(0, 60, 100), 0));
    track.add(MidiEvent::new(note_off(0, 60, 0), 960));
    track.sort_events();

    assert_eq!(sequence.tick_length(), 961);
    // At the default 2 quarters/second: 961 ticks / (2 * 480) ticks/sec
    let micros = sequence.microsecond_length();
    assert!((1_000_000..1_002_500).contains(&micros), "{}", micros);

    let smpte = Sequence::new(DivisionType::Smpte25, 40).unwrap();
    assert_eq!(smpte.tick_length(), 0);
    assert_eq!(smpte.microsecond_length(), 0);
}

#[test]
fn resolution_range_validation() {
    assert!(Sequence::new(DivisionType::Ppq, 0x7FFF).is_ok());
    assert!(Sequence::new(DivisionType::Ppq, 0x8000).is_err());
    assert!(Sequence::new(DivisionType::Smpte24, 0xFF).is_ok());
    assert!(Sequence::new(DivisionType::Smpte24, 0x100).is_err());
}

#[test]
fn rewrite_is_stable() {
    // Once normalized, write→parse→write is byte-identical
    let mut sequence = Sequence::with_tracks(DivisionType::Ppq, 480, 2).unwrap();
    sequence.tracks[0].add(MidiEvent::new(MetaMessage::tempo(500_000).unwrap(), 0));
    for (i, key) in [60u8, 64, 67].iter().enumerate() {
        sequence.tracks[1].add(MidiEvent::new(note_on(0, *key, 80), i as i64 * 240));
        sequence.tracks[1].add(MidiEvent::new(note_off(0, *key, 0), i as i64 * 240 + 120));
    }
    for track in &mut sequence.tracks {
        track.sort_events();
    }

    let first = encode(&sequence, 1).unwrap();
    let reparsed = parse(&first).unwrap();
    let second = encode(&reparsed, 1).unwrap();
    let rereparsed = parse(&second).unwrap();
    assert_eq!(reparsed, rereparsed);
    assert_eq!(first, second);
}
