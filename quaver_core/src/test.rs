use crate::{MessageKind, MetaMessage, MidiMessage, ShortMessage, SysexMessage};

#[test]
fn short_channel_constructor() {
    let msg = ShortMessage::channel_message(ShortMessage::NOTE_ON, 3, 60, 100).unwrap();
    assert_eq!(msg.bytes(), &[0x93, 60, 100]);
    assert_eq!(msg.command(), ShortMessage::NOTE_ON);
    assert_eq!(msg.channel(), 3);
    assert_eq!(msg.data1(), 60);
    assert_eq!(msg.data2(), 100);
}

#[test]
fn short_status_lengths() {
    // Two data bytes
    for status in [0x80, 0x9F, 0xA5, 0xB0, 0xE7, 0xF2] {
        assert_eq!(ShortMessage::data_length(status).unwrap(), 2, "{:#x}", status);
    }
    // One data byte
    for status in [0xC0, 0xD9, 0xF1, 0xF3] {
        assert_eq!(ShortMessage::data_length(status).unwrap(), 1, "{:#x}", status);
    }
    // Status-only
    for status in [0xF6, 0xF8, 0xF9, 0xFA, 0xFB, 0xFC, 0xFD, 0xFE, 0xFF] {
        assert_eq!(ShortMessage::data_length(status).unwrap(), 0, "{:#x}", status);
    }
    // No defined length
    for status in [0x00, 0x40, 0x7F, 0xF0, 0xF4, 0xF5, 0xF7] {
        assert!(ShortMessage::data_length(status).is_err(), "{:#x}", status);
    }
}

#[test]
fn short_rejects_out_of_range() {
    assert!(ShortMessage::new(0x90, 0x80, 0).is_err());
    assert!(ShortMessage::new(0x90, 0, 0x80).is_err());
    assert!(ShortMessage::channel_message(0x70, 0, 0, 0).is_err());
    assert!(ShortMessage::channel_message(0xF0, 0, 0, 0).is_err());
    assert!(ShortMessage::channel_message(0x90, 16, 0, 0).is_err());
    // Unused data bytes are not validated
    assert!(ShortMessage::new(0xC0, 5, 0xEE).is_ok());
    assert!(ShortMessage::new(0xF8, 0xEE, 0xEE).is_ok());
}

#[test]
fn short_system_lengths_truncate_storage() {
    let msg = ShortMessage::new(ShortMessage::TIMING_CLOCK, 0x12, 0x34).unwrap();
    assert_eq!(msg.bytes(), &[0xF8]);
    assert_eq!(msg.len(), 1);
    let msg = ShortMessage::new(ShortMessage::SONG_SELECT, 0x12, 0x34).unwrap();
    assert_eq!(msg.bytes(), &[0xF3, 0x12]);
}

#[test]
fn sysex_framing() {
    let msg = SysexMessage::new(0xF0, &[0x7E, 0x00, 0x09, 0x01, 0xF7]).unwrap();
    assert_eq!(msg.status(), 0xF0);
    assert_eq!(msg.bytes(), &[0xF0, 0x7E, 0x00, 0x09, 0x01, 0xF7]);
    assert_eq!(msg.data(), &[0x7E, 0x00, 0x09, 0x01, 0xF7]);

    assert!(SysexMessage::new(0xF1, &[]).is_err());
    assert!(SysexMessage::from_bytes(vec![0xF7, 0x01, 0x02]).is_ok());
    assert!(SysexMessage::from_bytes(vec![]).is_err());
}

#[test]
fn meta_layout() {
    let msg = MetaMessage::new(0x03, b"lead").unwrap();
    assert_eq!(msg.bytes(), &[0xFF, 0x03, 0x04, b'l', b'e', b'a', b'd']);
    assert_eq!(msg.kind(), 0x03);
    assert_eq!(msg.data(), b"lead");
    assert_eq!(msg.status(), 0xFF);
}

#[test]
fn meta_long_payload_varlen() {
    let payload = vec![0x55u8; 0x80];
    let msg = MetaMessage::new(0x7F, &payload).unwrap();
    // 0x80 encodes as the two varlen bytes 81 00
    assert_eq!(&msg.bytes()[..4], &[0xFF, 0x7F, 0x81, 0x00]);
    assert_eq!(msg.data().len(), 0x80);
}

#[test]
fn meta_from_bytes_tolerates_overlong_payload() {
    // Length field says 1 but two payload bytes follow; the actual byte count
    // wins.
    let msg = MetaMessage::from_bytes(vec![0xFF, 0x01, 0x01, 0x41, 0x42]).unwrap();
    assert_eq!(msg.data(), &[0x41, 0x42]);
}

#[test]
fn meta_from_bytes_rejects_garbage() {
    assert!(MetaMessage::from_bytes(vec![0xFF, 0x2F]).is_err());
    assert!(MetaMessage::from_bytes(vec![0xFE, 0x2F, 0x00]).is_err());
    assert!(MetaMessage::from_bytes(vec![0xFF, 0x80, 0x00]).is_err());
    // Varlen never terminates
    assert!(MetaMessage::from_bytes(vec![0xFF, 0x01, 0x81, 0x82]).is_err());
}

#[test]
fn tempo_detection() {
    let msg = MetaMessage::tempo(500_000).unwrap();
    assert_eq!(msg.bytes(), &[0xFF, 0x51, 0x03, 0x07, 0xA1, 0x20]);
    assert_eq!(msg.tempo_micros(), Some(500_000));

    // Wrong payload length byte is not a tempo change
    let not_tempo = MetaMessage::from_bytes(vec![0xFF, 0x51, 0x04, 0x07, 0xA1, 0x20, 0x00]).unwrap();
    assert_eq!(not_tempo.tempo_micros(), None);
    assert_eq!(MetaMessage::end_of_track().tempo_micros(), None);
}

#[test]
fn end_of_track_detection() {
    assert!(MetaMessage::end_of_track().is_end_of_track());
    assert!(MetaMessage::new(MetaMessage::END_OF_TRACK, &[]).unwrap().is_end_of_track());
    assert!(!MetaMessage::new(0x2F, &[0x00]).unwrap().is_end_of_track());
}

#[test]
fn classification() {
    let note = MidiMessage::from(ShortMessage::new(0x90, 60, 100).unwrap());
    assert_eq!(note.classify(), MessageKind::Channel);
    assert_eq!(note.channel(), Some(0));

    let clock = MidiMessage::from(ShortMessage::new(0xF8, 0, 0).unwrap());
    assert_eq!(clock.classify(), MessageKind::SystemRealtime);
    assert!(clock.is_system());
    assert_eq!(clock.channel(), None);

    let song_pos = MidiMessage::from(ShortMessage::new(0xF2, 0x10, 0x20).unwrap());
    assert_eq!(song_pos.classify(), MessageKind::SystemCommon);

    let sysex = MidiMessage::from(SysexMessage::new(0xF0, &[0xF7]).unwrap());
    assert_eq!(sysex.classify(), MessageKind::SystemCommon);

    let meta = MidiMessage::from(MetaMessage::end_of_track());
    assert!(meta.is_meta());
    assert_eq!(meta.channel(), None);
}

#[test]
fn decode_live_bytes() {
    let msg = MidiMessage::decode(&[0x90, 0x40, 0x20]).unwrap();
    assert_eq!(msg.bytes(), &[0x90, 0x40, 0x20]);

    // Live FF is System Reset, not a meta event
    let msg = MidiMessage::decode(&[0xFF]).unwrap();
    assert!(matches!(msg, MidiMessage::Short(_)));
    assert!(msg.is_system());

    let msg = MidiMessage::decode(&[0xF0, 0x01, 0x02, 0xF7]).unwrap();
    assert!(matches!(msg, MidiMessage::Sysex(_)));

    assert!(MidiMessage::decode(&[]).is_err());
    assert!(MidiMessage::decode(&[0x40]).is_err());
    assert!(MidiMessage::decode(&[0x90, 0x40]).is_err());
}

#[test]
fn deep_clone_is_independent() {
    let original = MidiMessage::from(MetaMessage::new(0x01, b"take one").unwrap());
    let copy = original.clone();
    assert_eq!(original, copy);
    assert_eq!(copy.bytes(), original.bytes());
}
