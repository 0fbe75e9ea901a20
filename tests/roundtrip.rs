#![cfg(feature = "std")]

use std::io::Cursor;

use freehub::base::BaseType;
use freehub::check;
use freehub::decode::{DecodeError, DecodeOptions, DecodeSession, DecodeStatus};
use freehub::definition::{DevFieldDef, FieldDef, MessageDefinition};
use freehub::encode::{EncodeError, EncodeSession};

fn drain(doc: &[u8]) -> Vec<(u16, Vec<u8>)> {
    let mut session = DecodeSession::<16>::new(DecodeOptions::default());
    let mut messages = Vec::new();
    let mut i = 0;
    while i < doc.len() {
        let (n, status) = session.read(&doc[i..]).unwrap();
        i += n;
        match status {
            DecodeStatus::MessageAvailable => {
                let message = session.message().unwrap();
                messages.push((message.global(), message.data().to_vec()));
            }
            DecodeStatus::EndOfFile => break,
            DecodeStatus::Continue => {}
        }
    }
    session.end_of_input().unwrap();
    messages
}

fn record_definition() -> MessageDefinition {
    let mut definition = MessageDefinition::new(20, true);
    definition
        .push_field(FieldDef::new(253, 4, BaseType::UInt32))
        .unwrap();
    definition
        .push_field(FieldDef::new(0, 4, BaseType::SInt32))
        .unwrap();
    definition
        .push_field(FieldDef::new(2, 4, BaseType::UInt16)) // uint16[2]
        .unwrap();
    definition
        .push_field(FieldDef::new(3, 1, BaseType::UInt8))
        .unwrap();
    definition
        .push_field(FieldDef::new(13, 1, BaseType::SInt8))
        .unwrap();
    definition
        .push_field(FieldDef::new(30, 4, BaseType::Float32))
        .unwrap();
    definition
        .push_field(FieldDef::new(31, 8, BaseType::Float64))
        .unwrap();
    definition
        .push_field(FieldDef::new(32, 8, BaseType::UInt64))
        .unwrap();
    definition
}

fn record_values(timestamp: u32) -> Vec<u8> {
    let mut values = Vec::new();
    values.extend_from_slice(&timestamp.to_ne_bytes());
    values.extend_from_slice(&(-52_000_000i32).to_ne_bytes());
    values.extend_from_slice(&1500u16.to_ne_bytes());
    values.extend_from_slice(&1501u16.to_ne_bytes());
    values.push(0x62);
    values.extend_from_slice(&(-7i8).to_ne_bytes());
    values.extend_from_slice(&1.25f32.to_ne_bytes());
    values.extend_from_slice(&(-2.5f64).to_ne_bytes());
    values.extend_from_slice(&0x0102_0304_0506_0708u64.to_ne_bytes());
    values
}

#[test]
fn values_survive_roundtrip() {
    let definition = record_definition();

    let mut big_endian = MessageDefinition::new(18, false);
    big_endian
        .push_field(FieldDef::new(7, 4, BaseType::UInt32))
        .unwrap();
    big_endian
        .push_field(FieldDef::new(11, 2, BaseType::UInt16))
        .unwrap();

    let mut session = EncodeSession::<_, 16>::open(Cursor::new(Vec::new())).unwrap();
    session.write_definition(0, &definition).unwrap();
    let first = record_values(0x2000_0000);
    let second = record_values(0x2000_0010);
    session.write_message(0, &first).unwrap();
    session.write_message(0, &second).unwrap();

    session.write_definition(1, &big_endian).unwrap();
    let mut third = Vec::new();
    third.extend_from_slice(&3600u32.to_ne_bytes());
    third.extend_from_slice(&450u16.to_ne_bytes());
    session.write_message(1, &third).unwrap();

    let doc = session.close().unwrap().into_inner();

    assert_eq!(
        drain(&doc),
        vec![(20, first), (20, second), (18, third)],
    );
}

#[test]
fn developer_fields_survive_roundtrip() {
    let mut definition = MessageDefinition::new(20, true);
    definition
        .push_field(FieldDef::new(3, 1, BaseType::UInt8))
        .unwrap();
    definition
        .push_dev_field(DevFieldDef {
            number: 0,
            size: 2,
            developer_index: 0,
        })
        .unwrap();

    let mut session = EncodeSession::<_, 16>::open(Cursor::new(Vec::new())).unwrap();
    session.write_definition(0, &definition).unwrap();
    session.write_message(0, &[0x62, 0xAA, 0xBB]).unwrap();
    let doc = session.close().unwrap().into_inner();

    assert_eq!(drain(&doc), vec![(20, vec![0x62, 0xAA, 0xBB])]);
}

#[test]
fn trailing_check_covers_header_and_records() {
    let mut session = EncodeSession::<_, 16>::open(Cursor::new(Vec::new())).unwrap();
    let definition = record_definition();
    session.write_definition(0, &definition).unwrap();
    session.write_message(0, &record_values(0x2000_0000)).unwrap();
    let doc = session.close().unwrap().into_inner();

    let body = &doc[..doc.len() - 2];
    let trailing = u16::from_le_bytes([doc[doc.len() - 2], doc[doc.len() - 1]]);
    assert_eq!(check::compute(0, body), trailing);

    // Declared payload size excludes the header and the trailing check.
    let declared = u32::from_le_bytes(doc[4..8].try_into().unwrap());
    assert_eq!(declared as usize, doc.len() - 14 - 2);
}

#[test]
fn corruption_flips_the_check() {
    let mut session = EncodeSession::<_, 16>::open(Cursor::new(Vec::new())).unwrap();
    let definition = record_definition();
    session.write_definition(0, &definition).unwrap();
    session.write_message(0, &record_values(0x2000_0000)).unwrap();
    let doc = session.close().unwrap().into_inner();

    // Structurally inert bytes: the definition's reserved byte and the last
    // value byte of the data record.
    for position in [15, doc.len() - 3] {
        let mut corrupted = doc.clone();
        corrupted[position] ^= 0x01;

        let mut session = DecodeSession::<16>::new(DecodeOptions::default());
        let mut i = 0;
        let error = loop {
            match session.read(&corrupted[i..]) {
                Ok((_, DecodeStatus::EndOfFile)) => panic!("corruption went unnoticed"),
                Ok((n, _)) => i += n,
                Err(error) => break error,
            }
        };
        assert!(matches!(error, DecodeError::ChecksumMismatch { .. }));
    }
}

#[test]
fn message_for_unbound_local_number() {
    let mut session = EncodeSession::<_, 16>::open(Cursor::new(Vec::new())).unwrap();
    assert!(matches!(
        session.write_message(0, &[0x62]),
        Err(EncodeError::UnboundLocalMessage(0)),
    ));
}

#[test]
fn message_of_the_wrong_length() {
    let mut session = EncodeSession::<_, 16>::open(Cursor::new(Vec::new())).unwrap();
    let mut definition = MessageDefinition::new(20, true);
    definition
        .push_field(FieldDef::new(3, 1, BaseType::UInt8))
        .unwrap();
    session.write_definition(0, &definition).unwrap();
    assert!(matches!(
        session.write_message(0, &[0x62, 0x63]),
        Err(EncodeError::WrongMessageLength {
            expected: 1,
            found: 2,
        }),
    ));
}

#[test]
fn init_message_writes_invalid_markers() {
    let mut definition = MessageDefinition::new(34, true);
    definition
        .push_field(FieldDef::new(253, 4, BaseType::UInt32))
        .unwrap();
    definition
        .push_field(FieldDef::new(1, 2, BaseType::UInt16))
        .unwrap();
    definition
        .push_field(FieldDef::new(2, 1, BaseType::Enum))
        .unwrap();
    definition
        .push_field(FieldDef::new(5, 2, BaseType::UInt16z))
        .unwrap();
    definition
        .push_field(FieldDef::new(6, 1, BaseType::SInt8))
        .unwrap();

    let mut values = [0u8; 10];
    definition.init_message(&mut values);

    let mut expected = Vec::new();
    expected.extend_from_slice(&u32::MAX.to_ne_bytes());
    expected.extend_from_slice(&u16::MAX.to_ne_bytes());
    expected.push(0xFF);
    expected.extend_from_slice(&0u16.to_ne_bytes());
    expected.push(0x7F);

    assert_eq!(values.as_slice(), expected.as_slice());
}

#[test]
fn omitted_fields_decode_as_markers() {
    let definition = record_definition();
    let total = definition.total_size();

    let mut values = vec![0u8; total];
    definition.init_message(&mut values);

    // Supply only the timestamp; everything else stays omitted.
    values[..4].copy_from_slice(&0x2000_0000u32.to_ne_bytes());

    let mut session = EncodeSession::<_, 16>::open(Cursor::new(Vec::new())).unwrap();
    session.write_definition(0, &definition).unwrap();
    session.write_message(0, &values).unwrap();
    let doc = session.close().unwrap().into_inner();

    let decoded = drain(&doc);
    assert_eq!(decoded, vec![(20, values)]);
}
