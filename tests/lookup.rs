#![cfg(feature = "std")]

use std::io::Cursor;

use freehub::base::BaseType;
use freehub::definition::{FieldDef, MessageDefinition};
use freehub::encode::EncodeSession;
use freehub::lookup::{lookup_message, Found};

/// Encode a document with three indexed laps (global 19) interleaved with
/// two unindexed events (global 21), returning its record section.
fn fixture() -> Vec<u8> {
    let mut laps = MessageDefinition::new(19, true);
    laps.push_field(FieldDef::new(254, 2, BaseType::UInt16))
        .unwrap();
    laps.push_field(FieldDef::new(0, 4, BaseType::UInt32))
        .unwrap();

    let mut events = MessageDefinition::new(21, true);
    events
        .push_field(FieldDef::new(1, 1, BaseType::UInt8))
        .unwrap();

    let mut session = EncodeSession::<_, 16>::open(Cursor::new(Vec::new())).unwrap();
    session.write_definition(0, &laps).unwrap();
    session.write_definition(1, &events).unwrap();

    for index in 0u16..3 {
        let mut values = Vec::new();
        values.extend_from_slice(&index.to_ne_bytes());
        values.extend_from_slice(&(1000 + u32::from(index)).to_ne_bytes());
        session.write_message(0, &values).unwrap();
        if index < 2 {
            session.write_message(1, &[0x10 + index as u8]).unwrap();
        }
    }

    let doc = session.close().unwrap().into_inner();
    doc[14..doc.len() - 2].to_vec()
}

fn reader(records: &[u8]) -> impl FnMut(u32, &mut [u8]) -> usize + '_ {
    move |offset, buf| {
        let offset = offset as usize;
        if offset >= records.len() {
            return 0;
        }
        let end = records.len().min(offset + buf.len());
        let n = end - offset;
        buf[..n].copy_from_slice(&records[offset..end]);
        n
    }
}

#[test]
fn first_occurrence_without_index() {
    let records = fixture();
    let Found { local, offset } = lookup_message(reader(&records), 19, None).unwrap();

    assert_eq!(local, 0);
    // The body starts with the message index field of the first lap.
    assert_eq!(
        &records[offset as usize..offset as usize + 2],
        &0u16.to_le_bytes(),
    );
}

#[test]
fn indexed_occurrence() {
    let records = fixture();

    for want in 0u16..3 {
        let Found { local, offset } = lookup_message(reader(&records), 19, Some(want)).unwrap();
        assert_eq!(local, 0);
        assert_eq!(
            &records[offset as usize..offset as usize + 2],
            &want.to_le_bytes(),
        );
    }
}

#[test]
fn index_out_of_range() {
    let records = fixture();
    assert_eq!(lookup_message(reader(&records), 19, Some(7)), None);
}

#[test]
fn counted_occurrence_without_index_field() {
    let records = fixture();

    // Events declare no message index field, so occurrences are counted in
    // encounter order.
    let first = lookup_message(reader(&records), 21, Some(0)).unwrap();
    let second = lookup_message(reader(&records), 21, Some(1)).unwrap();

    assert_eq!(first.local, 1);
    assert_eq!(records[first.offset as usize], 0x10);
    assert_eq!(second.local, 1);
    assert_eq!(records[second.offset as usize], 0x11);

    assert_eq!(lookup_message(reader(&records), 21, Some(2)), None);
}

#[test]
fn absent_message_number() {
    let records = fixture();
    assert_eq!(lookup_message(reader(&records), 99, None), None);
}

#[test]
fn data_record_for_unbound_local_number() {
    // A record section starting with a data record has no layout to skip
    // by, so the scan gives up.
    let records = [0x02u8, 0x00, 0x00];
    assert_eq!(lookup_message(reader(&records), 19, None), None);
}
