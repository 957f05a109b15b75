use std::io::Cursor;

use chrono::{DateTime, NaiveDateTime};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};

use crate::{
    dump_parser::{Contributor, Page, Revision, Text},
    table::{RawEditRow, TIMESTAMP_FORMAT},
};

pub mod prelude {
    pub(crate) use super::proptest as proptest_support;
    pub(crate) use super::{dummy_revision, page_to_xml, raw_row};
    pub(crate) use proptest::prelude::*;
}

pub fn dummy_revision() -> Revision {
    Revision {
        id: 0,
        // 2010-01-01T00:00:00Z, whole seconds so it survives the dump timestamp format
        timestamp: DateTime::from_timestamp(1_262_304_000, 0).unwrap(),
        contributor: Some(Contributor {
            text: "Dummy".into(),
            id: Some(1),
        }),
        text: Text::Normal("dummy text".into()),
        sha1: None,
    }
}

/// A minimal edit table row, everything not given is null or zero.
pub fn raw_row(title: &str, namespace: i32, user_text: &str, ts: &str) -> RawEditRow {
    RawEditRow {
        page_id: 1,
        namespace,
        title: title.into(),
        archive: None,
        user_text: Some(user_text.into()),
        user_id: None,
        revert: None,
        ts: NaiveDateTime::parse_from_str(ts, TIMESTAMP_FORMAT).unwrap(),
        quality_change: Some(0),
        new_quality_scores: Some(0),
        min_quality: None,
        mean_quality: None,
        max_quality: None,
        parse_error: false,
        deleted_text: false,
    }
}

fn write_text_element<W: std::io::Write>(writer: &mut quick_xml::Writer<W>, name: &str, text: &str) {
    writer
        .write_event(Event::Start(BytesStart::new(name)))
        .unwrap();
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .unwrap();
    writer.write_event(Event::End(BytesEnd::new(name))).unwrap();
}

/// Render pages as a complete `enwiki` dump with `Talk` as namespace 1.
pub fn page_to_xml(pages: &[Page]) -> String {
    // Source: https://github.com/mediawiki-utilities/python-mwtypes/blob/523a93f98fe1372938fc15872b5abb1f267cc643/mwtypes/timestamp.py#L12
    const TIMESTAMP_FORMAT_LONG: &str = "%Y-%m-%dT%H:%M:%SZ";

    let mut xml = Vec::new();
    let mut writer = quick_xml::Writer::new(Cursor::new(&mut xml));

    writer
        .write_event(Event::Start(
            BytesStart::new("mediawiki").with_attributes([("version", "0.11"), ("xml:lang", "en")]),
        ))
        .unwrap();
    writer
        .write_event(Event::Start(BytesStart::new("siteinfo")))
        .unwrap();
    write_text_element(&mut writer, "sitename", "Wikipedia");
    write_text_element(&mut writer, "dbname", "enwiki");
    writer
        .write_event(Event::Start(BytesStart::new("namespaces")))
        .unwrap();
    writer
        .write_event(Event::Empty(
            BytesStart::new("namespace").with_attributes([("key", "0"), ("case", "first-letter")]),
        ))
        .unwrap();
    writer
        .write_event(Event::Start(
            BytesStart::new("namespace").with_attributes([("key", "1"), ("case", "first-letter")]),
        ))
        .unwrap();
    writer
        .write_event(Event::Text(BytesText::new("Talk")))
        .unwrap();
    writer
        .write_event(Event::End(BytesEnd::new("namespace")))
        .unwrap();
    writer
        .write_event(Event::End(BytesEnd::new("namespaces")))
        .unwrap();
    writer
        .write_event(Event::End(BytesEnd::new("siteinfo")))
        .unwrap();

    for page in pages {
        writer
            .write_event(Event::Start(BytesStart::new("page")))
            .unwrap();
        write_text_element(&mut writer, "title", &page.title);
        write_text_element(&mut writer, "ns", &page.namespace.to_string());
        write_text_element(&mut writer, "id", &page.id.to_string());

        for revision in &page.revisions {
            writer
                .write_event(Event::Start(BytesStart::new("revision")))
                .unwrap();
            write_text_element(&mut writer, "id", &revision.id.to_string());
            write_text_element(
                &mut writer,
                "timestamp",
                &revision.timestamp.format(TIMESTAMP_FORMAT_LONG).to_string(),
            );

            match &revision.contributor {
                Some(Contributor { text, id: Some(id) }) => {
                    writer
                        .write_event(Event::Start(BytesStart::new("contributor")))
                        .unwrap();
                    write_text_element(&mut writer, "username", text);
                    write_text_element(&mut writer, "id", &id.to_string());
                    writer
                        .write_event(Event::End(BytesEnd::new("contributor")))
                        .unwrap();
                }
                Some(Contributor { text, id: None }) => {
                    writer
                        .write_event(Event::Start(BytesStart::new("contributor")))
                        .unwrap();
                    write_text_element(&mut writer, "ip", text);
                    writer
                        .write_event(Event::End(BytesEnd::new("contributor")))
                        .unwrap();
                }
                None => {
                    writer
                        .write_event(Event::Empty(
                            BytesStart::new("contributor").with_attributes([("deleted", "deleted")]),
                        ))
                        .unwrap();
                }
            }

            let sha1 = revision
                .sha1
                .as_ref()
                .map(|sha1| std::str::from_utf8(&sha1.0).unwrap());
            let bytes_str = revision.text.len().to_string();
            let mut attributes = vec![("xml:space", "preserve"), ("bytes", bytes_str.as_str())];
            if let Some(sha1) = sha1 {
                attributes.push(("sha1", sha1));
            }

            match &revision.text {
                Text::Normal(text) if !text.is_empty() => {
                    writer
                        .write_event(Event::Start(
                            BytesStart::new("text").with_attributes(attributes),
                        ))
                        .unwrap();
                    writer
                        .write_event(Event::Text(BytesText::new(text)))
                        .unwrap();
                    writer
                        .write_event(Event::End(BytesEnd::new("text")))
                        .unwrap();
                }
                Text::Normal(_) => {
                    writer
                        .write_event(Event::Empty(
                            BytesStart::new("text").with_attributes(attributes),
                        ))
                        .unwrap();
                }
                Text::Deleted => {
                    attributes.push(("deleted", "deleted"));
                    writer
                        .write_event(Event::Empty(
                            BytesStart::new("text").with_attributes(attributes),
                        ))
                        .unwrap();
                }
            }

            if let Some(sha1) = sha1 {
                write_text_element(&mut writer, "sha1", sha1);
            }
            writer
                .write_event(Event::End(BytesEnd::new("revision")))
                .unwrap();
        }

        writer
            .write_event(Event::End(BytesEnd::new("page")))
            .unwrap();
    }

    writer
        .write_event(Event::End(BytesEnd::new("mediawiki")))
        .unwrap();
    writer.write_event(Event::Eof).unwrap();

    String::from_utf8(xml).unwrap()
}

pub mod proptest {
    use proptest::prelude::*;
    use proptest::strategy::Strategy;

    use crate::dump_parser::{Revision, Sha1Hash, Text};

    use super::dummy_revision;

    /// Stand-in for the dump's base36 sha1: the same text always gets the same hash.
    pub fn sha1_of(text: &str) -> Sha1Hash {
        let hash = blake3::hash(text.as_bytes()).to_hex();
        Sha1Hash(hash.as_bytes()[..31].try_into().unwrap())
    }

    /// Texts drawn from a small pool so that identical revisions (reverts) are common.
    pub fn pooled_text(pool_size: usize) -> impl Strategy<Value = Text> {
        prop_oneof![
            1 => Just(Text::Deleted),
            8 => (0..pool_size).prop_map(|i| Text::Normal(format!("version {i}"))),
        ]
    }

    pub fn revision_history(
        pool_size: usize,
        max_revisions: usize,
    ) -> impl Strategy<Value = Vec<Revision>> {
        proptest::collection::vec(
            (pooled_text(pool_size), proptest::bool::weighted(0.9)),
            1..max_revisions,
        )
        .prop_map(|texts| {
            texts
                .into_iter()
                .enumerate()
                .map(|(i, (text, has_hash))| {
                    let sha1 = match (&text, has_hash) {
                        (Text::Normal(text), true) => Some(sha1_of(text)),
                        _ => None,
                    };
                    Revision {
                        id: i as i64 + 1,
                        text,
                        sha1,
                        ..dummy_revision()
                    }
                })
                .collect()
        })
    }
}
