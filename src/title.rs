//! Title normalization.
//!
//! Talk pages are linked to their articles by title, so the namespace prefix has to go and
//! archived talk sub-pages (`Talk:Foo/Archive 3`) have to be folded onto their base title.

use std::borrow::Cow;

use compact_str::CompactString;

use crate::language::Language;

/// Stands in for `"` in titles so that table fields never contain a literal quote.
pub const QUOTE_ESCAPE: &str = "&quot";

/// Namespace of talk pages about articles.
pub const TALK_NAMESPACE: i32 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedTitle {
    /// The raw title with quotes escaped, namespace prefix included.
    pub full_title: CompactString,
    /// Base title shared by an article and its talk page.
    pub title: CompactString,
    /// Archive number for archived talk sub-pages, `"0"` if the marker carries no number.
    pub archive: Option<CompactString>,
}

pub fn escape_quotes(value: &str) -> Cow<'_, str> {
    if value.contains('"') {
        Cow::Owned(value.replace('"', QUOTE_ESCAPE))
    } else {
        Cow::Borrowed(value)
    }
}

/// Normalize a raw dump title.
///
/// Only talk pages are touched beyond quote escaping: everything up to the first `:` is
/// removed, and a case-insensitive `/<archive token>` splits off the archive part.
pub fn normalize_title(raw: &str, namespace: i32, language: &Language) -> NormalizedTitle {
    let full_title = CompactString::from(escape_quotes(raw.trim()));

    if namespace != TALK_NAMESPACE {
        return NormalizedTitle {
            title: full_title.clone(),
            full_title,
            archive: None,
        };
    }

    let without_prefix = match full_title.split_once(':') {
        Some((_, rest)) => rest,
        None => full_title.as_str(),
    };

    let marker = language.archive_marker();
    let (title, archive) = match marker.find(without_prefix) {
        Some(found) => {
            let rest = &without_prefix[found.end()..];
            // a second marker ends the archive part
            let archive = match marker.find(rest) {
                Some(next) => &rest[..next.start()],
                None => rest,
            }
            .trim();
            let archive = if archive.is_empty() { "0" } else { archive };
            (&without_prefix[..found.start()], Some(archive.into()))
        }
        None => (without_prefix, None),
    };

    NormalizedTitle {
        title: title.into(),
        archive,
        full_title,
    }
}
