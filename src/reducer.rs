//! Reduce one page's revision history to edit table rows.
//!
//! Revert classification is retroactive: a revert marks earlier revisions as reverted. All
//! records of a page are therefore buffered in a [`ReducedPage`] and only turned into rows
//! once the page is complete.

use chrono::NaiveDateTime;
use compact_str::CompactString;
use rustc_hash::FxHashMap;

use crate::{
    dump_parser::Page,
    language::Language,
    quality::{LabelExtractor, QualityObservation, QualityTrackerState},
    revert::{ContentHash, RevertDetectorState, RevertStatus},
    table::RawEditRow,
    title::{normalize_title, NormalizedTitle},
};

#[derive(Debug, Clone, Default)]
pub struct ReducerConfig {
    /// Look-back window of the revert detector in revisions, unbounded if `None`.
    pub revert_radius: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageRecord {
    pub page_id: i64,
    pub namespace: i32,
    pub title: NormalizedTitle,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RevisionRecord {
    pub id: i64,
    pub user_text: Option<CompactString>,
    pub user_id: Option<i64>,
    pub ts: NaiveDateTime,
    pub deleted_text: bool,
    pub revert: Option<RevertStatus>,
    pub quality: QualityObservation,
}

#[derive(Debug, Clone)]
pub struct ReducedPage {
    pub page: PageRecord,
    revisions: Vec<RevisionRecord>,
    by_id: FxHashMap<i64, usize>,
    /// Revisions whose text could not be scanned for assessments.
    pub quality_errors: usize,
}

impl ReducedPage {
    pub fn revisions(&self) -> &[RevisionRecord] {
        &self.revisions
    }

    pub fn get(&self, revision_id: i64) -> Option<&RevisionRecord> {
        self.by_id.get(&revision_id).map(|&i| &self.revisions[i])
    }

    /// Number of rows this page contributes to the edit table.
    pub fn edit_count(&self) -> usize {
        self.revisions.len()
    }

    pub fn rows(&self) -> impl Iterator<Item = RawEditRow> + '_ {
        self.revisions.iter().map(|revision| RawEditRow {
            page_id: self.page.page_id,
            namespace: self.page.namespace,
            title: self.page.title.title.clone(),
            archive: self.page.title.archive.clone(),
            user_text: revision.user_text.clone(),
            user_id: revision.user_id,
            revert: revision.revert,
            ts: revision.ts,
            quality_change: Some(revision.quality.quality_change),
            new_quality_scores: Some(revision.quality.new_assessments),
            min_quality: revision.quality.min_quality,
            mean_quality: revision.quality.mean_quality,
            max_quality: revision.quality.max_quality,
            parse_error: revision.quality.parse_error,
            deleted_text: revision.deleted_text,
        })
    }
}

/// Run a page's revisions through title normalization, revert detection and quality tracking.
///
/// Revisions are processed in the order given. Revisions whose contributor is suppressed
/// still take part in revert detection and quality tracking but produce no record.
pub fn reduce_page(
    page: &Page,
    language: &Language,
    extractor: Option<&dyn LabelExtractor>,
    config: &ReducerConfig,
) -> ReducedPage {
    let title = normalize_title(&page.title, page.namespace, language);

    let mut reverts = RevertDetectorState::with_radius(config.revert_radius);
    let mut quality = QualityTrackerState::new();

    let mut revisions: Vec<RevisionRecord> = Vec::with_capacity(page.revisions.len());
    let mut by_id: FxHashMap<i64, usize> = FxHashMap::default();

    for revision in &page.revisions {
        let revert = ContentHash::of(revision).and_then(|hash| reverts.process(hash, revision.id));

        let observation = match extractor {
            Some(extractor) => quality.extract(page.namespace, revision, extractor),
            None => QualityObservation::default(),
        };

        if let Some(revert) = &revert {
            for reverted in &revert.reverteds {
                // the reverted revision may have had no contributor
                if let Some(&i) = by_id.get(reverted) {
                    revisions[i].revert = Some(RevertStatus::Reverted);
                }
            }
        }

        let Some(contributor) = &revision.contributor else {
            continue;
        };

        by_id.insert(revision.id, revisions.len());
        revisions.push(RevisionRecord {
            id: revision.id,
            user_text: Some(contributor.text.replace('"', "").into()),
            user_id: contributor.id,
            ts: revision.timestamp.naive_utc(),
            deleted_text: revision.text.is_deleted(),
            revert: revert.map(|_| RevertStatus::Reverting),
            quality: observation,
        });
    }

    tracing::debug!(
        message = "reduced page",
        page_id = page.id,
        title = page.title.as_str(),
        revisions = page.revisions.len(),
        edits = revisions.len()
    );

    ReducedPage {
        page: PageRecord {
            page_id: page.id,
            namespace: page.namespace,
            title,
        },
        revisions,
        by_id,
        quality_errors: quality.errors(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dump_parser::{Contributor, Revision, Text},
        test_support::prelude::*,
    };

    fn page(namespace: i32, title: &str, texts: &[&str]) -> Page {
        Page {
            id: 7,
            title: title.into(),
            namespace,
            revisions: texts
                .iter()
                .enumerate()
                .map(|(i, text)| Revision {
                    id: i as i64 + 1,
                    text: Text::Normal(text.to_string()),
                    ..dummy_revision()
                })
                .collect(),
        }
    }

    fn english() -> Language {
        Language::from_code("en").unwrap()
    }

    fn statuses(reduced: &ReducedPage) -> Vec<Option<RevertStatus>> {
        reduced.revisions().iter().map(|r| r.revert).collect()
    }

    #[test]
    fn reverts_are_marked_retroactively() {
        let reduced = reduce_page(&page(0, "Foo", &["A", "B", "A"]), &english(), None, &ReducerConfig::default());

        assert_eq!(
            statuses(&reduced),
            [None, Some(RevertStatus::Reverted), Some(RevertStatus::Reverting)]
        );
    }

    #[test]
    fn a_reverting_revision_can_be_reverted_later() {
        let reduced = reduce_page(
            &page(0, "Foo", &["A", "B", "A", "C", "A"]),
            &english(),
            None,
            &ReducerConfig::default(),
        );

        assert_eq!(
            statuses(&reduced),
            [
                None,
                Some(RevertStatus::Reverted),
                Some(RevertStatus::Reverting),
                Some(RevertStatus::Reverted),
                Some(RevertStatus::Reverting)
            ]
        );
    }

    #[test]
    fn suppressed_contributors_produce_no_rows_but_count_for_reverts() {
        let mut page = page(0, "Foo", &["A", "B", "A"]);
        page.revisions[0].contributor = None;

        let reduced = reduce_page(&page, &english(), None, &ReducerConfig::default());
        assert_eq!(reduced.edit_count(), 2);
        assert!(reduced.get(1).is_none());
        assert_eq!(reduced.get(2).unwrap().revert, Some(RevertStatus::Reverted));
        assert_eq!(reduced.get(3).unwrap().revert, Some(RevertStatus::Reverting));
    }

    #[test]
    fn rows_carry_page_and_contributor_data() {
        let mut page = page(1, "Talk:\"Foo\"/Archive 2", &["{{WikiProject Physics|class=C}}"]);
        page.revisions[0].contributor = Some(Contributor {
            text: "Some \"quoted\" user".into(),
            id: Some(42),
        });

        let reduced = reduce_page(&page, &english(), english().extractor(), &ReducerConfig::default());
        let rows: Vec<_> = reduced.rows().collect();

        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.page_id, 7);
        assert_eq!(row.namespace, 1);
        assert_eq!(row.title, "&quotFoo&quot");
        assert_eq!(row.archive.as_deref(), Some("2"));
        assert_eq!(row.user_text.as_deref(), Some("Some quoted user"));
        assert_eq!(row.user_id, Some(42));
        assert_eq!(row.ts.to_string(), "2010-01-01 00:00:00");
        assert_eq!(row.new_quality_scores, Some(1));
        assert_eq!(row.max_quality, Some(2.0));
        assert!(!row.deleted_text);
    }

    #[test]
    fn deleted_text_is_flagged() {
        let mut page = page(0, "Foo", &["A"]);
        page.revisions[0].text = Text::Deleted;

        let reduced = reduce_page(&page, &english(), None, &ReducerConfig::default());
        assert!(reduced.revisions()[0].deleted_text);
        assert_eq!(reduced.revisions()[0].revert, None);
    }

    #[test]
    fn quality_errors_are_counted_per_page() {
        let page = page(1, "Talk:Foo", &["{{WikiProject Physics|class=C", "{{ok}}"]);
        let reduced = reduce_page(&page, &english(), english().extractor(), &ReducerConfig::default());

        assert_eq!(reduced.quality_errors, 1);
        assert!(reduced.revisions()[0].quality.parse_error);
        assert!(!reduced.revisions()[1].quality.parse_error);
    }

    proptest! {
        #[test]
        fn every_identified_revision_gets_one_row(revisions in proptest_support::revision_history(5, 30)) {
            let page = Page { id: 1, title: "Foo".into(), namespace: 0, revisions };
            let reduced = reduce_page(&page, &english(), None, &ReducerConfig::default());

            prop_assert_eq!(reduced.edit_count(), page.revisions.len());
            for (record, revision) in reduced.revisions().iter().zip(&page.revisions) {
                prop_assert_eq!(record.id, revision.id);
            }
            // the first revision can never revert anything
            prop_assert_ne!(reduced.revisions()[0].revert, Some(RevertStatus::Reverting));
        }
    }
}
