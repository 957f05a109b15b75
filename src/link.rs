//! Joining article and talk page bins into panel rows.

use std::collections::{BTreeMap, BTreeSet};

use compact_str::CompactString;

use crate::{
    aggregate::{HalfYear, PageTimeBin},
    preprocess::DropOption,
    table::PanelRow,
    title::TALK_NAMESPACE,
};

const ARTICLE_NAMESPACE: i32 = 0;

/// An article and its talk page during one half-year, either side may be missing.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkedPageTimeBin {
    pub title: CompactString,
    pub bin: HalfYear,
    pub article: Option<PageTimeBin>,
    pub talk: Option<PageTimeBin>,
}

impl LinkedPageTimeBin {
    pub fn is_linked(&self) -> bool {
        let page_id = |side: &Option<PageTimeBin>| side.as_ref().and_then(|bin| bin.page_id);
        page_id(&self.article).is_some() && page_id(&self.talk).is_some()
    }

    // both sides have seen more than one editor and more than one edit
    fn has_multiple_contributions(&self) -> bool {
        let side_ok = |side: &Option<PageTimeBin>| {
            side.as_ref().is_some_and(|bin| {
                bin.editors.is_some_and(|editors| editors.inclusive > 1)
                    && bin.edits.is_some_and(|edits| edits.inclusive > 1)
            })
        };
        side_ok(&self.article) && side_ok(&self.talk)
    }

    pub fn to_panel_row(&self, lang: &str) -> PanelRow {
        let article = self.article.as_ref();
        let talk = self.talk.as_ref();
        let edits = |side: Option<&PageTimeBin>| side.and_then(|bin| bin.edits);
        let editors = |side: Option<&PageTimeBin>| side.and_then(|bin| bin.editors);

        PanelRow {
            title: self.title.clone(),
            year: self.bin.year,
            half_year: self.bin.half,
            edit_count_0: edits(article).map(|c| c.count),
            cumsum_edit_count_inclusive_0: edits(article).map(|c| c.inclusive),
            cumsum_edit_count_exclusive_0: edits(article).map(|c| c.exclusive),
            page_id_0: article.and_then(|bin| bin.page_id),
            page_age_0: article.and_then(|bin| bin.page_age),
            editor_count_0: editors(article).map(|c| c.count),
            cumsum_editor_count_inclusive_0: editors(article).map(|c| c.inclusive),
            cumsum_editor_count_exclusive_0: editors(article).map(|c| c.exclusive),
            gini_coef_0: article.and_then(|bin| bin.gini_coef),
            edit_count_1: edits(talk).map(|c| c.count),
            cumsum_edit_count_inclusive_1: edits(talk).map(|c| c.inclusive),
            cumsum_edit_count_exclusive_1: edits(talk).map(|c| c.exclusive),
            page_id_1: talk.and_then(|bin| bin.page_id),
            page_age_1: talk.and_then(|bin| bin.page_age),
            editor_count_1: editors(talk).map(|c| c.count),
            cumsum_editor_count_inclusive_1: editors(talk).map(|c| c.inclusive),
            cumsum_editor_count_exclusive_1: editors(talk).map(|c| c.exclusive),
            gini_coef_1: talk.and_then(|bin| bin.gini_coef),
            has_quality_assessment_1: talk.and_then(|bin| bin.has_quality_assessment),
            max_quality_1: talk.and_then(|bin| bin.max_quality),
            quality_change_1: talk.and_then(|bin| bin.quality_change).map(|change| change as f64),
            lang: lang.into(),
        }
    }
}

/// Outer join of article and talk page bins on title and half-year.
///
/// Bins of other namespaces are ignored. The result is ordered by title and bin.
pub fn link_namespaces(bins: Vec<PageTimeBin>) -> Vec<LinkedPageTimeBin> {
    let mut linked: BTreeMap<(CompactString, HalfYear), LinkedPageTimeBin> = BTreeMap::new();
    let mut ignored = 0usize;

    for bin in bins {
        let namespace = bin.key.namespace;
        if namespace != ARTICLE_NAMESPACE && namespace != TALK_NAMESPACE {
            ignored += 1;
            continue;
        }

        let entry = linked
            .entry((bin.key.title.clone(), bin.bin))
            .or_insert_with(|| LinkedPageTimeBin {
                title: bin.key.title.clone(),
                bin: bin.bin,
                article: None,
                talk: None,
            });
        if namespace == ARTICLE_NAMESPACE {
            entry.article = Some(bin);
        } else {
            entry.talk = Some(bin);
        }
    }

    if ignored > 0 {
        tracing::warn!(message = "ignored bins outside the article and talk namespaces", bins = ignored);
    }
    tracing::info!(message = "linked articles and talk pages", rows = linked.len());

    linked.into_values().collect()
}

/// Which panel rows to drop after linking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PostFilterConfig {
    /// Drop rows where either side has at most one editor or one edit so far.
    pub drop1: bool,
    /// Drop rows missing the article or the talk page.
    pub unlinked: bool,
}

impl PostFilterConfig {
    pub fn from_drop_options(drop: &BTreeSet<DropOption>) -> Self {
        Self {
            drop1: drop.contains(&DropOption::Drop1),
            unlinked: drop.contains(&DropOption::Unlinked),
        }
    }
}

pub fn post_filter(
    mut rows: Vec<LinkedPageTimeBin>,
    config: PostFilterConfig,
) -> Vec<LinkedPageTimeBin> {
    if config.drop1 {
        let before = rows.len();
        rows.retain(LinkedPageTimeBin::has_multiple_contributions);
        tracing::info!(message = "post-filter stage", stage = "drop1", before, after = rows.len());
    }
    if config.unlinked {
        let before = rows.len();
        rows.retain(LinkedPageTimeBin::is_linked);
        tracing::info!(message = "post-filter stage", stage = "unlinked", before, after = rows.len());
    }
    rows
}
