//! Reduction of the edit table to one row per page and half-year.
//!
//! Rows are grouped by page (title and namespace) and then by [`HalfYear`]. Five independent
//! reductions run over every page:
//!
//! 1. edit counts with inclusive and exclusive running sums
//! 2. page age in months at the end of each bin
//! 3. distinct editor counts with running sums
//! 4. the Gini coefficient of edits per editor
//! 5. quality: the highest label rank (carried forward into later bins) and the summed change
//!
//! Counts, age and quality cover every half-year between a page's first and last edit,
//! filling gaps. The Gini coefficient only exists for bins with at least one named editor.
//! The reductions are merged with an outer join, so a bin missing from one of them keeps
//! `None` in the corresponding fields.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDateTime};
use compact_str::CompactString;
use rayon::prelude::*;
use rustc_hash::FxHashMap;

use crate::table::RawEditRow;

/// One of the two six month periods of a calendar year, `half` is 0 for January to June.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HalfYear {
    pub year: i32,
    pub half: u8,
}

impl HalfYear {
    pub fn new(year: i32, half: u8) -> Self {
        debug_assert!(half < 2);
        Self { year, half }
    }

    pub fn of(ts: NaiveDateTime) -> Self {
        Self {
            year: ts.year(),
            half: ((ts.month() - 1) / 6) as u8,
        }
    }

    pub fn next(self) -> Self {
        match self.half {
            0 => Self::new(self.year, 1),
            _ => Self::new(self.year + 1, 0),
        }
    }

    /// Months since year 0 at the end of this bin.
    pub fn end_months(self) -> i32 {
        self.year * 12 + (self.half as i32 + 1) * 6
    }

    /// All bins from `first` to `last`, both included.
    pub fn range(first: Self, last: Self) -> impl Iterator<Item = Self> {
        std::iter::successors(Some(first), |bin| Some(bin.next())).take_while(move |bin| *bin <= last)
    }
}

impl std::fmt::Display for HalfYear {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-H{}", self.year, self.half + 1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageKey {
    pub title: CompactString,
    pub namespace: i32,
}

/// A per-bin count with its running sums over the page's earlier bins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cumulative {
    pub count: u64,
    /// Sum up to and including this bin.
    pub inclusive: u64,
    /// Sum of all earlier bins.
    pub exclusive: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageTimeBin {
    pub key: PageKey,
    pub bin: HalfYear,
    pub page_id: Option<i64>,
    pub edits: Option<Cumulative>,
    pub page_age: Option<i32>,
    pub editors: Option<Cumulative>,
    pub gini_coef: Option<f64>,
    pub max_quality: Option<f64>,
    pub quality_change: Option<i64>,
    pub has_quality_assessment: Option<bool>,
}

impl PageTimeBin {
    fn empty(key: PageKey, bin: HalfYear) -> Self {
        Self {
            key,
            bin,
            page_id: None,
            edits: None,
            page_age: None,
            editors: None,
            gini_coef: None,
            max_quality: None,
            quality_change: None,
            has_quality_assessment: None,
        }
    }
}

/// Gini coefficient of a set of non-negative counts.
///
/// `0` is perfect equality, `(n - 1) / n` means one entry holds everything. Empty input and
/// all-zero input yield `0`.
pub fn gini(counts: &[u64]) -> f64 {
    let total: u64 = counts.iter().sum();
    if total == 0 {
        return 0.0;
    }

    let mut sorted = counts.to_vec();
    sorted.sort_unstable();

    let n = sorted.len() as f64;
    let total = total as f64;
    let weighted: f64 = sorted
        .iter()
        .enumerate()
        .map(|(i, &count)| 2.0 * (i + 1) as f64 * count as f64)
        .sum();

    (weighted - n * total - total) / (n * total)
}

/// One page's rows bucketed by half-year.
struct PageHistory<'a> {
    key: PageKey,
    bins: BTreeMap<HalfYear, Vec<&'a RawEditRow>>,
}

impl<'a> PageHistory<'a> {
    /// Every bin of the page's lifetime with its rows, gaps included.
    fn dense(&self) -> impl Iterator<Item = (HalfYear, &[&'a RawEditRow])> + '_ {
        let span = self.bins.keys().next().zip(self.bins.keys().next_back());
        span.into_iter()
            .flat_map(|(&first, &last)| HalfYear::range(first, last))
            .map(|bin| (bin, self.bins.get(&bin).map_or(&[][..], Vec::as_slice)))
    }
}

fn running_sums(counts: impl Iterator<Item = (HalfYear, u64)>) -> Vec<(HalfYear, Cumulative)> {
    let mut inclusive = 0;
    counts
        .map(|(bin, count)| {
            let exclusive = inclusive;
            inclusive += count;
            (
                bin,
                Cumulative {
                    count,
                    inclusive,
                    exclusive,
                },
            )
        })
        .collect()
}

fn count_edits(page: &PageHistory) -> Vec<(HalfYear, Cumulative)> {
    running_sums(page.dense().map(|(bin, rows)| (bin, rows.len() as u64)))
}

fn page_age(page: &PageHistory) -> Vec<(HalfYear, i32)> {
    let Some(first_edit) = page.bins.values().flatten().map(|row| row.ts).min() else {
        return Vec::new();
    };
    let first_edit_months = first_edit.year() * 12 + first_edit.month() as i32;

    page.dense()
        .map(|(bin, _)| (bin, bin.end_months() - first_edit_months))
        .collect()
}

fn count_editors(page: &PageHistory) -> Vec<(HalfYear, Cumulative)> {
    running_sums(page.dense().map(|(bin, rows)| {
        let mut editors: Vec<&str> = rows.iter().filter_map(|row| row.user_text.as_deref()).collect();
        editors.sort_unstable();
        editors.dedup();
        (bin, editors.len() as u64)
    }))
}

fn editor_gini(page: &PageHistory) -> Vec<(HalfYear, f64)> {
    page.bins
        .iter()
        .filter_map(|(bin, rows)| {
            let mut edits_per_editor: FxHashMap<&str, u64> = FxHashMap::default();
            for editor in rows.iter().filter_map(|row| row.user_text.as_deref()) {
                *edits_per_editor.entry(editor).or_default() += 1;
            }
            if edits_per_editor.is_empty() {
                return None;
            }
            let counts: Vec<u64> = edits_per_editor.into_values().collect();
            Some((*bin, gini(&counts)))
        })
        .collect()
}

fn propagate_quality(page: &PageHistory) -> Vec<(HalfYear, Option<f64>, i64)> {
    let mut carried: Option<f64> = None;
    page.dense()
        .map(|(bin, rows)| {
            let observed = rows
                .iter()
                .filter_map(|row| row.max_quality)
                .reduce(f64::max);
            if observed.is_some() {
                carried = observed;
            }
            let change = rows.iter().filter_map(|row| row.quality_change).sum();
            (bin, carried, change)
        })
        .collect()
}

fn bin_entry<'m>(
    merged: &'m mut BTreeMap<HalfYear, PageTimeBin>,
    key: &PageKey,
    bin: HalfYear,
) -> &'m mut PageTimeBin {
    merged
        .entry(bin)
        .or_insert_with(|| PageTimeBin::empty(key.clone(), bin))
}

fn aggregate_page(page: &PageHistory, page_id: Option<i64>) -> Vec<PageTimeBin> {
    let key = &page.key;
    let mut merged: BTreeMap<HalfYear, PageTimeBin> = BTreeMap::new();

    for (bin, edits) in count_edits(page) {
        let entry = bin_entry(&mut merged, key, bin);
        entry.edits = Some(edits);
        entry.page_id = page_id;
    }
    for (bin, age) in page_age(page) {
        bin_entry(&mut merged, key, bin).page_age = Some(age);
    }
    for (bin, editors) in count_editors(page) {
        bin_entry(&mut merged, key, bin).editors = Some(editors);
    }
    for (bin, coefficient) in editor_gini(page) {
        bin_entry(&mut merged, key, bin).gini_coef = Some(coefficient);
    }
    for (bin, max_quality, change) in propagate_quality(page) {
        let entry = bin_entry(&mut merged, key, bin);
        entry.max_quality = max_quality;
        entry.quality_change = Some(change);
        entry.has_quality_assessment = Some(max_quality.is_some());
    }

    merged.into_values().collect()
}

/// Reduce an edit table to page bins, ordered by title, namespace and bin.
pub fn aggregate(rows: &[RawEditRow]) -> Vec<PageTimeBin> {
    let mut pages: BTreeMap<PageKey, (Option<i64>, BTreeMap<HalfYear, Vec<&RawEditRow>>)> =
        BTreeMap::new();
    for row in rows {
        let key = PageKey {
            title: row.title.clone(),
            namespace: row.namespace,
        };
        let (page_id, bins) = pages.entry(key).or_default();
        // archives that stand in for their live page may carry a different id
        *page_id = Some(page_id.map_or(row.page_id, |id| id.min(row.page_id)));
        bins.entry(HalfYear::of(row.ts)).or_default().push(row);
    }

    tracing::info!(message = "aggregating edits", rows = rows.len(), pages = pages.len());

    let pages: Vec<_> = pages
        .into_iter()
        .map(|(key, (page_id, bins))| (PageHistory { key, bins }, page_id))
        .collect();
    let bins: Vec<PageTimeBin> = pages
        .par_iter()
        .flat_map_iter(|(page, page_id)| aggregate_page(page, *page_id))
        .collect();

    tracing::info!(message = "aggregated edits", bins = bins.len());
    bins
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::prelude::*;

    fn bins_of<'a>(bins: &'a [PageTimeBin], title: &str, namespace: i32) -> Vec<&'a PageTimeBin> {
        bins.iter()
            .filter(|bin| bin.key.title == title && bin.key.namespace == namespace)
            .collect()
    }

    #[test]
    fn half_years_split_in_july() {
        let ts = |s: &str| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap();
        assert_eq!(HalfYear::of(ts("2010-06-30 23:59:59")), HalfYear::new(2010, 0));
        assert_eq!(HalfYear::of(ts("2010-07-01 00:00:00")), HalfYear::new(2010, 1));
        assert_eq!(HalfYear::new(2010, 1).next(), HalfYear::new(2011, 0));
        assert_eq!(HalfYear::new(2010, 1).to_string(), "2010-H2");
    }

    #[test]
    fn gaps_between_edits_are_filled() {
        let rows = vec![
            raw_row("Foo", 0, "a", "2010-02-01 00:00:00"),
            raw_row("Foo", 0, "b", "2010-03-01 00:00:00"),
            raw_row("Foo", 0, "a", "2012-04-01 00:00:00"),
        ];
        let bins = aggregate(&rows);

        let bin_names: Vec<String> = bins.iter().map(|bin| bin.bin.to_string()).collect();
        assert_eq!(bin_names, ["2010-H1", "2010-H2", "2011-H1", "2011-H2", "2012-H1"]);

        let edits: Vec<_> = bins.iter().map(|bin| bin.edits.unwrap()).collect();
        assert_eq!(
            edits.iter().map(|edits| edits.count).collect::<Vec<_>>(),
            [2, 0, 0, 0, 1]
        );
        assert_eq!(
            edits.iter().map(|edits| edits.inclusive).collect::<Vec<_>>(),
            [2, 2, 2, 2, 3]
        );
        assert_eq!(
            edits.iter().map(|edits| edits.exclusive).collect::<Vec<_>>(),
            [0, 2, 2, 2, 2]
        );

        let editors: Vec<_> = bins.iter().map(|bin| bin.editors.unwrap().count).collect();
        assert_eq!(editors, [2, 0, 0, 0, 1]);

        // gap bins have no editors to compare
        assert_eq!(bins[0].gini_coef, Some(0.0));
        assert_eq!(bins[1].gini_coef, None);
        assert_eq!(bins[4].gini_coef, Some(0.0));

        assert!(bins.iter().all(|bin| bin.page_id == Some(1)));
    }

    #[test]
    fn page_age_counts_months_to_the_end_of_each_bin() {
        let rows = vec![
            raw_row("Foo", 0, "a", "2010-05-20 00:00:00"),
            raw_row("Foo", 0, "a", "2010-09-01 00:00:00"),
        ];
        let ages: Vec<_> = aggregate(&rows).iter().map(|bin| bin.page_age).collect();
        assert_eq!(ages, [Some(1), Some(7)]);
    }

    #[test]
    fn quality_is_carried_forward() {
        let mut assessed = raw_row("Foo", 1, "a", "2010-01-01 00:00:00");
        assessed.max_quality = Some(1.0);
        assessed.quality_change = Some(1);
        let mut unassessed = raw_row("Foo", 1, "b", "2011-01-01 00:00:00");
        unassessed.max_quality = None;
        let mut before = raw_row("Bar", 1, "c", "2010-01-01 00:00:00");
        before.max_quality = None;

        let bins = aggregate(&[assessed, unassessed, before]);

        let foo = bins_of(&bins, "Foo", 1);
        assert_eq!(
            foo.iter().map(|bin| bin.max_quality).collect::<Vec<_>>(),
            [Some(1.0), Some(1.0), Some(1.0)]
        );
        assert_eq!(
            foo.iter().map(|bin| bin.quality_change).collect::<Vec<_>>(),
            [Some(1), Some(0), Some(0)]
        );
        assert!(foo.iter().all(|bin| bin.has_quality_assessment == Some(true)));

        let bar = bins_of(&bins, "Bar", 1);
        assert_eq!(bar[0].max_quality, None);
        assert_eq!(bar[0].has_quality_assessment, Some(false));
    }

    #[test]
    fn anonymous_rows_count_as_edits_only() {
        let mut anonymous = raw_row("Foo", 0, "x", "2010-01-01 00:00:00");
        anonymous.user_text = None;
        let bins = aggregate(&[anonymous]);

        assert_eq!(bins.len(), 1);
        assert_eq!(bins[0].edits.unwrap().count, 1);
        assert_eq!(bins[0].editors.unwrap().count, 0);
        assert_eq!(bins[0].gini_coef, None);
    }

    #[test]
    fn namespaces_are_separate_pages() {
        let rows = vec![
            raw_row("Foo", 0, "a", "2010-01-01 00:00:00"),
            raw_row("Foo", 1, "a", "2011-01-01 00:00:00"),
        ];
        let bins = aggregate(&rows);
        assert_eq!(bins_of(&bins, "Foo", 0).len(), 1);
        assert_eq!(bins_of(&bins, "Foo", 1).len(), 1);
    }

    #[test]
    fn gini_matches_known_values() {
        assert_eq!(gini(&[10, 10]), 0.0);
        assert!((gini(&[19, 1]) - 0.45).abs() < 1e-12);
        assert_eq!(gini(&[7]), 0.0);
        assert_eq!(gini(&[]), 0.0);
        assert!((gini(&[0, 0, 0, 5]) - 0.75).abs() < 1e-12);
    }

    proptest! {
        #[test]
        fn gini_stays_within_bounds(counts in proptest::collection::vec(0..1000u64, 1..50)) {
            let coefficient = gini(&counts);
            let n = counts.len() as f64;
            prop_assert!(coefficient >= -1e-12);
            prop_assert!(coefficient <= (n - 1.0) / n + 1e-12);
        }

        #[test]
        fn bins_are_dense_and_sums_monotonic(
            edits in proptest::collection::vec((0..3usize, 2005..2015i32, 1..13u32, 0..4usize), 1..60)
        ) {
            let rows: Vec<_> = edits
                .iter()
                .map(|&(page, year, month, user)| {
                    raw_row(
                        &format!("page {page}"),
                        0,
                        &format!("user {user}"),
                        &format!("{year}-{month:02}-15 00:00:00"),
                    )
                })
                .collect();
            let bins = aggregate(&rows);

            let total: u64 = bins.iter().map(|bin| bin.edits.unwrap().count).sum();
            prop_assert_eq!(total as usize, rows.len());

            for pair in bins.windows(2) {
                if pair[0].key != pair[1].key {
                    continue;
                }
                prop_assert_eq!(pair[0].bin.next(), pair[1].bin);
                let (before, after) = (pair[0].edits.unwrap(), pair[1].edits.unwrap());
                prop_assert!(before.inclusive <= after.inclusive);
                prop_assert_eq!(after.exclusive, before.inclusive);
                let (before, after) = (pair[0].editors.unwrap(), pair[1].editors.unwrap());
                prop_assert!(before.inclusive <= after.inclusive);
            }
        }
    }
}
