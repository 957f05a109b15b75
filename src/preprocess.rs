//! Row filters applied to the edit table before aggregation.
//!
//! Stages run in a fixed order: revert, parse error, list, deleted and bot filters, then the
//! absolute and relative date thresholds, then the month offset. Archive collapsing always
//! runs last.

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    str::FromStr,
};

use chrono::{Datelike, Months, NaiveDateTime};
use compact_str::CompactString;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::table::{RawEditRow, TIMESTAMP_FORMAT};

/// Rows to drop, before (edit table) or after (panel) aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, clap::ValueEnum)]
pub enum DropOption {
    /// Reverting and reverted edits.
    Reverts,
    /// Edits whose talk page text could not be scanned for assessments.
    #[value(alias = "parse_errors")]
    ParseErrors,
    /// Pages with "list" in the title.
    Lists,
    /// Edits whose text was deleted.
    #[value(alias = "deleted_edits")]
    DeletedEdits,
    /// Edits by accounts on the bot list.
    #[value(alias = "no_bots")]
    Bots,
    /// Panel rows where either page has at most one editor or edit so far.
    Drop1,
    /// Panel rows without both an article and a talk page.
    Unlinked,
}

#[derive(Debug, thiserror::Error)]
pub enum PreprocessError {
    #[error("dropping bot edits requires a bot list")]
    MissingBotList,
    #[error("bot list `{}` does not exist", .0.display())]
    BotListNotFound(PathBuf),
    #[error("could not read bot list `{}`", path.display())]
    BotList {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("invalid date `{0}`, expected YYYY-MM-DD HH:MM:SS")]
    InvalidDate(String, #[source] chrono::ParseError),
    #[error("invalid relative date threshold `{0}`, expected a number followed by d, w, m or y")]
    InvalidRelativeThreshold(String),
}

pub fn parse_date_threshold(value: &str) -> Result<NaiveDateTime, PreprocessError> {
    NaiveDateTime::parse_from_str(value.trim(), TIMESTAMP_FORMAT)
        .map_err(|e| PreprocessError::InvalidDate(value.to_string(), e))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationUnit {
    Days,
    Weeks,
    Months,
    Years,
}

/// A duration after a page's first edit, e.g. `6m` or `2y`. A bare number counts months.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelativeThreshold {
    pub amount: i64,
    pub unit: DurationUnit,
}

impl FromStr for RelativeThreshold {
    type Err = PreprocessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PreprocessError::InvalidRelativeThreshold(s.to_string());
        let trimmed = s.trim();
        let (number, unit) = match trimmed.char_indices().last() {
            Some((i, c)) if c.is_ascii_alphabetic() => (&trimmed[..i], Some(c.to_ascii_lowercase())),
            _ => (trimmed, None),
        };
        let unit = match unit {
            Some('d') => DurationUnit::Days,
            Some('w') => DurationUnit::Weeks,
            Some('m') | None => DurationUnit::Months,
            Some('y') => DurationUnit::Years,
            Some(_) => return Err(invalid()),
        };
        let amount = number.trim().parse().map_err(|_| invalid())?;
        Ok(Self { amount, unit })
    }
}

// completed calendar months from `from` to `to`
fn whole_months(from: NaiveDateTime, to: NaiveDateTime) -> i64 {
    let months = (to.year() - from.year()) as i64 * 12 + to.month() as i64 - from.month() as i64;
    if (to.day(), to.time()) < (from.day(), from.time()) {
        months - 1
    } else {
        months
    }
}

impl RelativeThreshold {
    /// Age of an edit at `ts` in this threshold's unit, for a page first edited at `first`.
    pub fn age(&self, first: NaiveDateTime, ts: NaiveDateTime) -> i64 {
        match self.unit {
            DurationUnit::Days => (ts - first).num_days(),
            DurationUnit::Weeks => (ts - first).num_weeks(),
            DurationUnit::Months => whole_months(first, ts),
            DurationUnit::Years => whole_months(first, ts) / 12,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PreprocessConfig {
    pub drop: BTreeSet<DropOption>,
    pub bot_list: Option<PathBuf>,
    /// Keep edits up to and including this time.
    pub date_threshold: Option<NaiveDateTime>,
    pub relative_date_threshold: Option<RelativeThreshold>,
    /// Shift all timestamps back by this many months.
    pub date_offset: Option<u32>,
}

/// Read bot names, one per row. A `bot_name` header row is skipped.
pub fn read_bot_list(path: &Path) -> Result<FxHashSet<CompactString>, PreprocessError> {
    if !path.is_file() {
        return Err(PreprocessError::BotListNotFound(path.to_path_buf()));
    }
    let bot_list_error = |source| PreprocessError::BotList {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(bot_list_error)?;

    let mut bots = FxHashSet::default();
    for (i, record) in reader.records().enumerate() {
        let record = record.map_err(bot_list_error)?;
        let Some(name) = record.get(0).map(str::trim) else {
            continue;
        };
        if name.is_empty() || (i == 0 && name == "bot_name") {
            continue;
        }
        bots.insert(CompactString::from(name));
    }

    tracing::info!(message = "loaded bot list", path = %path.display(), bots = bots.len());
    Ok(bots)
}

#[derive(Debug)]
pub struct Preprocessor {
    config: PreprocessConfig,
    bots: FxHashSet<CompactString>,
}

fn run_stage(rows: &mut Vec<RawEditRow>, stage: &str, keep: impl FnMut(&RawEditRow) -> bool) {
    let before = rows.len();
    rows.retain(keep);
    let dropped = before - rows.len();
    let percent = if before == 0 {
        0.0
    } else {
        dropped as f64 * 100.0 / before as f64
    };
    tracing::info!(
        message = "preprocessing stage",
        stage,
        before,
        after = rows.len(),
        dropped_percent = format!("{percent:.2}")
    );
}

impl Preprocessor {
    /// Validate the configuration and load the bot list if needed.
    pub fn new(config: PreprocessConfig) -> Result<Self, PreprocessError> {
        let bots = if config.drop.contains(&DropOption::Bots) {
            let path = config
                .bot_list
                .as_deref()
                .ok_or(PreprocessError::MissingBotList)?;
            read_bot_list(path)?
        } else {
            FxHashSet::default()
        };

        Ok(Self { config, bots })
    }

    pub fn preprocess(&self, mut rows: Vec<RawEditRow>) -> Vec<RawEditRow> {
        let drop = &self.config.drop;

        if drop.contains(&DropOption::Reverts) {
            run_stage(&mut rows, "reverts", |row| row.revert.is_none());
        }
        if drop.contains(&DropOption::ParseErrors) {
            run_stage(&mut rows, "parse errors", |row| !row.parse_error);
        }
        if drop.contains(&DropOption::Lists) {
            run_stage(&mut rows, "lists", |row| {
                !row.title.to_lowercase().contains("list")
            });
        }
        if drop.contains(&DropOption::DeletedEdits) {
            run_stage(&mut rows, "deleted edits", |row| !row.deleted_text);
        }
        if drop.contains(&DropOption::Bots) {
            run_stage(&mut rows, "bots", |row| {
                row.user_text
                    .as_ref()
                    .map_or(true, |user| !self.bots.contains(user))
            });
        }

        if let Some(threshold) = self.config.date_threshold {
            run_stage(&mut rows, "date threshold", |row| row.ts <= threshold);
        }

        if let Some(threshold) = self.config.relative_date_threshold {
            let mut first_edits: FxHashMap<(i32, CompactString), NaiveDateTime> =
                FxHashMap::default();
            for row in &rows {
                first_edits
                    .entry((row.namespace, row.title.clone()))
                    .and_modify(|first| *first = (*first).min(row.ts))
                    .or_insert(row.ts);
            }
            run_stage(&mut rows, "relative date threshold", |row| {
                let first = first_edits[&(row.namespace, row.title.clone())];
                threshold.age(first, row.ts) <= threshold.amount
            });
        }

        if let Some(offset) = self.config.date_offset.filter(|&offset| offset > 0) {
            tracing::info!(message = "shifting timestamps", months = offset);
            for row in &mut rows {
                if let Some(shifted) = row.ts.checked_sub_months(Months::new(offset)) {
                    row.ts = shifted;
                }
            }
        }

        collapse_archives(rows)
    }
}

/// Fold archived talk sub-pages onto their live page.
///
/// Archived rows are dropped when the live page has rows. A page that only exists as archives
/// keeps the first archived row seen, so it doesn't vanish from the panel.
pub fn collapse_archives(rows: Vec<RawEditRow>) -> Vec<RawEditRow> {
    let before = rows.len();
    let live: FxHashSet<(i32, CompactString)> = rows
        .iter()
        .filter(|row| row.archive.is_none())
        .map(|row| (row.namespace, row.title.clone()))
        .collect();

    let mut represented = FxHashSet::default();
    let mut kept = Vec::with_capacity(live.len());
    let mut representatives = Vec::new();
    for row in rows {
        if row.archive.is_none() {
            kept.push(row);
            continue;
        }
        let key = (row.namespace, row.title.clone());
        if !live.contains(&key) && represented.insert(key) {
            representatives.push(row);
        }
    }
    kept.append(&mut representatives);

    tracing::info!(
        message = "collapsed archives",
        before,
        after = kept.len(),
        archive_only_pages = represented.len()
    );
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{revert::RevertStatus, test_support::prelude::*};

    fn config(drop: &[DropOption]) -> PreprocessConfig {
        PreprocessConfig {
            drop: drop.iter().copied().collect(),
            ..PreprocessConfig::default()
        }
    }

    fn users(rows: &[RawEditRow]) -> Vec<&str> {
        rows.iter()
            .map(|row| row.user_text.as_deref().unwrap_or("-"))
            .collect()
    }

    #[test]
    fn flag_filters_drop_matching_rows() {
        let mut reverted = raw_row("Foo", 0, "a", "2010-01-01 00:00:00");
        reverted.revert = Some(RevertStatus::Reverted);
        let mut broken = raw_row("Foo", 1, "b", "2010-01-01 00:00:00");
        broken.parse_error = true;
        let mut deleted = raw_row("Foo", 0, "c", "2010-01-01 00:00:00");
        deleted.deleted_text = true;
        let list = raw_row("List of foos", 0, "d", "2010-01-01 00:00:00");
        let keep = raw_row("Foo", 0, "e", "2010-01-01 00:00:00");
        let rows = vec![reverted, broken, deleted, list, keep];

        let preprocessor = Preprocessor::new(config(&[
            DropOption::Reverts,
            DropOption::ParseErrors,
            DropOption::DeletedEdits,
            DropOption::Lists,
        ]))
        .unwrap();
        assert_eq!(users(&preprocessor.preprocess(rows.clone())), ["e"]);

        let nothing = Preprocessor::new(config(&[])).unwrap();
        assert_eq!(nothing.preprocess(rows).len(), 5);
    }

    #[test]
    fn bots_require_a_list() {
        assert!(matches!(
            Preprocessor::new(config(&[DropOption::Bots])),
            Err(PreprocessError::MissingBotList)
        ));

        let missing = PreprocessConfig {
            bot_list: Some("does/not/exist.csv".into()),
            ..config(&[DropOption::Bots])
        };
        assert!(matches!(
            Preprocessor::new(missing),
            Err(PreprocessError::BotListNotFound(_))
        ));
    }

    #[test]
    fn bot_edits_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bots.csv");
        std::fs::write(&path, "bot_name\nClueBot NG\n\"SmackBot\"\n").unwrap();

        let preprocessor = Preprocessor::new(PreprocessConfig {
            bot_list: Some(path),
            ..config(&[DropOption::Bots])
        })
        .unwrap();
        let mut anonymous = raw_row("Foo", 0, "x", "2010-01-01 00:00:00");
        anonymous.user_text = None;
        let rows = vec![
            raw_row("Foo", 0, "ClueBot NG", "2010-01-01 00:00:00"),
            raw_row("Foo", 0, "Alice", "2010-01-01 00:00:00"),
            raw_row("Foo", 0, "SmackBot", "2010-01-01 00:00:00"),
            anonymous,
        ];

        assert_eq!(users(&preprocessor.preprocess(rows)), ["Alice", "-"]);
    }

    #[test]
    fn date_threshold_is_inclusive() {
        let preprocessor = Preprocessor::new(PreprocessConfig {
            date_threshold: Some(parse_date_threshold("2010-06-30 23:59:59").unwrap()),
            ..PreprocessConfig::default()
        })
        .unwrap();
        let rows = vec![
            raw_row("Foo", 0, "a", "2010-06-30 23:59:59"),
            raw_row("Foo", 0, "b", "2010-07-01 00:00:00"),
        ];
        assert_eq!(users(&preprocessor.preprocess(rows)), ["a"]);
    }

    #[test]
    fn relative_threshold_counts_from_each_page_start() {
        let preprocessor = Preprocessor::new(PreprocessConfig {
            relative_date_threshold: Some("6m".parse().unwrap()),
            ..PreprocessConfig::default()
        })
        .unwrap();
        let rows = vec![
            raw_row("Foo", 0, "a", "2010-01-15 12:00:00"),
            raw_row("Foo", 0, "b", "2010-07-15 12:00:00"),
            raw_row("Foo", 0, "c", "2010-08-15 11:00:00"),
            raw_row("Foo", 0, "d", "2010-08-15 12:00:00"),
            raw_row("Bar", 0, "e", "2012-01-01 00:00:00"),
            raw_row("Bar", 0, "f", "2012-05-01 00:00:00"),
        ];
        assert_eq!(
            users(&preprocessor.preprocess(rows)),
            ["a", "b", "c", "e", "f"]
        );
    }

    #[test]
    fn relative_thresholds_parse() {
        let parse = |s: &str| s.parse::<RelativeThreshold>().unwrap();
        assert_eq!(parse("30d"), RelativeThreshold { amount: 30, unit: DurationUnit::Days });
        assert_eq!(parse("4W"), RelativeThreshold { amount: 4, unit: DurationUnit::Weeks });
        assert_eq!(parse("2y"), RelativeThreshold { amount: 2, unit: DurationUnit::Years });
        assert_eq!(parse("12"), RelativeThreshold { amount: 12, unit: DurationUnit::Months });
        assert!("3q".parse::<RelativeThreshold>().is_err());
        assert!("m".parse::<RelativeThreshold>().is_err());
    }

    #[test]
    fn offset_shifts_timestamps() {
        let preprocessor = Preprocessor::new(PreprocessConfig {
            date_offset: Some(4),
            ..PreprocessConfig::default()
        })
        .unwrap();
        let rows = preprocessor.preprocess(vec![raw_row("Foo", 0, "a", "2010-05-31 10:00:00")]);
        assert_eq!(rows[0].ts.to_string(), "2010-01-31 10:00:00");
    }

    fn archived(title: &str, archive: &str, user: &str) -> RawEditRow {
        RawEditRow {
            archive: Some(archive.into()),
            ..raw_row(title, 1, user, "2010-01-01 00:00:00")
        }
    }

    #[test]
    fn archives_collapse_onto_live_pages() {
        let rows = vec![
            archived("Foo", "1", "a"),
            raw_row("Foo", 1, "b", "2010-01-01 00:00:00"),
            archived("Bar", "1", "c"),
            archived("Bar", "2", "d"),
            raw_row("Bar", 0, "e", "2010-01-01 00:00:00"),
        ];

        let collapsed = collapse_archives(rows);
        // Foo keeps its live talk page only, Bar's talk page survives through its first archive
        assert_eq!(users(&collapsed), ["b", "e", "c"]);
    }

    proptest! {
        #[test]
        fn collapsing_is_idempotent(
            rows in proptest::collection::vec(
                (0..4usize, 0..2i32, proptest::option::of(0..3u8)),
                0..30,
            )
        ) {
            let rows: Vec<_> = rows
                .into_iter()
                .enumerate()
                .map(|(i, (title, namespace, archive))| RawEditRow {
                    archive: archive.map(|a| a.to_string().into()),
                    ..raw_row(&format!("title {title}"), namespace, &format!("user {i}"), "2010-01-01 00:00:00")
                })
                .collect();

            let once = collapse_archives(rows);
            let twice = collapse_archives(once.clone());
            prop_assert_eq!(once, twice);
        }
    }
}
