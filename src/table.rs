//! On-disk tables: the per-revision edit table and the half-yearly panel.
//!
//! Both tables are comma-separated with every field quoted. Embedded double quotes never
//! reach the writer: titles carry them as [`QUOTE_ESCAPE`](crate::title::QUOTE_ESCAPE) and
//! contributor names have them removed during reduction. Null values are written as empty
//! fields. When reading, numeric and `revert` columns also accept `None` and `NaN` as null,
//! text columns only the empty field, since `None` is a valid user name.

use std::{
    fmt::Display,
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
    path::{Path, PathBuf},
    str::FromStr,
};

use chrono::NaiveDateTime;
use compact_str::CompactString;
use rayon::prelude::*;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::revert::RevertStatus;

/// Timestamp format of the `ts` column.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("I/O error on `{}`", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed table `{}`", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

impl TableError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        TableError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn csv(path: &Path, source: csv::Error) -> Self {
        TableError::Csv {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            TableError::Io { path, .. } | TableError::Csv { path, .. } => path,
        }
    }
}

/// One row of the edit table: a single revision with an identified contributor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEditRow {
    pub page_id: i64,
    pub namespace: i32,
    pub title: CompactString,
    #[serde(deserialize_with = "nullable_text")]
    pub archive: Option<CompactString>,
    #[serde(deserialize_with = "nullable_text")]
    pub user_text: Option<CompactString>,
    #[serde(deserialize_with = "nullable")]
    pub user_id: Option<i64>,
    #[serde(deserialize_with = "nullable")]
    pub revert: Option<RevertStatus>,
    #[serde(with = "timestamp")]
    pub ts: NaiveDateTime,
    #[serde(deserialize_with = "lenient_number")]
    pub quality_change: Option<i64>,
    #[serde(deserialize_with = "lenient_number")]
    pub new_quality_scores: Option<i64>,
    #[serde(deserialize_with = "lenient_number")]
    pub min_quality: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    pub mean_quality: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    pub max_quality: Option<f64>,
    #[serde(deserialize_with = "flag")]
    pub parse_error: bool,
    #[serde(deserialize_with = "flag")]
    pub deleted_text: bool,
}

/// One row of the final panel: an article and its talk page during one half-year.
///
/// Columns suffixed `_0` describe the article, `_1` the talk page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PanelRow {
    pub title: CompactString,
    pub year: i32,
    pub half_year: u8,
    pub edit_count_0: Option<u64>,
    pub cumsum_edit_count_inclusive_0: Option<u64>,
    pub cumsum_edit_count_exclusive_0: Option<u64>,
    pub page_id_0: Option<i64>,
    pub page_age_0: Option<i32>,
    pub editor_count_0: Option<u64>,
    pub cumsum_editor_count_inclusive_0: Option<u64>,
    pub cumsum_editor_count_exclusive_0: Option<u64>,
    #[serde(serialize_with = "float")]
    pub gini_coef_0: Option<f64>,
    pub edit_count_1: Option<u64>,
    pub cumsum_edit_count_inclusive_1: Option<u64>,
    pub cumsum_edit_count_exclusive_1: Option<u64>,
    pub page_id_1: Option<i64>,
    pub page_age_1: Option<i32>,
    pub editor_count_1: Option<u64>,
    pub cumsum_editor_count_inclusive_1: Option<u64>,
    pub cumsum_editor_count_exclusive_1: Option<u64>,
    #[serde(serialize_with = "float")]
    pub gini_coef_1: Option<f64>,
    pub has_quality_assessment_1: Option<bool>,
    #[serde(serialize_with = "float")]
    pub max_quality_1: Option<f64>,
    #[serde(serialize_with = "float")]
    pub quality_change_1: Option<f64>,
    pub lang: CompactString,
}

fn is_null(value: &str) -> bool {
    matches!(value.trim(), "" | "None" | "NaN" | "nan")
}

fn nullable_text<'de, D>(deserializer: D) -> Result<Option<CompactString>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = CompactString::deserialize(deserializer)?;
    Ok((!value.is_empty()).then_some(value))
}

// any null marker becomes `None`, everything else must parse
fn nullable<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: Display,
{
    let value = String::deserialize(deserializer)?;
    if is_null(&value) {
        return Ok(None);
    }
    value
        .parse()
        .map(Some)
        .map_err(serde::de::Error::custom)
}

// numeric coercion, anything unparsable becomes `None`
fn lenient_number<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr + NotNan,
{
    let value = String::deserialize(deserializer)?;
    Ok(value
        .trim()
        .parse::<T>()
        .ok()
        .filter(NotNan::is_not_nan))
}

trait NotNan {
    fn is_not_nan(&self) -> bool;
}

impl NotNan for i64 {
    fn is_not_nan(&self) -> bool {
        true
    }
}

impl NotNan for f64 {
    fn is_not_nan(&self) -> bool {
        !self.is_nan()
    }
}

fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    match value.trim() {
        "true" | "True" | "1" => Ok(true),
        "false" | "False" | "0" | "" => Ok(false),
        other => Err(serde::de::Error::custom(format!(
            "expected a boolean, found `{other}`"
        ))),
    }
}

fn float<S: Serializer>(value: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(value) if value.is_finite() => serializer.serialize_some(value),
        _ => serializer.serialize_none(),
    }
}

mod timestamp {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::TIMESTAMP_FORMAT;

    pub fn serialize<S: Serializer>(ts: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&ts.format(TIMESTAMP_FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<NaiveDateTime, D::Error> {
        let value = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(value.trim(), TIMESTAMP_FORMAT)
            .map_err(serde::de::Error::custom)
    }
}

fn csv_writer<W: Write>(writer: W) -> csv::Writer<W> {
    csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Always)
        .from_writer(writer)
}

/// Streaming writer for the edit table, writes the header with the first row.
pub struct RawEditWriter<W: Write> {
    path: PathBuf,
    writer: csv::Writer<W>,
    rows: usize,
}

impl RawEditWriter<BufWriter<File>> {
    pub fn create(path: &Path) -> Result<Self, TableError> {
        let file = File::create(path).map_err(|e| TableError::io(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: csv_writer(BufWriter::new(file)),
            rows: 0,
        })
    }
}

impl<W: Write> RawEditWriter<W> {
    /// Wrap an arbitrary writer. `name` is only used in error messages.
    pub fn from_writer(writer: W, name: &str) -> Self {
        Self {
            path: PathBuf::from(name),
            writer: csv_writer(writer),
            rows: 0,
        }
    }

    pub fn write_row(&mut self, row: &RawEditRow) -> Result<(), TableError> {
        self.writer
            .serialize(row)
            .map_err(|e| TableError::csv(&self.path, e))?;
        self.rows += 1;
        Ok(())
    }

    pub fn write_rows<'a>(
        &mut self,
        rows: impl IntoIterator<Item = &'a RawEditRow>,
    ) -> Result<usize, TableError> {
        let before = self.rows;
        for row in rows {
            self.write_row(row)?;
        }
        Ok(self.rows - before)
    }

    pub fn rows_written(&self) -> usize {
        self.rows
    }

    pub fn flush(&mut self) -> Result<(), TableError> {
        self.writer
            .flush()
            .map_err(|e| TableError::io(&self.path, e))
    }

    pub fn into_inner(self) -> Result<W, TableError> {
        let path = self.path;
        self.writer
            .into_inner()
            .map_err(|e| TableError::io(&path, e.into_error()))
    }
}

/// Read an edit table, stopping after `limit` rows if given.
pub fn read_raw_edits(path: &Path, limit: Option<usize>) -> Result<Vec<RawEditRow>, TableError> {
    let file = File::open(path).map_err(|e| TableError::io(path, e))?;
    read_raw_edits_from(BufReader::new(file), path, limit)
}

pub fn read_raw_edits_from<R: Read>(
    reader: R,
    path: &Path,
    limit: Option<usize>,
) -> Result<Vec<RawEditRow>, TableError> {
    let mut reader = csv::ReaderBuilder::new().from_reader(reader);
    let limit = limit.unwrap_or(usize::MAX);

    let mut rows = Vec::new();
    for row in reader.deserialize().take(limit) {
        rows.push(row.map_err(|e| TableError::csv(path, e))?);
    }

    tracing::debug!(message = "read edit table", path = %path.display(), rows = rows.len());
    Ok(rows)
}

pub fn write_raw_edits(path: &Path, rows: &[RawEditRow]) -> Result<(), TableError> {
    let mut writer = RawEditWriter::create(path)?;
    writer.write_rows(rows)?;
    writer.flush()
}

pub fn write_panel(path: &Path, rows: &[PanelRow]) -> Result<(), TableError> {
    let file = File::create(path).map_err(|e| TableError::io(path, e))?;
    let mut writer = csv_writer(BufWriter::new(file));
    for row in rows {
        writer
            .serialize(row)
            .map_err(|e| TableError::csv(path, e))?;
    }
    writer.flush().map_err(|e| TableError::io(path, e))
}

/// All `.csv` files directly inside `dir`, sorted by name.
pub fn list_tables(dir: &Path) -> Result<Vec<PathBuf>, TableError> {
    let entries = std::fs::read_dir(dir).map_err(|e| TableError::io(dir, e))?;

    let mut paths = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| TableError::io(dir, e))?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "csv") {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Result of loading several edit tables at once.
#[derive(Debug, Default)]
pub struct ShardLoad {
    pub rows: Vec<RawEditRow>,
    pub failed: Vec<TableError>,
}

/// Read all `paths` in parallel and concatenate them in the given order.
///
/// Files that fail to load are collected in [`ShardLoad::failed`] instead of aborting, the
/// caller decides whether a partial result is acceptable.
pub fn load_shards(paths: &[PathBuf], limit: Option<usize>) -> ShardLoad {
    let results: Vec<_> = paths
        .par_iter()
        .map(|path| read_raw_edits(path, limit))
        .collect();

    let mut load = ShardLoad::default();
    for result in results {
        match result {
            Ok(rows) => load.rows.extend(rows),
            Err(error) => {
                tracing::warn!(message = "failed to load edit table", path = %error.path().display(), error = %error);
                load.failed.push(error);
            }
        }
    }
    load
}

/// Split rows into `bins` groups by equal-width page id ranges.
///
/// All revisions of a page end up in the same bin. Bin `i` covers
/// `[min + i * width, min + (i + 1) * width)`, the last bin is closed at the maximum id.
pub fn shard_by_page_id(rows: Vec<RawEditRow>, bins: usize) -> Vec<Vec<RawEditRow>> {
    let bins = bins.max(1);
    let mut shards: Vec<Vec<RawEditRow>> = (0..bins).map(|_| Vec::new()).collect();

    let (Some(min), Some(max)) = (
        rows.iter().map(|row| row.page_id).min(),
        rows.iter().map(|row| row.page_id).max(),
    ) else {
        return shards;
    };

    let span = (max - min) as f64;
    for row in rows {
        let bin = if span == 0.0 {
            0
        } else {
            let position = (row.page_id - min) as f64 / span;
            ((position * bins as f64) as usize).min(bins - 1)
        };
        shards[bin].push(row);
    }
    shards
}
