// SPDX-License-Identifier: MPL-2.0
//! # wikipanel
//!
//! Turns Wikimedia page-history dumps into a longitudinal panel dataset of articles and their talk pages.
//!
//! ## Overview
//!
//! `wikipanel` reads full-history XML dumps (e.g. `enwiki-…-pages-meta-history1.xml.bz2`) and produces two tables:
//!
//! 1. An **edit table** with one row per revision: page, normalized title and archive, contributor, timestamp,
//!    revert status and the quality assessments found on talk pages.
//! 2. A **panel** with one row per article/talk page pair and half-year: edit and editor counts with running sums,
//!    page age, the Gini coefficient of edits per editor and the propagated quality rating.
//!
//! **Key Features:**
//!
//! - **Streaming**: Dumps are read page by page, compressed dumps are decompressed on the fly.
//! - **Parallel Processing**: Pages are reduced in parallel with `rayon`, edit tables are loaded concurrently.
//! - **Robust**: A broken page is skipped and counted, it never ends the run.
//! - **Typed Tables**: Both tables have fixed, typed schemas, so a missing column is a compile error rather than a
//!   runtime surprise.
//!
//! ## Getting Started
//!
//! ### Producing an Edit Table
//!
//! ```no_run
//! use std::path::PathBuf;
//!
//! use wikipanel::{
//!     language::Language,
//!     pipeline::{process_dump, DumpJob},
//!     reducer::ReducerConfig,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let summary = process_dump(DumpJob {
//!         input: PathBuf::from("simplewiki-20240901-pages-meta-history.xml.bz2"),
//!         output: PathBuf::from("simple_edits.csv"),
//!         language: Language::from_code("simple")?,
//!         reducer: ReducerConfig::default(),
//!         num_pages: None,
//!         decompress: false,
//!         overwrite: false,
//!         verify: true,
//!     })?;
//!     println!("{} edits on {} pages", summary.edits, summary.pages);
//!     Ok(())
//! }
//! ```
//!
//! ### Working Page by Page
//!
//! The building blocks can be used on their own. Every page gets a fresh revert detector and quality tracker, so
//! pages can be handed to worker threads freely:
//!
//! ```no_run
//! use std::{fs::File, io::BufReader};
//!
//! use wikipanel::{
//!     dump_parser::DumpParser,
//!     language::Language,
//!     reducer::{reduce_page, ReducerConfig},
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let language = Language::from_code("en")?;
//!     let reader = BufReader::new(File::open("enwiki-20240901-pages-meta-history1.xml")?);
//!     let mut parser = DumpParser::new(reader)?;
//!
//!     while let Some(page) = parser.parse_page()? {
//!         let reduced = reduce_page(&page, &language, language.extractor(), &ReducerConfig::default());
//!         for row in reduced.rows() {
//!             println!("{} {:?} {:?}", row.title, row.user_text, row.revert);
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ### From Edits to the Panel
//!
//! ```no_run
//! use std::path::Path;
//!
//! use wikipanel::{
//!     aggregate::aggregate,
//!     link::{link_namespaces, post_filter, PostFilterConfig},
//!     preprocess::{DropOption, PreprocessConfig, Preprocessor},
//!     table::{read_raw_edits, write_panel},
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let preprocessor = Preprocessor::new(PreprocessConfig {
//!         drop: [DropOption::Reverts, DropOption::DeletedEdits].into(),
//!         ..PreprocessConfig::default()
//!     })?;
//!
//!     let rows = preprocessor.preprocess(read_raw_edits(Path::new("en_edits.csv"), None)?);
//!     let linked = post_filter(link_namespaces(aggregate(&rows)), PostFilterConfig::default());
//!     let panel: Vec<_> = linked.iter().map(|row| row.to_panel_row("en")).collect();
//!     write_panel(Path::new("en_panel.csv"), &panel)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Command Line
//!
//! The `wikipanel` binary wraps the [`pipeline`] drivers:
//!
//! - `process-dump`: dump → edit table
//! - `combine`: many edit tables → one
//! - `shard`: edit tables → N tables split by page id, archives collapsed
//! - `count-edits`: edit table → panel
//!
//! Logging goes through `tracing`; set `RUST_LOG` or pass `--verbose`.
//!
//! ## Modules
//!
//! - [`dump_parser`]: Streaming parser for MediaWiki XML dumps.
//! - [`decompress`]: `.bz2`/`.zst` handling.
//! - [`language`], [`title`]: Language table and title/archive normalization.
//! - [`revert`], [`quality`], [`reducer`]: Per-page reduction to edit table rows.
//! - [`table`]: Edit table and panel schemas and CSV I/O.
//! - [`preprocess`], [`aggregate`], [`link`]: Edit table → panel.
//!
//! ## Features
//!
//! - `strict`: Abort parsing on malformed dump input instead of skipping the affected page.
//!
//! ## License
//!
//! This project is licensed under the Mozilla Public License 2.0.

pub mod aggregate;
pub mod decompress;
pub mod dump_parser;
pub mod language;
pub mod link;
pub mod pipeline;
pub mod preprocess;
pub mod quality;
pub mod reducer;
pub mod revert;
pub mod table;
#[cfg(test)]
mod test_support;
pub mod title;
