//! Quality assessment tracking on talk pages.
//!
//! WikiProjects rate articles on an ordered scale by putting a banner template on the talk
//! page. A [`LabelExtractor`] finds the (project, label) pairs in one revision's text and
//! [`QualityTrackerState`] turns the sequence of extractions into per-revision changes.

use std::collections::BTreeSet;

use compact_str::CompactString;
use rustc_hash::FxHashMap;

use crate::dump_parser::{Revision, Text};

mod extractors;
pub mod templates;

pub use extractors::{extractor_for, TemplateExtractor};
pub use templates::TemplateError;

/// Position of a label on its language's scale, lowest quality first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QualityLabel(u8);

impl QualityLabel {
    pub fn rank(self) -> u8 {
        self.0
    }
}

/// An ordered list of quality labels.
#[derive(Debug, Clone, Copy)]
pub struct Taxonomy {
    labels: &'static [&'static str],
}

impl Taxonomy {
    pub const fn new(labels: &'static [&'static str]) -> Self {
        Self { labels }
    }

    pub fn rank(&self, label: &str) -> Option<QualityLabel> {
        self.labels
            .iter()
            .position(|known| *known == label)
            .map(|index| QualityLabel(index as u8))
    }

    pub fn name(&self, label: QualityLabel) -> &'static str {
        self.labels[label.0 as usize]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Assessment {
    pub project: CompactString,
    pub label: QualityLabel,
}

pub trait LabelExtractor: Send + Sync {
    /// Namespaces whose pages carry assessments.
    fn namespaces(&self) -> &[i32];

    fn taxonomy(&self) -> &Taxonomy;

    /// All distinct assessments found in a revision text.
    fn extract(&self, text: &str) -> Result<BTreeSet<Assessment>, TemplateError>;
}

/// Quality bookkeeping result for one revision.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QualityObservation {
    /// Sum of `sign(new rank - old rank)` over re-assessed projects.
    pub quality_change: i64,
    /// Number of projects assessing the page for the first time.
    pub new_assessments: i64,
    pub min_quality: Option<f64>,
    pub mean_quality: Option<f64>,
    pub max_quality: Option<f64>,
    pub parse_error: bool,
}

/// Last known label per project for one page, create a fresh one for every page.
#[derive(Debug, Default)]
pub struct QualityTrackerState {
    labels: FxHashMap<CompactString, QualityLabel>,
    errors: usize,
}

impl QualityTrackerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of revisions whose text could not be parsed.
    pub fn errors(&self) -> usize {
        self.errors
    }

    /// Process the next revision of a page in `namespace`, in chronological order.
    pub fn extract(
        &mut self,
        namespace: i32,
        revision: &Revision,
        extractor: &dyn LabelExtractor,
    ) -> QualityObservation {
        let Text::Normal(text) = &revision.text else {
            return QualityObservation::default();
        };
        if !extractor.namespaces().contains(&namespace) {
            return QualityObservation::default();
        }

        let assessments = match extractor.extract(text) {
            Ok(assessments) => assessments,
            Err(error) => {
                self.errors += 1;
                tracing::warn!(
                    message = "could not parse templates, revision counts as unassessed",
                    revision_id = revision.id,
                    error = %error
                );
                return QualityObservation {
                    parse_error: true,
                    ..QualityObservation::default()
                };
            }
        };

        let mut observation = QualityObservation::default();
        for Assessment { project, label } in &assessments {
            match self.labels.insert(project.clone(), *label) {
                Some(previous) => {
                    observation.quality_change += (label.rank() as i64 - previous.rank() as i64).signum();
                }
                None => observation.new_assessments += 1,
            }
        }

        let ranks = assessments.iter().map(|assessment| assessment.label.rank() as f64);
        observation.min_quality = ranks.clone().reduce(f64::min);
        observation.max_quality = ranks.clone().reduce(f64::max);
        if !assessments.is_empty() {
            observation.mean_quality = Some(ranks.sum::<f64>() / assessments.len() as f64);
        }
        observation
    }
}
