//! Identity reverts: a revision whose content hash equals the hash of an earlier revision of
//! the same page undoes every revision in between.

use std::{fmt, str::FromStr};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::dump_parser::{Revision, Sha1Hash, Text};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RevertStatus {
    Reverting,
    Reverted,
}

impl fmt::Display for RevertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RevertStatus::Reverting => write!(f, "reverting"),
            RevertStatus::Reverted => write!(f, "reverted"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown revert status `{0}`")]
pub struct UnknownRevertStatus(String);

impl FromStr for RevertStatus {
    type Err = UnknownRevertStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "reverting" => Ok(RevertStatus::Reverting),
            "reverted" => Ok(RevertStatus::Reverted),
            other => Err(UnknownRevertStatus(other.to_string())),
        }
    }
}

/// Content identity of a revision.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ContentHash {
    Sha1(Sha1Hash),
    Blake3(blake3::Hash),
}

impl ContentHash {
    /// Hash the text whenever it is available, so that revisions with and without a `<sha1>`
    /// compare equal. The dump's sha1 only stands in for deleted text.
    ///
    /// Returns `None` for deleted text without a sha1, such revisions can't take part in
    /// revert detection.
    pub fn of(revision: &Revision) -> Option<Self> {
        match (&revision.text, &revision.sha1) {
            (Text::Normal(text), _) => Some(ContentHash::Blake3(blake3::hash(text.as_bytes()))),
            (Text::Deleted, Some(sha1)) => Some(ContentHash::Sha1(*sha1)),
            (Text::Deleted, None) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revert {
    /// The earlier revision whose content was restored.
    pub reverted_to: i64,
    /// Revisions between `reverted_to` and the reverting revision, oldest first.
    pub reverteds: Vec<i64>,
}

/// Revert detection state for one page, create a fresh one for every page.
#[derive(Debug, Default)]
pub struct RevertDetectorState {
    history: Vec<i64>,
    last_seen: FxHashMap<ContentHash, usize>,
    radius: Option<usize>,
}

impl RevertDetectorState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only match hashes among the last `radius` revisions.
    pub fn with_radius(radius: Option<usize>) -> Self {
        Self {
            radius,
            ..Self::default()
        }
    }

    /// Feed the next revision of the page.
    ///
    /// Revisions must be fed in chronological order. Identical consecutive hashes count as a
    /// revert with nothing in between.
    pub fn process(&mut self, hash: ContentHash, revision_id: i64) -> Option<Revert> {
        let index = self.history.len();

        let revert = match self.last_seen.get(&hash) {
            Some(&previous) if self.radius.map_or(true, |radius| index - previous <= radius) => {
                Some(Revert {
                    reverted_to: self.history[previous],
                    reverteds: self.history[previous + 1..].to_vec(),
                })
            }
            _ => None,
        };

        self.history.push(revision_id);
        self.last_seen.insert(hash, index);
        revert
    }
}
