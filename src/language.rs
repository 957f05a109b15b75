//! Per-language configuration.
//!
//! Every language the pipeline runs on must be registered here with the token that marks
//! archived talk sub-pages (`Talk:Foo/Archive 3`). Unknown codes are rejected up front so that
//! a misconfigured run fails before the first page is read.

use regex::Regex;

use crate::quality::{self, LabelExtractor};

/// Language code → archive sub-page token, as used in talk page titles.
const ARCHIVE_TOKENS: &[(&str, &str)] = &[
    ("en", "archive"),
    ("de", "archiv"),
    ("fr", "archiver"),
    ("es", "archivo"),
    ("ru", "архив"),
    ("it", "archivio"),
    ("ja", "アーカイブ"),
    ("nl", "archief"),
    ("pt", "arquivo"),
    ("pl", "archiwum"),
    ("zh", "檔案"),
    ("sv", "arkiv"),
    ("sh", "Архива"),
    ("vi", "lưu trữ"),
    ("ar", "أرشيف"),
    ("fa", "بایگانی"),
    ("he", "ארכיון"),
    ("ko", "아카이브"),
    ("uk", "архів"),
    ("hu", "archív"),
    ("tr", "arşiv"),
    ("ca", "Arxiu"),
    ("fi", "arkisto"),
    ("no", "arkiv"),
    ("cs", "archiv"),
    ("simple", "archive"),
];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LanguageError {
    #[error("unsupported language `{0}`, no archive token registered")]
    Unsupported(String),
}

#[derive(Debug, Clone)]
pub struct Language {
    code: &'static str,
    // `/<token>`, matched case-insensitively
    archive_marker: Regex,
}

impl Language {
    pub fn from_code(code: &str) -> Result<Self, LanguageError> {
        let code = code.trim();
        let (code, archive_token) = ARCHIVE_TOKENS
            .iter()
            .find(|(known, _)| known.eq_ignore_ascii_case(code))
            .copied()
            .ok_or_else(|| LanguageError::Unsupported(code.to_string()))?;

        let archive_marker = Regex::new(&format!("(?i)/{}", regex::escape(archive_token)))
            .expect("escaped archive token is a valid pattern");

        Ok(Self {
            code,
            archive_marker,
        })
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub(crate) fn archive_marker(&self) -> &Regex {
        &self.archive_marker
    }

    /// The quality label extractor for this language's assessment banners, if there is one.
    pub fn extractor(&self) -> Option<&'static dyn LabelExtractor> {
        quality::extractor_for(self.code).map(|extractor| extractor as &dyn LabelExtractor)
    }

    /// Database name used by Wikimedia dumps of this language's Wikipedia, e.g. `enwiki`.
    pub fn dbname(&self) -> String {
        format!("{}wiki", self.code)
    }

    pub fn supported() -> impl Iterator<Item = &'static str> {
        ARCHIVE_TOKENS.iter().map(|(code, _)| *code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_registered_language_builds() {
        for code in Language::supported() {
            let language = Language::from_code(code).unwrap();
            assert_eq!(language.code(), code);
        }
    }

    #[test]
    fn unknown_language_is_rejected() {
        assert_eq!(
            Language::from_code("xx").unwrap_err(),
            LanguageError::Unsupported("xx".into())
        );
    }

    #[test]
    fn codes_are_matched_case_insensitively() {
        assert_eq!(Language::from_code("EN").unwrap().code(), "en");
    }

    #[test]
    fn extractors_are_registered_for_assessed_languages() {
        assert!(Language::from_code("en").unwrap().extractor().is_some());
        assert!(Language::from_code("simple").unwrap().extractor().is_some());
        assert!(Language::from_code("fr").unwrap().extractor().is_some());
        assert!(Language::from_code("ru").unwrap().extractor().is_some());
        assert!(Language::from_code("de").unwrap().extractor().is_none());
    }
}
