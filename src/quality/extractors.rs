//! Assessment banner extractors for the languages with a known quality scale.

use std::{collections::BTreeSet, sync::LazyLock};

use compact_str::CompactString;
use regex::Regex;

use super::{
    templates::{clean_value, parse_templates, Template, TemplateError},
    Assessment, LabelExtractor, Taxonomy,
};
use crate::title::TALK_NAMESPACE;

/// Extracts one assessment per matching template.
pub struct TemplateExtractor {
    namespaces: &'static [i32],
    taxonomy: Taxonomy,
    from_template: fn(&Template<'_>, &Taxonomy) -> Option<Assessment>,
}

impl LabelExtractor for TemplateExtractor {
    fn namespaces(&self) -> &[i32] {
        self.namespaces
    }

    fn taxonomy(&self) -> &Taxonomy {
        &self.taxonomy
    }

    fn extract(&self, text: &str) -> Result<BTreeSet<Assessment>, TemplateError> {
        Ok(parse_templates(text)?
            .iter()
            .filter_map(|template| (self.from_template)(template, &self.taxonomy))
            .collect())
    }
}

// first matching pattern wins, patterns are anchored at the start of the value
fn match_label(
    value: &str,
    patterns: &[(&str, Regex)],
    taxonomy: &Taxonomy,
) -> Option<super::QualityLabel> {
    let (label, _) = patterns.iter().find(|(_, regex)| regex.is_match(value))?;
    taxonomy.rank(label)
}

fn compile(patterns: &[(&'static str, &str)]) -> Vec<(&'static str, Regex)> {
    patterns
        .iter()
        .map(|(label, pattern)| {
            let regex = Regex::new(&format!("^(?:{pattern})")).expect("label pattern is valid");
            (*label, regex)
        })
        .collect()
}

static ENWIKI_PROJECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:wikiproject|wp)\s*(.+)$").expect("project pattern is valid")
});

static ENWIKI_LABELS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    compile(&[
        ("stub", r"stub\b"),
        ("start", r"start\b"),
        ("c", r"c\b"),
        ("b", r"b\b"),
        ("ga", r"ga\b"),
        ("a", r"a\b"),
        ("fa", r"fa\b"),
    ])
});

fn enwiki_from_template(template: &Template<'_>, taxonomy: &Taxonomy) -> Option<Assessment> {
    let name = template.name();
    let project = ENWIKI_PROJECT.captures(&name)?.get(1)?.as_str().trim();
    let value = clean_value(template.param("class")?);

    match match_label(&value, &ENWIKI_LABELS, taxonomy) {
        Some(label) => Some(Assessment {
            project: project.into(),
            label,
        }),
        None => {
            tracing::trace!(message = "class not in the assessment scale", class = value.as_str());
            None
        }
    }
}

static FRWIKI_LABELS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    compile(&[
        ("e", r"(?:e|ébauche)\b"),
        ("bd", r"(?:bd|bon ?début)\b"),
        ("b", r"b\b"),
        ("a", r"a\b"),
        ("ba", r"ba\b"),
        ("adq", r"adq\b"),
    ])
});

// frwiki banners don't name a single project, every assessment counts for `wikiprojet`
fn frwiki_from_template(template: &Template<'_>, taxonomy: &Taxonomy) -> Option<Assessment> {
    if template.name() != "wikiprojet" {
        return None;
    }
    let value = clean_value(template.param("avancement")?);
    Some(Assessment {
        project: CompactString::const_new("wikiprojet"),
        label: match_label(&value, &FRWIKI_LABELS, taxonomy)?,
    })
}

static RUWIKI_PROJECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^статья[\s_]проекта\b").expect("project pattern is valid"));

static RUWIKI_LABELS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    compile(&[
        ("ИС", "ис"),
        ("ХС", "хс"),
        ("ДС", "дс"),
        ("I", "i$"),
        ("II", "ii$"),
        ("III", "iii"),
        ("IV", "iv"),
    ])
});

fn ruwiki_from_template(template: &Template<'_>, taxonomy: &Taxonomy) -> Option<Assessment> {
    if !RUWIKI_PROJECT.is_match(&template.name()) {
        return None;
    }
    let value = clean_value(template.param("уровень")?);
    Some(Assessment {
        project: CompactString::const_new("wikiproject"),
        label: match_label(&value, &RUWIKI_LABELS, taxonomy)?,
    })
}

static ENWIKI: TemplateExtractor = TemplateExtractor {
    namespaces: &[TALK_NAMESPACE],
    taxonomy: Taxonomy::new(&["stub", "start", "c", "b", "ga", "a", "fa"]),
    from_template: enwiki_from_template,
};

static FRWIKI: TemplateExtractor = TemplateExtractor {
    namespaces: &[TALK_NAMESPACE],
    taxonomy: Taxonomy::new(&["e", "bd", "b", "a", "ba", "adq"]),
    from_template: frwiki_from_template,
};

static RUWIKI: TemplateExtractor = TemplateExtractor {
    namespaces: &[TALK_NAMESPACE],
    taxonomy: Taxonomy::new(&["I", "II", "III", "IV", "ДС", "ХС", "ИС"]),
    from_template: ruwiki_from_template,
};

/// The built-in extractor for a language code. Simple English uses the English banners.
pub fn extractor_for(code: &str) -> Option<&'static TemplateExtractor> {
    match code {
        "en" | "simple" => Some(&ENWIKI),
        "fr" => Some(&FRWIKI),
        "ru" => Some(&RUWIKI),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(extractor: &TemplateExtractor, text: &str) -> Vec<(String, String)> {
        extractor
            .extract(text)
            .unwrap()
            .into_iter()
            .map(|assessment| {
                (
                    assessment.project.to_string(),
                    extractor.taxonomy().name(assessment.label).to_string(),
                )
            })
            .collect()
    }

    #[test]
    fn english_banners_name_their_project() {
        let text = "{{WikiProject Physics|class=B|importance=high}}\n{{WPBiography|class=GA}}";
        assert_eq!(
            labels(&ENWIKI, text),
            [
                ("biography".to_string(), "ga".to_string()),
                ("physics".to_string(), "b".to_string())
            ]
        );
    }

    #[test]
    fn english_classes_outside_the_scale_are_ignored() {
        let text = "{{WikiProject Lists|class=List}}{{WikiProject Physics|class=}}";
        assert!(labels(&ENWIKI, text).is_empty());
    }

    #[test]
    fn other_templates_are_ignored() {
        assert!(labels(&ENWIKI, "{{Talk header}}{{Infobox|class=B}}").is_empty());
    }

    #[test]
    fn french_banners() {
        let text = "{{Wikiprojet|Physique|faible|avancement=Bon début}}";
        assert_eq!(
            labels(&FRWIKI, text),
            [("wikiprojet".to_string(), "bd".to_string())]
        );
        assert_eq!(
            labels(&FRWIKI, "{{Wikiprojet|avancement=AdQ}}"),
            [("wikiprojet".to_string(), "adq".to_string())]
        );
    }

    #[test]
    fn russian_banners() {
        assert_eq!(
            labels(&RUWIKI, "{{Статья проекта Физика|уровень=ХС}}"),
            [("wikiproject".to_string(), "ХС".to_string())]
        );
        assert_eq!(
            labels(&RUWIKI, "{{Статья_проекта История|уровень=iii}}"),
            [("wikiproject".to_string(), "III".to_string())]
        );
        assert_eq!(
            labels(&RUWIKI, "{{Статья проекта История|уровень=II}}"),
            [("wikiproject".to_string(), "II".to_string())]
        );
    }

    #[test]
    fn broken_markup_is_reported() {
        assert!(ENWIKI.extract("{{WikiProject Physics|class=B").is_err());
    }
}
