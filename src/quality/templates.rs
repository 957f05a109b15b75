//! Just enough of a wikitext template scanner to find assessment banners.
//!
//! Only `{{...}}` transclusions and their parameters are recognized. Triple-brace template
//! arguments are skipped, as are HTML comments and `<nowiki>` sections.

use memchr::memchr3;

/// Nesting depth at which a text is considered malformed.
pub const MAX_DEPTH: usize = 40;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("unterminated template opened at byte {0}")]
    Unterminated(usize),
    #[error("templates nested deeper than {MAX_DEPTH} levels at byte {0}")]
    TooDeep(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param<'a> {
    /// `None` for positional parameters.
    pub name: Option<&'a str>,
    pub value: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template<'a> {
    raw_name: &'a str,
    params: Vec<Param<'a>>,
}

impl<'a> Template<'a> {
    /// Lowercased, trimmed template name with underscores as spaces.
    pub fn name(&self) -> String {
        normalize(self.raw_name)
    }

    pub fn params(&self) -> &[Param<'a>] {
        &self.params
    }

    /// Value of the named parameter. The last occurrence wins, as in MediaWiki.
    pub fn param(&self, name: &str) -> Option<&'a str> {
        self.params
            .iter()
            .rev()
            .find(|param| {
                param
                    .name
                    .is_some_and(|key| key.trim().eq_ignore_ascii_case(name))
            })
            .map(|param| param.value)
    }
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase().replace('_', " ")
}

/// Strip comments from a parameter value and normalize it like a template name.
pub fn clean_value(value: &str) -> String {
    let mut cleaned = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("<!--") {
        cleaned.push_str(&rest[..start]);
        rest = match rest[start..].find("-->") {
            Some(end) => &rest[start + end + 3..],
            None => "",
        };
    }
    cleaned.push_str(rest);
    normalize(&cleaned)
}

enum Open {
    // byte offset of the template content
    Template(usize),
    Argument(usize),
}

impl Open {
    fn offset(&self) -> usize {
        match self {
            Open::Template(offset) | Open::Argument(offset) => *offset,
        }
    }
}

fn run_length(bytes: &[u8], start: usize, byte: u8) -> usize {
    bytes[start..].iter().take_while(|&&b| b == byte).count()
}

fn starts_with_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack
        .get(..needle.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(needle))
}

// position after a comment or nowiki section starting at `at`, or `at + 1` for any other `<`
fn skip_markup(text: &str, at: usize) -> usize {
    let rest = &text[at..];
    if rest.starts_with("<!--") {
        return rest[4..]
            .find("-->")
            .map_or(text.len(), |end| at + 4 + end + 3);
    }
    if starts_with_ignore_case(rest, "<nowiki>") {
        let lower = rest.to_ascii_lowercase();
        return lower
            .find("</nowiki>")
            .map_or(text.len(), |end| at + end + "</nowiki>".len());
    }
    at + 1
}

/// Find every template in `text`, nested ones included.
pub fn parse_templates(text: &str) -> Result<Vec<Template<'_>>, TemplateError> {
    let bytes = text.as_bytes();
    let mut stack: Vec<Open> = Vec::new();
    let mut templates = Vec::new();
    let mut pos = 0;

    while let Some(offset) = memchr3(b'{', b'}', b'<', &bytes[pos..]) {
        let at = pos + offset;
        match bytes[at] {
            b'<' => pos = skip_markup(text, at),
            b'{' => {
                let run = run_length(bytes, at, b'{');
                let mut consumed = 0;
                while run - consumed >= 2 {
                    if run - consumed == 3 {
                        stack.push(Open::Argument(at + consumed + 3));
                        consumed += 3;
                    } else {
                        stack.push(Open::Template(at + consumed + 2));
                        consumed += 2;
                    }
                    if stack.len() > MAX_DEPTH {
                        return Err(TemplateError::TooDeep(at));
                    }
                }
                pos = at + run;
            }
            _ => {
                let run = run_length(bytes, at, b'}');
                let mut consumed = 0;
                while run - consumed >= 2 {
                    match stack.last() {
                        Some(Open::Template(start)) => {
                            templates.push(split_template(&text[*start..at + consumed]));
                            stack.pop();
                            consumed += 2;
                        }
                        Some(Open::Argument(_)) if run - consumed >= 3 => {
                            stack.pop();
                            consumed += 3;
                        }
                        // stray closing braces are plain text
                        _ => break,
                    }
                }
                pos = at + run;
            }
        }
    }

    match stack.first() {
        Some(open) => Err(TemplateError::Unterminated(open.offset())),
        None => Ok(templates),
    }
}

// positions of `separator` outside of nested templates and links
fn top_level_positions(content: &str, separator: u8) -> Vec<usize> {
    let bytes = content.as_bytes();
    let mut positions = Vec::new();
    let mut depth = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        match &bytes[i..] {
            [b'{', b'{', ..] | [b'[', b'[', ..] => {
                depth += 1;
                i += 2;
            }
            [b'}', b'}', ..] | [b']', b']', ..] => {
                depth = depth.saturating_sub(1);
                i += 2;
            }
            [b, ..] => {
                if *b == separator && depth == 0 {
                    positions.push(i);
                }
                i += 1;
            }
            [] => break,
        }
    }
    positions
}

fn split_template(content: &str) -> Template<'_> {
    let mut segments = Vec::new();
    let mut start = 0;
    for end in top_level_positions(content, b'|') {
        segments.push(&content[start..end]);
        start = end + 1;
    }
    segments.push(&content[start..]);

    let raw_name = segments[0];
    let params = segments[1..]
        .iter()
        .map(|segment| match top_level_positions(segment, b'=').first() {
            Some(&eq) => Param {
                name: Some(segment[..eq].trim()),
                value: &segment[eq + 1..],
            },
            None => Param {
                name: None,
                value: segment,
            },
        })
        .collect();

    Template { raw_name, params }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_templates_and_parameters() {
        let text = "Intro {{WikiProject Biography|class=B|importance=low}} outro";
        let templates = parse_templates(text).unwrap();

        assert_eq!(templates.len(), 1);
        assert_eq!(templates[0].name(), "wikiproject biography");
        assert_eq!(templates[0].param("class"), Some("B"));
        assert_eq!(templates[0].param("CLASS"), Some("B"));
        assert_eq!(templates[0].param("missing"), None);
    }

    #[test]
    fn nested_templates_are_found_and_do_not_split_parameters() {
        let text = "{{WikiProject banner shell|1={{WikiProject Physics|class=C}}|blp=yes}}";
        let templates = parse_templates(text).unwrap();

        let names: Vec<_> = templates.iter().map(Template::name).collect();
        assert_eq!(names, ["wikiproject physics", "wikiproject banner shell"]);
        assert_eq!(templates[1].param("blp"), Some("yes"));
        assert_eq!(templates[1].params().len(), 2);
    }

    #[test]
    fn links_do_not_split_parameters() {
        let templates = parse_templates("{{Note|text=[[Foo|bar]]|x=1}}").unwrap();
        assert_eq!(templates[0].param("text"), Some("[[Foo|bar]]"));
    }

    #[test]
    fn positional_parameters_have_no_name() {
        let templates = parse_templates("{{Wikiprojet|Physique|faible|avancement=BD}}").unwrap();
        let params = templates[0].params();
        assert_eq!(params[0], Param { name: None, value: "Physique" });
        assert_eq!(templates[0].param("avancement"), Some("BD"));
    }

    #[test]
    fn comments_and_nowiki_are_skipped() {
        let text = "<!-- {{Broken --> <nowiki>{{Also broken</nowiki> {{Real}}";
        let templates = parse_templates(text).unwrap();
        assert_eq!(templates.len(), 1);
        assert_eq!(templates[0].name(), "real");
    }

    #[test]
    fn template_arguments_are_ignored() {
        let templates = parse_templates("{{Foo|{{{1}}}}}").unwrap();
        assert_eq!(templates.len(), 1);
        assert_eq!(templates[0].name(), "foo");
    }

    #[test]
    fn unterminated_template_is_an_error() {
        assert_eq!(
            parse_templates("ok {{Foo|class=B").unwrap_err(),
            TemplateError::Unterminated(5)
        );
    }

    #[test]
    fn stray_closing_braces_are_text() {
        assert!(parse_templates("}} {{Foo}} }}").unwrap().len() == 1);
    }

    #[test]
    fn deep_nesting_is_an_error() {
        let text = "{{a|".repeat(MAX_DEPTH + 1);
        assert!(matches!(
            parse_templates(&text),
            Err(TemplateError::TooDeep(_))
        ));
    }

    #[test]
    fn values_are_cleaned() {
        assert_eq!(clean_value(" Good_Article <!-- was B --> "), "good article");
        assert_eq!(clean_value("B<!-- unterminated"), "b");
    }
}
