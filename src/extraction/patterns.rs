//! Precompiled field patterns and card grouping
//!
//! Text is grouped by its nearest block-level ancestor (a "card"); pattern
//! extraction then takes the first valid match per field in each group.

use crate::config::{FieldKind, FieldSpec, PhoneFormat};
use crate::error::ExtractionError;
use crate::extraction::phone::format_phone;
use regex::Regex;
use scraper::{ElementRef, Html};
use std::collections::HashMap;
use std::sync::OnceLock;

const BLOCK_TAGS: &[&str] = &[
    "p", "li", "tr", "td", "th", "dd", "dt", "div", "article", "section", "address", "h1", "h2",
    "h3", "h4", "h5", "h6", "blockquote", "figure", "figcaption", "main", "body",
];

const EMAIL: &str = r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}";
const PHONE: &str = r"(?:\+?1[\s.\-]?)?\(?\d{3}\)?[\s.\-]?\d{3}[\s.\-]?\d{4}";
const NAME: &str = r"\b[A-Z][a-z]+(?:\s[A-Z]\.)?\s[A-Z][a-z]+(?:-[A-Z][a-z]+)?\b";
const PRICE: &str = r"(?:[$€£]\s?\d{1,3}(?:,\d{3})*(?:\.\d{2})?|\d{1,3}(?:,\d{3})*(?:\.\d{2})?\s?(?:USD|EUR|GBP))";
const ADDRESS: &str = r"\b\d{1,5}\s+(?:[A-Za-z0-9.]+\s){1,5}(?:Street|St|Avenue|Ave|Road|Rd|Boulevard|Blvd|Lane|Ln|Drive|Dr|Court|Ct|Way|Place|Pl)\b\.?(?:,?\s+[A-Za-z][A-Za-z\s]*,\s*[A-Z]{2}\s+\d{5}(?:-\d{4})?)?";
const DATE: &str = r"\b(?:\d{4}-\d{2}-\d{2}|\d{1,2}/\d{1,2}/\d{2,4}|(?:Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Sept|Oct|Nov|Dec)[a-z]*\.?\s+\d{1,2},\s+\d{4})\b";

fn compiled(cell: &'static OnceLock<Regex>, pattern: &str) -> Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static pattern compiles"))
        .clone()
}

/// A compiled matcher for one field
#[derive(Debug, Clone)]
pub struct FieldPattern {
    kind: FieldKind,
    regex: Regex,
    capture: usize,
}

impl FieldPattern {
    /// Build the matcher for a field
    pub fn for_field(field: &FieldSpec) -> Result<Self, ExtractionError> {
        static EMAIL_RE: OnceLock<Regex> = OnceLock::new();
        static PHONE_RE: OnceLock<Regex> = OnceLock::new();
        static NAME_RE: OnceLock<Regex> = OnceLock::new();
        static PRICE_RE: OnceLock<Regex> = OnceLock::new();
        static ADDRESS_RE: OnceLock<Regex> = OnceLock::new();
        static DATE_RE: OnceLock<Regex> = OnceLock::new();

        let kind = field.kind();
        let (regex, capture) = match kind {
            FieldKind::Email => (compiled(&EMAIL_RE, EMAIL), 0),
            FieldKind::Phone => (compiled(&PHONE_RE, PHONE), 0),
            FieldKind::Name => (compiled(&NAME_RE, NAME), 0),
            FieldKind::Price => (compiled(&PRICE_RE, PRICE), 0),
            FieldKind::Address => (compiled(&ADDRESS_RE, ADDRESS), 0),
            FieldKind::Date => (compiled(&DATE_RE, DATE), 0),
            FieldKind::Generic => {
                let label = regex::escape(field.name.trim()).replace('_', r"[\s_]");
                let pattern = format!(r"(?i)\b{}\s*[:\-]\s*([^\n|]{{1,120}})", label);
                let regex = Regex::new(&pattern).map_err(|e| ExtractionError::PatternFailure {
                    field: field.name.clone(),
                    reason: e.to_string(),
                })?;
                (regex, 1)
            }
        };
        Ok(Self {
            kind,
            regex,
            capture,
        })
    }

    /// First valid, normalized match in `text`
    pub fn first_match(&self, text: &str, phone: PhoneFormat) -> Option<String> {
        self.regex.captures_iter(text).find_map(|caps| {
            let raw = caps.get(self.capture)?.as_str();
            normalize_value(self.kind, raw, phone)
        })
    }
}

/// Output form of a raw value; `None` when the value is not valid for its kind
pub fn normalize_value(kind: FieldKind, raw: &str, phone: PhoneFormat) -> Option<String> {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim_matches(|c: char| c == ',' || c == ';' || c.is_whitespace());
    if trimmed.is_empty() {
        return None;
    }
    match kind {
        FieldKind::Email => Some(trimmed.trim_end_matches('.').to_lowercase()),
        FieldKind::Phone => format_phone(trimmed, phone),
        _ => Some(trimmed.to_string()),
    }
}

/// Dedup key: trimmed and lowercased
pub fn dedup_key(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Text of a fragment grouped by nearest block ancestor, in document order
pub fn text_groups(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let mut order = Vec::new();
    let mut groups: HashMap<_, Vec<String>> = HashMap::new();

    for node in document.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        if text.trim().is_empty() {
            continue;
        }
        let mut card = None;
        let mut hidden = false;
        for ancestor in node.ancestors() {
            let Some(el) = ElementRef::wrap(ancestor) else {
                continue;
            };
            let name = el.value().name();
            if matches!(name, "script" | "style" | "noscript") {
                hidden = true;
                break;
            }
            if card.is_none() && BLOCK_TAGS.contains(&name) {
                card = Some(el.id());
            }
        }
        if hidden {
            continue;
        }
        let Some(card) = card else {
            continue;
        };
        groups
            .entry(card)
            .or_insert_with(|| {
                order.push(card);
                Vec::new()
            })
            .push(text.trim().to_string());
    }

    order
        .into_iter()
        .filter_map(|id| groups.remove(&id))
        .map(|parts| parts.join(" "))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn pattern(name: &str) -> FieldPattern {
        FieldPattern::for_field(&FieldSpec::new(name)).unwrap()
    }

    #[test]
    fn test_text_groups_by_card() {
        let html = r#"<div><p>Alice <b>Smith</b></p><p>bob@x.com</p><script>var a = "z@z.com";</script></div>"#;
        let groups = text_groups(html);
        assert_eq!(groups, vec!["Alice Smith".to_string(), "bob@x.com".to_string()]);
    }

    #[test]
    fn test_email_lowercased() {
        let p = pattern("email");
        assert_eq!(
            p.first_match("Write to John.Doe@Example.COM today", PhoneFormat::default()),
            Some("john.doe@example.com".to_string())
        );
    }

    #[test]
    fn test_phone_first_valid_match() {
        let p = pattern("phone");
        let fmt = PhoneFormat {
            country_code: false,
            hyphenate: true,
        };
        assert_eq!(
            p.first_match("Call (612) 555-0199 or 612.555.0100", fmt),
            Some("612-555-0199".to_string())
        );
        assert_eq!(p.first_match("ext 12345", fmt), None);
    }

    #[test]
    fn test_price_date_address_name() {
        let fmt = PhoneFormat::default();
        assert_eq!(pattern("price").first_match("Now only $1,299.99!", fmt).as_deref(), Some("$1,299.99"));
        assert_eq!(pattern("date").first_match("Posted March 3, 2024", fmt).as_deref(), Some("March 3, 2024"));
        assert_eq!(
            pattern("address").first_match("Visit 1200 Main Street, Springfield, MN 55401 soon", fmt).as_deref(),
            Some("1200 Main Street, Springfield, MN 55401")
        );
        assert_eq!(pattern("name").first_match("contact Jane Doe now", fmt).as_deref(), Some("Jane Doe"));
    }

    #[test]
    fn test_generic_label_value() {
        let p = pattern("company_size");
        assert_eq!(
            p.first_match("Company size: 50-200 employees", PhoneFormat::default()),
            Some("50-200 employees".to_string())
        );
    }

    #[test]
    fn test_dedup_key() {
        assert_eq!(dedup_key("  Foo@Bar.com "), "foo@bar.com");
    }
}
