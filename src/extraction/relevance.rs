//! Content relevance scoring
//!
//! Reduces a page to the single block-level container most likely to hold
//! its content. Chrome (navigation, headers, footers, ad slots) and thin
//! containers are rejected outright; survivors are scored on semantics,
//! child count, text volume, nesting depth, and structural diversity.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::OnceLock;
use tracing::debug;

/// Minimum score a winner needs
pub const ACCEPT_THRESHOLD: i64 = 50;

const MIN_CHILDREN: usize = 3;
const MIN_TEXT_CHARS: usize = 100;

const CANDIDATE_TAGS: &str =
    "div, section, article, main, ul, ol, table, tbody, form, nav, header, footer, aside";
const REJECTED_TAGS: &[&str] = &["script", "style", "nav", "header", "footer", "aside", "noscript"];
const SEMANTIC_TAGS: &[&str] = &["article", "main", "section"];
const CHROME_CLASS_WORDS: &[&str] = &["navbar", "footer", "header", "sidebar", "banner"];
const AD_TOKENS: &[&str] = &["ad", "ads", "advert", "advertisement", "sponsored"];

/// Why a candidate was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Script, style, or page-chrome tag
    ChromeTag,
    /// Class names mark navigation, ads, or banners
    ChromeClass,
    /// Fewer than three element children
    TooFewChildren,
    /// Less than 100 characters of visible text
    TooLittleText,
}

/// Score of one candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Score {
    /// Not eligible
    Rejected(RejectReason),
    /// Eligible with the given score
    Scored(i64),
}

/// The chosen content subtree of a page
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentFragment {
    /// Outer HTML of the winner (empty when nothing qualified)
    pub html: String,
    /// Byte length of `html`
    pub size: usize,
    /// Winner's score (best rejected-by-threshold score when empty)
    pub score: i64,
}

impl ContentFragment {
    /// Explicit empty result
    pub fn empty(best_score: i64) -> Self {
        Self {
            html: String::new(),
            size: 0,
            score: best_score,
        }
    }

    /// Whether no container qualified
    pub fn is_empty(&self) -> bool {
        self.html.is_empty()
    }
}

/// Content relevance scorer
pub struct RelevanceScorer;

impl RelevanceScorer {
    /// Pick the most relevant fragment of a page
    pub fn select(html: &str) -> ContentFragment {
        let document = Html::parse_document(html);
        let Ok(selector) = Selector::parse(CANDIDATE_TAGS) else {
            return ContentFragment::empty(0);
        };

        let mut best: Option<(i64, ElementRef)> = None;
        for el in document.select(&selector) {
            if let Score::Scored(score) = Self::score(el) {
                if best.as_ref().map_or(true, |(b, _)| score > *b) {
                    best = Some((score, el));
                }
            }
        }

        match best {
            Some((score, el)) if score >= ACCEPT_THRESHOLD => {
                let html = el.html();
                debug!("Relevance winner <{}> score {}", el.value().name(), score);
                ContentFragment {
                    size: html.len(),
                    html,
                    score,
                }
            }
            Some((score, _)) => {
                debug!("Best candidate scored {} (< {}), empty fragment", score, ACCEPT_THRESHOLD);
                ContentFragment::empty(score)
            }
            None => ContentFragment::empty(0),
        }
    }

    /// Score a single candidate element
    pub fn score(el: ElementRef) -> Score {
        let tag = el.value().name();
        if REJECTED_TAGS.contains(&tag) {
            return Score::Rejected(RejectReason::ChromeTag);
        }
        if Self::has_chrome_class(el) {
            return Score::Rejected(RejectReason::ChromeClass);
        }

        let children: Vec<ElementRef> = el.children().filter_map(ElementRef::wrap).collect();
        if children.len() < MIN_CHILDREN {
            return Score::Rejected(RejectReason::TooFewChildren);
        }

        let text_len = visible_text(el).chars().count();
        if text_len < MIN_TEXT_CHARS {
            return Score::Rejected(RejectReason::TooLittleText);
        }

        let mut score: i64 = 0;
        if SEMANTIC_TAGS.contains(&tag) {
            score += 20;
        }
        score += 10 * children.len() as i64;
        score += (text_len as i64 / 200).min(50);
        if element_depth(el) < 3 {
            score -= 30;
        }
        let kinds: HashSet<&str> = children.iter().map(|c| c.value().name()).collect();
        if kinds.len() > 2 {
            score += 15;
        }
        Score::Scored(score)
    }

    fn has_chrome_class(el: ElementRef) -> bool {
        let Some(class) = el.value().attr("class") else {
            return false;
        };
        let lower = class.to_lowercase();
        if CHROME_CLASS_WORDS.iter().any(|w| lower.contains(w)) {
            return true;
        }
        lower
            .split(|c: char| c.is_whitespace() || c == '-' || c == '_')
            .any(|token| AD_TOKENS.contains(&token))
    }
}

/// Number of element ancestors (`<html>` has depth 0)
fn element_depth(el: ElementRef) -> usize {
    el.ancestors().filter(|n| n.value().is_element()).count()
}

/// Whitespace-collapsed text, excluding script/style/noscript content
pub fn visible_text(el: ElementRef) -> String {
    let mut parts = Vec::new();
    for node in el.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .map_or(false, |e| matches!(e.name(), "script" | "style" | "noscript"))
        });
        if !hidden {
            parts.push(&**text);
        }
    }
    parts.join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static pattern compiles"))
}

/// Convert markup to plain text with paragraph breaks preserved
pub fn html_to_text(html: &str) -> String {
    static SCRIPT: OnceLock<Regex> = OnceLock::new();
    static STYLE: OnceLock<Regex> = OnceLock::new();
    static BLOCK: OnceLock<Regex> = OnceLock::new();
    static TAG: OnceLock<Regex> = OnceLock::new();
    static SPACES: OnceLock<Regex> = OnceLock::new();
    static NEWLINES: OnceLock<Regex> = OnceLock::new();

    let text = regex(&SCRIPT, r"(?is)<script[^>]*>.*?</script>").replace_all(html, "");
    let text = regex(&STYLE, r"(?is)<style[^>]*>.*?</style>").replace_all(&text, "");
    let text = regex(&BLOCK, r"(?i)</(p|div|li|tr|h[1-6])>|<br\s*/?>").replace_all(&text, "\n");
    let text = regex(&TAG, r"<[^>]+>").replace_all(&text, "");

    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&");

    let text = regex(&SPACES, r"[ \t\r\f]+").replace_all(&text, " ");
    let text = regex(&NEWLINES, r"\s*\n\s*").replace_all(&text, "\n");
    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn words(n: usize) -> String {
        "lorem ipsum dolor sit amet ".repeat(n)
    }

    fn score_first(html: &str, css: &str) -> Score {
        let doc = Html::parse_document(html);
        let sel = Selector::parse(css).unwrap();
        let el = doc.select(&sel).next().unwrap();
        RelevanceScorer::score(el)
    }

    #[test]
    fn test_selects_content_over_chrome() {
        let html = format!(
            r#"<html><body>
                <div class="navbar"><a>1</a><a>2</a><a>3</a><a>{nav}</a></div>
                <div id="wrap"><div id="inner">
                    <article><h2>Title</h2><p>{body}</p><p>{body}</p><ul><li>a</li></ul></article>
                </div></div>
                <footer><p>a</p><p>b</p><p>{nav}</p></footer>
            </body></html>"#,
            nav = words(10),
            body = words(40)
        );
        let fragment = RelevanceScorer::select(&html);
        assert!(fragment.html.starts_with("<article>"));
        assert_eq!(fragment.size, fragment.html.len());
        assert!(fragment.score >= ACCEPT_THRESHOLD);
    }

    #[test]
    fn test_scoring_components() {
        // depth: html(0) > body(1) > div(2) > section(3)
        let html = format!(
            "<html><body><div><section><h2>t</h2><p>{}</p><ul><li>x</li></ul><p>y</p></section></div></body></html>",
            words(20)
        );
        let text_len = {
            let doc = Html::parse_document(&html);
            let sel = Selector::parse("section").unwrap();
            visible_text(doc.select(&sel).next().unwrap()).chars().count() as i64
        };
        let expected = 20 + 40 + (text_len / 200).min(50) + 15;
        assert_eq!(score_first(&html, "section"), Score::Scored(expected));
    }

    #[test]
    fn test_shallow_wrapper_penalized() {
        let html = format!(
            "<html><body><div><p>{0}</p><p>{0}</p><p>{0}</p></div></body></html>",
            words(5)
        );
        // 3 children, one tag kind, depth 2
        let text_len = (words(5).trim().len() * 3 + 2) as i64;
        assert_eq!(
            score_first(&html, "div"),
            Score::Scored(30 + (text_len / 200).min(50) - 30)
        );
    }

    #[test]
    fn test_rejections() {
        let long = words(10);
        let html = format!("<div class=\"ad-slot\"><p>{0}</p><p>a</p><p>b</p></div>", long);
        assert_eq!(score_first(&html, "div"), Score::Rejected(RejectReason::ChromeClass));

        let html = format!("<nav><p>{0}</p><p>a</p><p>b</p></nav>", long);
        assert_eq!(score_first(&html, "nav"), Score::Rejected(RejectReason::ChromeTag));

        let html = "<div class=\"shadow\"><p>a</p><p>b</p><p>c</p></div>";
        assert_eq!(score_first(html, "div"), Score::Rejected(RejectReason::TooLittleText));
    }

    #[test]
    fn test_low_score_yields_empty_fragment() {
        let html = format!(
            "<html><body><div><p>{0}</p><p>{0}</p><p>{0}</p></div></body></html>",
            words(5)
        );
        let fragment = RelevanceScorer::select(&html);
        assert!(fragment.is_empty());
        assert_eq!(fragment.size, 0);
    }

    #[test]
    fn test_html_to_text() {
        let html = "<p>Hello <b>world</b>!</p><script>evil();</script><p>Second &amp; last.</p>";
        let text = html_to_text(html);
        assert_eq!(text, "Hello world!\nSecond & last.");
    }

    proptest! {
        #[test]
        fn prop_few_children_always_rejected(
            n_children in 0usize..3,
            text_len in 0usize..2000,
            class in "(content|main|article|post)",
            tag in "(div|section|article|main)",
        ) {
            let body: String = (0..n_children)
                .map(|_| format!("<p>{}</p>", "a".repeat(text_len)))
                .collect();
            let html = format!(
                "<html><body><div><div><{tag} class=\"{class}\">{body}</{tag}></div></div></body></html>"
            );
            let score = score_first(&html, &tag);
            prop_assert!(matches!(score, Score::Rejected(_)));
        }

        #[test]
        fn prop_short_text_always_rejected(
            n_children in 3usize..20,
            chars_per_child in 0usize..5,
            tag in "(div|section|article|main)",
        ) {
            prop_assume!(n_children * chars_per_child + n_children < MIN_TEXT_CHARS);
            let body: String = (0..n_children)
                .map(|_| format!("<p>{}</p>", "b".repeat(chars_per_child)))
                .collect();
            let html = format!("<html><body><div><div><{tag}>{body}</{tag}></div></div></body></html>");
            let score = score_first(&html, &tag);
            prop_assert!(matches!(score, Score::Rejected(_)));
        }
    }
}
