//! Property-based tests for crawl and extraction invariants.
//!
//! Uses proptest to generate arbitrary pages and URL sequences and checks
//! dedup, frontier, pagination URL, and export-row invariants.

use proptest::prelude::*;
use sitesift::config::{FieldSpec, PhoneFormat};
use sitesift::crawl::{numbered_urls, Frontier, Origin};
use sitesift::extraction::{export_rows, ExtractionPipeline, ExtractionRecord, PatternStrategy};
use std::collections::{BTreeMap, HashSet};

/// Strategy for email-shaped strings with mixed case
fn arb_email() -> impl Strategy<Value = String> {
    ("[a-zA-Z]{1,6}", prop_oneof![Just("example.com"), Just("Example.COM"), Just("test.org")])
        .prop_map(|(user, domain)| format!("{}@{}", user, domain))
}

/// A page with one card per email
fn page_with(emails: &[String]) -> String {
    let cards: String = emails
        .iter()
        .map(|e| format!("<div class=\"card\"><p>Contact: {}</p></div>", e))
        .collect();
    format!("<html><body><main>{}</main></body></html>", cards)
}

#[derive(Debug, Clone)]
enum Op {
    PushCurrent(u8),
    PushNext(u8),
    Pop,
    MarkVisited(u8),
    Advance,
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..12).prop_map(Op::PushCurrent),
        (0u8..12).prop_map(Op::PushNext),
        Just(Op::Pop),
        (0u8..12).prop_map(Op::MarkVisited),
        Just(Op::Advance),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn dedup_holds_across_pages(pages in prop::collection::vec(prop::collection::vec(arb_email(), 0..6), 1..5)) {
        let mut pipeline = ExtractionPipeline::new(
            Box::new(PatternStrategy::new(PhoneFormat::default())),
            vec![FieldSpec::new("email")],
            false,
        );
        let mut seen = HashSet::new();
        for (i, emails) in pages.iter().enumerate() {
            let url = format!("https://a.test/{}", i);
            let page = tokio_test::block_on(pipeline.extract(&url, &[page_with(emails)]));
            for value in &page.record.fields["email"] {
                prop_assert_eq!(value.clone(), value.to_lowercase());
                prop_assert!(seen.insert(value.clone()), "duplicate {}", value);
            }
        }
    }

    #[test]
    fn frontier_never_requeues_visited(ops in prop::collection::vec(arb_op(), 0..80)) {
        let mut frontier = Frontier::default();
        let mut popped = HashSet::new();
        for op in ops {
            match op {
                Op::PushCurrent(n) => {
                    frontier.push_current(format!("https://a.test/{}", n), Origin::Link);
                }
                Op::PushNext(n) => {
                    frontier.push_next(format!("https://a.test/{}", n));
                }
                Op::Pop => {
                    if let Some(entry) = frontier.pop() {
                        prop_assert!(popped.insert(entry.url.clone()), "popped twice: {}", entry.url);
                    }
                }
                Op::MarkVisited(n) => {
                    let url = format!("https://a.test/{}", n);
                    frontier.mark_visited(&url);
                    popped.insert(url);
                }
                Op::Advance => {
                    if frontier.current_len() == 0 {
                        frontier.advance_depth();
                    }
                }
            }
            prop_assert!(frontier.is_consistent());
        }
    }

    #[test]
    fn numbered_urls_are_sequential(max in 1usize..20, keep in "[a-z]{1,5}") {
        let base = format!("https://a.test/list?q={}&page=7", keep);
        let urls = numbered_urls(&base, max);
        prop_assert_eq!(urls.len(), max);
        for (i, url) in urls.iter().enumerate() {
            let expected_suffix = format!("page={}", i + 1);
            let expected_query = format!("q={}", keep);
            prop_assert!(url.ends_with(&expected_suffix));
            prop_assert!(url.contains(&expected_query));
            prop_assert_eq!(url.matches("page=").count(), 1);
        }
    }

    #[test]
    fn export_rows_cover_every_value(counts in prop::collection::vec((0usize..4, 0usize..4), 1..5)) {
        let schema = vec!["email".to_string(), "phone".to_string()];
        let records: Vec<ExtractionRecord> = counts
            .iter()
            .enumerate()
            .map(|(i, (emails, phones))| {
                let mut fields = BTreeMap::new();
                fields.insert("email".to_string(), (0..*emails).map(|j| format!("e{}", j)).collect());
                fields.insert("phone".to_string(), (0..*phones).map(|j| format!("p{}", j)).collect());
                ExtractionRecord {
                    url: format!("https://a.test/{}", i),
                    timestamp: chrono::Utc::now(),
                    fields,
                }
            })
            .collect();

        let table = export_rows(&records, &schema);
        let expected: usize = counts.iter().map(|(e, p)| (*e).max(*p).max(1)).sum();
        prop_assert_eq!(table.rows.len(), expected);
        prop_assert!(table.rows.iter().all(|row| row.len() == table.columns.len()));
    }
}
