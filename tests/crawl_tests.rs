//! End-to-end crawl tests against the in-memory browser

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use sitesift::browser::{BrowserSession, FakePage, FakeSessionFactory, SessionFactory};
use sitesift::config::{ExtractionMethod, JobConfig, PaginationStrategy, ScrollConfig};
use sitesift::extraction::TextModel;
use sitesift::job::{JobHandle, JobManager, JobPhase, LogLevel};
use std::sync::Arc;
use std::time::Duration;

/// A page whose `<section>` wins relevance scoring. `cards` go inside the
/// section; `links` are rendered as anchors after it.
fn listing_page(title: &str, cards: &[&str], links: &[&str]) -> String {
    let cards: String = cards
        .iter()
        .map(|c| format!("<div class=\"card\"><h3>Contact</h3><p>{}</p></div>", c))
        .collect();
    let links: String = links
        .iter()
        .map(|l| format!("<li><a href=\"{}\">{}</a></li>", l, l))
        .collect();
    format!(
        r#"<html><head><title>{title}</title></head><body>
        <nav class="navbar"><a href="/">Home</a> webmaster@example.com</nav>
        <div id="wrap"><main>
          <section class="listing">
            <h2>{title}</h2>
            <p>Our directory lists members of the association together with their preferred contact details and office hours.</p>
            {cards}
            <div class="note">Entries are reviewed every quarter by the membership committee.</div>
          </section>
          <ul class="more">{links}</ul>
        </main></div>
        </body></html>"#
    )
}

fn fast_config(seeds: &[&str], fields: &[&str]) -> JobConfig {
    let mut config = JobConfig::new(seeds.iter().copied(), fields.iter().copied());
    config.retry.retry_delay_ms = 0;
    config.retry.attempts = 2;
    config.scroll = ScrollConfig {
        max_iterations: 10,
        settle_ms: 0,
        bottom_settle_ms: 0,
    };
    config.pagination.settle_ms = 0;
    config.pagination.lookup_tiers_ms = [0, 0, 0];
    config
}

async fn run_to_end(manager: &JobManager, handle: &JobHandle) -> JobPhase {
    tokio::time::timeout(Duration::from_secs(10), manager.wait(handle))
        .await
        .expect("job finished in time")
        .unwrap()
}

fn urls(manager: &JobManager, handle: &JobHandle) -> Vec<String> {
    manager
        .results(handle)
        .unwrap()
        .into_iter()
        .map(|r| r.url)
        .collect()
}

#[tokio::test]
async fn test_pattern_emails_from_relevance_fragment() {
    let site = Arc::new(FakeSessionFactory::new().page(
        "https://example.com/",
        FakePage::new(listing_page(
            "Members",
            &[
                "Email: Alice@Example.com",
                "Email: bob@example.com",
                "Write to alice@example.com",
            ],
            &[],
        )),
    ));
    let manager = JobManager::new(site.clone());

    let handle = manager
        .start(fast_config(&["https://example.com"], &["email"]))
        .await
        .unwrap();
    assert_eq!(run_to_end(&manager, &handle).await, JobPhase::Completed);

    let results = manager.results(&handle).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].url, "https://example.com/");
    assert_eq!(
        results[0].fields["email"],
        vec!["alice@example.com".to_string(), "bob@example.com".to_string()]
    );
    assert_eq!(site.active_sessions(), 0);
}

#[tokio::test]
async fn test_depth_one_follows_only_same_domain_links() {
    let links = [
        "/a",
        "/b",
        "https://example.com/c",
        "https://other.org/x",
        "https://elsewhere.net/y",
    ];
    let mut site = FakeSessionFactory::new().page(
        "https://example.com/",
        FakePage::new(listing_page("Home", &["Email: home@example.com"], &links)),
    );
    for path in ["a", "b", "c"] {
        site = site.page(
            format!("https://example.com/{}", path),
            FakePage::new(listing_page(path, &[], &[])),
        );
    }
    let site = Arc::new(site);
    let manager = JobManager::new(site.clone());

    let mut config = fast_config(&["https://example.com"], &["email"]);
    config.max_depth = 1;
    let handle = manager.start(config).await.unwrap();
    assert_eq!(run_to_end(&manager, &handle).await, JobPhase::Completed);

    assert_eq!(
        urls(&manager, &handle),
        vec![
            "https://example.com/",
            "https://example.com/a",
            "https://example.com/b",
            "https://example.com/c",
        ]
    );
    assert!(site
        .navigations()
        .iter()
        .all(|u| u.starts_with("https://example.com/")));
}

#[tokio::test]
async fn test_numbered_pagination_navigates_each_page() {
    let mut site = FakeSessionFactory::new();
    for n in 1..=3 {
        site = site.page(
            format!("https://example.com/list?page={}", n),
            FakePage::new(listing_page(
                "List",
                &[format!("Email: member{}@example.com", n).as_str()],
                &[],
            )),
        );
    }
    let site = Arc::new(site);
    let manager = JobManager::new(site.clone());

    let mut config = fast_config(&["https://example.com/list"], &["email"]);
    config.pagination.strategy = PaginationStrategy::NumberedUrl;
    config.pagination.max_pages = 3;
    let handle = manager.start(config).await.unwrap();
    assert_eq!(run_to_end(&manager, &handle).await, JobPhase::Completed);

    assert_eq!(
        site.navigations(),
        vec![
            "https://example.com/list?page=1",
            "https://example.com/list?page=2",
            "https://example.com/list?page=3",
        ]
    );
    let results = manager.results(&handle).unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[2].fields["email"], vec!["member3@example.com".to_string()]);
}

#[tokio::test]
async fn test_numbered_pagination_stops_on_failure() {
    let mut site = FakeSessionFactory::new();
    for n in 1..=2 {
        site = site.page(
            format!("https://example.com/list?page={}", n),
            FakePage::new(listing_page("List", &[], &[])),
        );
    }
    let site = Arc::new(site);
    let manager = JobManager::new(site.clone());

    let mut config = fast_config(&["https://example.com/list"], &["email"]);
    config.pagination.strategy = PaginationStrategy::NumberedUrl;
    config.pagination.max_pages = 5;
    let handle = manager.start(config).await.unwrap();
    assert_eq!(run_to_end(&manager, &handle).await, JobPhase::Completed);

    let navigations = site.navigations();
    assert!(!navigations.iter().any(|u| u.ends_with("page=4")));
    assert_eq!(urls(&manager, &handle).len(), 2);
}

#[tokio::test]
async fn test_auto_detect_follows_rel_next_and_dedups() {
    let mut first = listing_page("Page 1", &["Email: alice@example.com"], &[]);
    first = first.replace(
        "<ul class=\"more\">",
        "<ul class=\"more\"><li><a rel=\"next\" href=\"/p2\">Older</a></li>",
    );
    let site = Arc::new(
        FakeSessionFactory::new()
            .page("https://example.com/", FakePage::new(first))
            .page(
                "https://example.com/p2",
                FakePage::new(listing_page(
                    "Page 2",
                    &["Email: alice@example.com", "Email: carol@example.com"],
                    &[],
                )),
            ),
    );
    let manager = JobManager::new(site.clone());

    let mut config = fast_config(&["https://example.com"], &["email"]);
    config.pagination.strategy = PaginationStrategy::AutoDetect;
    let handle = manager.start(config).await.unwrap();
    assert_eq!(run_to_end(&manager, &handle).await, JobPhase::Completed);

    let results = manager.results(&handle).unwrap();
    assert_eq!(
        results.iter().map(|r| r.url.as_str()).collect::<Vec<_>>(),
        vec!["https://example.com/", "https://example.com/p2"]
    );
    assert_eq!(results[1].fields["email"], vec!["carol@example.com".to_string()]);
}

#[tokio::test]
async fn test_click_loop_merges_snapshots_into_one_record() {
    fn with_button(cards: &[&str]) -> String {
        listing_page("Feed", cards, &[]).replace("</section>", "<button>Load more</button></section>")
    }
    let page = FakePage::new(with_button(&["Email: one@example.com"])).clicks(vec![
        with_button(&["Email: one@example.com", "Email: two@example.com"]),
        listing_page(
            "Feed",
            &[
                "Email: one@example.com",
                "Email: two@example.com",
                "Email: three@example.com",
            ],
            &[],
        ),
    ]);
    let site = Arc::new(FakeSessionFactory::new().page("https://example.com/feed", page));
    let manager = JobManager::new(site.clone());

    let mut config = fast_config(&["https://example.com/feed"], &["email"]);
    config.pagination.strategy = PaginationStrategy::ButtonClickLoop;
    config.pagination.max_pages = 5;
    let handle = manager.start(config).await.unwrap();
    assert_eq!(run_to_end(&manager, &handle).await, JobPhase::Completed);

    let results = manager.results(&handle).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(
        results[0].fields["email"],
        vec![
            "one@example.com".to_string(),
            "two@example.com".to_string(),
            "three@example.com".to_string(),
        ]
    );
    assert_eq!(site.navigations().len(), 1);
}

#[tokio::test]
async fn test_fetch_failure_does_not_stop_job() {
    let site = Arc::new(
        FakeSessionFactory::new()
            .page(
                "https://example.com/",
                FakePage::new(listing_page("Home", &[], &["/broken", "/ok"])),
            )
            .page(
                "https://example.com/ok",
                FakePage::new(listing_page("Ok", &["Email: ok@example.com"], &[])),
            ),
    );
    let manager = JobManager::new(site.clone());

    let mut config = fast_config(&["https://example.com"], &["email"]);
    config.max_depth = 1;
    let handle = manager.start(config).await.unwrap();
    assert_eq!(run_to_end(&manager, &handle).await, JobPhase::Completed);

    assert_eq!(
        urls(&manager, &handle),
        vec!["https://example.com/", "https://example.com/ok"]
    );
    let status = manager.poll(&handle).unwrap();
    assert_eq!(status.progress.processed, 3);
    assert!(status.failure.is_none());

    let activity = manager.activity(&handle).unwrap();
    assert!(activity
        .iter()
        .any(|e| e.level == LogLevel::Error && e.message.contains("https://example.com/broken")));
    assert!(activity
        .iter()
        .any(|e| e.level == LogLevel::Warning && e.message.starts_with("No data found")));
}

#[tokio::test]
async fn test_transient_failure_is_retried() {
    let site = Arc::new(
        FakeSessionFactory::new()
            .page(
                "https://example.com/",
                FakePage::new(listing_page("Home", &["Email: retry@example.com"], &[])),
            )
            .fail_times("https://example.com/", 1),
    );
    let manager = JobManager::new(site.clone());

    let handle = manager
        .start(fast_config(&["https://example.com"], &["email"]))
        .await
        .unwrap();
    assert_eq!(run_to_end(&manager, &handle).await, JobPhase::Completed);

    assert_eq!(site.navigations().len(), 2);
    assert_eq!(site.sessions_opened(), 2);
    let results = manager.results(&handle).unwrap();
    assert_eq!(results[0].fields["email"], vec!["retry@example.com".to_string()]);
}

fn slow_site(links: usize) -> FakeSessionFactory {
    let paths: Vec<String> = (0..links).map(|i| format!("/item/{}", i)).collect();
    let refs: Vec<&str> = paths.iter().map(String::as_str).collect();
    let mut site = FakeSessionFactory::new()
        .delay(Duration::from_millis(100))
        .page(
            "https://example.com/",
            FakePage::new(listing_page("Home", &["Email: home@example.com"], &refs)),
        );
    for (i, path) in paths.iter().enumerate() {
        site = site.page(
            format!("https://example.com{}", path),
            FakePage::new(listing_page(
                "Item",
                &[format!("Email: item{}@example.com", i).as_str()],
                &[],
            )),
        );
    }
    site
}

#[tokio::test]
async fn test_cancel_halts_navigation_and_keeps_results() {
    let site = Arc::new(slow_site(20));
    let manager = JobManager::new(site.clone());

    let mut config = fast_config(&["https://example.com"], &["email"]);
    config.max_depth = 1;
    let handle = manager.start(config).await.unwrap();

    for _ in 0..200 {
        if manager.results(&handle).unwrap().len() >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let before = manager.results(&handle).unwrap();
    assert!(before.len() >= 2);

    manager.cancel(&handle).await.unwrap();
    assert_eq!(manager.poll(&handle).unwrap().phase, JobPhase::Cancelled);

    let navigations = site.navigations().len();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(site.navigations().len(), navigations);
    assert!(navigations < 21);

    let after = manager.results(&handle).unwrap();
    assert!(after.len() >= before.len());
    assert_eq!(&after[..before.len()], &before[..]);
    assert_eq!(site.active_sessions(), 0);
}

#[tokio::test]
async fn test_new_job_supersedes_running_job() {
    let site = Arc::new(
        slow_site(10).page(
            "https://example.org/",
            FakePage::new(listing_page("Other", &["Email: other@example.org"], &[])),
        ),
    );
    let manager = JobManager::new(site.clone());

    let mut config = fast_config(&["https://example.com"], &["email"]);
    config.max_depth = 1;
    let first = manager.start(config).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    let second = manager
        .start(fast_config(&["https://example.org"], &["email"]))
        .await
        .unwrap();
    assert!(manager.poll(&first).is_err());
    assert_eq!(run_to_end(&manager, &second).await, JobPhase::Completed);
    assert_eq!(urls(&manager, &second), vec!["https://example.org/"]);
    assert_eq!(site.active_sessions(), 0);
}

struct PanickingFactory;

#[async_trait]
impl SessionFactory for PanickingFactory {
    async fn open(&self) -> sitesift::Result<Box<dyn BrowserSession>> {
        panic!("browser crashed");
    }

    fn active_sessions(&self) -> usize {
        0
    }
}

#[tokio::test]
async fn test_worker_panic_fails_job() {
    let manager = JobManager::new(Arc::new(PanickingFactory));
    let handle = manager
        .start(fast_config(&["https://example.com"], &["email"]))
        .await
        .unwrap();
    assert_eq!(run_to_end(&manager, &handle).await, JobPhase::Failed);

    let status = manager.poll(&handle).unwrap();
    assert!(status.failure.unwrap().contains("browser crashed"));
    assert!(manager.results(&handle).unwrap().is_empty());
}

struct ScriptedModel(String);

#[async_trait]
impl TextModel for ScriptedModel {
    async fn complete(&self, _system: &str, _prompt: &str) -> sitesift::Result<String> {
        Ok(self.0.clone())
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

#[tokio::test]
async fn test_ai_extraction_drops_fabricated_values() {
    let site = Arc::new(FakeSessionFactory::new().page(
        "https://example.com/",
        FakePage::new(listing_page("Members", &["Email: alice@example.com"], &[])),
    ));
    let model = ScriptedModel(
        r#"{"fields": {"email": ["alice@example.com", "ghost@nowhere.test"]}}"#.to_string(),
    );
    let manager = JobManager::new(site).with_model(Arc::new(model));

    let mut config = fast_config(&["https://example.com"], &["email"]);
    config.extraction = ExtractionMethod::Ai;
    config.ai.api_key = Some("unused".to_string());
    let handle = manager.start(config).await.unwrap();
    assert_eq!(run_to_end(&manager, &handle).await, JobPhase::Completed);

    let results = manager.results(&handle).unwrap();
    assert_eq!(results[0].fields["email"], vec!["alice@example.com".to_string()]);
}

#[tokio::test]
async fn test_output_file_and_export_rows() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("records.jsonl");
    let site = Arc::new(FakeSessionFactory::new().page(
        "https://example.com/",
        FakePage::new(listing_page(
            "Members",
            &["Email: a@example.com", "Email: b@example.com"],
            &[],
        )),
    ));
    let manager = JobManager::new(site);

    let mut config = fast_config(&["https://example.com"], &["email", "phone"]);
    config.output = Some(output.clone());
    config.flush.batch_size = 1;
    let handle = manager.start(config).await.unwrap();
    assert_eq!(run_to_end(&manager, &handle).await, JobPhase::Completed);

    let written = std::fs::read_to_string(&output).unwrap();
    assert_eq!(written.lines().count(), 1);

    let table = manager.export(&handle).unwrap();
    assert_eq!(table.columns, vec!["url", "timestamp", "email", "phone"]);
    assert_eq!(table.rows.len(), 2);
    assert_eq!(table.rows[1][2], "b@example.com");
    assert_eq!(table.rows[1][3], "");
}

#[tokio::test]
async fn test_detail_pages_enriched_concurrently() {
    let links: Vec<String> = (0..6).map(|i| format!("/detail/{}", i)).collect();
    let refs: Vec<&str> = links.iter().map(String::as_str).collect();
    let mut site = FakeSessionFactory::new().page(
        "https://example.com/",
        FakePage::new(listing_page("Index", &[], &refs)),
    );
    for i in 0..6 {
        site = site.page(
            format!("https://example.com/detail/{}", i),
            FakePage::new(listing_page(
                "Detail",
                &[format!("Email: person{}@example.com", i).as_str()],
                &[],
            )),
        );
    }
    let site = Arc::new(site);
    let manager = JobManager::new(site.clone());

    let mut config = fast_config(&["https://example.com"], &["email"]);
    config.detail.selector = Some("ul.more a".to_string());
    config.detail.concurrency = 2;
    let handle = manager.start(config).await.unwrap();
    assert_eq!(run_to_end(&manager, &handle).await, JobPhase::Completed);

    let results = manager.results(&handle).unwrap();
    assert_eq!(results.len(), 7);
    for (i, record) in results[1..].iter().enumerate() {
        assert_eq!(record.url, format!("https://example.com/detail/{}", i));
        assert_eq!(record.fields["email"], vec![format!("person{}@example.com", i)]);
    }
    assert_eq!(site.active_sessions(), 0);
}
