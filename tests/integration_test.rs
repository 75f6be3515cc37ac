use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use windscout::{
    cache::MemoryCache,
    config::{HttpConfig, LlmConfig, RateLimit},
    entry::{Boom, Details},
    extract::{Extractor, OpenAiExtractor},
    geo::{Coordinates, LocationResolver, PostalCodeTable},
    http::HttpClient,
    notify::Mailer,
    pipeline::Pipeline,
    scraper::{Marketplace, Scraper},
    store::EntryStore,
    AppConfig, Entry, EntryKind, Listing, Result, ScoutError, Seller,
};

/// A marketplace whose search pages list one path per line and whose detail pages are
/// serialized listings.
struct TestMarket {
    base: String,
}

impl Marketplace for TestMarket {
    fn name(&self) -> &'static str {
        "Test"
    }

    fn accepts(&self, search_url: &str) -> bool {
        search_url.starts_with(&self.base)
    }

    fn max_offers_per_page(&self) -> usize {
        10
    }

    fn parse_links(&self, html: &str) -> Vec<String> {
        html.lines()
            .map(str::trim)
            .filter(|line| line.starts_with("/offer/"))
            .map(|line| format!("{}{}", self.base, line))
            .collect()
    }

    fn parse_listing(&self, html: &str, _url: &str) -> Result<Listing> {
        Ok(serde_json::from_str(html)?)
    }
}

#[derive(Default)]
struct FakeExtractor {
    extract_calls: AtomicUsize,
}

#[async_trait]
impl Extractor for FakeExtractor {
    async fn extract(&self, listing: &Listing) -> Result<Value> {
        self.extract_calls.fetch_add(1, Ordering::SeqCst);
        Ok(match listing.id.as_str() {
            "a1" => json!({
                "type": "sail",
                "size": "5.8",
                "brand": "Gaastra Manic",
                "sail_type": "Freeride",
                "year": "2019",
                "state": "used"
            }),
            _ => json!({"type": "N/A"}),
        })
    }

    async fn judge(&self, _listing: &Listing, _criteria: &str) -> Result<bool> {
        Ok(true)
    }
}

#[derive(Default)]
struct RecordingMailer {
    subjects: Mutex<Vec<String>>,
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, subject: &str, _body: &str) -> Result<()> {
        self.subjects.lock().unwrap().push(subject.to_string());
        Ok(())
    }
}

fn offer(id: &str, title: &str, location: &str, price: &str) -> Listing {
    Listing {
        id: id.to_string(),
        title: title.to_string(),
        description: format!("{} in gutem Zustand", title),
        price: price.to_string(),
        location: location.to_string(),
        date: String::from("01.06.2024"),
        link: format!("https://example.org/{}", id),
        image_urls: Vec::new(),
        sold: false,
        seller: Seller::default(),
        scraped_on: Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap(),
    }
}

fn temp_config(dir: &Path, search_url: String) -> AppConfig {
    let mut config = AppConfig::default();
    config.http = HttpConfig {
        max_retries: 1,
        rate_limit: RateLimit {
            requests_per_second: 0.0,
            burst_size: 4,
        },
        ..HttpConfig::default()
    };
    config.marketplaces.search_urls = vec![search_url];
    config.marketplaces.max_pages = 1;
    config.marketplaces.page_batch_size = 1;
    config.storage.store_file = dir.join("db.json");
    config.storage.current_offers_file = dir.join("current_offers.json");
    config.storage.filtered_out_file = dir.join("filtered_out_offers.json");
    config.storage.cache_file = None;
    config.storage.export_file = dir.join("export.xlsx");
    config
}

async fn serve_search_page(server: &mut mockito::ServerGuard, listings: &[Listing]) {
    let body: String = listings.iter().map(|l| format!("/offer/{}\n", l.id)).collect();
    server
        .mock("GET", "/search/1")
        .with_status(200)
        .with_body(body)
        .create_async()
        .await;
    for listing in listings {
        server
            .mock("GET", format!("/offer/{}", listing.id).as_str())
            .with_status(200)
            .with_body(serde_json::to_string(listing).unwrap())
            .create_async()
            .await;
    }
}

fn stored_boom() -> Entry {
    Entry::new(
        Details::Boom(Boom {
            brand: "Chinook".into(),
            size: "140-190".into(),
            year: "2012".into(),
        }),
        offer("old1", "Gabelbaum", "76131 Karlsruhe", "50 €"),
        Coordinates::new(49.0094, 8.4044),
    )
}

fn pipeline_with(config: &AppConfig, base: String, extractor: Arc<dyn Extractor>) -> Pipeline {
    let http = Arc::new(HttpClient::new(config.http.clone()).unwrap());
    let market: Box<dyn Marketplace> = Box::new(TestMarket { base });
    let scraper = Scraper::with_marketplaces(http, config.marketplaces.clone(), 2, vec![market]);
    let table = PostalCodeTable::from_csv("plz,lat,lon\n76131,49.0094,8.4044\n").unwrap();
    Pipeline::new(
        config.clone(),
        scraper,
        extractor,
        LocationResolver::new(table, None),
        Arc::new(RecordingMailer::default()),
    )
}

fn read_array(path: PathBuf) -> Vec<Value> {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

#[tokio::test]
async fn test_full_scouting_pass() {
    let mut server = mockito::Server::new_async().await;
    let listings = [
        offer("a1", "Gaastra Manic 5.8", "76131 Karlsruhe", "150 €"),
        offer("a2", "Suche Kite 9m", "76131 Karlsruhe", "100 €"),
        offer("a3", "Point-7 Mast 460", "10115 Berlin", "300 €"),
    ];
    server
        .mock("GET", "/search/1")
        .with_status(200)
        .with_body("/offer/a1\n/offer/a2\n/offer/a3\n")
        .create_async()
        .await;
    for listing in &listings {
        server
            .mock("GET", format!("/offer/{}", listing.id).as_str())
            .with_status(200)
            .with_body(serde_json::to_string(listing).unwrap())
            .create_async()
            .await;
    }

    let dir = std::env::temp_dir().join(format!("windscout-e2e-{}", uuid::Uuid::new_v4()));
    let config = temp_config(&dir, format!("{}/search/{{}}", server.url()));

    // A previously stored entry that is no longer listed.
    let stored = Entry::new(
        Details::Boom(Boom {
            brand: "Chinook".into(),
            size: "140-190".into(),
            year: "2012".into(),
        }),
        offer("old1", "Gabelbaum", "76131 Karlsruhe", "50 €"),
        Coordinates::new(49.0094, 8.4044),
    );
    let store = EntryStore::new(&config.storage.store_file);
    store.save(&[stored], &[]).await.unwrap();

    let http = Arc::new(HttpClient::new(config.http.clone()).unwrap());
    let market: Box<dyn Marketplace> = Box::new(TestMarket { base: server.url() });
    let scraper = Scraper::with_marketplaces(http, config.marketplaces.clone(), 2, vec![market]);
    let table = PostalCodeTable::from_csv("plz,lat,lon\n76131,49.0094,8.4044\n10115,52.5323,13.3846\n").unwrap();
    let extractor = Arc::new(FakeExtractor::default());
    let mailer = Arc::new(RecordingMailer::default());

    let pipeline = Pipeline::new(
        config.clone(),
        scraper,
        extractor.clone(),
        LocationResolver::new(table, None),
        mailer.clone(),
    );

    let summary = pipeline.run().await.unwrap();
    assert_eq!(summary.scraped, 3);
    assert_eq!(summary.fresh, 1);
    assert_eq!(summary.sold, 1);
    assert_eq!(summary.filtered_out, 2);
    assert_eq!(summary.stored, 2);
    assert_eq!(summary.interesting, 1);
    assert!(summary.notified);
    assert_eq!(extractor.extract_calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        mailer.subjects.lock().unwrap().as_slice(),
        ["1 new interesting windsurf offer"]
    );

    let snapshot = store.load().await.unwrap();
    assert_eq!(snapshot.entries.len(), 2);
    assert_eq!(snapshot.entries[0].id(), "a1");
    assert_eq!(snapshot.entries[0].kind(), EntryKind::Sail);
    assert_eq!(snapshot.entries[1].id(), "old1");
    assert!(snapshot.entries[1].offer().sold);

    assert_eq!(read_array(config.storage.current_offers_file.clone()).len(), 3);
    assert_eq!(read_array(config.storage.filtered_out_file.clone()).len(), 2);
    assert_eq!(summary.sheets, 2);
    assert!(config.storage.export_file.exists());

    // The same listings again: nothing new to extract or report.
    let again = pipeline.run().await.unwrap();
    assert_eq!(again.fresh, 0);
    assert_eq!(again.still_present, 1);
    assert_eq!(again.stored, 2);
    assert!(!again.notified);
    assert_eq!(extractor.extract_calls.load(Ordering::SeqCst), 1);
    assert_eq!(mailer.subjects.lock().unwrap().len(), 1);

    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn test_rejected_llm_key_leaves_store_untouched() {
    let mut server = mockito::Server::new_async().await;
    serve_search_page(
        &mut server,
        &[
            offer("n1", "Neilpryde Atlas 5.3", "76131 Karlsruhe", "200 €"),
            offer("n2", "Naish Mast 430", "76131 Karlsruhe", "90 €"),
        ],
    )
    .await;
    let llm = server
        .mock("POST", "/v1/chat/completions")
        .with_status(401)
        .with_body(r#"{"error": {"message": "Incorrect API key provided"}}"#)
        .expect_at_least(1)
        .create_async()
        .await;

    let dir = std::env::temp_dir().join(format!("windscout-e2e-{}", uuid::Uuid::new_v4()));
    let config = temp_config(&dir, format!("{}/search/{{}}", server.url()));
    let store = EntryStore::new(&config.storage.store_file);
    store.save(&[stored_boom()], &[]).await.unwrap();
    let before = std::fs::read(&config.storage.store_file).unwrap();

    let http = Arc::new(HttpClient::new(config.http.clone()).unwrap());
    let extractor = OpenAiExtractor::new(
        http,
        Arc::new(MemoryCache::new()),
        LlmConfig {
            endpoint: format!("{}/v1/chat/completions", server.url()),
            api_key: Some("sk-revoked".into()),
            max_images: 0,
            ..LlmConfig::default()
        },
    )
    .unwrap();
    let pipeline = pipeline_with(&config, server.url(), Arc::new(extractor));

    let result = pipeline.run().await;

    assert!(matches!(result, Err(ScoutError::AuthError(_))));
    assert_eq!(std::fs::read(&config.storage.store_file).unwrap(), before);
    assert!(!config.storage.export_file.exists());
    llm.assert_async().await;
    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn test_unreachable_marketplace_does_not_mark_everything_sold() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/search/1")
        .with_status(503)
        .create_async()
        .await;

    let dir = std::env::temp_dir().join(format!("windscout-e2e-{}", uuid::Uuid::new_v4()));
    let config = temp_config(&dir, format!("{}/search/{{}}", server.url()));
    let store = EntryStore::new(&config.storage.store_file);
    store.save(&[stored_boom()], &[]).await.unwrap();
    let before = std::fs::read(&config.storage.store_file).unwrap();

    let extractor = Arc::new(FakeExtractor::default());
    let pipeline = pipeline_with(&config, server.url(), extractor.clone());

    let result = pipeline.run().await;

    assert!(matches!(result, Err(ScoutError::ScrapeError(_))));
    assert_eq!(std::fs::read(&config.storage.store_file).unwrap(), before);
    assert!(!store.load().await.unwrap().entries[0].offer().sold);
    assert_eq!(extractor.extract_calls.load(Ordering::SeqCst), 0);
    let _ = std::fs::remove_dir_all(dir);
}
