//! Marketplace scraping: search result pages to listing links to [`Listing`]s.

mod dailydose;
mod kleinanzeigen;

pub use dailydose::DailyDose;
pub use kleinanzeigen::Kleinanzeigen;

use crate::batch::run_bounded;
use crate::config::MarketplaceConfig;
use crate::http::HttpClient;
use crate::listing::Listing;
use crate::{Result, ScoutError};
use scraper::{ElementRef, Html, Selector};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// One classifieds site: which search URLs it serves and how its pages are parsed.
///
/// Parsing is pure so it can be exercised against stored HTML.
pub trait Marketplace: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether a configured search URL belongs to this site.
    fn accepts(&self, search_url: &str) -> bool;

    /// Links per full result page; fewer means the last page was reached.
    fn max_offers_per_page(&self) -> usize;

    /// Absolute listing links found on a search result page.
    fn parse_links(&self, html: &str) -> Vec<String>;

    /// Parses a listing detail page.
    fn parse_listing(&self, html: &str, url: &str) -> Result<Listing>;
}

/// Compiles a CSS selector, reporting bad selectors as scrape errors.
pub(crate) fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| ScoutError::ScrapeError(format!("invalid selector '{}': {:?}", css, e)))
}

/// Whitespace-normalized text of an element.
pub(crate) fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Text of the first element matching `css`.
pub(crate) fn first_text(document: &Html, css: &str) -> Result<Option<String>> {
    let selector = selector(css)?;
    Ok(document.select(&selector).next().map(element_text))
}

/// Like [`first_text`], but a missing element is an error.
pub(crate) fn required_text(document: &Html, css: &str) -> Result<String> {
    first_text(document, css)?.ok_or_else(|| ScoutError::ScrapeError(format!("'{}' not found", css)))
}

/// Keeps the first listing of every id.
pub fn dedupe_by_id(listings: Vec<Listing>) -> Vec<Listing> {
    let mut seen = HashSet::new();
    listings
        .into_iter()
        .filter(|l| seen.insert(l.id.clone()))
        .collect()
}

/// What one scrape pass produced.
#[derive(Debug, Default)]
pub struct ScrapeReport {
    /// Listings of all marketplaces, unique by id.
    pub listings: Vec<Listing>,
    /// Search result pages that loaded and parsed.
    pub pages_loaded: usize,
    /// Search result pages that failed.
    pub pages_failed: usize,
}

impl ScrapeReport {
    /// True when not a single search page could be loaded, so the listings say nothing about
    /// what is still for sale.
    pub fn is_blind(&self) -> bool {
        self.pages_loaded == 0
    }
}

/// The `Scraper` struct walks every configured search URL with the marketplace that serves it.
pub struct Scraper {
    http: Arc<HttpClient>,
    config: MarketplaceConfig,
    marketplaces: Vec<Box<dyn Marketplace>>,
    concurrency: usize,
}

impl Scraper {
    /// Creates a new `Scraper` for the built-in marketplaces.
    ///
    /// # Arguments
    ///
    /// * `http` - The shared HTTP client.
    /// * `config` - Search URLs and paging limits.
    /// * `concurrency` - The maximum number of pages fetched at once.
    pub fn new(http: Arc<HttpClient>, config: MarketplaceConfig, concurrency: usize) -> Self {
        Self::with_marketplaces(
            http,
            config,
            concurrency,
            vec![Box::new(Kleinanzeigen), Box::new(DailyDose)],
        )
    }

    pub fn with_marketplaces(
        http: Arc<HttpClient>,
        config: MarketplaceConfig,
        concurrency: usize,
        marketplaces: Vec<Box<dyn Marketplace>>,
    ) -> Self {
        Self {
            http,
            config,
            marketplaces,
            concurrency,
        }
    }

    /// Scrapes every configured search URL.
    ///
    /// # Returns
    ///
    /// The listings of all marketplaces, unique by id, with page counts. Pages that fail to load
    /// or parse are logged and skipped.
    pub async fn scrape_all(&self) -> ScrapeReport {
        let mut listings = Vec::new();
        let mut pages_loaded = 0;
        let mut pages_failed = 0;

        for search_url in &self.config.search_urls {
            let Some(market) = self.marketplaces.iter().find(|m| m.accepts(search_url)) else {
                warn!(url = %search_url, "No marketplace serves this search URL, skipping");
                continue;
            };

            let (links, loaded, failed) = self.collect_links(market.as_ref(), search_url).await;
            pages_loaded += loaded;
            pages_failed += failed;
            info!(
                marketplace = market.name(),
                links = links.len(),
                pages_loaded = loaded,
                pages_failed = failed,
                "Collected listing links"
            );
            listings.extend(self.fetch_listings(market.as_ref(), links).await);
        }

        let total = listings.len();
        let unique = dedupe_by_id(listings);
        if unique.len() < total {
            info!(duplicates = total - unique.len(), "Dropped duplicate listings");
        }
        ScrapeReport {
            listings: unique,
            pages_loaded,
            pages_failed,
        }
    }

    /// Walks result pages in batches until a batch comes back short or `max_pages` is reached.
    ///
    /// Returns the links with the number of loaded and failed pages.
    #[instrument(skip(self, market), fields(marketplace = market.name()))]
    async fn collect_links(&self, market: &dyn Marketplace, search_url: &str) -> (Vec<String>, usize, usize) {
        let mut links = BTreeSet::new();
        let mut loaded = 0;
        let mut failed = 0;
        let batch = self.config.page_batch_size.max(1);
        let mut first = 1;

        while first <= self.config.max_pages {
            let last = (first + batch - 1).min(self.config.max_pages);
            let pages: Vec<String> = (first..=last).map(|page| search_url.replace("{}", &page.to_string())).collect();

            let results = run_bounded(pages, self.concurrency, "Search pages", |url| async move {
                let html = self.http.get_text(&url).await?;
                Ok(market.parse_links(&html))
            })
            .await;
            for result in results {
                match result {
                    Some(found) => {
                        loaded += 1;
                        links.extend(found);
                    }
                    None => failed += 1,
                }
            }

            if links.len() < market.max_offers_per_page() * last {
                break;
            }
            first = last + 1;
        }

        (links.into_iter().collect(), loaded, failed)
    }

    async fn fetch_listings(&self, market: &dyn Marketplace, links: Vec<String>) -> Vec<Listing> {
        run_bounded(links, self.concurrency, "Listings", |url| async move {
            let html = self.http.get_text(&url).await?;
            market.parse_listing(&html, &url)
        })
        .await
        .into_iter()
        .flatten()
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HttpConfig, RateLimit};
    use crate::listing::fixtures::listing;

    /// Search pages list one listing path per line; detail pages are serialized listings.
    struct PlainMarket {
        base: String,
    }

    impl Marketplace for PlainMarket {
        fn name(&self) -> &'static str {
            "Plain"
        }

        fn accepts(&self, search_url: &str) -> bool {
            search_url.starts_with(&self.base)
        }

        fn max_offers_per_page(&self) -> usize {
            2
        }

        fn parse_links(&self, html: &str) -> Vec<String> {
            html.lines().map(|path| format!("{}{}", self.base, path.trim())).collect()
        }

        fn parse_listing(&self, html: &str, _url: &str) -> Result<Listing> {
            Ok(serde_json::from_str(html)?)
        }
    }

    fn scraper_for(base: &str, search_url: String) -> Scraper {
        let http = HttpClient::new(HttpConfig {
            max_retries: 1,
            rate_limit: RateLimit {
                requests_per_second: 0.0,
                burst_size: 4,
            },
            ..HttpConfig::default()
        })
        .unwrap();
        let config = MarketplaceConfig {
            search_urls: vec![search_url],
            max_pages: 3,
            page_batch_size: 1,
        };
        let market: Box<dyn Marketplace> = Box::new(PlainMarket { base: base.to_string() });
        Scraper::with_marketplaces(Arc::new(http), config, 2, vec![market])
    }

    #[tokio::test]
    async fn test_scrape_all_reports_pages() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/search/1")
            .with_status(200)
            .with_body("/offer/1\n/offer/2\n")
            .create_async()
            .await;
        server
            .mock("GET", "/search/2")
            .with_status(500)
            .create_async()
            .await;
        for id in ["1", "2"] {
            server
                .mock("GET", format!("/offer/{}", id).as_str())
                .with_status(200)
                .with_body(serde_json::to_string(&listing(id, "Segel")).unwrap())
                .create_async()
                .await;
        }

        let report = scraper_for(&server.url(), format!("{}/search/{{}}", server.url()))
            .scrape_all()
            .await;

        assert_eq!(report.listings.len(), 2);
        assert_eq!(report.pages_loaded, 1);
        assert_eq!(report.pages_failed, 1);
        assert!(!report.is_blind());
    }

    #[tokio::test]
    async fn test_scrape_all_without_any_page_is_blind() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/search/1")
            .with_status(503)
            .create_async()
            .await;

        let report = scraper_for(&server.url(), format!("{}/search/{{}}", server.url()))
            .scrape_all()
            .await;

        assert!(report.listings.is_empty());
        assert!(report.is_blind());
        assert_eq!(report.pages_failed, 1);
    }

    #[test]
    fn test_dedupe_keeps_first() {
        let mut second = listing("1", "Zweites");
        second.price = String::from("1 €");
        let deduped = dedupe_by_id(vec![listing("1", "Erstes"), listing("2", "B"), second]);

        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].title, "Erstes");
    }

    #[test]
    fn test_element_text_normalizes_whitespace() {
        let document = Html::parse_fragment("<p id='x'>  Hallo\n   <b>Welt</b>  </p>");
        assert_eq!(first_text(&document, "#x").unwrap().as_deref(), Some("Hallo Welt"));
        assert!(required_text(&document, "#missing").is_err());
    }

    #[test]
    fn test_marketplaces_accept_their_urls() {
        let k = Kleinanzeigen;
        let d = DailyDose;
        let url = "https://www.kleinanzeigen.de/s-karlsruhe/seite:{}/windsurfen/k0l9186r50";
        assert!(k.accepts(url));
        assert!(!d.accepts(url));
    }
}
