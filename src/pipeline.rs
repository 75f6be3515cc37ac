//! One scouting pass from scraping to the mail digest.

use crate::cache::{JsonFileCache, MemoryCache, ResultCache};
use crate::config::AppConfig;
use crate::extract::{Extractor, OpenAiExtractor};
use crate::geo::{GeoapifyGeocoder, Geocoder, LocationResolver, PostalCodeTable};
use crate::http::HttpClient;
use crate::interest::select_interesting;
use crate::notify::{notify, LogMailer, MailjetMailer, Mailer};
use crate::reconcile::Reconciler;
use crate::scraper::Scraper;
use crate::entry::EntryKind;
use crate::sheet::export_workbook;
use crate::store::{write_json, EntryStore};
use crate::{Result, ScoutError};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Counts of one pass, for logging and the CLI.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub scraped: usize,
    pub fresh: usize,
    pub still_present: usize,
    pub sold: usize,
    pub requeried: usize,
    pub rejected_reclassifications: usize,
    pub filtered_out: usize,
    pub stored: usize,
    pub quarantined: usize,
    pub sheets: usize,
    pub interesting: usize,
    pub notified: bool,
}

/// The `Pipeline` struct owns every collaborator of a pass.
pub struct Pipeline {
    config: AppConfig,
    scraper: Scraper,
    extractor: Arc<dyn Extractor>,
    resolver: LocationResolver,
    mailer: Arc<dyn Mailer>,
}

impl Pipeline {
    /// Assembles a pipeline from explicit collaborators.
    pub fn new(
        config: AppConfig,
        scraper: Scraper,
        extractor: Arc<dyn Extractor>,
        resolver: LocationResolver,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            config,
            scraper,
            extractor,
            resolver,
            mailer,
        }
    }

    /// Builds the production collaborators described by `config`.
    ///
    /// # Returns
    ///
    /// An error if the HTTP client cannot be built or no LLM key is configured. A missing
    /// postal code table, geocoder key or mail key only degrades the pass and is logged.
    pub fn from_config(config: AppConfig) -> Result<Self> {
        let http = Arc::new(HttpClient::new(config.http.clone())?);

        let cache: Arc<dyn ResultCache> = match &config.storage.cache_file {
            Some(path) => Arc::new(JsonFileCache::new(path)),
            None => Arc::new(MemoryCache::new()),
        };

        let table = match PostalCodeTable::load(&config.geo.postal_code_table) {
            Ok(table) => {
                info!(codes = table.len(), "Loaded postal code table");
                table
            }
            Err(e) => {
                warn!(
                    path = %config.geo.postal_code_table.display(),
                    error = %e,
                    "Postal code table unavailable, relying on the geocoder"
                );
                PostalCodeTable::default()
            }
        };
        let geocoder = config.geo.geocoder_api_key.clone().map(|key| {
            Arc::new(GeoapifyGeocoder::new(
                http.clone(),
                cache.clone(),
                key,
                config.geo.country_code.clone(),
            )) as Arc<dyn Geocoder>
        });

        let extractor = Arc::new(OpenAiExtractor::new(http.clone(), cache, config.llm.clone())?);

        let mailer: Arc<dyn Mailer> = match MailjetMailer::from_config(http.clone(), &config.mail) {
            Some(mailer) => Arc::new(mailer),
            None => {
                info!("Mail delivery not configured, the digest goes to the log");
                Arc::new(LogMailer)
            }
        };

        let scraper = Scraper::new(http, config.marketplaces.clone(), config.http.concurrent_requests);

        Ok(Self::new(
            config,
            scraper,
            extractor,
            LocationResolver::new(table, geocoder),
            mailer,
        ))
    }

    /// Runs one pass.
    ///
    /// The store is saved before the digest is built, so a failing notification never loses
    /// the pass. Notification failures are logged, not returned.
    ///
    /// # Returns
    ///
    /// An error without touching the store when no search page could be loaded or the
    /// extraction service rejects the API key.
    pub async fn run(&self) -> Result<RunSummary> {
        let start = Instant::now();
        let storage = &self.config.storage;
        let references = &self.config.geo.references;

        let store = EntryStore::new(&storage.store_file);
        let snapshot = store.load().await?;

        let report = self.scraper.scrape_all().await;
        if report.is_blind() {
            return Err(ScoutError::ScrapeError(format!(
                "none of {} search pages could be loaded, store left untouched",
                report.pages_failed
            )));
        }
        if report.listings.is_empty() && !snapshot.entries.is_empty() {
            warn!("Scrape returned no listings, every stored entry will be marked sold");
        }
        write_json(&storage.current_offers_file, &report.listings).await?;
        let scraped = report.listings.len();
        let listings = snapshot.without_quarantined(report.listings);

        let reconciler = Reconciler::new(
            self.extractor.as_ref(),
            &self.resolver,
            &self.config.interests,
            references,
            &self.config.reconcile,
        );
        let outcome = reconciler.reconcile(&listings, snapshot.entries).await?;

        store.save(&outcome.entries, &snapshot.quarantined).await?;
        write_json(&storage.filtered_out_file, &outcome.filtered_out).await?;
        let sheets = export_workbook(&outcome.entries, references, &storage.export_file)?;

        let interesting = select_interesting(
            outcome.fresh_entries(),
            &self.config.interests,
            references,
            self.extractor.as_ref(),
            self.config.reconcile.batch_size,
        )
        .await;
        let notified = match notify(self.mailer.as_ref(), &interesting, references).await {
            Ok(sent) => sent,
            Err(e) => {
                error!(error = %e, entries = interesting.len(), "Sending the digest failed");
                false
            }
        };

        let summary = RunSummary {
            scraped,
            fresh: outcome.fresh,
            still_present: outcome.still_present,
            sold: outcome.sold,
            requeried: outcome.requeried,
            rejected_reclassifications: outcome.rejected_reclassifications,
            filtered_out: outcome.filtered_out.len(),
            stored: outcome.entries.len(),
            quarantined: snapshot.quarantined.len(),
            sheets: sheets.len(),
            interesting: interesting.len(),
            notified,
        };
        info!(
            scraped = summary.scraped,
            fresh = summary.fresh,
            sold = summary.sold,
            interesting = summary.interesting,
            elapsed_ms = start.elapsed().as_millis(),
            "Pass finished"
        );
        Ok(summary)
    }
}

/// Re-renders the workbook from the persisted store without scraping.
pub async fn export_store(config: &AppConfig) -> Result<Vec<EntryKind>> {
    let snapshot = EntryStore::new(&config.storage.store_file).load().await?;
    if !snapshot.quarantined.is_empty() {
        warn!(records = snapshot.quarantined.len(), "Unreadable records are left out of the export");
    }
    export_workbook(&snapshot.entries, &config.geo.references, &config.storage.export_file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::fixtures::one_of_each;
    use std::path::PathBuf;

    fn temp_config() -> (PathBuf, AppConfig) {
        let dir = std::env::temp_dir().join(format!("windscout-pipeline-{}", uuid::Uuid::new_v4()));
        let mut config = AppConfig::default();
        config.storage.store_file = dir.join("db.json");
        config.storage.current_offers_file = dir.join("current_offers.json");
        config.storage.filtered_out_file = dir.join("filtered_out_offers.json");
        config.storage.cache_file = None;
        config.storage.export_file = dir.join("export.xlsx");
        config.geo.postal_code_table = dir.join("missing.csv");
        config.llm.api_key = Some(String::from("test-key"));
        (dir, config)
    }

    #[tokio::test]
    async fn test_export_store_renders_persisted_entries() {
        let (dir, config) = temp_config();
        EntryStore::new(&config.storage.store_file)
            .save(&one_of_each(), &[])
            .await
            .unwrap();

        let sheets = export_store(&config).await.unwrap();
        assert_eq!(sheets.len(), 8);
        assert!(config.storage.export_file.exists());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_from_config_degrades_without_optional_inputs() {
        let (_dir, config) = temp_config();
        assert!(Pipeline::from_config(config).is_ok());
    }

    #[test]
    fn test_from_config_needs_llm_key() {
        let (_dir, mut config) = temp_config();
        config.llm.api_key = None;
        assert!(Pipeline::from_config(config).is_err());
    }
}
