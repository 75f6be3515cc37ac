//! Merging a scrape pass into the persisted entries.
//!
//! Listings and entries are joined on the listing id. Every persisted entry is either still
//! present (its listing is refreshed) or sold (flagged, never removed). Listings without an
//! entry are new: they go through the cheap pre-extraction filter and survivors are
//! classified. The next store is the fresh entries followed by the old ones in their original
//! order.
//!
//! All network work (location lookups, extraction) is finished and collected before any entry
//! is touched, so no entry is ever half-updated across a suspension point.

use crate::batch::run_bounded;
use crate::config::ReconcileConfig;
use crate::entry::Entry;
use crate::extract::{classify, entry_from_answer, Extractor};
use crate::geo::{within_any_radius, Coordinates, LocationResolver, ReferenceLocation};
use crate::interest::{passes_denylist, InterestConfig};
use crate::listing::Listing;
use crate::Result;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Indices of the three disjoint groups of a scrape pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Partition {
    /// Listings with no persisted entry.
    pub new: Vec<usize>,
    /// `(listing, entry)` pairs sharing an id.
    pub still_present: Vec<(usize, usize)>,
    /// Entries whose listing was not seen in this pass.
    pub sold: Vec<usize>,
}

/// Splits `listings` and `entries` by listing id.
///
/// Ids are expected to be unique on both sides; deduplication is the scrape layer's job.
pub fn partition(listings: &[Listing], entries: &[Entry]) -> Partition {
    let by_id: HashMap<&str, usize> = listings
        .iter()
        .enumerate()
        .map(|(i, l)| (l.id.as_str(), i))
        .collect();

    let mut partition = Partition::default();
    let mut matched = vec![false; listings.len()];

    for (entry_idx, entry) in entries.iter().enumerate() {
        match by_id.get(entry.id()) {
            Some(&listing_idx) => {
                matched[listing_idx] = true;
                partition.still_present.push((listing_idx, entry_idx));
            }
            None => partition.sold.push(entry_idx),
        }
    }

    partition.new = (0..listings.len()).filter(|&i| !matched[i]).collect();
    partition
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Default)]
pub struct Reconciliation {
    /// The next persisted state: fresh entries first, then the previous entries.
    pub entries: Vec<Entry>,
    /// How many of `entries` (from the front) were classified in this pass.
    pub fresh: usize,
    pub still_present: usize,
    pub sold: usize,
    /// Entries whose fields were replaced by a re-extraction.
    pub requeried: usize,
    /// Re-extractions that came back with a different type and were discarded.
    pub rejected_reclassifications: usize,
    /// New listings the pre-extraction filter dropped. They are not persisted.
    pub filtered_out: Vec<Listing>,
}

impl Reconciliation {
    pub fn fresh_entries(&self) -> &[Entry] {
        &self.entries[..self.fresh]
    }
}

/// The `Reconciler` struct merges scrape passes into the persisted entries.
pub struct Reconciler<'a> {
    extractor: &'a dyn Extractor,
    resolver: &'a LocationResolver,
    interests: &'a InterestConfig,
    references: &'a [ReferenceLocation],
    config: &'a ReconcileConfig,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        extractor: &'a dyn Extractor,
        resolver: &'a LocationResolver,
        interests: &'a InterestConfig,
        references: &'a [ReferenceLocation],
        config: &'a ReconcileConfig,
    ) -> Self {
        Self {
            extractor,
            resolver,
            interests,
            references,
            config,
        }
    }

    /// Reconciles the current scrape pass against the persisted entries.
    ///
    /// # Arguments
    ///
    /// * `listings` - Every listing seen in this pass, unique by id.
    /// * `entries` - The persisted entries, in stored order.
    ///
    /// # Returns
    ///
    /// The next persisted state with counts. Individual extraction or lookup failures degrade
    /// the affected item. A [fatal](crate::ScoutError::is_fatal) extraction error aborts the
    /// pass, so nothing half-classified reaches the store.
    pub async fn reconcile(&self, listings: &[Listing], mut entries: Vec<Entry>) -> Result<Reconciliation> {
        let groups = partition(listings, &entries);
        info!(
            new = groups.new.len(),
            still_present = groups.still_present.len(),
            sold = groups.sold.len(),
            "Partitioned scrape pass"
        );

        for &idx in &groups.sold {
            let offer = &mut entries[idx].metadata.offer;
            if !offer.sold {
                debug!(id = %offer.id, "Listing disappeared, marking sold");
            }
            offer.sold = true;
        }

        let (requeried, rejected) = self
            .update_still_present(listings, &mut entries, &groups.still_present)
            .await?;

        let new_listings: Vec<&Listing> = groups.new.iter().map(|&i| &listings[i]).collect();
        let (accepted, filtered_out) = self.pre_filter(new_listings).await;
        let fresh = self.classify_all(accepted).await?;

        let fresh_count = fresh.len();
        let mut next = fresh;
        next.extend(entries);

        Ok(Reconciliation {
            entries: next,
            fresh: fresh_count,
            still_present: groups.still_present.len(),
            sold: groups.sold.len(),
            requeried,
            rejected_reclassifications: rejected,
            filtered_out,
        })
    }

    /// Refreshes the listing of every still-present entry, re-extracting those whose text grew.
    ///
    /// Returns the number of re-extracted and of rejected entries. A failed re-extraction keeps
    /// the stored fields unless the failure is fatal.
    async fn update_still_present(
        &self,
        listings: &[Listing],
        entries: &mut [Entry],
        pairs: &[(usize, usize)],
    ) -> Result<(usize, usize)> {
        let grown: Vec<(usize, usize)> = if self.config.requery_on_growth {
            pairs
                .iter()
                .copied()
                .filter(|&(l, e)| listings[l].grew_since(entries[e].offer()))
                .collect()
        } else {
            Vec::new()
        };

        let answers = {
            let snapshot: &[Entry] = entries;
            run_bounded(grown.clone(), self.config.batch_size, "Re-extracting", |(l, e)| async move {
                let listing = &listings[l];
                let lat_long = snapshot[e].metadata.lat_long;
                let answer = self.extractor.extract(listing).await;
                Ok(answer.map(|raw| {
                    entry_from_answer(&raw, listing, lat_long)
                        .unwrap_or_else(|| Entry::uninteresting(listing.clone(), lat_long))
                }))
            })
            .await
        };

        let mut updates = Vec::with_capacity(answers.len());
        for (&(_, entry_idx), answer) in grown.iter().zip(answers) {
            match answer {
                Some(Ok(update)) => updates.push(Some(update)),
                Some(Err(e)) if e.is_fatal() => return Err(e),
                Some(Err(e)) => {
                    warn!(id = %entries[entry_idx].id(), error = %e, "Re-extraction failed, keeping fields");
                    updates.push(None);
                }
                None => updates.push(None),
            }
        }

        let mut requeried = 0;
        let mut rejected = 0;
        for ((_, entry_idx), update) in grown.into_iter().zip(updates) {
            let entry = &mut entries[entry_idx];
            match update {
                Some(update) if update.kind() == entry.kind() => {
                    debug!(id = %entry.id(), "Replacing fields after listing grew");
                    entry.details = update.details;
                    requeried += 1;
                }
                Some(update) => {
                    warn!(
                        id = %entry.id(),
                        stored = %entry.kind(),
                        extracted = %update.kind(),
                        "Re-extraction changed the type, keeping the stored classification"
                    );
                    rejected += 1;
                }
                None => {}
            }
        }

        for &(listing_idx, entry_idx) in pairs {
            let offer = &mut entries[entry_idx].metadata.offer;
            let first_seen = offer.scraped_on;
            *offer = listings[listing_idx].clone();
            offer.scraped_on = first_seen;
            offer.sold = false;
        }

        Ok((requeried, rejected))
    }

    /// Drops new listings that are not worth an extraction call.
    ///
    /// Returns the accepted listings with their coordinates, and the rejected listings.
    async fn pre_filter(&self, listings: Vec<&Listing>) -> (Vec<(Listing, Coordinates)>, Vec<Listing>) {
        let mut filtered_out = Vec::new();
        let mut candidates = Vec::new();
        for listing in listings {
            if passes_denylist(listing, self.interests) {
                candidates.push(listing);
            } else {
                filtered_out.push(listing.clone());
            }
        }

        let resolved = run_bounded(candidates.clone(), self.config.batch_size, "Locating", |listing| async move {
            Ok(self.resolver.resolve(&listing.location).await)
        })
        .await;

        let mut accepted = Vec::new();
        for (listing, coords) in candidates.into_iter().zip(resolved) {
            let coords = coords.unwrap_or(Coordinates::UNKNOWN);
            if !coords.is_known() {
                warn!(id = %listing.id, location = %listing.location, link = %listing.link,
                    "Excluding listing without a resolvable location, needs manual review");
                filtered_out.push(listing.clone());
            } else if !self.references.is_empty() && !within_any_radius(coords, self.references) {
                debug!(id = %listing.id, location = %listing.location, "Too far away");
                filtered_out.push(listing.clone());
            } else {
                accepted.push((listing.clone(), coords));
            }
        }

        info!(accepted = accepted.len(), filtered_out = filtered_out.len(), "Pre-filtered new listings");
        (accepted, filtered_out)
    }

    /// Classifies every accepted listing; non-fatal failures become `Uninteresting`.
    async fn classify_all(&self, accepted: Vec<(Listing, Coordinates)>) -> Result<Vec<Entry>> {
        let results = run_bounded(accepted.clone(), self.config.batch_size, "Extracting", |(listing, coords)| async move {
            Ok(classify(self.extractor, &listing, coords).await)
        })
        .await;

        let mut entries = Vec::with_capacity(results.len());
        for (result, (listing, coords)) in results.into_iter().zip(accepted) {
            match result {
                Some(Ok(entry)) => entries.push(entry),
                Some(Err(e)) => return Err(e),
                None => entries.push(Entry::uninteresting(listing, coords)),
            }
        }
        Ok(entries)
    }
}
