//! Classification of listings into [`Entry`] variants.

mod openai;

pub use openai::OpenAiExtractor;

use crate::entry::{Entry, EntryKind};
use crate::geo::Coordinates;
use crate::listing::Listing;
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

/// The external classification service.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Turns a listing into a loosely typed attribute bag with a `type` discriminant.
    async fn extract(&self, listing: &Listing) -> Result<Value>;

    /// Asks whether `listing` matches the free-text `criteria`.
    async fn judge(&self, listing: &Listing, criteria: &str) -> Result<bool>;
}

/// Classifies `listing`.
///
/// Transport errors, non-object answers, `"type": "N/A"` and unknown tags all produce an
/// `Uninteresting` entry carrying the listing title, so the listing is still recorded.
///
/// # Returns
///
/// An error only for [fatal](crate::ScoutError::is_fatal) failures such as a rejected API key.
pub async fn classify(extractor: &dyn Extractor, listing: &Listing, lat_long: Coordinates) -> Result<Entry> {
    match extractor.extract(listing).await {
        Ok(raw) => Ok(entry_from_answer(&raw, listing, lat_long)
            .unwrap_or_else(|| Entry::uninteresting(listing.clone(), lat_long))),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            warn!(id = %listing.id, link = %listing.link, error = %e, "Extraction failed");
            Ok(Entry::uninteresting(listing.clone(), lat_long))
        }
    }
}

/// Builds an entry from an extraction answer.
///
/// Returns `None` when the answer names no equipment type: not an object, `"N/A"`, or a tag
/// that is not one of the known types.
pub fn entry_from_answer(raw: &Value, listing: &Listing, lat_long: Coordinates) -> Option<Entry> {
    let Some(fields) = raw.as_object() else {
        warn!(id = %listing.id, response = %raw, "Extraction answer is not an object");
        return None;
    };

    let tag = fields.get("type").and_then(Value::as_str).unwrap_or_default();
    if tag.trim().eq_ignore_ascii_case("n/a") {
        debug!(id = %listing.id, title = %listing.title, "Not windsurf equipment");
        return None;
    }

    match EntryKind::parse(tag) {
        Some(kind) => Some(Entry::parse_partial(kind, fields, listing.clone(), lat_long)),
        None => {
            warn!(id = %listing.id, tag = %tag, "Extraction returned an unknown type");
            None
        }
    }
}
