use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single scraped classifieds ad at the moment it was scraped.
///
/// `id` is stable across scrapes of the same ad and is the only key used to match a listing
/// against what was stored before. Everything else may change between scrapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub id: String,
    pub title: String,
    pub description: String,
    /// Price as shown on the site, e.g. `"150 € VB"`.
    pub price: String,
    /// Free-text location, usually `"<plz> <town>"`.
    pub location: String,
    /// Posting date in the site's own format.
    pub date: String,
    pub link: String,
    #[serde(default)]
    pub image_urls: Vec<String>,
    #[serde(default)]
    pub sold: bool,
    pub seller: Seller,
    /// When the listing was first seen.
    pub scraped_on: DateTime<Utc>,
}

/// The account that posted a listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Seller {
    pub id: String,
    pub name: String,
    pub rating: String,
    pub all_offers_link: String,
}

impl Listing {
    /// Character counts of title and description, the signal for "seller added detail".
    pub fn text_lengths(&self) -> (usize, usize) {
        (self.title.chars().count(), self.description.chars().count())
    }

    /// Whether this scrape carries more text than `previous` in either title or description.
    pub fn grew_since(&self, previous: &Listing) -> bool {
        let (title, description) = self.text_lengths();
        let (old_title, old_description) = previous.text_lengths();
        title > old_title || description > old_description
    }
}
