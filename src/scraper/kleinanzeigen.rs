use super::{first_text, required_text, selector, Marketplace};
use crate::listing::{Listing, Seller};
use crate::{Result, ScoutError};
use chrono::Utc;
use scraper::Html;

const BASE_URL: &str = "https://www.kleinanzeigen.de";

/// kleinanzeigen.de
pub struct Kleinanzeigen;

impl Marketplace for Kleinanzeigen {
    fn name(&self) -> &'static str {
        "Kleinanzeigen"
    }

    fn accepts(&self, search_url: &str) -> bool {
        search_url.starts_with(BASE_URL)
    }

    fn max_offers_per_page(&self) -> usize {
        25
    }

    fn parse_links(&self, html: &str) -> Vec<String> {
        let document = Html::parse_document(html);
        let Ok(articles) = selector("article[data-href]") else {
            return Vec::new();
        };

        document
            .select(&articles)
            .filter_map(|a| a.value().attr("data-href"))
            .filter(|href| href.starts_with("/s-anzeige/"))
            .map(|href| format!("{}{}", BASE_URL, href))
            .collect()
    }

    fn parse_listing(&self, html: &str, url: &str) -> Result<Listing> {
        let document = Html::parse_document(html);

        let id_items = selector("#viewad-ad-id-box li")?;
        let id = document
            .select(&id_items)
            .nth(1)
            .map(super::element_text)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ScoutError::ScrapeError(format!("no listing id on {}", url)))?;

        let description_selector = selector("#viewad-description-text")?;
        let description = document
            .select(&description_selector)
            .next()
            .map(|d| {
                d.text()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default();

        let images = selector("#viewad-image")?;
        let image_urls = document
            .select(&images)
            .filter_map(|img| img.value().attr("src"))
            .map(str::to_string)
            .collect();

        let profile = selector(".userprofile-vip a")?;
        let seller = match document.select(&profile).next() {
            Some(link) => {
                let href = link.value().attr("href").unwrap_or_default();
                Seller {
                    id: href.rsplit('=').next().unwrap_or_default().to_string(),
                    name: super::element_text(link),
                    rating: first_text(&document, ".userbadge-tag")?.unwrap_or_else(|| String::from("No rating")),
                    all_offers_link: format!("{}{}", BASE_URL, href),
                }
            }
            None => Seller::default(),
        };

        Ok(Listing {
            id,
            title: required_text(&document, "#viewad-title")?,
            description,
            price: first_text(&document, "#viewad-price")?.unwrap_or_default(),
            location: first_text(&document, "#viewad-locality")?.unwrap_or_default(),
            date: first_text(&document, "#viewad-extra-info div span")?.unwrap_or_default(),
            link: url.to_string(),
            image_urls,
            sold: false,
            seller,
            scraped_on: Utc::now(),
        })
    }
}
