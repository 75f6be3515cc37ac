use super::{element_text, selector, Marketplace};
use crate::listing::{Listing, Seller};
use crate::{Result, ScoutError};
use chrono::Utc;
use scraper::{ElementRef, Html};

const BASE_URL: &str = "https://www.dailydose.de";
const DETAIL_LABEL_STYLE: &str = "color:rgba(255,255,255,0.4)";
const ALL_OFFERS_TEXT: &str = "alle Anzeigen des Verkäufers";

/// The DailyDose windsurf classifieds.
pub struct DailyDose;

/// Text node directly following a detail label, e.g. the price after `Preis:`.
fn labelled_value(label: ElementRef<'_>) -> Option<String> {
    label
        .next_sibling()
        .and_then(|node| node.value().as_text().map(|t| t.trim().to_string()))
        .filter(|v| !v.is_empty())
}

impl Marketplace for DailyDose {
    fn name(&self) -> &'static str {
        "DailyDose"
    }

    fn accepts(&self, search_url: &str) -> bool {
        search_url.starts_with(BASE_URL)
    }

    fn max_offers_per_page(&self) -> usize {
        30
    }

    fn parse_links(&self, html: &str) -> Vec<String> {
        let document = Html::parse_document(html);
        let Ok(anchors) = selector("a[href]") else {
            return Vec::new();
        };

        document
            .select(&anchors)
            .filter_map(|a| a.value().attr("href"))
            .filter(|href| href.contains("detail.htm") && href.contains("ai="))
            .map(|href| format!("{}/{}", BASE_URL, href.trim_start_matches('/')))
            .collect()
    }

    fn parse_listing(&self, html: &str, url: &str) -> Result<Listing> {
        let document = Html::parse_document(html);

        let box_selector = selector("div.fotos_box")?;
        let fotos_box = document
            .select(&box_selector)
            .next()
            .ok_or_else(|| ScoutError::ScrapeError(format!("no offer box on {}", url)))?;

        let h1 = selector("h1")?;
        let title = fotos_box
            .select(&h1)
            .next()
            .map(element_text)
            .ok_or_else(|| ScoutError::ScrapeError(format!("no title on {}", url)))?;
        let p = selector("p")?;
        let description = fotos_box.select(&p).next().map(element_text).unwrap_or_default();

        // Price, location, seller, date and id follow their labels in this order.
        let labels = selector(&format!("span[style=\"{}\"]", DETAIL_LABEL_STYLE))?;
        let details: Vec<Option<String>> = document.select(&labels).map(labelled_value).collect();
        let detail = |i: usize| details.get(i).cloned().flatten().unwrap_or_default();

        let id = detail(4);
        if id.is_empty() {
            return Err(ScoutError::ScrapeError(format!("no listing id on {}", url)));
        }

        let images = selector("img[src]")?;
        let image_urls = document
            .select(&images)
            .filter_map(|img| img.value().attr("src"))
            .filter(|src| src.contains(id.as_str()))
            .map(|src| format!("{}/{}", BASE_URL, src.trim_start_matches('/')))
            .collect();

        let anchors = selector("a[href]")?;
        let all_offers_link = document
            .select(&anchors)
            .find(|a| element_text(*a) == ALL_OFFERS_TEXT)
            .and_then(|a| a.value().attr("href"))
            .map(|href| format!("{}/{}", BASE_URL, href.trim_start_matches('/')))
            .unwrap_or_default();

        Ok(Listing {
            id,
            title,
            description,
            price: detail(0),
            location: detail(1),
            date: detail(3),
            link: url.to_string(),
            image_urls,
            sold: false,
            seller: Seller {
                id: all_offers_link.rsplit('/').next().unwrap_or_default().to_string(),
                name: detail(2),
                rating: String::from("DailyDose"),
                all_offers_link,
            },
            scraped_on: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DETAIL_PAGE: &str = r#"
        <html><body>
          <div class="fotos_box">
            <h1>Gaastra Manic 5.8 2019</h1>
            <p>Kaum benutzt,<br/> keine Reparaturen.</p>
          </div>
          <div class="details">
            <span style="color:rgba(255,255,255,0.4)">Preis:</span> 180 EUR<br/>
            <span style="color:rgba(255,255,255,0.4)">Ort:</span> 76133 Karlsruhe<br/>
            <span style="color:rgba(255,255,255,0.4)">Verkäufer:</span> Windi<br/>
            <span style="color:rgba(255,255,255,0.4)">Datum:</span> 03.06.2024<br/>
            <span style="color:rgba(255,255,255,0.4)">ID:</span> 98765<br/>
          </div>
          <img src="pics/98765_1.jpg"/>
          <img src="pics/logo.png"/>
          <a href="user/1234">alle Anzeigen des Verkäufers</a>
        </body></html>
    "#;

    #[test]
    fn test_parse_links() {
        let html = r#"
            <a href="kleinanzeigen/detail.htm?ai=98765">Segel</a>
            <a href="kleinanzeigen/liste.htm?page=2">Weiter</a>
        "#;
        assert_eq!(
            DailyDose.parse_links(html),
            vec!["https://www.dailydose.de/kleinanzeigen/detail.htm?ai=98765"]
        );
    }

    #[test]
    fn test_parse_listing() {
        let url = "https://www.dailydose.de/kleinanzeigen/detail.htm?ai=98765";
        let listing = DailyDose.parse_listing(DETAIL_PAGE, url).unwrap();

        assert_eq!(listing.id, "98765");
        assert_eq!(listing.title, "Gaastra Manic 5.8 2019");
        assert_eq!(listing.description, "Kaum benutzt, keine Reparaturen.");
        assert_eq!(listing.price, "180 EUR");
        assert_eq!(listing.location, "76133 Karlsruhe");
        assert_eq!(listing.date, "03.06.2024");
        assert_eq!(listing.image_urls, vec!["https://www.dailydose.de/pics/98765_1.jpg"]);
        assert_eq!(listing.seller.name, "Windi");
        assert_eq!(listing.seller.id, "1234");
        assert_eq!(listing.seller.all_offers_link, "https://www.dailydose.de/user/1234");
    }

    #[test]
    fn test_missing_box_is_an_error() {
        assert!(DailyDose.parse_listing("<html></html>", "u").is_err());
    }
}
