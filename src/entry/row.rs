//! Flat export projection of an [`Entry`].

use super::fields::{CellValue, ExportValue, FormatHint, Variant};
use super::{Details, Entry};
use crate::geo::{nearest, ReferenceLocation};
use chrono::{NaiveDate, NaiveDateTime};
use indexmap::IndexMap;

/// Ordered `label -> value` mapping, one per exported row.
pub type ExportRow = IndexMap<String, ExportValue>;

const DATE_TIME_FORMATS: [&str; 2] = ["%d.%m.%Y %H:%M", "%Y-%m-%d %H:%M:%S"];
const DATE_FORMATS: [&str; 3] = ["%d.%m.%Y", "%Y-%m-%d", "%d.%m.%y"];

impl Entry {
    /// Projects the entry into an export row.
    ///
    /// Flat variants produce one column per declared field. A full rig produces the sail, mast
    /// and boom columns prefixed with `Sail `, `Mast ` and `Boom `. With `include_metadata` the
    /// listing columns follow once, including the nearest of `references`.
    ///
    /// Never fails: text that does not parse as a number or date is exported as is.
    pub fn to_export_row(&self, include_metadata: bool, references: &[ReferenceLocation]) -> ExportRow {
        let mut row = ExportRow::new();

        match &self.details {
            Details::Sail(v) => push_fields(&mut row, "", v),
            Details::Board(v) => push_fields(&mut row, "", v),
            Details::Mast(v) => push_fields(&mut row, "", v),
            Details::Boom(v) => push_fields(&mut row, "", v),
            Details::FullSet(v) => push_fields(&mut row, "", v),
            Details::Accessory(v) => push_fields(&mut row, "", v),
            Details::Uninteresting(v) => push_fields(&mut row, "", v),
            Details::FullRig(rig) => {
                push_fields(&mut row, "Sail ", &rig.sail);
                push_fields(&mut row, "Mast ", &rig.mast);
                push_fields(&mut row, "Boom ", &rig.boom);
            }
        }

        if include_metadata {
            self.push_metadata(&mut row, references);
        }
        row
    }

    fn push_metadata(&self, row: &mut ExportRow, references: &[ReferenceLocation]) {
        let offer = &self.metadata.offer;
        let yes_no = |flag: bool| ExportValue::text(if flag { "Yes" } else { "No" });

        let price = match parse_price(&offer.price) {
            Some(n) => ExportValue::with_format(FormatHint::Decimals(2), CellValue::Number(n)),
            None => ExportValue::text(offer.price.clone()),
        };
        row.insert("Price".into(), price);
        row.insert("Negotiable".into(), yes_no(is_negotiable(&offer.price)));
        row.insert("Location".into(), ExportValue::text(offer.location.clone()));
        row.insert("Date".into(), export_date(&offer.date));
        row.insert("Sold".into(), yes_no(offer.sold));
        row.insert("Link".into(), ExportValue::text(offer.link.clone()));
        row.insert("Seller".into(), ExportValue::text(offer.seller.name.clone()));
        row.insert(
            "All other offers".into(),
            ExportValue::text(offer.seller.all_offers_link.clone()),
        );
        row.insert(
            "Scraped on".into(),
            ExportValue::with_format(
                FormatHint::DateTime,
                CellValue::Timestamp(offer.scraped_on.naive_utc()),
            ),
        );

        let closest = if self.metadata.lat_long.is_known() {
            nearest(self.metadata.lat_long, references)
        } else {
            None
        };
        match closest {
            Some((reference, distance)) => {
                row.insert("Nearest location".into(), ExportValue::text(reference.name.clone()));
                row.insert(
                    "Distance (km)".into(),
                    ExportValue::with_format(FormatHint::Decimals(1), CellValue::Number(distance)),
                );
            }
            None => {
                row.insert("Nearest location".into(), ExportValue::text(""));
                row.insert("Distance (km)".into(), ExportValue::text(""));
            }
        }
    }
}

fn push_fields<V: Variant>(row: &mut ExportRow, prefix: &str, variant: &V) {
    for (spec, value) in variant.fields() {
        row.insert(format!("{}{}", prefix, spec.label), spec.export(value));
    }
}

/// Best-effort price parsing: `"1.250 € VB"` is `1250.0`, `"4,50 €"` is `4.5`.
///
/// Returns `None` for anything that is not a plain amount, e.g. `"VB"` or `"Zu verschenken"`.
pub fn parse_price(text: &str) -> Option<f64> {
    let cleaned: String = text
        .to_lowercase()
        .replace('€', "")
        .replace("eur", "")
        .replace("vb", "")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();

    if cleaned.is_empty() || !cleaned.chars().all(|c| c.is_ascii_digit() || c == '.' || c == ',') {
        return None;
    }
    if !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    cleaned
        .replace('.', "")
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
}

/// Whether the price text marks the price as negotiable.
pub fn is_negotiable(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.split(|c: char| !c.is_alphanumeric()).any(|word| word == "vb")
        || lower.contains("verhandelbar")
        || lower.contains("verhandlungsbasis")
}

/// Parses a posting date in one of the formats the marketplaces use.
pub fn parse_date(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    DATE_TIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(text, f).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|f| NaiveDate::parse_from_str(text, f).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn export_date(text: &str) -> ExportValue {
    match parse_date(text) {
        Some(ts) => ExportValue::with_format(FormatHint::Date, CellValue::Timestamp(ts)),
        None => ExportValue::text(text),
    }
}
