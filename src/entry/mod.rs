//! Classified, persisted records.
//!
//! An [`Entry`] is a [`Metadata`] envelope (the source listing and its resolved coordinates)
//! plus one of the closed set of [`Details`] variants. The classification tag is derived from
//! the variant, so it can never disagree with it; on disk it is written as `metadata.type`.
//!
//! Persisted shape:
//!
//! ```json
//! {
//!   "metadata": { "type": "sail", "offer": { ... }, "lat_long": [49.0, 8.4] },
//!   "size": "6.5", "brand": "North Spectro", ...
//! }
//! ```
//!
//! A full rig nests its parts as `"sail"`, `"mast"` and `"boom"` objects, each carrying its own
//! `"type"`.

mod fields;
mod row;

pub use fields::{
    parse_numeric, raw_text, Accessory, Board, Boom, CellValue, ExportValue, FieldSpec, FormatHint,
    FullRig, FullSet, Mast, Sail, Uninteresting, Variant,
};
pub use row::{is_negotiable, parse_date, parse_price, ExportRow};

use crate::geo::Coordinates;
use crate::listing::Listing;
use serde::de::{self, DeserializeOwned};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Discriminant of an [`Entry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Sail,
    Board,
    Mast,
    Boom,
    FullSet,
    FullRig,
    Accessory,
    Uninteresting,
}

impl EntryKind {
    pub const ALL: [EntryKind; 8] = [
        EntryKind::Sail,
        EntryKind::Board,
        EntryKind::Mast,
        EntryKind::Boom,
        EntryKind::FullSet,
        EntryKind::FullRig,
        EntryKind::Accessory,
        EntryKind::Uninteresting,
    ];

    /// The kinds the extraction model may answer with.
    pub const EQUIPMENT: [EntryKind; 7] = [
        EntryKind::Sail,
        EntryKind::Board,
        EntryKind::Mast,
        EntryKind::Boom,
        EntryKind::FullSet,
        EntryKind::FullRig,
        EntryKind::Accessory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Sail => "sail",
            EntryKind::Board => "board",
            EntryKind::Mast => "mast",
            EntryKind::Boom => "boom",
            EntryKind::FullSet => "full_set",
            EntryKind::FullRig => "full_rig",
            EntryKind::Accessory => "accessory",
            EntryKind::Uninteresting => "uninteresting",
        }
    }

    /// Human readable name, e.g. `Full Rig`.
    pub fn display_name(&self) -> &'static str {
        match self {
            EntryKind::Sail => "Sail",
            EntryKind::Board => "Board",
            EntryKind::Mast => "Mast",
            EntryKind::Boom => "Boom",
            EntryKind::FullSet => "Full Set",
            EntryKind::FullRig => "Full Rig",
            EntryKind::Accessory => "Accessory",
            EntryKind::Uninteresting => "Uninteresting",
        }
    }

    /// Parses a tag leniently: case, surrounding whitespace and `-`/space instead of `_` are
    /// accepted.
    pub fn parse(tag: &str) -> Option<Self> {
        let normalized = tag.trim().to_lowercase().replace(['-', ' '], "_");
        Self::ALL.into_iter().find(|k| k.as_str() == normalized)
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a persisted record could not be turned back into an [`Entry`].
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("entry is not a JSON object")]
    NotAnObject,
    #[error("entry is missing `{0}`")]
    MissingField(&'static str),
    #[error("unknown entry type `{0}`")]
    UnknownTag(String),
    #[error("nested `{field}` has type `{found}`, expected `{expected}`")]
    TagMismatch {
        field: &'static str,
        expected: EntryKind,
        found: String,
    },
    #[error("malformed {kind} entry: {source}")]
    Malformed {
        kind: EntryKind,
        #[source]
        source: serde_json::Error,
    },
}

/// Fields shared by every variant.
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    pub offer: Listing,
    pub lat_long: Coordinates,
}

/// The per-variant payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Details {
    Sail(Sail),
    Board(Board),
    Mast(Mast),
    Boom(Boom),
    FullSet(FullSet),
    FullRig(FullRig),
    Accessory(Accessory),
    Uninteresting(Uninteresting),
}

impl Details {
    pub fn kind(&self) -> EntryKind {
        match self {
            Details::Sail(_) => EntryKind::Sail,
            Details::Board(_) => EntryKind::Board,
            Details::Mast(_) => EntryKind::Mast,
            Details::Boom(_) => EntryKind::Boom,
            Details::FullSet(_) => EntryKind::FullSet,
            Details::FullRig(_) => EntryKind::FullRig,
            Details::Accessory(_) => EntryKind::Accessory,
            Details::Uninteresting(_) => EntryKind::Uninteresting,
        }
    }
}

/// A classified listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub metadata: Metadata,
    pub details: Details,
}

impl Entry {
    pub fn new(details: Details, offer: Listing, lat_long: Coordinates) -> Self {
        Self {
            metadata: Metadata { offer, lat_long },
            details,
        }
    }

    /// The classification sink, carrying the listing title for manual review.
    pub fn uninteresting(offer: Listing, lat_long: Coordinates) -> Self {
        let title = offer.title.clone();
        Self::new(Details::Uninteresting(Uninteresting { title }), offer, lat_long)
    }

    pub fn kind(&self) -> EntryKind {
        self.details.kind()
    }

    pub fn id(&self) -> &str {
        &self.metadata.offer.id
    }

    pub fn offer(&self) -> &Listing {
        &self.metadata.offer
    }

    /// Release year text of the variant (the sail's for a full rig), if the variant has one.
    pub fn release_year(&self) -> Option<&str> {
        match &self.details {
            Details::Sail(s) => Some(&s.year),
            Details::Board(b) => Some(&b.year),
            Details::Boom(b) => Some(&b.year),
            Details::FullRig(r) => Some(&r.sail.year),
            _ => None,
        }
    }

    /// Builds an entry from a partial extraction result.
    ///
    /// Declared fields missing from `raw` are set to `""`. For a full rig the parts are read
    /// from the nested `sail`, `mast` and `boom` objects. Never fails.
    pub fn parse_partial(
        kind: EntryKind,
        raw: &Map<String, Value>,
        offer: Listing,
        lat_long: Coordinates,
    ) -> Self {
        let empty = Map::new();
        let nested = |field: &str| raw.get(field).and_then(Value::as_object).unwrap_or(&empty);

        let details = match kind {
            EntryKind::Sail => Details::Sail(Sail::from_partial(raw)),
            EntryKind::Board => Details::Board(Board::from_partial(raw)),
            EntryKind::Mast => Details::Mast(Mast::from_partial(raw)),
            EntryKind::Boom => Details::Boom(Boom::from_partial(raw)),
            EntryKind::FullSet => Details::FullSet(FullSet::from_partial(raw)),
            EntryKind::Accessory => Details::Accessory(Accessory::from_partial(raw)),
            EntryKind::FullRig => Details::FullRig(FullRig {
                sail: Sail::from_partial(nested("sail")),
                mast: Mast::from_partial(nested("mast")),
                boom: Boom::from_partial(nested("boom")),
            }),
            EntryKind::Uninteresting => return Self::uninteresting(offer, lat_long),
        };

        Self::new(details, offer, lat_long)
    }

    /// Reconstructs an entry from its persisted JSON object.
    ///
    /// The tag must be known and every declared field present. A missing `lat_long` defaults
    /// to [`Coordinates::UNKNOWN`].
    pub fn parse_full(value: &Value) -> Result<Self, DecodeError> {
        let object = value.as_object().ok_or(DecodeError::NotAnObject)?;
        let metadata = object
            .get("metadata")
            .and_then(Value::as_object)
            .ok_or(DecodeError::MissingField("metadata"))?;

        let tag = metadata
            .get("type")
            .and_then(Value::as_str)
            .ok_or(DecodeError::MissingField("metadata.type"))?;
        let kind = EntryKind::parse(tag).ok_or_else(|| DecodeError::UnknownTag(tag.to_string()))?;

        let offer: Listing = decode(
            kind,
            metadata
                .get("offer")
                .ok_or(DecodeError::MissingField("metadata.offer"))?,
        )?;
        let lat_long = match metadata.get("lat_long") {
            None | Some(Value::Null) => Coordinates::UNKNOWN,
            Some(v) => decode(kind, v)?,
        };

        let details = match kind {
            EntryKind::Sail => Details::Sail(decode(kind, value)?),
            EntryKind::Board => Details::Board(decode(kind, value)?),
            EntryKind::Mast => Details::Mast(decode(kind, value)?),
            EntryKind::Boom => Details::Boom(decode(kind, value)?),
            EntryKind::FullSet => Details::FullSet(decode(kind, value)?),
            EntryKind::Accessory => Details::Accessory(decode(kind, value)?),
            EntryKind::Uninteresting => Details::Uninteresting(decode(kind, value)?),
            EntryKind::FullRig => Details::FullRig(FullRig {
                sail: decode_part(object, "sail")?,
                mast: decode_part(object, "mast")?,
                boom: decode_part(object, "boom")?,
            }),
        };

        Ok(Self::new(details, offer, lat_long))
    }

    pub fn to_json(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}

fn decode<T: DeserializeOwned>(kind: EntryKind, value: &Value) -> Result<T, DecodeError> {
    T::deserialize(value).map_err(|source| DecodeError::Malformed { kind, source })
}

fn decode_part<V: Variant + DeserializeOwned>(
    object: &Map<String, Value>,
    field: &'static str,
) -> Result<V, DecodeError> {
    let part = object.get(field).ok_or(DecodeError::MissingField(field))?;
    if let Some(found) = part.get("type").and_then(Value::as_str) {
        if EntryKind::parse(found) != Some(V::KIND) {
            return Err(DecodeError::TagMismatch {
                field,
                expected: V::KIND,
                found: found.to_string(),
            });
        }
    }
    decode(EntryKind::FullRig, part)
}

#[derive(Serialize)]
struct MetadataRef<'a> {
    #[serde(rename = "type")]
    kind: EntryKind,
    offer: &'a Listing,
    lat_long: Coordinates,
}

/// A nested full-rig part, written with its own `type`.
struct Tagged<'a, V>(&'a V);

impl<V: Variant> Serialize for Tagged<'_, V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(V::FIELDS.len() + 1))?;
        map.serialize_entry("type", &V::KIND)?;
        for (spec, value) in self.0.fields() {
            map.serialize_entry(spec.name, value)?;
        }
        map.end()
    }
}

fn serialize_flat<M: SerializeMap, V: Variant>(map: &mut M, variant: &V) -> Result<(), M::Error> {
    for (spec, value) in variant.fields() {
        map.serialize_entry(spec.name, value)?;
    }
    Ok(())
}

impl Serialize for Entry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry(
            "metadata",
            &MetadataRef {
                kind: self.kind(),
                offer: &self.metadata.offer,
                lat_long: self.metadata.lat_long,
            },
        )?;
        match &self.details {
            Details::Sail(v) => serialize_flat(&mut map, v)?,
            Details::Board(v) => serialize_flat(&mut map, v)?,
            Details::Mast(v) => serialize_flat(&mut map, v)?,
            Details::Boom(v) => serialize_flat(&mut map, v)?,
            Details::FullSet(v) => serialize_flat(&mut map, v)?,
            Details::Accessory(v) => serialize_flat(&mut map, v)?,
            Details::Uninteresting(v) => serialize_flat(&mut map, v)?,
            Details::FullRig(rig) => {
                map.serialize_entry("sail", &Tagged(&rig.sail))?;
                map.serialize_entry("mast", &Tagged(&rig.mast))?;
                map.serialize_entry("boom", &Tagged(&rig.boom))?;
            }
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Entry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Entry::parse_full(&value).map_err(de::Error::custom)
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::listing::fixtures::listing;
    use serde_json::json;

    #[test]
    fn test_round_trip_every_kind() {
        for entry in one_of_each() {
            let json = entry.to_json().unwrap();
            assert_eq!(json["metadata"]["type"], json!(entry.kind().as_str()));

            let back = Entry::parse_full(&json).unwrap();
            assert_eq!(back, entry);
            assert_eq!(back.kind(), entry.kind());
        }
    }

    #[test]
    fn test_round_trip_through_text() {
        let entries = one_of_each();
        let text = serde_json::to_string_pretty(&entries).unwrap();
        let back: Vec<Entry> = serde_json::from_str(&text).unwrap();
        assert_eq!(back, entries);
    }

    #[test]
    fn test_full_rig_nests_tagged_parts() {
        let json = full_rig("9", "5.8").to_json().unwrap();
        assert_eq!(json["metadata"]["type"], "full_rig");
        assert_eq!(json["sail"]["type"], "sail");
        assert_eq!(json["sail"]["size"], "5.8");
        assert_eq!(json["mast"]["type"], "mast");
        assert_eq!(json["boom"]["type"], "boom");
        assert!(json.get("size").is_none());
    }

    #[test]
    fn test_parse_full_rejects_unknown_tag() {
        let mut json = sail("1", "6.5").to_json().unwrap();
        json["metadata"]["type"] = json!("kite");
        assert!(matches!(Entry::parse_full(&json), Err(DecodeError::UnknownTag(t)) if t == "kite"));
    }

    #[test]
    fn test_parse_full_rejects_missing_field() {
        let mut json = sail("1", "6.5").to_json().unwrap();
        json.as_object_mut().unwrap().remove("brand");
        assert!(matches!(
            Entry::parse_full(&json),
            Err(DecodeError::Malformed { kind: EntryKind::Sail, .. })
        ));

        assert!(matches!(Entry::parse_full(&json!([])), Err(DecodeError::NotAnObject)));
        assert!(matches!(
            Entry::parse_full(&json!({"size": "1"})),
            Err(DecodeError::MissingField("metadata"))
        ));
    }

    #[test]
    fn test_parse_full_rejects_mismatched_part() {
        let mut json = full_rig("1", "5.8").to_json().unwrap();
        json["mast"]["type"] = json!("boom");
        assert!(matches!(
            Entry::parse_full(&json),
            Err(DecodeError::TagMismatch { field: "mast", .. })
        ));
    }

    #[test]
    fn test_missing_coordinates_default_to_unknown() {
        let mut json = sail("1", "6.5").to_json().unwrap();
        json["metadata"].as_object_mut().unwrap().remove("lat_long");
        let entry = Entry::parse_full(&json).unwrap();
        assert_eq!(entry.metadata.lat_long, Coordinates::UNKNOWN);
    }

    #[test]
    fn test_parse_partial_sail() {
        let raw = json!({
            "type": "sail",
            "size": "6.5",
            "brand": "North Spectro",
            "mast_length": "4.92",
            "boom_size": "1.95",
            "year": "N/A",
            "state": "repaired"
        });
        let offer = listing("abc", "North Spectro 6.5");
        let entry = Entry::parse_partial(EntryKind::Sail, raw.as_object().unwrap(), offer, karlsruhe());

        assert_eq!(entry.kind(), EntryKind::Sail);
        assert_eq!(entry.id(), "abc");
        let Details::Sail(sail) = &entry.details else {
            panic!("expected a sail");
        };
        assert_eq!(sail.size, "6.5");
        assert_eq!(sail.brand, "North Spectro");
        assert_eq!(sail.mast_length, "4.92");
        assert_eq!(sail.boom_size, "1.95");
        assert_eq!(sail.year, "N/A");
        assert_eq!(sail.state, "repaired");
        assert_eq!(sail.sail_type, "");
    }

    #[test]
    fn test_parse_partial_full_rig_tolerates_missing_parts() {
        let raw = json!({"type": "full_rig", "sail": {"size": "5.8"}});
        let entry = Entry::parse_partial(
            EntryKind::FullRig,
            raw.as_object().unwrap(),
            listing("r", "Rigg"),
            karlsruhe(),
        );
        let Details::FullRig(rig) = &entry.details else {
            panic!("expected a full rig");
        };
        assert_eq!(rig.sail.size, "5.8");
        assert_eq!(rig.mast, Mast::default());
        assert_eq!(rig.boom, Boom::default());
    }

    #[test]
    fn test_parse_partial_uninteresting_keeps_title() {
        let entry = Entry::parse_partial(
            EntryKind::Uninteresting,
            &Map::new(),
            listing("u", "Kinder Surfbrett"),
            karlsruhe(),
        );
        assert_eq!(
            entry.details,
            Details::Uninteresting(Uninteresting { title: "Kinder Surfbrett".into() })
        );
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!(EntryKind::parse("full_rig"), Some(EntryKind::FullRig));
        assert_eq!(EntryKind::parse(" Full Rig "), Some(EntryKind::FullRig));
        assert_eq!(EntryKind::parse("SAIL"), Some(EntryKind::Sail));
        assert_eq!(EntryKind::parse("N/A"), None);
    }
}
