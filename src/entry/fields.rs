//! Per-variant field tables.
//!
//! Every flat variant is declared once through [`declare_variant!`]: the struct, its
//! [`FieldSpec`] table and the accessors are generated from the same list, so the prompt
//! schema, partial construction, serialization and export rows cannot drift apart.

use super::EntryKind;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// How a typed export value should be rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatHint {
    /// Fixed number of decimal places.
    Decimals(u8),
    /// Calendar date without time.
    Date,
    /// Date and time of day.
    DateTime,
}

/// A typed export cell.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Text(String),
    Number(f64),
    Timestamp(NaiveDateTime),
}

/// A cell together with its rendering hint.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportValue {
    pub format: Option<FormatHint>,
    pub value: CellValue,
}

impl ExportValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self {
            format: None,
            value: CellValue::Text(value.into()),
        }
    }

    pub fn with_format(format: FormatHint, value: CellValue) -> Self {
        Self {
            format: Some(format),
            value,
        }
    }
}

/// One declared field of a variant.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    /// JSON key, identical to the struct field.
    pub name: &'static str,
    /// Column label in exports.
    pub label: &'static str,
    /// What the extraction model is asked to fill in.
    pub description: &'static str,
    pub format: Option<FormatHint>,
    /// Best-effort projection of the raw text into a typed cell.
    pub transform: fn(&str) -> CellValue,
}

impl FieldSpec {
    pub const fn text(label: &'static str, description: &'static str) -> Self {
        Self {
            name: "",
            label,
            description,
            format: None,
            transform: as_text,
        }
    }

    pub const fn numeric(label: &'static str, description: &'static str, decimals: u8) -> Self {
        Self {
            name: "",
            label,
            description,
            format: Some(FormatHint::Decimals(decimals)),
            transform: parse_numeric,
        }
    }

    pub const fn with_transform(mut self, transform: fn(&str) -> CellValue) -> Self {
        self.transform = transform;
        self
    }

    pub const fn named(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    pub fn export(&self, raw: &str) -> ExportValue {
        ExportValue {
            format: self.format,
            value: (self.transform)(raw),
        }
    }
}

fn as_text(raw: &str) -> CellValue {
    CellValue::Text(raw.to_string())
}

/// Parses `raw` as a number (`,` accepted as decimal separator); anything else passes through.
pub fn parse_numeric(raw: &str) -> CellValue {
    match raw.trim().replace(',', ".").parse::<f64>() {
        Ok(n) if n.is_finite() => CellValue::Number(n),
        _ => CellValue::Text(raw.to_string()),
    }
}

fn parse_volume(raw: &str) -> CellValue {
    let stripped = raw
        .to_lowercase()
        .replace("liters", "")
        .replace("liter", "")
        .replace('l', "");
    match parse_numeric(&stripped) {
        CellValue::Number(n) => CellValue::Number(n),
        _ => CellValue::Text(raw.to_string()),
    }
}

/// Text of an extracted value. Absent and `null` values become the empty string.
pub fn raw_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// A flat equipment variant with a static field table.
pub trait Variant: Sized {
    const KIND: EntryKind;
    const FIELDS: &'static [FieldSpec];

    /// Field values in declaration order.
    fn values(&self) -> Vec<&str>;

    /// Builds the variant by asking `get` for every declared field.
    fn build(get: impl FnMut(&'static str) -> String) -> Self;

    /// Builds the variant from a loosely typed extraction result; absent fields become `""`.
    fn from_partial(raw: &Map<String, Value>) -> Self {
        Self::build(|name| raw_text(raw.get(name)))
    }

    fn fields(&self) -> Vec<(&'static FieldSpec, &str)> {
        Self::FIELDS.iter().zip(self.values()).collect()
    }
}

macro_rules! declare_variant {
    (
        $(#[$meta:meta])*
        $name:ident => $kind:expr, [ $( $field:ident => $spec:expr ),* $(,)? ]
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
        pub struct $name {
            $( pub $field: String, )*
        }

        impl Variant for $name {
            const KIND: EntryKind = $kind;
            const FIELDS: &'static [FieldSpec] = &[ $( $spec.named(stringify!($field)) ),* ];

            fn values(&self) -> Vec<&str> {
                vec![ $( self.$field.as_str() ),* ]
            }

            fn build(mut get: impl FnMut(&'static str) -> String) -> Self {
                Self { $( $field: get(stringify!($field)), )* }
            }
        }
    };
}

declare_variant!(
    /// A sail sold on its own.
    Sail => EntryKind::Sail, [
        size => FieldSpec::numeric("Size", "Size of the Sail in m²", 1),
        brand => FieldSpec::text("Brand", "Name of the Brand and Model"),
        mast_length => FieldSpec::numeric(
            "Mast Length",
            "Length of the required Mast in cm. Most of the time visible on a picture underneath \"Luff\" on the Sail.",
            0,
        ),
        boom_size => FieldSpec::numeric(
            "Boom Size",
            "Size of the required Boom in cm. Most of the time visible on a picture underneath \"Boom\" on the Sail.",
            0,
        ),
        sail_type => FieldSpec::text("Sail Type", "Wave, Freestyle, Freemove, Freeride, Freerace, Slalom, Racing"),
        year => FieldSpec::text("Year", "Release Year"),
        state => FieldSpec::text("State", "new, used, repaired, demaged, defective"),
    ]
);

declare_variant!(
    Board => EntryKind::Board, [
        size => FieldSpec::text("Size", "Dimensions of the Board"),
        brand => FieldSpec::text("Brand", "Name of the Brand and Model"),
        board_type => FieldSpec::text("Board Type", "Freeride, Wave, Freestyle, Slalom, ..."),
        volume => FieldSpec::numeric("Volume", "Volume in Liters", 0).with_transform(parse_volume),
        year => FieldSpec::text("Year", "Release Year"),
    ]
);

declare_variant!(
    Mast => EntryKind::Mast, [
        brand => FieldSpec::text("Brand", "Name of the Brand and Model"),
        length => FieldSpec::numeric("Length", "Length of the Mast in cm", 0),
        carbon => FieldSpec::numeric("Carbon", "Carbon Percentage", 1),
        rdm_or_sdm => FieldSpec::text("Rdm Or Sdm", "Either RDM or SDM"),
    ]
);

declare_variant!(
    Boom => EntryKind::Boom, [
        brand => FieldSpec::text("Brand", "Name of the Brand and Model"),
        size => FieldSpec::text("Size", "Minimum and Maximum Size of the Boom in cm (e.g., 140-190)"),
        year => FieldSpec::text("Year", "Release Year"),
    ]
);

declare_variant!(
    FullSet => EntryKind::FullSet, [
        content_description => FieldSpec::text(
            "Content Description",
            "Short description of what the set includes (e.g., Sail, Mast, Boom, Board, etc.)",
        ),
    ]
);

declare_variant!(
    Accessory => EntryKind::Accessory, [
        accessory_type => FieldSpec::text(
            "Accessory Type",
            "Mastfoot, Mast extension, Harness Lines, Fins, Harness, Impact Vest, etc. Should be the Type of the Accessory, followed by a short description. E.g., \"Harness Lines: 24-30 inch adjustable\"",
        ),
    ]
);

declare_variant!(
    /// Listings the extraction could not map to equipment. Kept for manual review.
    Uninteresting => EntryKind::Uninteresting, [
        title => FieldSpec::text("Title", "Original title of the listing"),
    ]
);

/// A complete rig: sail, mast and boom sold together. The parts share the parent's metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FullRig {
    pub sail: Sail,
    pub mast: Mast,
    pub boom: Boom,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn field_names<V: Variant>() -> Vec<&'static str> {
        V::FIELDS.iter().map(|f| f.name).collect()
    }

    #[test]
    fn test_tables_match_struct_fields() {
        let sail = serde_json::to_value(Sail::default()).unwrap();
        let keys: Vec<&str> = sail.as_object().unwrap().keys().map(String::as_str).collect();
        let mut expected = field_names::<Sail>();
        let mut actual = keys.clone();
        expected.sort();
        actual.sort();
        assert_eq!(expected, actual);

        assert_eq!(
            field_names::<Mast>(),
            vec!["brand", "length", "carbon", "rdm_or_sdm"]
        );
        assert_eq!(Sail::FIELDS.len(), Sail::default().values().len());
    }

    #[test]
    fn test_from_partial_fills_missing_with_empty() {
        let raw = json!({"size": "6.5", "brand": "North Spectro", "year": null, "mast_length": 460});
        let sail = Sail::from_partial(raw.as_object().unwrap());

        assert_eq!(sail.size, "6.5");
        assert_eq!(sail.brand, "North Spectro");
        assert_eq!(sail.mast_length, "460");
        assert_eq!(sail.year, "");
        assert_eq!(sail.state, "");
    }

    #[test]
    fn test_numeric_transform_passes_text_through() {
        assert_eq!(parse_numeric("4,9"), CellValue::Number(4.9));
        assert_eq!(parse_numeric(" 460 "), CellValue::Number(460.0));
        assert_eq!(parse_numeric("ca. 460"), CellValue::Text("ca. 460".into()));
        assert_eq!(parse_numeric(""), CellValue::Text(String::new()));
    }

    #[test]
    fn test_volume_transform() {
        assert_eq!(parse_volume("105 Liter"), CellValue::Number(105.0));
        assert_eq!(parse_volume("120l"), CellValue::Number(120.0));
        assert_eq!(parse_volume("big"), CellValue::Text("big".into()));
    }
}
