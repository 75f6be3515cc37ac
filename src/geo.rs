use crate::cache::{cache_key, ResultCache};
use crate::http::HttpClient;
use crate::{Result, ScoutError};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tracing::{debug, instrument, warn};

const EARTH_RADIUS_KM: f64 = 6371.0;

/// A latitude/longitude pair in degrees, persisted as `[lat, lon]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "(f64, f64)", into = "(f64, f64)")]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinates {
    /// Stand-in for locations that could not be resolved. It lies in the Gulf of Guinea, far
    /// enough from any reference location that every distance bound rejects it.
    pub const UNKNOWN: Coordinates = Coordinates { lat: 0.0, lon: 0.0 };

    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn is_known(&self) -> bool {
        *self != Self::UNKNOWN
    }
}

impl Default for Coordinates {
    fn default() -> Self {
        Self::UNKNOWN
    }
}

impl From<(f64, f64)> for Coordinates {
    fn from((lat, lon): (f64, f64)) -> Self {
        Self { lat, lon }
    }
}

impl From<Coordinates> for (f64, f64) {
    fn from(c: Coordinates) -> Self {
        (c.lat, c.lon)
    }
}

/// Great-circle distance between two points in kilometers (haversine).
pub fn distance_km(a: Coordinates, b: Coordinates) -> f64 {
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();

    let h = (dlat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    // Rounding can push h just past 1 for antipodal points.
    let h = h.clamp(0.0, 1.0);

    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_KM * c
}

/// A named place listings are measured against, with the radius that counts as "near".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceLocation {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    pub radius_km: f64,
}

impl ReferenceLocation {
    pub fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.lat, self.lon)
    }
}

/// Closest reference location to `point` together with its distance.
pub fn nearest<'a>(
    point: Coordinates,
    references: &'a [ReferenceLocation],
) -> Option<(&'a ReferenceLocation, f64)> {
    references
        .iter()
        .map(|r| (r, distance_km(point, r.coordinates())))
        .min_by(|a, b| a.1.total_cmp(&b.1))
}

/// Whether `point` lies inside the radius of at least one reference location.
pub fn within_any_radius(point: Coordinates, references: &[ReferenceLocation]) -> bool {
    references
        .iter()
        .any(|r| distance_km(point, r.coordinates()) <= r.radius_km)
}

/// First standalone run of exactly five digits, i.e. a German postal code.
pub fn extract_postal_code(location: &str) -> Option<u32> {
    static PLZ: OnceLock<Option<Regex>> = OnceLock::new();
    let re = PLZ.get_or_init(|| Regex::new(r"(?:^|\D)(\d{5})(?:\D|$)").ok()).as_ref()?;
    re.captures(location)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Postal code → coordinate lookup table.
#[derive(Debug, Default, Clone)]
pub struct PostalCodeTable {
    codes: HashMap<u32, Coordinates>,
}

#[derive(Debug, Deserialize)]
struct PostalCodeRow {
    plz: u32,
    lat: f64,
    lon: f64,
}

impl PostalCodeTable {
    /// Loads a `plz,lat,lon` CSV with a header row. Malformed rows are skipped.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let reader = csv::Reader::from_path(path.as_ref())?;
        Self::from_reader(reader)
    }

    pub fn from_csv(data: &str) -> Result<Self> {
        Self::from_reader(csv::Reader::from_reader(data.as_bytes()))
    }

    fn from_reader<R: std::io::Read>(mut reader: csv::Reader<R>) -> Result<Self> {
        let mut codes = HashMap::new();
        for row in reader.deserialize::<PostalCodeRow>() {
            match row {
                Ok(row) => {
                    codes.insert(row.plz, Coordinates::new(row.lat, row.lon));
                }
                Err(e) => debug!("Skipping postal code row: {}", e),
            }
        }
        Ok(Self { codes })
    }

    pub fn lookup(&self, plz: u32) -> Option<Coordinates> {
        self.codes.get(&plz).copied()
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

/// Free-text location → coordinates.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn geocode(&self, location: &str) -> Result<Coordinates>;
}

#[derive(Debug, Deserialize)]
struct GeoapifyResponse {
    features: Vec<GeoapifyFeature>,
}

#[derive(Debug, Deserialize)]
struct GeoapifyFeature {
    properties: GeoapifyProperties,
}

#[derive(Debug, Deserialize)]
struct GeoapifyProperties {
    lat: f64,
    lon: f64,
}

/// Geocoder backed by the Geoapify search API. Answers are memoised in the injected cache.
pub struct GeoapifyGeocoder {
    http: Arc<HttpClient>,
    cache: Arc<dyn ResultCache>,
    api_key: String,
    country_code: String,
    base_url: String,
}

impl GeoapifyGeocoder {
    pub fn new(
        http: Arc<HttpClient>,
        cache: Arc<dyn ResultCache>,
        api_key: impl Into<String>,
        country_code: impl Into<String>,
    ) -> Self {
        Self {
            http,
            cache,
            api_key: api_key.into(),
            country_code: country_code.into(),
            base_url: String::from("https://api.geoapify.com"),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[async_trait]
impl Geocoder for GeoapifyGeocoder {
    #[instrument(skip(self))]
    async fn geocode(&self, location: &str) -> Result<Coordinates> {
        let key = cache_key(&("geocode", location, &self.country_code))?;
        if let Some(hit) = self.cache.get(&key).await {
            if let Ok(coords) = serde_json::from_value::<Coordinates>(hit) {
                return Ok(coords);
            }
        }

        let url = format!(
            "{}/v1/geocode/search?text={}&apiKey={}&filter=countrycode:{}",
            self.base_url,
            urlencoding::encode(location),
            urlencoding::encode(&self.api_key),
            urlencoding::encode(&self.country_code),
        );
        let response: GeoapifyResponse = self.http.get_json(&url).await?;
        let first = response.features.first().ok_or_else(|| {
            ScoutError::GeocodingError(format!("no match for location '{}'", location))
        })?;
        let coords = Coordinates::new(first.properties.lat, first.properties.lon);

        self.cache.put(&key, serde_json::to_value(coords)?).await;
        Ok(coords)
    }
}

/// Resolves listing locations: postal code table first, geocoder second, sentinel last.
pub struct LocationResolver {
    table: PostalCodeTable,
    geocoder: Option<Arc<dyn Geocoder>>,
}

impl LocationResolver {
    pub fn new(table: PostalCodeTable, geocoder: Option<Arc<dyn Geocoder>>) -> Self {
        Self { table, geocoder }
    }

    /// Never fails; unresolvable locations come back as [`Coordinates::UNKNOWN`].
    pub async fn resolve(&self, location: &str) -> Coordinates {
        if let Some(coords) = extract_postal_code(location).and_then(|plz| self.table.lookup(plz)) {
            return coords;
        }

        match &self.geocoder {
            Some(geocoder) => match geocoder.geocode(location).await {
                Ok(coords) => coords,
                Err(e) => {
                    warn!(location = %location, error = %e, "Location unresolvable, needs manual review");
                    Coordinates::UNKNOWN
                }
            },
            None => {
                warn!(location = %location, "Location unresolvable, needs manual review");
                Coordinates::UNKNOWN
            }
        }
    }
}
