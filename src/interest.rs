//! Which listings and entries are worth attention.
//!
//! Two stages are kept apart: [`passes_denylist`] runs on raw listings before any extraction
//! call is spent, and [`is_interesting`] runs on classified entries to pick what goes into the
//! notification digest.

use crate::batch::run_bounded;
use crate::entry::{
    parse_price, Accessory, Board, Boom, Details, Entry, EntryKind, FullRig, FullSet, Mast, Sail,
};
use crate::extract::Extractor;
use crate::geo::{nearest, ReferenceLocation};
use crate::listing::Listing;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// The `InterestConfig` struct holds both filter stages' settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InterestConfig {
    /// Listings whose title contains one of these are never extracted.
    pub title_denylist: Vec<String>,
    /// Listings whose description contains one of these are never extracted.
    pub description_denylist: Vec<String>,
    pub preferences: Preferences,
    pub gate_policy: GatePolicy,
    pub requests: InterestRequests,
}

/// How the description gate and the structural gate combine when both are configured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatePolicy {
    /// Both gates must pass.
    #[default]
    Both,
    /// One passing gate is enough.
    Either,
}

/// Interest in one entry type. Unset bounds are not checked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterestRequest {
    /// Criteria the extraction model judges the listing against.
    pub description: Option<String>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    /// Maximum distance to the nearest reference location.
    pub max_distance_km: Option<f64>,
    pub min_year: Option<u32>,
    /// Apply the built-in predicate for the entry type.
    pub structural: bool,
}

/// Per-type interest requests. A type without a request is never surfaced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterestRequests {
    pub sail: Option<InterestRequest>,
    pub board: Option<InterestRequest>,
    pub mast: Option<InterestRequest>,
    pub boom: Option<InterestRequest>,
    pub full_set: Option<InterestRequest>,
    pub full_rig: Option<InterestRequest>,
    pub accessory: Option<InterestRequest>,
}

/// Keyword lists the structural predicates match against. Matching is case-insensitive
/// substring containment; an empty allow-list accepts everything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub sail_sizes: Vec<String>,
    pub state_denylist: Vec<String>,
    pub sail_type_denylist: Vec<String>,
    /// Brands that pass the sail, full set and full rig predicates regardless of the rest.
    pub always_accept_brands: Vec<String>,
    pub mast_lengths: Vec<String>,
    pub mast_kinds: Vec<String>,
    pub mast_carbon: Vec<String>,
    pub mast_brands: Vec<String>,
    pub board_types: Vec<String>,
    pub boom_keywords: Vec<String>,
    pub accessory_keywords: Vec<String>,
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

impl Default for InterestConfig {
    fn default() -> Self {
        Self {
            title_denylist: strings(&["gesucht", "suche", "wing", "kite", "north face", "neo", "kind"]),
            description_denylist: Vec::new(),
            preferences: Preferences::default(),
            gate_policy: GatePolicy::default(),
            requests: InterestRequests::default(),
        }
    }
}

impl Default for InterestRequest {
    fn default() -> Self {
        Self {
            description: None,
            min_price: None,
            max_price: None,
            max_distance_km: None,
            min_year: None,
            structural: true,
        }
    }
}

impl Default for InterestRequests {
    fn default() -> Self {
        let near = |km: f64| InterestRequest {
            max_distance_km: Some(km),
            ..InterestRequest::default()
        };
        Self {
            sail: Some(InterestRequest {
                min_price: Some(60.0),
                max_price: Some(250.0),
                ..near(130.0)
            }),
            board: None,
            mast: Some(InterestRequest {
                max_price: Some(350.0),
                ..near(130.0)
            }),
            boom: None,
            full_set: Some(near(130.0)),
            full_rig: Some(near(130.0)),
            accessory: None,
        }
    }
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            sail_sizes: strings(&[
                "4.9", "5.0", "5.1", "5.2", "5.8", "5.9", "6.0", "6.1", "6.2", "8.3", "8.4", "8.5", "8.6",
            ]),
            state_denylist: strings(&["repaired", "demaged", "defective"]),
            sail_type_denylist: strings(&["slalom"]),
            always_accept_brands: strings(&["point-7", "point7"]),
            mast_lengths: strings(&["460"]),
            mast_kinds: strings(&["sdm"]),
            mast_carbon: strings(&["80", "85", "90", "95", "100"]),
            mast_brands: strings(&["point-7", "point7"]),
            board_types: Vec::new(),
            boom_keywords: Vec::new(),
            accessory_keywords: Vec::new(),
        }
    }
}

impl InterestRequests {
    pub fn get(&self, kind: EntryKind) -> Option<&InterestRequest> {
        match kind {
            EntryKind::Sail => self.sail.as_ref(),
            EntryKind::Board => self.board.as_ref(),
            EntryKind::Mast => self.mast.as_ref(),
            EntryKind::Boom => self.boom.as_ref(),
            EntryKind::FullSet => self.full_set.as_ref(),
            EntryKind::FullRig => self.full_rig.as_ref(),
            EntryKind::Accessory => self.accessory.as_ref(),
            EntryKind::Uninteresting => None,
        }
    }
}

fn contains_any(haystack: &str, needles: &[String]) -> bool {
    let haystack = haystack.to_lowercase();
    needles.iter().any(|n| haystack.contains(&n.to_lowercase()))
}

/// Allow-list check: empty lists accept everything.
fn allowed(haystack: &str, allow: &[String]) -> bool {
    allow.is_empty() || contains_any(haystack, allow)
}

/// Sizes are written with `,` as often as with `.`.
fn size_allowed(size: &str, allow: &[String]) -> bool {
    allowed(&size.replace(',', "."), allow)
}

/// Whether a raw listing is worth an extraction call as far as its text goes.
pub fn passes_denylist(listing: &Listing, config: &InterestConfig) -> bool {
    if contains_any(&listing.title, &config.title_denylist) {
        debug!(id = %listing.id, title = %listing.title, "Title on denylist");
        return false;
    }
    if contains_any(&listing.description, &config.description_denylist) {
        debug!(id = %listing.id, "Description on denylist");
        return false;
    }
    true
}

pub fn sail_filter(sail: &Sail, prefs: &Preferences) -> bool {
    if contains_any(&sail.brand, &prefs.always_accept_brands) {
        return true;
    }

    let size_ok = size_allowed(&sail.size, &prefs.sail_sizes);
    let state_ok = !contains_any(&sail.state, &prefs.state_denylist);
    let type_ok = !contains_any(&sail.sail_type, &prefs.sail_type_denylist);

    size_ok && state_ok && type_ok
}

pub fn board_filter(board: &Board, prefs: &Preferences) -> bool {
    contains_any(&board.brand, &prefs.always_accept_brands) || allowed(&board.board_type, &prefs.board_types)
}

pub fn mast_filter(mast: &Mast, prefs: &Preferences) -> bool {
    allowed(&mast.length, &prefs.mast_lengths)
        && allowed(&mast.rdm_or_sdm, &prefs.mast_kinds)
        && allowed(&mast.carbon, &prefs.mast_carbon)
        && allowed(&mast.brand, &prefs.mast_brands)
}

pub fn boom_filter(boom: &Boom, prefs: &Preferences) -> bool {
    allowed(&format!("{} {}", boom.brand, boom.size), &prefs.boom_keywords)
}

pub fn full_set_filter(full_set: &FullSet, prefs: &Preferences) -> bool {
    contains_any(&full_set.content_description, &prefs.always_accept_brands)
        || size_allowed(&full_set.content_description, &prefs.sail_sizes)
}

pub fn full_rig_filter(full_rig: &FullRig, prefs: &Preferences) -> bool {
    if contains_any(&full_rig.sail.brand, &prefs.always_accept_brands) {
        return true;
    }

    let size_ok = size_allowed(&full_rig.sail.size, &prefs.sail_sizes);
    let state_ok = !contains_any(&full_rig.sail.state, &prefs.state_denylist);

    size_ok && state_ok
}

pub fn accessory_filter(accessory: &Accessory, prefs: &Preferences) -> bool {
    allowed(&accessory.accessory_type, &prefs.accessory_keywords)
}

/// The built-in predicate for the entry's type. Uninteresting entries never pass.
pub fn structural_filter(entry: &Entry, prefs: &Preferences) -> bool {
    match &entry.details {
        Details::Sail(v) => sail_filter(v, prefs),
        Details::Board(v) => board_filter(v, prefs),
        Details::Mast(v) => mast_filter(v, prefs),
        Details::Boom(v) => boom_filter(v, prefs),
        Details::FullSet(v) => full_set_filter(v, prefs),
        Details::FullRig(v) => full_rig_filter(v, prefs),
        Details::Accessory(v) => accessory_filter(v, prefs),
        Details::Uninteresting(_) => false,
    }
}

/// Leading digits of a year field, e.g. `2019` for `"2019/2020"`.
fn year_prefix(text: &str) -> Option<u32> {
    let digits: String = text.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Numeric bounds of `request`: price, distance and release year.
///
/// Each check is lenient towards missing data: a price that is not a number, an entry without
/// a year and a configuration without reference locations all pass.
pub fn within_bounds(entry: &Entry, request: &InterestRequest, references: &[ReferenceLocation]) -> bool {
    if let Some(price) = parse_price(&entry.offer().price) {
        if request.min_price.is_some_and(|min| price < min) || request.max_price.is_some_and(|max| price > max) {
            return false;
        }
    }

    if let Some(max) = request.max_distance_km {
        if let Some((_, distance)) = nearest(entry.metadata.lat_long, references) {
            if distance.is_nan() || distance > max {
                return false;
            }
        }
    }

    if let Some(min) = request.min_year {
        if let Some(year) = entry.release_year().and_then(year_prefix) {
            if year < min {
                return false;
            }
        }
    }

    true
}

/// Combines the two optional gates. An unconfigured gate does not vote.
fn combine(structural: Option<bool>, description: Option<bool>, policy: GatePolicy) -> bool {
    match (structural, description) {
        (None, None) => true,
        (Some(gate), None) | (None, Some(gate)) => gate,
        (Some(s), Some(d)) => match policy {
            GatePolicy::Both => s && d,
            GatePolicy::Either => s || d,
        },
    }
}

/// Whether `entry` belongs in the notification digest.
///
/// The entry's type needs a configured [`InterestRequest`] and must be within its bounds. The
/// structural gate and the description gate then combine per [`GatePolicy`]. The description
/// gate is only asked when its answer can change the outcome; a failed judgement counts as
/// "not interesting".
pub async fn is_interesting(
    entry: &Entry,
    config: &InterestConfig,
    references: &[ReferenceLocation],
    extractor: &dyn Extractor,
) -> bool {
    let Some(request) = config.requests.get(entry.kind()) else {
        return false;
    };
    if !within_bounds(entry, request, references) {
        return false;
    }

    let structural = request
        .structural
        .then(|| structural_filter(entry, &config.preferences));

    let decided = match (structural, config.gate_policy) {
        (Some(false), GatePolicy::Both) => Some(false),
        (Some(true), GatePolicy::Either) => Some(true),
        _ => None,
    };
    if let Some(outcome) = decided {
        return outcome;
    }

    let description = match &request.description {
        Some(criteria) => Some(match extractor.judge(entry.offer(), criteria).await {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(id = %entry.id(), error = %e, "Interest judgement failed");
                false
            }
        }),
        None => None,
    };

    combine(structural, description, config.gate_policy)
}

/// Selects the interesting entries, judging at most `limit` at a time. Input order is kept.
pub async fn select_interesting<'a>(
    entries: &'a [Entry],
    config: &InterestConfig,
    references: &[ReferenceLocation],
    extractor: &dyn Extractor,
    limit: usize,
) -> Vec<&'a Entry> {
    let verdicts = run_bounded(entries.iter().collect::<Vec<_>>(), limit, "Filtering", |entry| async move {
        Ok(is_interesting(entry, config, references, extractor).await)
    })
    .await;

    entries
        .iter()
        .zip(verdicts)
        .filter(|(_, verdict)| verdict.unwrap_or(false))
        .map(|(entry, _)| entry)
        .collect()
}
