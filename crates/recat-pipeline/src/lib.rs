//! Record resolution, merge, and enrichment pipelines for the catalog.
//!
//! Two batch variants run over the record store one namespace at a time:
//! `cleanup` (invalid-slug purge, alias-driven duplicate consolidation,
//! schema standardization) and `fix` (bilingual field synthesis, candidate
//! enrichment, validity gating). Per-record failures are logged and
//! skipped; only a missing store root aborts a run.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use recat_core::{field_present, is_present, similarity, slugify};
use recat_extract::extract_candidates;
use recat_store::{RecordStore, StoreError};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "recat-pipeline";

/// Developer namespaces processed by default, in batch order.
pub const DEFAULT_NAMESPACES: [&str; 5] = ["emaar", "damac", "sobha", "nakheel", "binghatti"];

/// Entity slugs that are artifacts of the upstream scrape, not projects.
pub const INVALID_SLUGS: [&str; 5] = ["projects", "communities", "test", "unknown", "n/a"];

/// Placeholder 3D tour URLs: a bare base domain means "no tour".
pub const PLACEHOLDER_TOUR_URLS: [&str; 4] = [
    "https://sobha.cloud/",
    "https://sobha.cloud",
    "http://sobha.cloud/",
    "http://sobha.cloud",
];

/// Minimum similarity a candidate title must exceed to count as a match.
pub const MATCH_THRESHOLD: f64 = 0.6;

const IMMUTABLE_KEYS: [&str; 2] = ["slug", "developer"];

/// Curated, namespace-scoped mapping from deprecated entity identifiers to
/// the canonical identifier they fold into. Static configuration: consumers
/// treat it as read-only.
#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    namespaces: BTreeMap<String, BTreeMap<String, String>>,
}

impl AliasTable {
    /// The curators' built-in table. Phase variants (the skyvue towers)
    /// are deliberately absent: phases are distinct projects, not
    /// duplicates, and no merges are inferred beyond this table.
    pub fn builtin() -> Self {
        let mut table = AliasTable::default();
        table.extend_namespace(
            "sobha",
            &[
                ("garden-house", "garden-houses"),
                ("golf-ridges", "golf-ridges-at-sobha-one"),
                ("avenue", "skyscape-avenue"),
                ("hartland-greens-apartment", "hartland-greens"),
                ("creek-vistas-heights", "creek-vistas"),
                ("creek-vistas-grande", "creek-vistas"),
                ("creek-vistas-reserve", "creek-vistas"),
                ("skyscape-aura", "aura"),
            ],
        );
        table.extend_namespace(
            "emaar",
            &[
                ("creek-side-18", "creekside-18"),
                ("silva", "silva-dubai-creek-harbour"),
                ("orania", "orania-at-the-valley"),
                ("pier-point", "pier-point-at-rashid-yachts-marina"),
                ("valo", "valo-at-dubai-creek-harbour"),
                ("albero", "albero-at-dubai-creek-harbour"),
                ("elie-saab", "elie-saab-at-arabian-ranches-iii"),
                ("greenside-residences", "greenside-residence"),
                ("farm-gardens", "the-farm-gardens"),
            ],
        );
        table.extend_namespace(
            "damac",
            &[
                ("district", "damac-district"),
                ("bay-by-cavalli", "damac-bay-by-cavalli"),
                ("islands", "damac-islands-seychelles-2"),
                ("aykon-city", "damac-maison-aykon-city"),
                ("riverside", "damac-riverside-olive"),
                ("riverside-views", "damac-riverside-views-marine-1"),
                ("riverside-views-marine-4", "damac-riverside-views-marine-4"),
                ("riverside-views-marine-3", "damac-riverside-views-marine-2"),
                ("chelsea-residences-by-damac", "chelsea-residences"),
                ("seychelles-2", "damac-islands-seychelles-2"),
                ("seychelles", "damac-islands-seychelles-2"),
            ],
        );
        table.extend_namespace(
            "nakheel",
            &[
                (
                    "bay-grove-residences-phase-4-by-nakheel",
                    "bay-grove-residences-phase-4",
                ),
                ("bay-grove-residences-phase-2-by-nakheel", "bay-grove-residences"),
                ("bay-grove", "bay-grove-residences"),
                ("district-one-west-by-nakheel", "district-one"),
            ],
        );
        table.extend_namespace("binghatti", &[("binghatti-flare-01", "binghatti-flare")]);
        table
    }

    /// Loads an override table from a YAML rules file shaped as
    /// `{namespace: {deprecated: canonical}}`.
    pub fn from_rules_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let namespaces: BTreeMap<String, BTreeMap<String, String>> =
            serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        let table = Self { namespaces };
        table.validate()?;
        Ok(table)
    }

    fn extend_namespace(&mut self, namespace: &str, pairs: &[(&str, &str)]) {
        let entry = self.namespaces.entry(namespace.to_string()).or_default();
        for (deprecated, canonical) in pairs {
            entry.insert((*deprecated).to_string(), (*canonical).to_string());
        }
    }

    pub fn for_namespace(&self, namespace: &str) -> Option<&BTreeMap<String, String>> {
        self.namespaces.get(namespace)
    }

    /// Rejects self-mappings and two-entry cycles (two canonical ids
    /// mapped onto each other).
    pub fn validate(&self) -> Result<()> {
        for (namespace, aliases) in &self.namespaces {
            for (deprecated, canonical) in aliases {
                if deprecated == canonical {
                    anyhow::bail!("{namespace}: alias {deprecated} maps to itself");
                }
                if aliases.get(canonical) == Some(deprecated) {
                    anyhow::bail!(
                        "{namespace}: aliases {deprecated} and {canonical} map to each other"
                    );
                }
            }
        }
        Ok(())
    }
}

/// Merges a duplicate-derived `secondary` record into `primary`.
///
/// `slug` and `developer` are never touched. Fields the primary lacks are
/// copied over; image/gallery arrays are unioned preserving the primary's
/// order first; every other conflict resolves to the primary silently.
pub fn merge_records(primary: &mut Map<String, Value>, secondary: &Map<String, Value>) {
    for (key, value) in secondary {
        if IMMUTABLE_KEYS.contains(&key.as_str()) {
            continue;
        }
        if !field_present(primary, key) {
            if is_present(value) {
                primary.insert(key.clone(), value.clone());
            }
            continue;
        }
        let lowered = key.to_lowercase();
        if !lowered.contains("image") && !lowered.contains("gallery") {
            continue;
        }
        if let (Some(Value::Array(kept)), Value::Array(extra)) = (primary.get_mut(key), value) {
            for item in extra {
                if !kept.contains(item) {
                    kept.push(item.clone());
                }
            }
        }
    }
}

/// Rewrites a record's legacy field names and shapes into the canonical
/// schema, returning a log of which normalizations fired (diagnostics
/// only). Malformed field shapes are left untouched.
pub fn standardize_record(record: &mut Map<String, Value>) -> Vec<String> {
    let mut changes = Vec::new();

    consolidate_images(record, &mut changes);

    // legacy `project` key carried the canonical name object
    if record.contains_key("project") && !record.contains_key("projectName") {
        if let Some(name) = record.remove("project") {
            record.insert("projectName".to_string(), name);
            changes.push("projectName".to_string());
        }
    }

    scrub_placeholder_tour(record, &mut changes);
    clean_bedrooms(record, &mut changes);

    changes
}

fn consolidate_images(record: &mut Map<String, Value>, changes: &mut Vec<String>) {
    let legacy_gallery = record.remove("galleryImages");
    let gallery = legacy_gallery
        .filter(is_present)
        .or_else(|| record.get("images_gallery").cloned())
        .and_then(|value| match value {
            Value::Array(items) => Some(items),
            _ => None,
        })
        .unwrap_or_default();

    let legacy_hero = record.remove("heroImage");
    let hero = legacy_hero
        .filter(is_present)
        .or_else(|| record.get("image_hero").filter(|v| is_present(v)).cloned());

    if !gallery.is_empty() {
        record.insert("images_gallery".to_string(), Value::Array(dedup_gallery(gallery)));
        changes.push("images_gallery".to_string());
    }

    if let Some(hero) = hero {
        record.insert("image_hero".to_string(), hero);
        changes.push("image_hero".to_string());
    } else if let Some(first) = record
        .get("images_gallery")
        .and_then(Value::as_array)
        .and_then(|items| items.first())
        .cloned()
    {
        record.insert("image_hero".to_string(), first);
        changes.push("image_hero_from_gallery".to_string());
    }
}

/// Order-preserving dedup that also drops falsy entries.
fn dedup_gallery(items: Vec<Value>) -> Vec<Value> {
    let mut seen = Vec::with_capacity(items.len());
    for item in items {
        if is_present(&item) && !seen.contains(&item) {
            seen.push(item);
        }
    }
    seen
}

fn scrub_placeholder_tour(record: &mut Map<String, Value>, changes: &mut Vec<String>) {
    let tour = record
        .get("tour_3d_url")
        .filter(|v| is_present(v))
        .or_else(|| record.get("3D_TourLink").filter(|v| is_present(v)))
        .and_then(Value::as_str)
        .map(str::to_string);
    let Some(tour) = tour else {
        return;
    };

    let trimmed = tour.trim();
    let clean = trimmed.strip_suffix('/').unwrap_or(trimmed);
    let is_placeholder = PLACEHOLDER_TOUR_URLS
        .iter()
        .any(|base| clean == base.strip_suffix('/').unwrap_or(base));
    if is_placeholder {
        record.remove("tour_3d_url");
        record.remove("3D_TourLink");
        changes.push("removed_invalid_tour".to_string());
    }
}

fn clean_bedrooms(record: &mut Map<String, Value>, changes: &mut Vec<String>) {
    let Some(items) = record.get("bedrooms").and_then(Value::as_array).cloned() else {
        return;
    };
    if !items.iter().all(|v| v.as_f64().is_some()) {
        return;
    }
    let mut numbers: Vec<f64> = items.iter().filter_map(Value::as_f64).collect();
    numbers.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    numbers.dedup();
    let cleaned: Vec<Value> = numbers
        .into_iter()
        .map(|n| {
            if n.fract() == 0.0 {
                json!(n as i64)
            } else {
                json!(n)
            }
        })
        .collect();
    if cleaned != items {
        changes.push("bedrooms_cleaned".to_string());
    }
    record.insert("bedrooms".to_string(), Value::Array(cleaned));
}

/// Second standardization pass (enrichment pipeline): synthesizes the
/// bilingual `projectName`/`description`/`location` objects from separate
/// `_en`/`_ar` legacy fields, cross-filling whichever language is missing.
pub fn synthesize_bilingual(record: &mut Map<String, Value>) -> Vec<String> {
    let mut changes = Vec::new();

    if bilingual_missing(record, "projectName") {
        let en = text_field(record, "name_en");
        let ar = text_field(record, "name_ar");
        if let Some(pair) = bilingual_pair(&en, &ar) {
            record.insert("projectName".to_string(), pair);
            changes.push("projectName".to_string());
        }
    }

    if bilingual_missing(record, "description") {
        let en = text_field(record, "description_en");
        let ar = text_field(record, "description_ar");
        if let Some(pair) = bilingual_pair(&en, &ar) {
            record.insert("description".to_string(), pair);
            changes.push("description".to_string());
        }
    }

    if bilingual_missing(record, "location") {
        let en = non_empty(text_field(record, "address_en"))
            .or_else(|| non_empty(text_field(record, "location_en")))
            .or_else(|| non_empty(text_field(record, "city_en")))
            .unwrap_or_default();
        let ar = non_empty(text_field(record, "address_ar"))
            .or_else(|| non_empty(text_field(record, "location_ar")))
            .or_else(|| non_empty(text_field(record, "city_ar")))
            .unwrap_or_default();
        if let Some(pair) = bilingual_pair(&en, &ar) {
            record.insert("location".to_string(), pair);
            changes.push("location".to_string());
        }
    }

    changes
}

/// A bilingual object counts as missing when absent, falsy, or an object
/// with both language sides empty.
fn bilingual_missing(record: &Map<String, Value>, key: &str) -> bool {
    match record.get(key) {
        None => true,
        Some(Value::Object(pair)) => {
            !pair.get("en").map(is_present).unwrap_or(false)
                && !pair.get("ar").map(is_present).unwrap_or(false)
        }
        Some(other) => !is_present(other),
    }
}

fn bilingual_pair(en: &str, ar: &str) -> Option<Value> {
    if en.is_empty() && ar.is_empty() {
        return None;
    }
    let en_side = if en.is_empty() { ar } else { en };
    let ar_side = if ar.is_empty() { en } else { ar };
    Some(json!({ "en": en_side, "ar": ar_side }))
}

fn text_field(record: &Map<String, Value>, key: &str) -> String {
    record
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn non_empty(text: String) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Enrichment-pipeline gallery pass: dedupes the gallery and keeps the
/// legacy `galleryImages`/`heroImage` keys mirrored for consumers that
/// still read them.
pub fn mirror_legacy_images(record: &mut Map<String, Value>) -> Vec<String> {
    let mut changes = Vec::new();

    let gallery = record
        .get("images_gallery")
        .filter(|v| is_present(v))
        .or_else(|| record.get("galleryImages").filter(|v| is_present(v)))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    if !gallery.is_empty() {
        let cleaned = dedup_gallery(gallery.clone());
        if cleaned.len() != gallery.len() {
            changes.push(format!("gallery_dedup({}->{})", gallery.len(), cleaned.len()));
        }
        record.insert("galleryImages".to_string(), Value::Array(cleaned.clone()));
        record.insert("images_gallery".to_string(), Value::Array(cleaned));
    }

    if !field_present(record, "heroImage") {
        if let Some(hero) = record.get("image_hero").filter(|v| is_present(v)).cloned() {
            record.insert("heroImage".to_string(), hero);
            changes.push("heroImage".to_string());
        } else if let Some(first) = record
            .get("galleryImages")
            .and_then(Value::as_array)
            .and_then(|items| items.first())
            .cloned()
        {
            record.insert("heroImage".to_string(), first);
            changes.push("heroImage_from_gallery".to_string());
        }
    }

    changes
}

/// English display name used to match a record against listing candidates.
pub fn display_name(record: &Map<String, Value>) -> Option<String> {
    if let Some(name) = record.get("name_en").and_then(Value::as_str) {
        if !name.is_empty() {
            return Some(name.to_string());
        }
    }
    match record.get("projectName") {
        Some(Value::Object(pair)) => pair
            .get("en")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .map(str::to_string),
        Some(Value::String(name)) if !name.is_empty() => Some(name.clone()),
        _ => None,
    }
}

/// Finds the best candidate for a reference name: exact slug-normalized
/// title match short-circuits; otherwise the highest similarity strictly
/// above [`MATCH_THRESHOLD`] wins, first-reached maximum on ties.
pub fn match_candidate<'a>(reference: &str, candidates: &'a [Value]) -> Option<&'a Value> {
    if reference.is_empty() {
        return None;
    }
    let reference_slug = slugify(reference);

    let mut best: Option<&Value> = None;
    let mut best_score = 0.0_f64;
    for candidate in candidates {
        let title = candidate.get("title").and_then(Value::as_str).unwrap_or("");
        if slugify(title) == reference_slug {
            return Some(candidate);
        }
        let score = similarity(reference, title);
        if score > best_score && score > MATCH_THRESHOLD {
            best_score = score;
            best = Some(candidate);
        }
    }
    best
}

/// Directional gap-filling merge from a matched listing candidate into a
/// record. Existing truthy values are never overwritten.
pub fn enrich_record(record: &mut Map<String, Value>, candidate: &Value) -> Vec<String> {
    let mut changes = Vec::new();

    if let Some(price) = candidate.get("startingPrice").filter(|v| is_present(v)) {
        if !field_present(record, "minPriceAED") {
            record.insert("minPriceAED".to_string(), price.clone());
            changes.push(format!("price:{price}"));
        }
    }

    enrich_payment_plan(record, candidate, &mut changes);
    enrich_amenities(record, candidate, &mut changes);
    enrich_coordinates(record, candidate, &mut changes);

    if let Some(delivery) = candidate.get("deliveryDate").and_then(Value::as_str) {
        if !field_present(record, "deliveryDate") {
            if let Some((date, _)) = delivery.split_once('T') {
                record.insert("deliveryDate".to_string(), json!(date));
                changes.push("deliveryDate".to_string());
            }
        }
    }

    enrich_bedrooms(record, candidate, &mut changes);
    enrich_images(record, candidate, &mut changes);

    changes
}

fn enrich_payment_plan(record: &mut Map<String, Value>, candidate: &Value, changes: &mut Vec<String>) {
    let plans: Vec<&str> = candidate
        .get("paymentPlans")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    if plans.is_empty() || field_present(record, "paymentPlan") {
        return;
    }
    let mut unique: Vec<&str> = Vec::new();
    for plan in plans {
        if !unique.contains(&plan) {
            unique.push(plan);
        }
    }
    record.insert("paymentPlan".to_string(), json!(unique.join(", ")));
    changes.push("paymentPlan".to_string());
}

fn enrich_amenities(record: &mut Map<String, Value>, candidate: &Value, changes: &mut Vec<String>) {
    let candidate_names: Vec<&str> = candidate
        .get("amenities")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|a| a.get("name").and_then(Value::as_str))
                .filter(|name| !name.is_empty())
                .collect()
        })
        .unwrap_or_default();
    if candidate_names.is_empty() {
        return;
    }

    let mut merged = record
        .get("amenities")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    // existing names may be flat strings or bilingual objects; the match
    // is lowercase-only on purpose, nothing stricter
    let mut existing: HashSet<String> = merged.iter().filter_map(amenity_name_lower).collect();

    let mut appended = 0usize;
    for name in candidate_names {
        if existing.insert(name.to_lowercase()) {
            merged.push(json!({ "name": { "en": name, "ar": name } }));
            appended += 1;
        }
    }
    if appended > 0 {
        record.insert("amenities".to_string(), Value::Array(merged));
        changes.push(format!("amenities(+{appended})"));
    }
}

fn amenity_name_lower(amenity: &Value) -> Option<String> {
    match amenity {
        Value::String(name) => Some(name.to_lowercase()),
        Value::Object(obj) => match obj.get("name") {
            Some(Value::String(name)) => Some(name.to_lowercase()),
            Some(Value::Object(pair)) => Some(
                pair.get("en")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_lowercase(),
            ),
            _ => None,
        },
        _ => None,
    }
}

fn enrich_coordinates(record: &mut Map<String, Value>, candidate: &Value, changes: &mut Vec<String>) {
    let coordinates = candidate.pointer("/location/coordinates");
    let Some(lat) = coordinates
        .and_then(|c| c.get("lat"))
        .filter(|v| is_present(v))
        .cloned()
    else {
        return;
    };
    if field_present(record, "latitude") {
        return;
    }
    let lng = coordinates
        .and_then(|c| c.get("lng"))
        .filter(|v| is_present(v))
        .or_else(|| coordinates.and_then(|c| c.get("lon")).filter(|v| is_present(v)))
        .cloned()
        .unwrap_or(Value::Null);
    record.insert("latitude".to_string(), lat.clone());
    record.insert("longitude".to_string(), lng.clone());
    record.insert("coordinates".to_string(), json!({ "lat": lat, "lng": lng }));
    changes.push("coordinates".to_string());
}

fn enrich_bedrooms(record: &mut Map<String, Value>, candidate: &Value, changes: &mut Vec<String>) {
    let Some(tokens) = candidate
        .get("bedrooms")
        .and_then(Value::as_array)
        .filter(|items| !items.is_empty())
    else {
        return;
    };
    if field_present(record, "bedrooms") {
        return;
    }
    let parsed: Vec<Value> = tokens
        .iter()
        .filter_map(|token| match token {
            Value::String(text) => text.trim().parse::<i64>().ok().map(|n| json!(n)),
            Value::Number(number) => number.as_i64().map(|n| json!(n)),
            _ => None,
        })
        .collect();
    if !parsed.is_empty() {
        record.insert("bedrooms".to_string(), Value::Array(parsed));
        changes.push("bedrooms".to_string());
    }
}

fn enrich_images(record: &mut Map<String, Value>, candidate: &Value, changes: &mut Vec<String>) {
    let Some(images) = candidate
        .get("images")
        .and_then(Value::as_array)
        .filter(|items| !items.is_empty())
    else {
        return;
    };
    if field_present(record, "galleryImages") || field_present(record, "images_gallery") {
        return;
    }
    // listings carry reduced-quality variants; swap in the originals
    let rewritten: Vec<Value> = images
        .iter()
        .filter_map(Value::as_str)
        .map(|url| json!(url.replace("/medium.webp", "/original.webp")))
        .collect();
    if rewritten.is_empty() {
        return;
    }
    record.insert("galleryImages".to_string(), Value::Array(rewritten.clone()));
    record.insert("images_gallery".to_string(), Value::Array(rewritten.clone()));
    if !field_present(record, "heroImage") {
        record.insert("heroImage".to_string(), rewritten[0].clone());
    }
    if !field_present(record, "image_hero") {
        record.insert("image_hero".to_string(), rewritten[0].clone());
    }
    changes.push(format!("listing_images({})", rewritten.len()));
}

/// A record is retained iff it carries any name information at all.
/// Other content is diagnostic only and never gates archival.
pub fn record_is_valid(record: &Map<String, Value>) -> bool {
    ["projectName", "name_en", "name_ar"]
        .iter()
        .any(|key| field_present(record, key))
}

/// Diagnostic companion to the validity gate: whether the record carries
/// any substantive content fields.
pub fn record_has_content(record: &Map<String, Value>) -> bool {
    [
        "minPriceAED",
        "amenities",
        "galleryImages",
        "images_gallery",
        "description",
    ]
    .iter()
    .any(|key| field_present(record, key))
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub data_root: PathBuf,
    pub namespaces: Vec<String>,
    pub aliases: AliasTable,
}

impl PipelineConfig {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            namespaces: DEFAULT_NAMESPACES.iter().map(|ns| ns.to_string()).collect(),
            aliases: AliasTable::builtin(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NamespaceCleanup {
    pub namespace: String,
    pub removed: usize,
    pub merged: usize,
    pub standardized: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanupSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub namespaces: Vec<NamespaceCleanup>,
    pub removed: usize,
    pub merged: usize,
    pub standardized: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct NamespaceFix {
    pub namespace: String,
    pub candidates: usize,
    pub fixed: usize,
    pub archived: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct FixSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub namespaces: Vec<NamespaceFix>,
    pub fixed: usize,
    pub archived: usize,
}

/// Cleanup batch: invalid-slug purge, alias resolution, standardization,
/// one namespace fully processed before the next.
pub fn run_cleanup(config: &PipelineConfig) -> Result<CleanupSummary> {
    let store = RecordStore::open(&config.data_root)?;
    let started_at = Utc::now();
    let run_id = Uuid::new_v4();

    let mut namespaces = Vec::new();
    for namespace in &config.namespaces {
        let counts = cleanup_namespace(&store, namespace, config.aliases.for_namespace(namespace));
        info!(
            namespace,
            removed = counts.removed,
            merged = counts.merged,
            standardized = counts.standardized,
            "namespace cleanup complete"
        );
        namespaces.push(counts);
    }

    Ok(CleanupSummary {
        run_id,
        started_at,
        finished_at: Utc::now(),
        removed: namespaces.iter().map(|n| n.removed).sum(),
        merged: namespaces.iter().map(|n| n.merged).sum(),
        standardized: namespaces.iter().map(|n| n.standardized).sum(),
        namespaces,
    })
}

fn cleanup_namespace(
    store: &RecordStore,
    namespace: &str,
    aliases: Option<&BTreeMap<String, String>>,
) -> NamespaceCleanup {
    let mut counts = NamespaceCleanup {
        namespace: namespace.to_string(),
        removed: 0,
        merged: 0,
        standardized: 0,
    };

    // pass 1: archive entities that are scrape artifacts, not projects
    for slug in list_or_warn(store, namespace) {
        if !INVALID_SLUGS.contains(&slug.to_lowercase().as_str()) {
            continue;
        }
        match store.archive_entity(namespace, &slug) {
            Ok(()) => {
                info!(namespace, %slug, "archived invalid entity");
                counts.removed += 1;
            }
            Err(err) => warn!(namespace, %slug, error = %err, "failed to archive invalid entity"),
        }
    }

    // pass 2: fold curated duplicates into their canonical identifiers
    if let Some(aliases) = aliases {
        for (deprecated, canonical) in aliases {
            match resolve_alias(store, namespace, deprecated, canonical) {
                Ok(true) => {
                    info!(namespace, %deprecated, %canonical, "duplicate consolidated");
                    counts.merged += 1;
                }
                Ok(false) => {}
                Err(err) => {
                    warn!(namespace, %deprecated, %canonical, error = %err, "skipping alias")
                }
            }
        }
    }

    // pass 3: standardize every surviving record
    for slug in list_or_warn(store, namespace) {
        let mut record = match store.read_record(namespace, &slug) {
            Ok(Some(record)) => record,
            Ok(None) => continue,
            Err(err) => {
                warn!(namespace, %slug, error = %err, "skipping unreadable record");
                continue;
            }
        };
        let changes = standardize_record(&mut record);
        if changes.is_empty() {
            continue;
        }
        match store.write_record(namespace, &slug, &record) {
            Ok(()) => {
                info!(namespace, %slug, changes = %changes.join(", "), "record standardized");
                counts.standardized += 1;
            }
            Err(err) => warn!(namespace, %slug, error = %err, "failed to write record"),
        }
    }

    counts
}

/// Applies one alias table entry. Returns whether a consolidation
/// happened. The merge is written before the duplicate is relocated, so a
/// failure between the two leaves a re-runnable state rather than a lost
/// record.
fn resolve_alias(
    store: &RecordStore,
    namespace: &str,
    deprecated: &str,
    canonical: &str,
) -> Result<bool, StoreError> {
    let Some(duplicate) = store.read_record(namespace, deprecated)? else {
        return Ok(false);
    };

    match store.read_record(namespace, canonical)? {
        Some(mut primary) => {
            merge_records(&mut primary, &duplicate);
            store.write_record(namespace, canonical, &primary)?;
            store.archive_entity(namespace, deprecated)?;
        }
        None => {
            // no canonical record yet: promote the duplicate wholesale
            let mut promoted = duplicate;
            promoted.insert("slug".to_string(), json!(canonical));
            store.promote_entity(namespace, deprecated, canonical)?;
            store.write_record(namespace, canonical, &promoted)?;
        }
    }
    Ok(true)
}

/// Fix batch: bilingual synthesis, legacy image mirroring, candidate
/// enrichment, validity gating.
pub fn run_fix(config: &PipelineConfig) -> Result<FixSummary> {
    let store = RecordStore::open(&config.data_root)?;
    let started_at = Utc::now();
    let run_id = Uuid::new_v4();

    let mut namespaces = Vec::new();
    for namespace in &config.namespaces {
        let candidates = extract_candidates(&store.root().join(candidate_doc_name(namespace)));
        info!(namespace, candidates = candidates.len(), "loaded listing candidates");
        let counts = fix_namespace(&store, namespace, &candidates);
        info!(
            namespace,
            fixed = counts.fixed,
            archived = counts.archived,
            "namespace fix complete"
        );
        namespaces.push(counts);
    }

    Ok(FixSummary {
        run_id,
        started_at,
        finished_at: Utc::now(),
        fixed: namespaces.iter().map(|n| n.fixed).sum(),
        archived: namespaces.iter().map(|n| n.archived).sum(),
        namespaces,
    })
}

/// Auxiliary listing document for a namespace, by filename convention.
/// The binghatti capture was saved under a single-t spelling; kept as-is.
pub fn candidate_doc_name(namespace: &str) -> String {
    if namespace == "binghatti" {
        "binghati.md".to_string()
    } else {
        format!("{namespace}.md")
    }
}

fn fix_namespace(store: &RecordStore, namespace: &str, candidates: &[Value]) -> NamespaceFix {
    let mut counts = NamespaceFix {
        namespace: namespace.to_string(),
        candidates: candidates.len(),
        fixed: 0,
        archived: 0,
    };

    for slug in list_or_warn(store, namespace) {
        let mut record = match store.read_record(namespace, &slug) {
            Ok(Some(record)) => record,
            Ok(None) => continue,
            Err(err) => {
                warn!(namespace, %slug, error = %err, "skipping unreadable record");
                continue;
            }
        };

        let mut changes = synthesize_bilingual(&mut record);
        changes.extend(mirror_legacy_images(&mut record));

        let reference = display_name(&record).unwrap_or_else(|| slug.clone());
        if let Some(candidate) = match_candidate(&reference, candidates) {
            changes.extend(enrich_record(&mut record, candidate));
        }

        if !record_is_valid(&record) {
            match store.archive_entity(namespace, &slug) {
                Ok(()) => {
                    info!(
                        namespace,
                        %slug,
                        has_content = record_has_content(&record),
                        "archived nameless record"
                    );
                    counts.archived += 1;
                }
                Err(err) => warn!(namespace, %slug, error = %err, "failed to archive record"),
            }
            continue;
        }

        if !changes.is_empty() {
            match store.write_record(namespace, &slug, &record) {
                Ok(()) => info!(namespace, %slug, changes = %changes.join(", "), "record fixed"),
                Err(err) => {
                    warn!(namespace, %slug, error = %err, "failed to write record");
                    continue;
                }
            }
        }
        counts.fixed += 1;
    }

    counts
}

fn list_or_warn(store: &RecordStore, namespace: &str) -> Vec<String> {
    match store.list_entities(namespace) {
        Ok(slugs) => slugs,
        Err(err) => {
            warn!(namespace, error = %err, "cannot list namespace entities");
            Vec::new()
        }
    }
}
