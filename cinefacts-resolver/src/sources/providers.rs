//! Provider payload adapters
//!
//! Each fetcher hands over its payload in the provider's own vocabulary.
//! `ProviderPayload` is the tagged union of those shapes; every variant has
//! an adapter that maps provider keys onto our field names and coerces the
//! values (runtimes, amounts, years) into comparable form.
//!
//! # Field mapping
//! - **TMDB**: typed fields (`vote_average` -> `rating`, `revenue` ->
//!   `worldwide_gross`, `overview` -> `synopsis`)
//! - **Wikidata**: claims keyed by property label (`publication date`,
//!   `cast member`, `date of birth`)
//! - **Wikipedia**: infobox keys (`Release date`, `Starring`, `Box office`)
//! - **Regional / editorial**: free field maps already using our names
//!
//! Unknown labels pass through snake-cased; the classifier treats fields it
//! does not know as OPINION, so they can never be auto-approved.

use super::Draft;
use crate::types::FieldValue;
use crate::validators::normalize::{normalize_text, parse_date};
use chrono::Datelike;
use cinefacts_common::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Fields whose values are lists of names or labels
const LIST_FIELDS: &[&str] = &[
    "cast",
    "genres",
    "producer",
    "occupation",
    "content_warnings",
];

/// Wikidata property label -> field
const WIKIDATA_LABELS: &[(&str, &str)] = &[
    ("title", "title"),
    ("original title", "original_title"),
    ("publication date", "release_date"),
    ("cast member", "cast"),
    ("director", "director"),
    ("composer", "music_director"),
    ("producer", "producer"),
    ("genre", "genres"),
    ("duration", "runtime_minutes"),
    ("cost", "budget"),
    ("box office", "worldwide_gross"),
    ("name", "name"),
    ("date of birth", "birth_date"),
    ("place of birth", "birth_place"),
    ("occupation", "occupation"),
];

/// Wikipedia infobox key -> field
const WIKIPEDIA_KEYS: &[(&str, &str)] = &[
    ("title", "title"),
    ("release date", "release_date"),
    ("release dates", "release_date"),
    ("starring", "cast"),
    ("directed by", "director"),
    ("music by", "music_director"),
    ("produced by", "producer"),
    ("running time", "runtime_minutes"),
    ("budget", "budget"),
    ("box office", "worldwide_gross"),
    ("certificate", "certification"),
    ("name", "name"),
    ("born", "birth_date"),
    ("birth place", "birth_place"),
    ("occupation", "occupation"),
    ("occupations", "occupation"),
];

/// Fetcher output, one variant per provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum ProviderPayload {
    Tmdb(TmdbPayload),
    Wikidata(WikidataPayload),
    Wikipedia(WikipediaPayload),
    Regional(RegionalPayload),
    Editorial(EditorialPayload),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TmdbPayload {
    pub entity_id: String,
    #[serde(default)]
    pub entity_kind: Option<String>,
    #[serde(default)]
    pub retrieved_at: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub original_title: Option<String>,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub vote_average: Option<f64>,
    #[serde(default)]
    pub runtime: Option<i64>,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub cast: Vec<String>,
    #[serde(default)]
    pub director: Option<String>,
    #[serde(default)]
    pub budget: Option<i64>,
    #[serde(default)]
    pub revenue: Option<i64>,
    // Person endpoints
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub birthday: Option<String>,
    #[serde(default)]
    pub place_of_birth: Option<String>,
    #[serde(default)]
    pub biography: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WikidataPayload {
    pub entity_id: String,
    #[serde(default)]
    pub entity_kind: Option<String>,
    #[serde(default)]
    pub retrieved_at: Option<String>,
    /// Claims keyed by property label
    pub claims: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WikipediaPayload {
    pub entity_id: String,
    #[serde(default)]
    pub entity_kind: Option<String>,
    #[serde(default)]
    pub retrieved_at: Option<String>,
    pub infobox: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionalPayload {
    /// Site name; becomes `regional:<site>`
    pub site: String,
    pub entity_id: String,
    #[serde(default)]
    pub entity_kind: Option<String>,
    #[serde(default)]
    pub retrieved_at: Option<String>,
    pub fields: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditorialPayload {
    /// Editor name; becomes `editorial:<editor>`
    pub editor: String,
    pub entity_id: String,
    #[serde(default)]
    pub entity_kind: Option<String>,
    #[serde(default)]
    pub retrieved_at: Option<String>,
    pub fields: BTreeMap<String, Value>,
}

impl ProviderPayload {
    pub fn provider(&self) -> &'static str {
        match self {
            ProviderPayload::Tmdb(_) => "tmdb",
            ProviderPayload::Wikidata(_) => "wikidata",
            ProviderPayload::Wikipedia(_) => "wikipedia",
            ProviderPayload::Regional(_) => "regional",
            ProviderPayload::Editorial(_) => "editorial",
        }
    }

    pub fn entity_id(&self) -> &str {
        match self {
            ProviderPayload::Tmdb(p) => &p.entity_id,
            ProviderPayload::Wikidata(p) => &p.entity_id,
            ProviderPayload::Wikipedia(p) => &p.entity_id,
            ProviderPayload::Regional(p) => &p.entity_id,
            ProviderPayload::Editorial(p) => &p.entity_id,
        }
    }

    /// Normalize the payload into one draft per claimed field
    pub(crate) fn into_drafts(self) -> Result<Vec<Draft>> {
        match self {
            ProviderPayload::Tmdb(p) => Ok(tmdb_drafts(p)),
            ProviderPayload::Wikidata(p) => {
                let fields = map_labels(p.claims, WIKIDATA_LABELS);
                Ok(drafts_from_fields(
                    "wikidata".to_string(),
                    p.entity_id,
                    p.entity_kind,
                    p.retrieved_at,
                    fields,
                ))
            }
            ProviderPayload::Wikipedia(p) => {
                let fields = map_labels(p.infobox, WIKIPEDIA_KEYS);
                Ok(drafts_from_fields(
                    "wikipedia".to_string(),
                    p.entity_id,
                    p.entity_kind,
                    p.retrieved_at,
                    fields,
                ))
            }
            ProviderPayload::Regional(p) => {
                let site = field_key(&p.site);
                if site.is_empty() {
                    return Err(Error::InvalidInput(
                        "regional payload without a site name".to_string(),
                    ));
                }
                let fields = map_labels(p.fields, &[]);
                Ok(drafts_from_fields(
                    format!("regional:{}", site),
                    p.entity_id,
                    p.entity_kind,
                    p.retrieved_at,
                    fields,
                ))
            }
            ProviderPayload::Editorial(p) => {
                let editor = p.editor.trim();
                if editor.is_empty() {
                    return Err(Error::InvalidInput(
                        "editorial payload without an editor".to_string(),
                    ));
                }
                let fields = map_labels(p.fields, &[]);
                Ok(drafts_from_fields(
                    format!("editorial:{}", editor),
                    p.entity_id,
                    p.entity_kind,
                    p.retrieved_at,
                    fields,
                ))
            }
        }
    }
}

fn tmdb_drafts(p: TmdbPayload) -> Vec<Draft> {
    let mut fields: BTreeMap<String, FieldValue> = BTreeMap::new();
    let mut put = |field: &str, value: Option<FieldValue>| {
        if let Some(value) = value {
            fields.insert(field.to_string(), value);
        }
    };

    put("title", p.title.map(FieldValue::Text));
    put("original_title", p.original_title.map(FieldValue::Text));
    put("release_date", p.release_date.map(FieldValue::Text));
    put("rating", p.vote_average.map(FieldValue::Number));
    put("runtime_minutes", p.runtime.map(FieldValue::Integer));
    put("synopsis", p.overview.map(FieldValue::Text));
    put("director", p.director.map(FieldValue::Text));
    put("budget", p.budget.filter(|b| *b > 0).map(FieldValue::Integer));
    put(
        "worldwide_gross",
        p.revenue.filter(|r| *r > 0).map(FieldValue::Integer),
    );
    put("name", p.name.map(FieldValue::Text));
    put("birth_date", p.birthday.map(FieldValue::Text));
    put("birth_place", p.place_of_birth.map(FieldValue::Text));
    put("biography", p.biography.map(FieldValue::Text));
    if !p.genres.is_empty() {
        put("genres", Some(FieldValue::List(p.genres)));
    }
    if !p.cast.is_empty() {
        put("cast", Some(FieldValue::List(p.cast)));
    }

    drafts_from_fields(
        "tmdb".to_string(),
        p.entity_id,
        p.entity_kind,
        p.retrieved_at,
        fields,
    )
}

/// Map provider labels to field names and convert JSON values
fn map_labels(raw: BTreeMap<String, Value>, table: &[(&str, &str)]) -> BTreeMap<String, FieldValue> {
    let mut fields = BTreeMap::new();
    for (label, value) in raw {
        let normalized = normalize_text(&label.replace('_', " "));
        let field = table
            .iter()
            .find(|(known, _)| *known == normalized)
            .map(|(_, field)| field.to_string())
            .unwrap_or_else(|| field_key(&label));
        if field.is_empty() {
            continue;
        }
        fields.insert(field, json_to_field_value(&value));
    }
    fields
}

fn drafts_from_fields(
    source_id: String,
    entity_id: String,
    entity_kind: Option<String>,
    retrieved_at: Option<String>,
    mut fields: BTreeMap<String, FieldValue>,
) -> Vec<Draft> {
    for (field, value) in fields.iter_mut() {
        *value = coerce(field, std::mem::replace(value, FieldValue::Null));
    }

    // A release date also answers the release year when the payload has none
    if !fields.contains_key("release_year") {
        if let Some(year) = fields.get("release_date").and_then(extract_year) {
            fields.insert("release_year".to_string(), FieldValue::Integer(year));
        }
    }

    fields
        .into_iter()
        .map(|(field, value)| Draft {
            entity_id: entity_id.clone(),
            entity_kind: entity_kind.clone(),
            field,
            value,
            source_id: source_id.clone(),
            retrieved_at: retrieved_at.clone(),
        })
        .collect()
}

/// Snake-cased field key from a provider label
pub fn field_key(label: &str) -> String {
    normalize_text(&label.replace(['_', '-'], " ")).replace(' ', "_")
}

/// Convert a JSON value into a FieldValue
///
/// Wikidata-style `{ "value": ... }` and `{ "label": ... }` wrappers are
/// unwrapped; arrays become lists of their text renderings.
pub fn json_to_field_value(value: &Value) -> FieldValue {
    match value {
        Value::Null => FieldValue::Null,
        Value::Bool(b) => FieldValue::Text(b.to_string()),
        Value::Number(n) => match n.as_i64() {
            Some(i) => FieldValue::Integer(i),
            None => n.as_f64().map(FieldValue::Number).unwrap_or(FieldValue::Null),
        },
        Value::String(s) => FieldValue::Text(s.clone()),
        Value::Array(items) => FieldValue::List(
            items
                .iter()
                .filter_map(|item| match json_to_field_value(item) {
                    FieldValue::Null => None,
                    FieldValue::List(inner) => Some(inner.join(", ")),
                    other => Some(other.to_string()),
                })
                .collect(),
        ),
        Value::Object(map) => ["value", "label", "name"]
            .iter()
            .find_map(|key| map.get(*key))
            .map(json_to_field_value)
            .unwrap_or(FieldValue::Null),
    }
}

/// Field-specific value coercion
fn coerce(field: &str, value: FieldValue) -> FieldValue {
    match (field, &value) {
        ("release_year", FieldValue::Text(_)) => extract_year(&value)
            .map(FieldValue::Integer)
            .unwrap_or(value),
        ("runtime_minutes", FieldValue::Text(text)) => leading_number(text)
            .map(|n| FieldValue::Integer(n.round() as i64))
            .unwrap_or(value),
        ("budget" | "worldwide_gross", FieldValue::Text(text)) => parse_amount(text)
            .map(|n| FieldValue::Integer(n.round() as i64))
            .unwrap_or(value),
        (list_field, FieldValue::Text(text)) if LIST_FIELDS.contains(&list_field) => {
            FieldValue::List(split_list(text))
        }
        _ => value,
    }
}

/// Year of a date-like value ("2022-03-25", "25 March 2022", 2022)
pub fn extract_year(value: &FieldValue) -> Option<i64> {
    match value {
        FieldValue::Integer(year) => Some(*year),
        FieldValue::Text(text) => parse_date(text)
            .map(|date| date.year() as i64)
            .or_else(|| first_year(text)),
        _ => None,
    }
}

/// First standalone four-digit run that looks like a year
fn first_year(text: &str) -> Option<i64> {
    text.split(|c: char| !c.is_ascii_digit())
        .filter(|run| run.len() == 4)
        .filter_map(|run| run.parse::<i64>().ok())
        .find(|year| (1880..=2100).contains(year))
}

/// Leading number of a text ("159 minutes" -> 159)
pub fn leading_number(text: &str) -> Option<f64> {
    let digits: String = text
        .trim()
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .filter(|c| *c != ',')
        .collect();
    digits.parse().ok()
}

/// Monetary amount with Indian and Western scale words
///
/// "₹1,258 crore" -> 12_580_000_000, "$40 million" -> 40_000_000.
/// Currency is not converted.
pub fn parse_amount(text: &str) -> Option<f64> {
    let number = leading_number(text)?;
    let lower = text.to_lowercase();
    let scale = if lower.contains("crore") || lower.contains(" cr") {
        1e7
    } else if lower.contains("lakh") {
        1e5
    } else if lower.contains("billion") {
        1e9
    } else if lower.contains("million") {
        1e6
    } else {
        1.0
    };
    Some(number * scale)
}

fn split_list(text: &str) -> Vec<String> {
    text.split([',', ';', '\n'])
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
