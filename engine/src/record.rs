//! Record types for the four tracked collections.

use crate::{error::Result, Error, RecordId, Timestamp};
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Highest value an elimination count can take.
pub const MAX_ELIMINATION_COUNT: u8 = 3;

/// The variant a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Feed,
    Elimination,
    Medication,
    Measurement,
}

impl RecordKind {
    /// Every kind, in document order.
    pub const ALL: [RecordKind; 4] = [
        RecordKind::Feed,
        RecordKind::Elimination,
        RecordKind::Medication,
        RecordKind::Measurement,
    ];

    /// Key under which this kind's collection is stored in a document.
    pub fn document_key(self) -> &'static str {
        match self {
            RecordKind::Feed => "feeds",
            RecordKind::Elimination => "elims",
            RecordKind::Medication => "meds",
            RecordKind::Measurement => "measurements",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::Feed => "feed",
            RecordKind::Elimination => "elimination",
            RecordKind::Medication => "medication",
            RecordKind::Measurement => "measurement",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "feed" | "feeds" => Ok(RecordKind::Feed),
            "elimination" | "elim" | "elims" => Ok(RecordKind::Elimination),
            "medication" | "med" | "meds" => Ok(RecordKind::Medication),
            "measurement" | "measurements" => Ok(RecordKind::Measurement),
            other => Err(Error::UnknownKind(other.to_string())),
        }
    }
}

/// Behaviour shared by the four record variants.
pub trait Entry: Clone + PartialEq + Serialize + DeserializeOwned {
    /// The collection this variant is stored in.
    const KIND: RecordKind;

    fn id(&self) -> &str;

    fn occurred_at(&self) -> Timestamp;

    /// Write-side validation, run before a record reaches the remote store.
    fn validate(&self) -> Result<()>;
}

/// Generate a fresh record id.
///
/// Ids are UUIDv7 strings, so they sort lexically in creation order.
pub fn new_record_id() -> RecordId {
    uuid::Uuid::now_v7().to_string()
}

/// Which breast a feed used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BreastSide {
    #[serde(alias = "Left", alias = "Gauche")]
    Left,
    #[serde(alias = "Right", alias = "Droite")]
    Right,
    #[serde(alias = "Both", alias = "Les deux")]
    Both,
}

/// How a feed was given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum FeedSource {
    Breast {
        #[serde(alias = "breastSide")]
        side: BreastSide,
        #[serde(rename = "durationSeconds", alias = "durationSec", default)]
        duration_seconds: u64,
    },
    Bottle {
        #[serde(rename = "amountMl")]
        amount_ml: f64,
    },
}

/// A breast or bottle feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feed {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: RecordId,
    #[serde(alias = "dateISO")]
    pub occurred_at: Timestamp,
    #[serde(flatten)]
    pub source: FeedSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Feed {
    pub fn breast(
        id: impl Into<RecordId>,
        occurred_at: Timestamp,
        side: BreastSide,
        duration_seconds: u64,
    ) -> Self {
        Self {
            id: id.into(),
            occurred_at,
            source: FeedSource::Breast {
                side,
                duration_seconds,
            },
            notes: None,
        }
    }

    pub fn bottle(id: impl Into<RecordId>, occurred_at: Timestamp, amount_ml: f64) -> Self {
        Self {
            id: id.into(),
            occurred_at,
            source: FeedSource::Bottle { amount_ml },
            notes: None,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// Pee, poop and vomit counts, each on a 0..=3 scale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Elimination {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: RecordId,
    #[serde(alias = "dateISO")]
    pub occurred_at: Timestamp,
    #[serde(alias = "pee", default, deserialize_with = "deserialize_count")]
    pub pee_count: u8,
    #[serde(alias = "poop", default, deserialize_with = "deserialize_count")]
    pub poop_count: u8,
    #[serde(alias = "vomit", default, deserialize_with = "deserialize_count")]
    pub vomit_count: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Elimination {
    /// Create an elimination record, clamping every count to the 0..=3 scale.
    pub fn new(
        id: impl Into<RecordId>,
        occurred_at: Timestamp,
        pee: i64,
        poop: i64,
        vomit: i64,
    ) -> Self {
        Self {
            id: id.into(),
            occurred_at,
            pee_count: clamp_count(pee),
            poop_count: clamp_count(poop),
            vomit_count: clamp_count(vomit),
            notes: None,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// Clamp a raw count into the elimination scale.
pub fn clamp_count(value: i64) -> u8 {
    // Bounded by MAX_ELIMINATION_COUNT, so the cast cannot truncate.
    value.clamp(0, i64::from(MAX_ELIMINATION_COUNT)) as u8
}

/// Known medication presets. Unknown keys read as [`DoseKey::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoseKey {
    Paracetamol,
    Ibuprofen,
    VitaminD,
    Simethicone,
    #[default]
    #[serde(other)]
    Other,
}

impl DoseKey {
    /// Display label of a preset, `None` for [`DoseKey::Other`].
    pub fn label(self) -> Option<&'static str> {
        match self {
            DoseKey::Paracetamol => Some("Paracetamol"),
            DoseKey::Ibuprofen => Some("Ibuprofen"),
            DoseKey::VitaminD => Some("Vitamin D"),
            DoseKey::Simethicone => Some("Simethicone"),
            DoseKey::Other => None,
        }
    }
}

/// A medication given at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Medication {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: RecordId,
    #[serde(alias = "dateISO")]
    pub occurred_at: Timestamp,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub dose_key: DoseKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dose: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Medication {
    /// A preset medication, named after its key's label.
    pub fn preset(id: impl Into<RecordId>, occurred_at: Timestamp, dose_key: DoseKey) -> Self {
        Self {
            id: id.into(),
            occurred_at,
            name: dose_key.label().unwrap_or_default().to_string(),
            dose_key,
            dose: None,
            notes: None,
        }
    }

    /// A free-text medication under [`DoseKey::Other`].
    pub fn other(id: impl Into<RecordId>, occurred_at: Timestamp, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            occurred_at,
            name: name.into(),
            dose_key: DoseKey::Other,
            dose: None,
            notes: None,
        }
    }

    pub fn with_dose(mut self, dose: impl Into<String>) -> Self {
        self.dose = Some(dose.into());
        self
    }

    /// The stored name, falling back to the preset label.
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            self.dose_key.label().unwrap_or("other")
        } else {
            &self.name
        }
    }
}

/// Temperature, weight and/or height taken at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Measurement {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: RecordId,
    #[serde(alias = "dateISO")]
    pub occurred_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature_c: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_kg: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height_cm: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Measurement {
    pub fn new(id: impl Into<RecordId>, occurred_at: Timestamp) -> Self {
        Self {
            id: id.into(),
            occurred_at,
            temperature_c: None,
            weight_kg: None,
            height_cm: None,
            notes: None,
        }
    }

    pub fn with_temperature(mut self, celsius: f64) -> Self {
        self.temperature_c = Some(celsius);
        self
    }

    pub fn with_weight(mut self, kilograms: f64) -> Self {
        self.weight_kg = Some(kilograms);
        self
    }

    pub fn with_height(mut self, centimetres: f64) -> Self {
        self.height_cm = Some(centimetres);
        self
    }

    /// Whether at least one value is present.
    pub fn has_values(&self) -> bool {
        self.temperature_c.is_some() || self.weight_kg.is_some() || self.height_cm.is_some()
    }
}

impl Entry for Feed {
    const KIND: RecordKind = RecordKind::Feed;

    fn id(&self) -> &str {
        &self.id
    }

    fn occurred_at(&self) -> Timestamp {
        self.occurred_at
    }

    fn validate(&self) -> Result<()> {
        crate::schema::validate_feed(self)
    }
}

impl Entry for Elimination {
    const KIND: RecordKind = RecordKind::Elimination;

    fn id(&self) -> &str {
        &self.id
    }

    fn occurred_at(&self) -> Timestamp {
        self.occurred_at
    }

    fn validate(&self) -> Result<()> {
        crate::schema::validate_elimination(self)
    }
}

impl Entry for Medication {
    const KIND: RecordKind = RecordKind::Medication;

    fn id(&self) -> &str {
        &self.id
    }

    fn occurred_at(&self) -> Timestamp {
        self.occurred_at
    }

    fn validate(&self) -> Result<()> {
        crate::schema::validate_medication(self)
    }
}

impl Entry for Measurement {
    const KIND: RecordKind = RecordKind::Measurement;

    fn id(&self) -> &str {
        &self.id
    }

    fn occurred_at(&self) -> Timestamp {
        self.occurred_at
    }

    fn validate(&self) -> Result<()> {
        crate::schema::validate_measurement(self)
    }
}

/// One record of any kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Feed(Feed),
    Elimination(Elimination),
    Medication(Medication),
    Measurement(Measurement),
}

impl Record {
    pub fn kind(&self) -> RecordKind {
        match self {
            Record::Feed(_) => RecordKind::Feed,
            Record::Elimination(_) => RecordKind::Elimination,
            Record::Medication(_) => RecordKind::Medication,
            Record::Measurement(_) => RecordKind::Measurement,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Record::Feed(r) => r.id(),
            Record::Elimination(r) => r.id(),
            Record::Medication(r) => r.id(),
            Record::Measurement(r) => r.id(),
        }
    }

    pub fn occurred_at(&self) -> Timestamp {
        match self {
            Record::Feed(r) => r.occurred_at(),
            Record::Elimination(r) => r.occurred_at(),
            Record::Medication(r) => r.occurred_at(),
            Record::Measurement(r) => r.occurred_at(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Record::Feed(r) => r.validate(),
            Record::Elimination(r) => r.validate(),
            Record::Medication(r) => r.validate(),
            Record::Measurement(r) => r.validate(),
        }
    }

    /// Serialize the record in its document shape.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        let value = match self {
            Record::Feed(r) => serde_json::to_value(r),
            Record::Elimination(r) => serde_json::to_value(r),
            Record::Medication(r) => serde_json::to_value(r),
            Record::Measurement(r) => serde_json::to_value(r),
        };
        value.map_err(|e| Error::InvalidDocument(e.to_string()))
    }
}

impl From<Feed> for Record {
    fn from(value: Feed) -> Self {
        Record::Feed(value)
    }
}

impl From<Elimination> for Record {
    fn from(value: Elimination) -> Self {
        Record::Elimination(value)
    }
}

impl From<Medication> for Record {
    fn from(value: Medication) -> Self {
        Record::Medication(value)
    }
}

impl From<Measurement> for Record {
    fn from(value: Measurement) -> Self {
        Record::Measurement(value)
    }
}

/// Older documents stored ids as `Date.now()` numbers.
fn deserialize_id<'de, D>(deserializer: D) -> std::result::Result<RecordId, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(text) => text,
        RawId::Number(number) => number.to_string(),
    })
}

fn deserialize_count<'de, D>(deserializer: D) -> std::result::Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<f64>::deserialize(deserializer)?.unwrap_or(0.0);
    if raw.is_finite() {
        Ok(clamp_count(raw.round() as i64))
    } else {
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn at(text: &str) -> Timestamp {
        text.parse().unwrap()
    }

    #[test]
    fn kind_parsing_accepts_short_names() {
        assert_eq!("feed".parse::<RecordKind>().unwrap(), RecordKind::Feed);
        assert_eq!("elim".parse::<RecordKind>().unwrap(), RecordKind::Elimination);
        assert_eq!("meds".parse::<RecordKind>().unwrap(), RecordKind::Medication);
        assert_eq!(
            "measurement".parse::<RecordKind>().unwrap(),
            RecordKind::Measurement
        );
        assert!(matches!(
            "nap".parse::<RecordKind>(),
            Err(Error::UnknownKind(_))
        ));
    }

    #[test]
    fn bottle_feed_wire_format() {
        let feed = Feed::bottle("f1", at("2024-01-01T08:00:00Z"), 120.0);
        let value = serde_json::to_value(&feed).unwrap();

        assert_eq!(value["id"], "f1");
        assert_eq!(value["source"], "bottle");
        assert_eq!(value["amountMl"], 120.0);
        assert!(value.get("notes").is_none());

        let parsed: Feed = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, feed);
    }

    #[test]
    fn legacy_breast_feed_reads() {
        let raw = json!({
            "id": 1704096000000u64,
            "dateISO": "2024-01-01T08:00:00.000Z",
            "source": "breast",
            "breastSide": "Gauche",
            "durationSec": 600
        });

        let feed: Feed = serde_json::from_value(raw).unwrap();
        assert_eq!(feed.id, "1704096000000");
        assert_eq!(feed.occurred_at, at("2024-01-01T08:00:00Z"));
        assert_eq!(
            feed.source,
            FeedSource::Breast {
                side: BreastSide::Left,
                duration_seconds: 600
            }
        );
    }

    #[test]
    fn elimination_counts_clamp() {
        let raw = json!({
            "id": "e1",
            "occurredAt": "2024-01-01T08:00:00Z",
            "pee": 7,
            "poopCount": -2
        });

        let elim: Elimination = serde_json::from_value(raw).unwrap();
        assert_eq!(elim.pee_count, 3);
        assert_eq!(elim.poop_count, 0);
        assert_eq!(elim.vomit_count, 0);

        let built = Elimination::new("e2", at("2024-01-01T08:00:00Z"), 2, 9, -1);
        assert_eq!(
            (built.pee_count, built.poop_count, built.vomit_count),
            (2, 3, 0)
        );
    }

    #[test]
    fn unknown_dose_key_reads_as_other() {
        let raw = json!({
            "id": "m1",
            "occurredAt": "2024-01-01T08:00:00Z",
            "name": "Gripe water",
            "doseKey": "gripe_water"
        });

        let med: Medication = serde_json::from_value(raw).unwrap();
        assert_eq!(med.dose_key, DoseKey::Other);
        assert_eq!(med.display_name(), "Gripe water");
    }

    #[test]
    fn preset_medication_uses_label() {
        let med = Medication::preset("m1", at("2024-01-01T08:00:00Z"), DoseKey::VitaminD);
        assert_eq!(med.name, "Vitamin D");
        assert_eq!(
            serde_json::to_value(&med).unwrap()["doseKey"],
            json!("vitamin_d")
        );
    }

    #[test]
    fn record_dispatch() {
        let record: Record = Measurement::new("x1", at("2024-01-01T08:00:00Z"))
            .with_weight(3.4)
            .into();

        assert_eq!(record.kind(), RecordKind::Measurement);
        assert_eq!(record.id(), "x1");
        assert_eq!(record.to_json().unwrap()["weightKg"], 3.4);
    }

    #[test]
    fn generated_ids_are_unique() {
        let first = new_record_id();
        let second = new_record_id();
        assert_ne!(first, second);
        assert!(!first.is_empty());
    }
}
