//! Core domain types: the extraction field schema, extracted records,
//! organizers, events, raw links and the append-only log entries.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Field schema
// ---------------------------------------------------------------------------

/// One named field of the extraction schema.
///
/// The order of [`Field::ALL`] is the order the fields appear in prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    EventName,
    EventDate,
    EventType,
    Description,
    VenueName,
    VenueAddress,
    VenueCity,
    VenueState,
    VenueZip,
    VenueParking,
    VenueWebsite,
    RegistrationUrl,
    SponsorshipUrl,
    SponsorshipTiers,
    SponsorshipContact,
    PastSponsors,
    DressCode,
    OrganizerName,
    OrganizerEin,
    OrganizerWebsite,
    OrganizerEmail,
    OrganizerPhone,
    OrganizerContactName,
    OrganizerContactTitle,
    OrganizerContactEmail,
    OrganizerFacebook,
    OrganizerInstagram,
}

impl Field {
    /// Every required field, in schema order.
    pub const ALL: [Field; 27] = [
        Field::EventName,
        Field::EventDate,
        Field::EventType,
        Field::Description,
        Field::VenueName,
        Field::VenueAddress,
        Field::VenueCity,
        Field::VenueState,
        Field::VenueZip,
        Field::VenueParking,
        Field::VenueWebsite,
        Field::RegistrationUrl,
        Field::SponsorshipUrl,
        Field::SponsorshipTiers,
        Field::SponsorshipContact,
        Field::PastSponsors,
        Field::DressCode,
        Field::OrganizerName,
        Field::OrganizerEin,
        Field::OrganizerWebsite,
        Field::OrganizerEmail,
        Field::OrganizerPhone,
        Field::OrganizerContactName,
        Field::OrganizerContactTitle,
        Field::OrganizerContactEmail,
        Field::OrganizerFacebook,
        Field::OrganizerInstagram,
    ];

    /// The JSON key used in prompts and model responses.
    pub fn as_str(self) -> &'static str {
        match self {
            Field::EventName => "event_name",
            Field::EventDate => "event_date",
            Field::EventType => "event_type",
            Field::Description => "description",
            Field::VenueName => "venue_name",
            Field::VenueAddress => "venue_address",
            Field::VenueCity => "venue_city",
            Field::VenueState => "venue_state",
            Field::VenueZip => "venue_zip",
            Field::VenueParking => "venue_parking",
            Field::VenueWebsite => "venue_website",
            Field::RegistrationUrl => "registration_url",
            Field::SponsorshipUrl => "sponsorship_url",
            Field::SponsorshipTiers => "sponsorship_tiers",
            Field::SponsorshipContact => "sponsorship_contact",
            Field::PastSponsors => "past_sponsors",
            Field::DressCode => "dress_code",
            Field::OrganizerName => "organizer_name",
            Field::OrganizerEin => "organizer_ein",
            Field::OrganizerWebsite => "organizer_website",
            Field::OrganizerEmail => "organizer_email",
            Field::OrganizerPhone => "organizer_phone",
            Field::OrganizerContactName => "organizer_contact_name",
            Field::OrganizerContactTitle => "organizer_contact_title",
            Field::OrganizerContactEmail => "organizer_contact_email",
            Field::OrganizerFacebook => "organizer_facebook",
            Field::OrganizerInstagram => "organizer_instagram",
        }
    }

    /// Look up a field by its JSON key.
    pub fn from_key(key: &str) -> Option<Field> {
        Field::ALL.into_iter().find(|f| f.as_str() == key)
    }

    /// Column length limit for the stored value, `None` for unbounded text.
    pub fn max_len(self) -> Option<usize> {
        match self {
            Field::Description | Field::SponsorshipTiers | Field::PastSponsors => None,
            Field::EventDate => Some(10),
            Field::EventType | Field::VenueCity | Field::VenueParking | Field::DressCode => {
                Some(100)
            }
            Field::VenueState | Field::OrganizerPhone => Some(50),
            Field::VenueZip | Field::OrganizerEin => Some(20),
            _ => Some(255),
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ExtractedRecord
// ---------------------------------------------------------------------------

/// A partial mapping of schema fields to string values.
///
/// An absent field and a field holding only whitespace are both "missing".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedRecord {
    values: BTreeMap<Field, String>,
}

impl ExtractedRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a record from a decoded JSON object.
    ///
    /// Unknown keys and `null` values are dropped. Numbers and booleans are
    /// rendered as text; arrays and objects are kept as JSON text.
    pub fn from_json(map: &serde_json::Map<String, serde_json::Value>) -> Self {
        let mut record = Self::new();
        for (key, value) in map {
            let Some(field) = Field::from_key(key) else {
                continue;
            };
            if let Some(text) = value_to_text(value) {
                record.values.insert(field, text);
            }
        }
        record
    }

    /// Raw value of a field, even if blank.
    pub fn get(&self, field: Field) -> Option<&str> {
        self.values.get(&field).map(String::as_str)
    }

    /// Trimmed value of a field, `None` when missing.
    pub fn value(&self, field: Field) -> Option<&str> {
        self.get(field).map(str::trim).filter(|v| !v.is_empty())
    }

    pub fn set(&mut self, field: Field, value: impl Into<String>) {
        self.values.insert(field, value.into());
    }

    pub fn is_missing(&self, field: Field) -> bool {
        self.value(field).is_none()
    }

    /// Count of schema fields that are missing.
    pub fn missing_count(&self, schema: &[Field]) -> usize {
        schema.iter().filter(|f| self.is_missing(**f)).count()
    }

    /// Schema fields that are missing, in schema order.
    pub fn missing_fields(&self, schema: &[Field]) -> Vec<Field> {
        schema
            .iter()
            .copied()
            .filter(|f| self.is_missing(*f))
            .collect()
    }

    /// Fields holding a non-blank value.
    pub fn populated(&self) -> impl Iterator<Item = (Field, &str)> {
        self.values
            .iter()
            .filter(|(_, v)| !v.trim().is_empty())
            .map(|(f, v)| (*f, v.as_str()))
    }

    /// Copy every populated field of `supplement` into fields that are
    /// missing here. Returns the number of fields filled.
    pub fn merge_missing(&mut self, supplement: &ExtractedRecord) -> usize {
        let mut filled = 0;
        for (field, value) in supplement.populated() {
            if self.is_missing(field) {
                self.values.insert(field, value.to_string());
                filled += 1;
            }
        }
        filled
    }

    /// True when no field carries a value.
    pub fn is_empty(&self) -> bool {
        self.populated().next().is_none()
    }

    /// Apply `f` to every stored value, dropping values it maps to `None`.
    pub fn map_values(&mut self, mut f: impl FnMut(Field, &str) -> Option<String>) {
        let values = std::mem::take(&mut self.values);
        for (field, value) in values {
            if let Some(mapped) = f(field, &value) {
                self.values.insert(field, mapped);
            }
        }
    }
}

/// Render a JSON value as stored text. `null` and blank strings yield `None`.
pub fn value_to_text(value: &serde_json::Value) -> Option<String> {
    let text = match value {
        serde_json::Value::Null => return None,
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        other => other.to_string(),
    };
    if text.trim().is_empty() { None } else { Some(text) }
}

// ---------------------------------------------------------------------------
// Organizer / Event
// ---------------------------------------------------------------------------

/// Organizer columns. `None` means unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organizer {
    pub name: Option<String>,
    pub ein: Option<String>,
    pub website: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub contact_name: Option<String>,
    pub contact_title: Option<String>,
    pub contact_email: Option<String>,
    pub facebook: Option<String>,
    pub instagram: Option<String>,
}

impl Organizer {
    pub fn from_record(record: &ExtractedRecord) -> Self {
        let v = |f: Field| record.value(f).map(str::to_string);
        Self {
            name: v(Field::OrganizerName),
            ein: v(Field::OrganizerEin),
            website: v(Field::OrganizerWebsite),
            email: v(Field::OrganizerEmail),
            phone: v(Field::OrganizerPhone),
            contact_name: v(Field::OrganizerContactName),
            contact_title: v(Field::OrganizerContactTitle),
            contact_email: v(Field::OrganizerContactEmail),
            facebook: v(Field::OrganizerFacebook),
            instagram: v(Field::OrganizerInstagram),
        }
    }
}

/// Event columns. `None` means unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub name: Option<String>,
    pub date: Option<String>,
    pub event_type: Option<String>,
    pub description: Option<String>,
    pub venue_name: Option<String>,
    pub venue_address: Option<String>,
    pub venue_city: Option<String>,
    pub venue_state: Option<String>,
    pub venue_zip: Option<String>,
    pub venue_parking: Option<String>,
    pub venue_website: Option<String>,
    pub registration_url: Option<String>,
    pub sponsorship_url: Option<String>,
    pub sponsorship_tiers: Option<String>,
    pub sponsorship_contact: Option<String>,
    pub past_sponsors: Option<String>,
    pub dress_code: Option<String>,
}

impl Event {
    pub fn from_record(record: &ExtractedRecord) -> Self {
        let v = |f: Field| record.value(f).map(str::to_string);
        Self {
            name: v(Field::EventName),
            date: v(Field::EventDate),
            event_type: v(Field::EventType),
            description: v(Field::Description),
            venue_name: v(Field::VenueName),
            venue_address: v(Field::VenueAddress),
            venue_city: v(Field::VenueCity),
            venue_state: v(Field::VenueState),
            venue_zip: v(Field::VenueZip),
            venue_parking: v(Field::VenueParking),
            venue_website: v(Field::VenueWebsite),
            registration_url: v(Field::RegistrationUrl),
            sponsorship_url: v(Field::SponsorshipUrl),
            sponsorship_tiers: v(Field::SponsorshipTiers),
            sponsorship_contact: v(Field::SponsorshipContact),
            past_sponsors: v(Field::PastSponsors),
            dress_code: v(Field::DressCode),
        }
    }
}

/// A stored organizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizerRow {
    pub id: i64,
    pub uid: String,
    #[serde(flatten)]
    pub organizer: Organizer,
}

/// A stored event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRow {
    pub id: i64,
    pub uid: String,
    pub organizer_id: Option<i64>,
    #[serde(flatten)]
    pub event: Event,
}

// ---------------------------------------------------------------------------
// Search / raw links
// ---------------------------------------------------------------------------

/// A normalized search result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub link: String,
    pub snippet: String,
}

/// A search result queued for extraction. `url` is the natural key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLink {
    pub id: i64,
    pub query: String,
    pub title: Option<String>,
    pub url: String,
    pub snippet: Option<String>,
    pub created_at: String,
}

// ---------------------------------------------------------------------------
// Logs
// ---------------------------------------------------------------------------

/// Outcome recorded in the append-only logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Success,
    Failed,
}

impl LogStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LogStatus::Success => "success",
            LogStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(LogStatus::Success),
            "failed" => Some(LogStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for LogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of record an enrichment attempt targeted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectKind {
    Organizer,
    Event,
}

impl SubjectKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SubjectKind::Organizer => "organizer",
            SubjectKind::Event => "event",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "organizer" => Some(SubjectKind::Organizer),
            "event" => Some(SubjectKind::Event),
            _ => None,
        }
    }
}

impl fmt::Display for SubjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One processing attempt for a raw link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseLogEntry {
    pub id: i64,
    pub raw_link_id: i64,
    pub status: LogStatus,
    pub message: String,
    pub created_at: String,
}

/// One enrichment attempt for an organizer or event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentLogEntry {
    pub id: i64,
    pub run_id: String,
    pub subject_kind: SubjectKind,
    pub subject_id: i64,
    pub source: String,
    pub value: Option<String>,
    pub status: LogStatus,
    pub message: String,
    pub created_at: String,
}
