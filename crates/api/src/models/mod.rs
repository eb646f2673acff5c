//! Typed models for the service's JSON payloads.
//!
//! Raw wire shapes stay private to each module; the public types are decoded
//! once (relations resolved into [`Relation`], timestamps parsed) and are
//! immutable afterwards.

mod chapter;
mod entry;
mod filter;
mod status;
mod tag;
mod token;

pub use self::chapter::{Chapter, PageFiles, PageManifest, Quality};
pub use self::entry::{ContentRating, Demographic, Entry, EntryStatus, PLACEHOLDER_TITLE};
pub use self::filter::{Filter, SortOption, TagMode, TagState};
pub use self::status::ReadingStatus;
pub use self::tag::{Tag, TagCategory, Taxonomy};
pub use self::token::{Credentials, TokenGrant};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::BTreeMap;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

fn sanitize(s: impl AsRef<str>) -> String {
    s.as_ref().trim().to_lowercase().replace(['-', '_', ' '], "")
}

/// Unparsable or empty timestamps decode to `None` rather than failing the
/// whole payload.
fn parse_timestamp(value: Option<&str>) -> Option<OffsetDateTime> {
    value.filter(|s| !s.is_empty()).and_then(|s| OffsetDateTime::parse(s, &Rfc3339).ok())
}

/// Paged list envelope shared by every collection endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Collection<T> {
    pub data: Vec<T>,
    #[serde(default)]
    pub total: u32,
    #[serde(default)]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Single<T> {
    pub data: T,
}

/// Text keyed by language code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalizedString(BTreeMap<String, String>);
impl LocalizedString {
    pub fn get(&self, language: &str) -> Option<&str> {
        self.0.get(language).map(String::as_str)
    }

    /// Look up `language`, falling back to English and then to whichever
    /// translation sorts first.
    pub fn preferred(&self, language: &str) -> Option<&str> {
        self.get(language).or_else(|| self.get("en")).or_else(|| self.0.values().next().map(String::as_str))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(lang, text)| (lang.as_str(), text.as_str()))
    }
}
impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for LocalizedString {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}
impl<'de> Deserialize<'de> for LocalizedString {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // The service encodes an empty map as `[]`, and alternate titles as a
        // list of single-entry maps.
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Map(BTreeMap<String, String>),
            List(Vec<BTreeMap<String, String>>),
        }
        Ok(match Raw::deserialize(deserializer)? {
            Raw::Map(map) => Self(map),
            Raw::List(list) => Self(list.into_iter().flatten().collect()),
        })
    }
}

/// A related resource, resolved from the wire `type` string at decode time.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "RawRelation")]
pub enum Relation {
    CoverArt { id: String, file_name: Option<String> },
    Author { id: String, name: Option<String> },
    Artist { id: String, name: Option<String> },
    ScanlationGroup { id: String, name: Option<String> },
    Manga { id: String, title: Option<LocalizedString> },
    Other { id: String, kind: String },
}
impl Relation {
    pub fn id(&self) -> &str {
        match self {
            Self::CoverArt { id, .. }
            | Self::Author { id, .. }
            | Self::Artist { id, .. }
            | Self::ScanlationGroup { id, .. }
            | Self::Manga { id, .. }
            | Self::Other { id, .. } => id,
        }
    }
}

#[derive(Deserialize)]
struct RawRelation {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    attributes: Option<Value>,
}
impl From<RawRelation> for Relation {
    fn from(raw: RawRelation) -> Self {
        let attributes = raw.attributes.unwrap_or(Value::Null);
        let text = |key: &str| attributes.get(key).and_then(Value::as_str).map(str::to_string);
        let id = raw.id;
        match raw.kind.as_str() {
            "cover_art" => Self::CoverArt { id, file_name: text("fileName") },
            "author" => Self::Author { id, name: text("name") },
            "artist" => Self::Artist { id, name: text("name") },
            "scanlation_group" => Self::ScanlationGroup { id, name: text("name") },
            "manga" => Self::Manga {
                id,
                title: attributes.get("title").and_then(|title| LocalizedString::deserialize(title).ok()),
            },
            _ => Self::Other { id, kind: raw.kind },
        }
    }
}
