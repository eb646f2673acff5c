use super::{LocalizedString, Relation, Tag, parse_timestamp, sanitize};
use crate::error::{Error, ErrorKind};
use serde::Deserialize;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use time::OffsetDateTime;
use url::Url;

/// Title carried by [`Entry::placeholder()`].
pub const PLACEHOLDER_TITLE: &str = "Loading...";

/// A catalog entry (one manga title).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "RawEntry")]
pub struct Entry {
    pub id: String,
    pub title: LocalizedString,
    pub alt_titles: Vec<LocalizedString>,
    pub description: LocalizedString,
    pub year: Option<i32>,
    pub status: EntryStatus,
    pub tags: Vec<Tag>,
    /// `None` when the service sent an empty or unparsable timestamp.
    pub updated_at: Option<OffsetDateTime>,
    pub rating: Option<f64>,
    pub content_rating: Option<ContentRating>,
    pub demographic: Option<Demographic>,
    pub relations: Vec<Relation>,
}
impl Entry {
    /// Stand-in for an entry whose id is known but whose details have not
    /// been fetched. Never render it as real data; see
    /// [`is_placeholder()`](Self::is_placeholder).
    pub fn placeholder(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: [("en", PLACEHOLDER_TITLE)].into_iter().collect(),
            alt_titles: Vec::new(),
            description: LocalizedString::default(),
            year: None,
            status: EntryStatus::Unknown(String::new()),
            tags: Vec::new(),
            updated_at: None,
            rating: None,
            content_rating: None,
            demographic: None,
            relations: Vec::new(),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.updated_at.is_none()
            && self.relations.is_empty()
            && self.title.iter().eq([("en", PLACEHOLDER_TITLE)])
    }

    /// Best title for `language`, trying alternate titles before giving up
    /// and showing the id.
    pub fn display_title(&self, language: &str) -> &str {
        self.title
            .preferred(language)
            .or_else(|| self.alt_titles.iter().find_map(|alt| alt.get(language)))
            .unwrap_or(&self.id)
    }

    pub fn cover_file_name(&self) -> Option<&str> {
        self.relations.iter().find_map(|relation| match relation {
            Relation::CoverArt { file_name, .. } => file_name.as_deref(),
            _ => None,
        })
    }

    /// `{uploads}/covers/{id}/{fileName}`, when the cover relation was
    /// expanded in the response.
    pub fn cover_url(&self, uploads: &Url) -> Option<Url> {
        let file_name = self.cover_file_name()?;
        let mut url = uploads.clone();
        url.path_segments_mut().ok()?.pop_if_empty().extend(["covers", self.id.as_str(), file_name]);
        Some(url)
    }

    pub fn authors(&self) -> impl Iterator<Item = &str> {
        self.relations.iter().filter_map(|relation| match relation {
            Relation::Author { name, .. } => name.as_deref(),
            _ => None,
        })
    }

    pub fn artists(&self) -> impl Iterator<Item = &str> {
        self.relations.iter().filter_map(|relation| match relation {
            Relation::Artist { name, .. } => name.as_deref(),
            _ => None,
        })
    }
}

#[derive(Deserialize)]
struct RawEntry {
    id: String,
    #[serde(default)]
    attributes: RawEntryAttributes,
    #[serde(default)]
    relationships: Vec<Relation>,
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct RawEntryAttributes {
    title: LocalizedString,
    alt_titles: Vec<LocalizedString>,
    description: LocalizedString,
    year: Option<i32>,
    status: Option<String>,
    tags: Vec<Tag>,
    updated_at: Option<String>,
    rating: Option<f64>,
    content_rating: Option<String>,
    publication_demographic: Option<String>,
}

impl From<RawEntry> for Entry {
    fn from(raw: RawEntry) -> Self {
        let attributes = raw.attributes;
        Self {
            id: raw.id,
            title: attributes.title,
            alt_titles: attributes.alt_titles,
            description: attributes.description,
            year: attributes.year,
            status: attributes.status.map(EntryStatus::from).unwrap_or(EntryStatus::Unknown(String::new())),
            tags: attributes.tags,
            updated_at: parse_timestamp(attributes.updated_at.as_deref()),
            rating: attributes.rating,
            content_rating: attributes.content_rating.and_then(|s| s.parse().ok()),
            demographic: attributes.publication_demographic.and_then(|s| s.parse().ok()),
            relations: raw.relationships,
        }
    }
}

/// Publication status. Values this client doesn't know are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntryStatus {
    Ongoing,
    Completed,
    Hiatus,
    Cancelled,
    Unknown(String),
}
impl EntryStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Ongoing => "ongoing",
            Self::Completed => "completed",
            Self::Hiatus => "hiatus",
            Self::Cancelled => "cancelled",
            Self::Unknown(raw) => raw,
        }
    }
}
impl From<String> for EntryStatus {
    fn from(value: String) -> Self {
        match sanitize(&value).as_str() {
            "ongoing" => Self::Ongoing,
            "completed" => Self::Completed,
            "hiatus" => Self::Hiatus,
            "cancelled" | "canceled" => Self::Cancelled,
            _ => Self::Unknown(value),
        }
    }
}
impl Display for EntryStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

/// Content rating, from least to most mature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum ContentRating {
    #[default]
    Safe,
    Suggestive,
    Erotica,
    Pornographic,
}
impl ContentRating {
    pub const ALL: [ContentRating; 4] = [Self::Safe, Self::Suggestive, Self::Erotica, Self::Pornographic];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Safe => "safe",
            Self::Suggestive => "suggestive",
            Self::Erotica => "erotica",
            Self::Pornographic => "pornographic",
        }
    }
}
impl FromStr for ContentRating {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match sanitize(s).as_str() {
            "safe" => Self::Safe,
            "suggestive" => Self::Suggestive,
            "erotica" => Self::Erotica,
            "pornographic" => Self::Pornographic,
            _ => exn::bail!(ErrorKind::Parse { field: "content rating", value: s.to_string() }),
        })
    }
}
impl Display for ContentRating {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

/// Target publication demographic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Demographic {
    Shounen,
    Shoujo,
    Seinen,
    Josei,
    /// Explicitly marked as having no demographic (wire value `none`).
    Unspecified,
}
impl Demographic {
    pub const ALL: [Demographic; 5] = [Self::Shounen, Self::Shoujo, Self::Seinen, Self::Josei, Self::Unspecified];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shounen => "shounen",
            Self::Shoujo => "shoujo",
            Self::Seinen => "seinen",
            Self::Josei => "josei",
            Self::Unspecified => "none",
        }
    }
}
impl FromStr for Demographic {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match sanitize(s).as_str() {
            "shounen" | "shonen" => Self::Shounen,
            "shoujo" | "shojo" => Self::Shoujo,
            "seinen" => Self::Seinen,
            "josei" => Self::Josei,
            "none" => Self::Unspecified,
            _ => exn::bail!(ErrorKind::Parse { field: "demographic", value: s.to_string() }),
        })
    }
}
impl Display for Demographic {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}
