use super::{ContentRating, Demographic, sanitize};
use crate::error::{Error, ErrorKind};
use crate::query::Query;
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

/// Catalog search criteria.
///
/// Included and excluded tags are private so that a tag can never be in
/// both sets; use [`cycle_tag()`](Self::cycle_tag) and friends to change
/// them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub demographic: Option<Demographic>,
    pub year: Option<i32>,
    included: BTreeSet<String>,
    excluded: BTreeSet<String>,
    pub tag_mode: TagMode,
    pub content_rating: Option<ContentRating>,
    pub sort: SortOption,
    pub title: String,
    pub author: String,
    pub artist: String,
}
impl Default for Filter {
    fn default() -> Self {
        Self {
            demographic: None,
            year: None,
            included: BTreeSet::new(),
            excluded: BTreeSet::new(),
            tag_mode: TagMode::All,
            content_rating: Some(ContentRating::Safe),
            sort: SortOption::LatestUpload,
            title: String::new(),
            author: String::new(),
            artist: String::new(),
        }
    }
}

/// Membership of one tag in a [`Filter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagState {
    Neutral,
    Included,
    Excluded,
}

impl Filter {
    pub fn with_sort(mut self, sort: SortOption) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn tag_state(&self, id: &str) -> TagState {
        if self.included.contains(id) {
            TagState::Included
        } else if self.excluded.contains(id) {
            TagState::Excluded
        } else {
            TagState::Neutral
        }
    }

    /// Advance a tag through neutral, included, excluded and back to neutral.
    pub fn cycle_tag(&mut self, id: &str) -> TagState {
        match self.tag_state(id) {
            TagState::Neutral => self.include_tag(id),
            TagState::Included => self.exclude_tag(id),
            TagState::Excluded => self.clear_tag(id),
        }
        self.tag_state(id)
    }

    pub fn include_tag(&mut self, id: &str) {
        self.excluded.remove(id);
        self.included.insert(id.to_string());
    }

    pub fn exclude_tag(&mut self, id: &str) {
        self.included.remove(id);
        self.excluded.insert(id.to_string());
    }

    pub fn clear_tag(&mut self, id: &str) {
        self.included.remove(id);
        self.excluded.remove(id);
    }

    pub fn clear_tags(&mut self) {
        self.included.clear();
        self.excluded.clear();
    }

    pub fn included_tags(&self) -> impl Iterator<Item = &str> {
        self.included.iter().map(String::as_str)
    }

    pub fn excluded_tags(&self) -> impl Iterator<Item = &str> {
        self.excluded.iter().map(String::as_str)
    }

    /// Query parameters for one page of `GET /manga`.
    ///
    /// Free-text fields only participate when non-empty. Author text wins
    /// over artist text, and either one asks the service to expand the
    /// author and artist relations.
    pub fn to_query(&self, limit: u32, offset: u32, language: &str) -> Query {
        let mut query = Query::new();
        query.push("limit", limit).push("offset", offset);
        let person = [self.author.trim(), self.artist.trim()].into_iter().find(|text| !text.is_empty());
        match person {
            Some(_) => query.extend("includes[]", ["author", "artist", "cover_art"]),
            None => query.push("includes[]", "cover_art"),
        };
        query.push("availableTranslatedLanguage[]", language);
        if !self.title.trim().is_empty() {
            query.push("title", self.title.trim());
        }
        if let Some(person) = person {
            query.push("authorOrArtist", person);
        }
        if let Some(rating) = self.content_rating {
            query.push("contentRating[]", rating.as_str());
        }
        let (key, direction) = self.sort.order_param();
        query.push(key, direction);
        query.push("includedTagsMode", self.tag_mode.as_str());
        query.extend("includedTags[]", &self.included);
        query.extend("excludedTags[]", &self.excluded);
        if let Some(demographic) = self.demographic {
            query.push("publicationDemographic[]", demographic.as_str());
        }
        if let Some(year) = self.year {
            query.push("year", year);
        }
        query
    }
}

/// How included tags combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TagMode {
    /// Every included tag must match (`AND`).
    #[default]
    All,
    /// Any included tag may match (`OR`).
    Any,
}
impl TagMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "AND",
            Self::Any => "OR",
        }
    }
}
impl FromStr for TagMode {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match sanitize(s).as_str() {
            "and" | "all" => Self::All,
            "or" | "any" => Self::Any,
            _ => exn::bail!(ErrorKind::Parse { field: "tag mode", value: s.to_string() }),
        })
    }
}

/// Catalog ordering. Each option maps to exactly one `order[...]` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SortOption {
    BestMatch,
    #[default]
    LatestUpload,
    OldestUpload,
    TitleAsc,
    TitleDesc,
    HighestRating,
    LowestRating,
    FollowedCount,
    FewestFollows,
    RecentlyAdded,
    OldestAdded,
    YearAsc,
    YearDesc,
}
impl SortOption {
    pub const ALL: [SortOption; 13] = [
        Self::BestMatch,
        Self::LatestUpload,
        Self::OldestUpload,
        Self::TitleAsc,
        Self::TitleDesc,
        Self::HighestRating,
        Self::LowestRating,
        Self::FollowedCount,
        Self::FewestFollows,
        Self::RecentlyAdded,
        Self::OldestAdded,
        Self::YearAsc,
        Self::YearDesc,
    ];

    /// Query key and direction.
    pub fn order_param(&self) -> (&'static str, &'static str) {
        match self {
            Self::BestMatch => ("order[relevance]", "desc"),
            Self::LatestUpload => ("order[latestUploadedChapter]", "desc"),
            Self::OldestUpload => ("order[latestUploadedChapter]", "asc"),
            Self::TitleAsc => ("order[title]", "asc"),
            Self::TitleDesc => ("order[title]", "desc"),
            Self::HighestRating => ("order[rating]", "desc"),
            Self::LowestRating => ("order[rating]", "asc"),
            Self::FollowedCount => ("order[followedCount]", "desc"),
            Self::FewestFollows => ("order[followedCount]", "asc"),
            Self::RecentlyAdded => ("order[createdAt]", "desc"),
            Self::OldestAdded => ("order[createdAt]", "asc"),
            Self::YearAsc => ("order[year]", "asc"),
            Self::YearDesc => ("order[year]", "desc"),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BestMatch => "bestMatch",
            Self::LatestUpload => "latestUpload",
            Self::OldestUpload => "oldestUpload",
            Self::TitleAsc => "titleAsc",
            Self::TitleDesc => "titleDesc",
            Self::HighestRating => "highestRating",
            Self::LowestRating => "lowestRating",
            Self::FollowedCount => "followedCount",
            Self::FewestFollows => "fewestFollows",
            Self::RecentlyAdded => "recentlyAdded",
            Self::OldestAdded => "oldestAdded",
            Self::YearAsc => "yearAsc",
            Self::YearDesc => "yearDesc",
        }
    }
}
impl FromStr for SortOption {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let sanitized = sanitize(s);
        Self::ALL
            .into_iter()
            .find(|option| option.as_str().to_lowercase() == sanitized)
            .ok_or_else(|| exn::Exn::from(ErrorKind::Parse { field: "sort option", value: s.to_string() }))
    }
}
impl Display for SortOption {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}
