use super::{LocalizedString, sanitize};
use serde::Deserialize;
use std::fmt::{Display, Formatter, Result as FmtResult};

/// A catalog tag.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "RawTag")]
pub struct Tag {
    pub id: String,
    pub name: LocalizedString,
    pub category: TagCategory,
}

#[derive(Deserialize)]
struct RawTag {
    id: String,
    #[serde(default)]
    attributes: RawTagAttributes,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawTagAttributes {
    name: LocalizedString,
    group: String,
}

impl From<RawTag> for Tag {
    fn from(raw: RawTag) -> Self {
        Self {
            id: raw.id,
            name: raw.attributes.name,
            category: TagCategory::from_group(&raw.attributes.group),
        }
    }
}

/// Tag grouping, declared in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TagCategory {
    Format,
    Genre,
    Theme,
    Content,
}
impl TagCategory {
    pub const ALL: [TagCategory; 4] = [Self::Format, Self::Genre, Self::Theme, Self::Content];

    /// Map the service's raw `group` string. Unrecognised groups are
    /// treated as themes.
    pub fn from_group(group: &str) -> Self {
        match sanitize(group).as_str() {
            "format" => Self::Format,
            "genre" => Self::Genre,
            "content" => Self::Content,
            _ => Self::Theme,
        }
    }

    pub fn display_order(&self) -> u8 {
        *self as u8
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Format => "Format",
            Self::Genre => "Genre",
            Self::Theme => "Theme",
            Self::Content => "Content",
        }
    }
}
impl Display for TagCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

/// Every known tag grouped by category in display order, each group sorted
/// by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Taxonomy {
    groups: Vec<(TagCategory, Vec<Tag>)>,
}
impl Taxonomy {
    pub fn new(tags: impl IntoIterator<Item = Tag>, language: &str) -> Self {
        let mut groups: Vec<(TagCategory, Vec<Tag>)> =
            TagCategory::ALL.into_iter().map(|category| (category, Vec::new())).collect();
        for tag in tags {
            groups[tag.category.display_order() as usize].1.push(tag);
        }
        for (_, tags) in &mut groups {
            tags.sort_by_cached_key(|tag| tag.name.preferred(language).unwrap_or_default().to_lowercase());
        }
        groups.retain(|(_, tags)| !tags.is_empty());
        Self { groups }
    }

    pub fn groups(&self) -> impl Iterator<Item = (TagCategory, &[Tag])> {
        self.groups.iter().map(|(category, tags)| (*category, tags.as_slice()))
    }

    pub fn find(&self, id: &str) -> Option<&Tag> {
        self.groups.iter().flat_map(|(_, tags)| tags).find(|tag| tag.id == id)
    }

    /// Case-insensitive lookup by name in any language.
    pub fn find_by_name(&self, name: &str) -> Option<&Tag> {
        let wanted = name.trim().to_lowercase();
        self.groups
            .iter()
            .flat_map(|(_, tags)| tags)
            .find(|tag| tag.name.iter().any(|(_, text)| text.to_lowercase() == wanted))
    }

    pub fn len(&self) -> usize {
        self.groups.iter().map(|(_, tags)| tags.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}
