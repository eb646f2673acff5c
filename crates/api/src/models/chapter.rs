use super::{Relation, parse_timestamp};
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use serde::Deserialize;
use time::OffsetDateTime;
use url::Url;

/// One readable chapter of an entry.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "RawChapter")]
pub struct Chapter {
    pub id: String,
    pub volume: Option<String>,
    /// Chapter number as published; not necessarily numeric.
    pub chapter: Option<String>,
    pub title: Option<String>,
    pub translated_language: String,
    pub external_url: Option<String>,
    pub pages: u32,
    pub version: u32,
    pub publish_at: Option<OffsetDateTime>,
    pub readable_at: Option<OffsetDateTime>,
    pub created_at: Option<OffsetDateTime>,
    pub updated_at: Option<OffsetDateTime>,
    pub relations: Vec<Relation>,
}
impl Chapter {
    /// Chapters without a number can't be placed in reading order. An empty
    /// number still counts as present.
    pub fn has_number(&self) -> bool {
        self.chapter.is_some()
    }

    /// Parent entry id, present on every chapter the service returns.
    pub fn entry_id(&self) -> Option<&str> {
        self.relations.iter().find_map(|relation| match relation {
            Relation::Manga { id, .. } => Some(id.as_str()),
            _ => None,
        })
    }

    pub fn scanlation_groups(&self) -> impl Iterator<Item = &str> {
        self.relations.iter().filter_map(|relation| match relation {
            Relation::ScanlationGroup { name, .. } => name.as_deref(),
            _ => None,
        })
    }

    /// Human label such as `Vol. 2 Ch. 14 - Title`.
    pub fn label(&self) -> String {
        let mut parts = Vec::with_capacity(3);
        if let Some(volume) = self.volume.as_deref().filter(|v| !v.is_empty()) {
            parts.push(format!("Vol. {volume}"));
        }
        match self.chapter.as_deref().filter(|c| !c.is_empty()) {
            Some(number) => parts.push(format!("Ch. {number}")),
            None => parts.push("Oneshot".to_string()),
        }
        let mut label = parts.join(" ");
        if let Some(title) = self.title.as_deref().filter(|t| !t.is_empty()) {
            label.push_str(" - ");
            label.push_str(title);
        }
        label
    }
}

#[derive(Deserialize)]
struct RawChapter {
    id: String,
    #[serde(default)]
    attributes: RawChapterAttributes,
    #[serde(default)]
    relationships: Vec<Relation>,
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct RawChapterAttributes {
    volume: Option<String>,
    chapter: Option<String>,
    title: Option<String>,
    translated_language: String,
    external_url: Option<String>,
    pages: u32,
    version: u32,
    publish_at: Option<String>,
    readable_at: Option<String>,
    created_at: Option<String>,
    updated_at: Option<String>,
}

impl From<RawChapter> for Chapter {
    fn from(raw: RawChapter) -> Self {
        let attributes = raw.attributes;
        Self {
            id: raw.id,
            volume: attributes.volume,
            chapter: attributes.chapter,
            title: attributes.title,
            translated_language: attributes.translated_language,
            external_url: attributes.external_url,
            pages: attributes.pages,
            version: attributes.version,
            publish_at: parse_timestamp(attributes.publish_at.as_deref()),
            readable_at: parse_timestamp(attributes.readable_at.as_deref()),
            created_at: parse_timestamp(attributes.created_at.as_deref()),
            updated_at: parse_timestamp(attributes.updated_at.as_deref()),
            relations: raw.relationships,
        }
    }
}

/// Which rendition of the page images to request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Quality {
    /// Original uploads.
    Full,
    /// Recompressed, smaller images.
    #[default]
    DataSaver,
}
impl Quality {
    fn path_segment(&self) -> &'static str {
        match self {
            Self::Full => "data",
            Self::DataSaver => "data-saver",
        }
    }
}
impl From<yomu_config::PageQuality> for Quality {
    fn from(quality: yomu_config::PageQuality) -> Self {
        match quality {
            yomu_config::PageQuality::Full => Self::Full,
            yomu_config::PageQuality::DataSaver => Self::DataSaver,
        }
    }
}

/// Image server assignment for one chapter (the "at-home" response).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageManifest {
    pub base_url: String,
    pub chapter: PageFiles,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageFiles {
    pub hash: String,
    #[serde(default)]
    pub data: Vec<String>,
    #[serde(default)]
    pub data_saver: Vec<String>,
}

impl PageManifest {
    /// Ordered page image URLs: `{baseUrl}/{data|data-saver}/{hash}/{file}`.
    pub fn urls(&self, quality: Quality) -> Result<Vec<Url>> {
        let base = Url::parse(&self.base_url).or_raise(|| ErrorKind::InvalidUrl(self.base_url.clone()))?;
        let files = match quality {
            Quality::Full => &self.chapter.data,
            Quality::DataSaver => &self.chapter.data_saver,
        };
        files
            .iter()
            .map(|file| -> Result<Url> {
                let mut url = base.clone();
                url.path_segments_mut()
                    .map_err(|()| ErrorKind::InvalidUrl(self.base_url.clone()))?
                    .pop_if_empty()
                    .extend([quality.path_segment(), self.chapter.hash.as_str(), file.as_str()]);
                Ok(url)
            })
            .collect()
    }

    pub fn page_count(&self) -> usize {
        self.chapter.data.len().max(self.chapter.data_saver.len())
    }
}
