//! Paged chapter reading: bounded-ahead image prefetching and persisted
//! reading progress.

mod cache;
pub mod error;
mod progress;
mod reader;

pub use crate::cache::PageCache;
pub use crate::progress::{PROGRESS_KEY, Progress, ProgressStore};
pub use crate::reader::ChapterReader;
pub use image::DynamicImage;
