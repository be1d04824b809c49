//! Post metadata returned by the API, plus the decoded page wrapper that pairs
//! a page of posts with the upstream total count.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Metadata for a single post.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: u64,
    pub width: u32,
    pub height: u32,
    pub score: i64,
    pub source: String,
    pub preview_url: String,
    pub sample_url: String,
    pub file_url: String,
    pub created_at: String,
    pub creator_id: u64,
    pub tags: Vec<String>,
    pub rating: String,
}

impl Post {
    /// Splits the space separated tag string used by the API, dropping blanks.
    pub fn split_tags(raw: &str) -> Vec<String> {
        raw.split_whitespace().map(str::to_owned).collect()
    }
}

impl fmt::Display for Post {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "<==================== id:{} ====================>", self.id)?;
        writeln!(f, "size: {}*{}", self.width, self.height)?;
        writeln!(f, "time: {}", self.created_at)?;
        writeln!(f, "score: {}", self.score)?;
        writeln!(f, "source: {}", self.source)?;
        writeln!(f, "preview url: {}", self.preview_url)?;
        writeln!(f, "file url: {}", self.file_url)?;
        writeln!(f, "tags: {}", self.tags.join(" "))?;
        writeln!(f, "rating: {}", self.rating)?;
        write!(f, "<======================= end =======================>")
    }
}

/// One decoded API response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostPage {
    /// Total number of posts matching the query, when the response carries it.
    pub count: Option<u64>,
    pub posts: Vec<Post>,
}

impl PostPage {
    pub fn first_id(&self) -> Option<u64> {
        self.posts.first().map(|post| post.id)
    }
}
