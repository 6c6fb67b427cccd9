use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub id: String,
    pub name: String,
    pub author: Option<String>,
    pub cover_url: Option<String>,
    /// Canonical detail page URL.
    pub book_url: String,
    /// URL of the source this book was found through.
    pub origin: String,
    pub origin_name: String,
    pub intro: Option<String>,
    pub kind: Option<String>,
    pub latest_chapter: Option<String>,
    pub toc_url: Option<String>,
}

impl Book {
    pub fn new(origin: &str, book_url: &str, name: &str) -> Self {
        Self {
            id: Self::generate_id(origin, book_url),
            name: name.to_string(),
            book_url: book_url.to_string(),
            origin: origin.to_string(),
            ..Default::default()
        }
    }

    /// Generate a deterministic ID from the source URL and book URL
    pub fn generate_id(origin: &str, book_url: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(origin.as_bytes());
        hasher.update(book_url.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn display_author(&self) -> &str {
        self.author.as_deref().unwrap_or("(Unknown)")
    }

    /// URL of the table of contents, which is the detail page unless the
    /// source says otherwise.
    pub fn toc_url(&self) -> &str {
        self.toc_url
            .as_deref()
            .filter(|url| !url.is_empty())
            .unwrap_or(&self.book_url)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub title: String,
    pub url: String,
    pub index: usize,
    /// Volume headers group chapters and may have no URL.
    pub is_volume: bool,
}

/// Normalized text of one chapter, possibly joined from several pages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    pub chapter_url: String,
    pub text: String,
    pub pages: usize,
}

/// One source's contribution to a streamed search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchBatch {
    pub source_url: String,
    pub source_name: String,
    pub books: Vec<Book>,
}
