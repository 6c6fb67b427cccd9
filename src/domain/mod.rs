pub mod book;
pub mod source;

pub use book::{Book, Chapter, Content, SearchBatch};
pub use source::{BookInfoRule, ContentRule, ExploreEntry, ListRule, Source, TocRule};
