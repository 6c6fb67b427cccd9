pub mod charset;
pub mod http_fetcher;

pub use http_fetcher::HttpFetcher;

use async_trait::async_trait;

use crate::app::Result;
use crate::request::PreparedRequest;

/// A fetched response body.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// Final URL after redirects; relative links on the page resolve against it.
    pub url: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl FetchedPage {
    /// Decode the body through the charset ladder.
    ///
    /// `charset` is the charset the request declared, if any.
    pub fn text(&self, charset: Option<&str>) -> Result<String> {
        let declared =
            charset::declared_charset(charset, self.content_type.as_deref(), &self.body);
        let (text, encoding) = charset::decode(&self.body, declared.as_deref())?;
        tracing::trace!(url = %self.url, encoding, "decoded page");
        Ok(text)
    }
}

#[async_trait]
pub trait Fetcher {
    async fn fetch(&self, request: &PreparedRequest) -> Result<FetchedPage>;
}
