//! Canned-page fetcher for orchestrator tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::app::{BookruleError, Result};
use crate::fetcher::{FetchedPage, Fetcher};
use crate::request::PreparedRequest;

#[derive(Default)]
pub(crate) struct StubFetcher {
    pages: HashMap<String, (Duration, String)>,
    requested: Arc<Mutex<Vec<String>>>,
    cancelled: Arc<Mutex<Vec<String>>>,
}

impl StubFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(self, url: &str, body: &str) -> Self {
        self.slow_page(url, Duration::ZERO, body)
    }

    pub fn slow_page(mut self, url: &str, delay: Duration, body: &str) -> Self {
        self.pages.insert(url.to_string(), (delay, body.to_string()));
        self
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }

    /// Requests whose future was dropped before completing.
    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }
}

struct InFlight {
    url: String,
    log: Arc<Mutex<Vec<String>>>,
    done: bool,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if !self.done {
            self.log.lock().unwrap().push(self.url.clone());
        }
    }
}

#[async_trait]
impl Fetcher for StubFetcher {
    async fn fetch(&self, request: &PreparedRequest) -> Result<FetchedPage> {
        let url = request.url.to_string();
        self.requested.lock().unwrap().push(url.clone());

        let Some((delay, body)) = self.pages.get(&url).cloned() else {
            return Err(BookruleError::Other(format!("no page at {url}")));
        };

        let mut guard = InFlight {
            url: url.clone(),
            log: self.cancelled.clone(),
            done: false,
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        guard.done = true;

        Ok(FetchedPage {
            url,
            content_type: Some("text/html; charset=utf-8".to_string()),
            body: body.into_bytes(),
        })
    }
}
