use std::cmp::Reverse;
use std::sync::Arc;

use async_stream::stream;
use futures::Stream;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::{field, interpreter, load, non_empty, split_reverse, url_field, CrawlSettings, Orchestrator};
use crate::app::Result;
use crate::domain::{Book, ListRule, SearchBatch, Source};
use crate::fetcher::Fetcher;
use crate::rule::RuleInterpreter;

impl Orchestrator {
    /// Search every searchable source for `keyword`.
    ///
    /// Batches arrive in the order sources finish. Sources that fail or find
    /// nothing produce no batch. Dropping the stream aborts the sources still
    /// running.
    pub fn search(
        &self,
        sources: Vec<Source>,
        keyword: &str,
    ) -> impl Stream<Item = SearchBatch> + Send + 'static {
        let fetcher = self.fetcher.clone();
        let settings = self.settings.clone();
        let keyword = keyword.to_string();

        let mut sources: Vec<Source> = sources.into_iter().filter(Source::is_searchable).collect();
        sources.sort_by_key(|source| (source.custom_order, Reverse(source.weight)));

        stream! {
            let semaphore = Arc::new(Semaphore::new(settings.workers.max(1)));
            let mut tasks = JoinSet::new();

            info!(sources = sources.len(), keyword = %keyword, "starting search");
            for source in sources {
                let fetcher = fetcher.clone();
                let settings = settings.clone();
                let semaphore = semaphore.clone();
                let keyword = keyword.clone();

                tasks.spawn(async move {
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        return None;
                    };
                    search_source(fetcher.as_ref(), &settings, &source, &keyword).await
                });
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(Some(batch)) if !batch.books.is_empty() => yield batch,
                    Ok(_) => {}
                    Err(err) => error!("Search task join error: {}", err),
                }
            }
        }
    }

    /// Load one page of an explore entry.
    pub async fn explore(&self, source: &Source, url: &str, page: u32) -> Result<Vec<Book>> {
        let rules = interpreter(&self.settings);
        let loaded = load(self.fetcher.as_ref(), &self.settings, source, &rules, url, None, page).await?;
        Ok(extract_books(&rules, source, source.explore_rules(), &loaded.text))
    }
}

async fn search_source(
    fetcher: &(dyn Fetcher + Send + Sync),
    settings: &CrawlSettings,
    source: &Source,
    keyword: &str,
) -> Option<SearchBatch> {
    let template = source.search_url.as_deref()?;
    let rules = interpreter(settings);

    let loaded = match load(fetcher, settings, source, &rules, template, Some(keyword), 1).await {
        Ok(loaded) => loaded,
        Err(err) => {
            warn!(source = %source.url, %err, "search failed");
            return None;
        }
    };

    let books = extract_books(&rules, source, &source.search, &loaded.text);
    debug!(source = %source.url, books = books.len(), "search finished");

    Some(SearchBatch {
        source_url: source.url.clone(),
        source_name: source.display_name().to_string(),
        books,
    })
}

/// Apply a list rule to a result page. Links resolve against the source URL.
fn extract_books(
    rules: &RuleInterpreter,
    source: &Source,
    list: &ListRule,
    content: &str,
) -> Vec<Book> {
    let base = source.url.as_str();
    let (reverse, list_rule) = split_reverse(&list.book_list);

    let mut books: Vec<Book> = rules
        .elements(content, list_rule, base)
        .iter()
        .filter_map(|node| {
            let name = field(rules, node, &list.name, base);
            let book_url = url_field(rules, node, &list.book_url, base);
            if name.is_empty() || book_url.is_empty() {
                return None;
            }

            let mut book = Book::new(&source.url, &book_url, &name);
            book.origin_name = source.display_name().to_string();
            book.author = non_empty(field(rules, node, &list.author, base));
            book.intro = non_empty(field(rules, node, &list.intro, base));
            book.kind = non_empty(field(rules, node, &list.kind, base));
            book.latest_chapter = non_empty(field(rules, node, &list.last_chapter, base));
            book.cover_url = non_empty(url_field(rules, node, &list.cover_url, base));
            Some(book)
        })
        .collect();

    if reverse {
        books.reverse();
    }
    books
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::StreamExt;

    use super::*;
    use crate::orchestrator::stub::StubFetcher;

    const RESULTS: &str = r#"<ul class="results">
        <li><a class="title" href="/book/1">Dune</a><span class="author">Frank Herbert</span><img src="/c/1.jpg"></li>
        <li><a class="title" href="/book/2">Dune Messiah</a><span class="author">Frank Herbert</span></li>
        <li><a class="title">No link</a></li>
    </ul>"#;

    fn source(host: &str) -> Source {
        Source {
            url: format!("https://{host}"),
            name: host.to_string(),
            search_url: Some("/search?q={{key}}".to_string()),
            search: ListRule {
                book_list: "class.results@tag.li".to_string(),
                name: "class.title@text".to_string(),
                author: "class.author@text".to_string(),
                book_url: "class.title@href".to_string(),
                cover_url: "img@src".to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn orchestrator(fetcher: Arc<StubFetcher>) -> Orchestrator {
        Orchestrator::new(
            fetcher,
            CrawlSettings {
                page_delay: Duration::ZERO,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_extract_books() {
        let rules = RuleInterpreter::new();
        let source = source("a.com");
        let books = extract_books(&rules, &source, &source.search, RESULTS);
        assert_eq!(books.len(), 2);
        assert_eq!(books[0].name, "Dune");
        assert_eq!(books[0].book_url, "https://a.com/book/1");
        assert_eq!(books[0].author.as_deref(), Some("Frank Herbert"));
        assert_eq!(books[0].cover_url.as_deref(), Some("https://a.com/c/1.jpg"));
        assert_eq!(books[0].origin, "https://a.com");
        assert_eq!(books[0].origin_name, "a.com");
        assert!(books[1].cover_url.is_none());
    }

    #[test]
    fn test_reversed_book_list() {
        let rules = RuleInterpreter::new();
        let mut source = source("a.com");
        source.search.book_list = "-class.results@tag.li".to_string();
        let books = extract_books(&rules, &source, &source.search, RESULTS);
        assert_eq!(books[0].name, "Dune Messiah");
    }

    #[tokio::test]
    async fn test_only_non_empty_batches_are_delivered() {
        let fetcher = Arc::new(
            StubFetcher::new()
                .page("https://a.com/search?q=dune", RESULTS)
                .page("https://b.com/search?q=dune", "<p>nothing here</p>"),
        );
        let mut disabled = source("d.com");
        disabled.enabled = false;
        let sources = vec![source("a.com"), source("b.com"), source("c.com"), disabled];

        let batches: Vec<SearchBatch> = orchestrator(fetcher.clone())
            .search(sources, "dune")
            .collect()
            .await;

        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].source_url, "https://a.com");
        assert_eq!(batches[0].books.len(), 2);
        assert!(!fetcher.requested().iter().any(|url| url.contains("d.com")));
        assert_eq!(fetcher.requested().len(), 3);
    }

    #[tokio::test]
    async fn test_batches_arrive_in_completion_order() {
        let fetcher = Arc::new(
            StubFetcher::new()
                .slow_page("https://a.com/search?q=dune", Duration::from_millis(300), RESULTS)
                .page("https://b.com/search?q=dune", RESULTS),
        );
        let batches: Vec<SearchBatch> = orchestrator(fetcher)
            .search(vec![source("a.com"), source("b.com")], "dune")
            .collect()
            .await;

        let order: Vec<&str> = batches.iter().map(|b| b.source_url.as_str()).collect();
        assert_eq!(order, vec!["https://b.com", "https://a.com"]);
    }

    #[tokio::test]
    async fn test_dropping_stream_cancels_outstanding_sources() {
        let fetcher = Arc::new(
            StubFetcher::new()
                .slow_page("https://a.com/search?q=dune", Duration::from_secs(30), RESULTS)
                .page("https://b.com/search?q=dune", RESULTS),
        );
        let orchestrator = orchestrator(fetcher.clone());

        let mut stream = Box::pin(orchestrator.search(vec![source("a.com"), source("b.com")], "dune"));
        let first = stream.next().await.unwrap();
        assert_eq!(first.source_url, "https://b.com");
        drop(stream);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fetcher.cancelled(), vec!["https://a.com/search?q=dune".to_string()]);
    }

    #[tokio::test]
    async fn test_sources_ordered_by_custom_order_then_weight() {
        let fetcher = Arc::new(StubFetcher::new());
        let mut low = source("low.com");
        low.weight = 1;
        let mut high = source("high.com");
        high.weight = 9;
        let mut first = source("first.com");
        first.custom_order = -1;

        let orchestrator = Orchestrator::new(
            fetcher.clone(),
            CrawlSettings {
                workers: 1,
                ..Default::default()
            },
        );
        let batches: Vec<SearchBatch> = orchestrator.search(vec![low, high, first], "x").collect().await;

        assert!(batches.is_empty());
        assert_eq!(
            fetcher.requested(),
            vec![
                "https://first.com/search?q=x".to_string(),
                "https://high.com/search?q=x".to_string(),
                "https://low.com/search?q=x".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_explore_uses_explore_rules() {
        let mut source = source("a.com");
        source.explore = ListRule {
            book_list: "tag.li".to_string(),
            name: "a@text".to_string(),
            book_url: "a@href".to_string(),
            ..Default::default()
        };
        let fetcher = Arc::new(StubFetcher::new().page(
            "https://a.com/hot/2",
            r#"<li><a href="/book/9">Hot Book</a></li>"#,
        ));

        let books = orchestrator(fetcher)
            .explore(&source, "/hot/{{page}}", 2)
            .await
            .unwrap();
        assert_eq!(books.len(), 1);
        assert_eq!(books[0].book_url, "https://a.com/book/9");
    }
}
