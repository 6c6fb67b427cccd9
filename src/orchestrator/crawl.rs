use std::collections::{HashSet, VecDeque};

use tracing::{debug, info, warn};

use super::{field, interpreter, non_empty, split_reverse, url_field, LoadedPage, Orchestrator};
use crate::app::Result;
use crate::domain::{Book, Chapter, Content, Source};
use crate::rule::{absolute_url, with_default_leaf, Node, RuleInterpreter};

impl Orchestrator {
    /// Fill in a book's details from its detail page.
    ///
    /// Fields found on the page replace the search-time values; fields the
    /// page does not yield are left as they were.
    pub async fn book_info(&self, source: &Source, book: &Book) -> Result<Book> {
        let rules = interpreter(&self.settings);
        let page = self.load_link(source, &rules, &book.book_url).await?;
        Ok(apply_book_info(&rules, source, book, &page))
    }

    /// Collect the table of contents, following `nextTocUrl` pages.
    pub async fn chapter_list(&self, source: &Source, book: &Book) -> Result<Vec<Chapter>> {
        let rules = interpreter(&self.settings);
        let (reverse, list_rule) = split_reverse(&source.toc.chapter_list);

        let mut queue = VecDeque::from([absolute_url(&source.url, book.toc_url())]);
        let mut visited = HashSet::new();
        let mut chapters = Vec::new();
        let mut pages = 0;

        while let Some(url) = queue.pop_front() {
            if pages >= self.settings.max_pages {
                warn!(source = %source.url, pages, "table of contents page cap reached");
                break;
            }
            if !visited.insert(url.clone()) {
                continue;
            }
            if pages > 0 && !self.settings.page_delay.is_zero() {
                tokio::time::sleep(self.settings.page_delay).await;
            }

            let page = match self.load_link(source, &rules, &url).await {
                Ok(page) => page,
                Err(err) if pages == 0 => return Err(err),
                Err(err) => {
                    warn!(source = %source.url, %url, %err, "stopping table of contents crawl");
                    break;
                }
            };
            pages += 1;
            visited.insert(page.url.clone());

            let (found, next) = extract_toc(&rules, source, list_rule, &page);
            chapters.extend(found);
            queue.extend(next.into_iter().filter(|next| !visited.contains(next)));
        }

        if reverse {
            chapters.reverse();
        }
        for (index, chapter) in chapters.iter_mut().enumerate() {
            chapter.index = index;
        }

        info!(source = %source.url, chapters = chapters.len(), pages, "table of contents loaded");
        Ok(chapters)
    }

    /// Crawl a chapter body across its pages and normalize it.
    ///
    /// The crawl stops when the next-page link is missing, points at a page
    /// already fetched, or points at `next_chapter_url`. A failed page ends
    /// the crawl with whatever was collected so far.
    pub async fn content(
        &self,
        source: &Source,
        chapter_url: &str,
        next_chapter_url: Option<&str>,
    ) -> Content {
        let rules = interpreter(&self.settings);
        let body_rule = with_default_leaf(&source.content.content, "html");
        let next_rule = source.content.next_content_url.trim();
        let next_chapter = next_chapter_url
            .map(|url| absolute_url(&source.url, url))
            .filter(|url| !url.is_empty());

        let mut url = absolute_url(&source.url, chapter_url);
        let mut visited = HashSet::new();
        let mut bodies = Vec::new();
        let mut pages = 0;

        loop {
            if pages >= self.settings.max_pages {
                warn!(source = %source.url, chapter = chapter_url, pages, "content page cap reached");
                break;
            }
            visited.insert(url.clone());

            let page = match self.load_link(source, &rules, &url).await {
                Ok(page) => page,
                Err(err) => {
                    warn!(source = %source.url, %url, %err, "content page failed");
                    break;
                }
            };
            pages += 1;
            visited.insert(page.url.clone());

            let (body, next) = extract_content(&rules, &body_rule, next_rule, &page);
            if !body.is_empty() {
                bodies.push(body);
            }

            let Some(next) = next else { break };
            if next == url
                || next == page.url
                || next_chapter.as_deref() == Some(next.as_str())
                || visited.contains(&next)
            {
                debug!(%next, "content crawl reached its end");
                break;
            }

            url = next;
            if !self.settings.page_delay.is_zero() {
                tokio::time::sleep(self.settings.page_delay).await;
            }
        }

        let text = self
            .normalizer
            .normalize(&bodies.join("\n"), &source.content.replace_regex);

        Content {
            chapter_url: chapter_url.to_string(),
            text,
            pages,
        }
    }
}

fn apply_book_info(rules: &RuleInterpreter, source: &Source, book: &Book, page: &LoadedPage) -> Book {
    let info = &source.book_info;
    let base = page.url.as_str();
    let document = page.node();
    let root = if info.init.trim().is_empty() {
        document
    } else {
        rules
            .elements_of(&document, &info.init, base)
            .into_iter()
            .next()
            .unwrap_or(document)
    };

    let mut book = book.clone();
    if let Some(name) = non_empty(field(rules, &root, &info.name, base)) {
        book.name = name;
    }
    let overwrite = |target: &mut Option<String>, value: String| {
        if !value.is_empty() {
            *target = Some(value);
        }
    };
    overwrite(&mut book.author, field(rules, &root, &info.author, base));
    overwrite(&mut book.intro, field(rules, &root, &info.intro, base));
    overwrite(&mut book.kind, field(rules, &root, &info.kind, base));
    overwrite(&mut book.latest_chapter, field(rules, &root, &info.last_chapter, base));
    overwrite(&mut book.cover_url, url_field(rules, &root, &info.cover_url, base));
    overwrite(&mut book.toc_url, url_field(rules, &root, &info.toc_url, base));
    if book.origin_name.is_empty() {
        book.origin_name = source.display_name().to_string();
    }
    book
}

fn extract_toc(
    rules: &RuleInterpreter,
    source: &Source,
    list_rule: &str,
    page: &LoadedPage,
) -> (Vec<Chapter>, Vec<String>) {
    let toc = &source.toc;
    let base = page.url.as_str();

    let chapters = rules
        .elements(&page.text, list_rule, base)
        .iter()
        .filter_map(|node| {
            let title = field(rules, node, &toc.chapter_name, base);
            let url = url_field(rules, node, &toc.chapter_url, base);
            let is_volume = is_truthy(&field(rules, node, &toc.is_volume, base));
            if title.is_empty() || (url.is_empty() && !is_volume) {
                return None;
            }
            Some(Chapter {
                title,
                url,
                index: 0,
                is_volume,
            })
        })
        .collect();

    let next = if toc.next_toc_url.trim().is_empty() {
        Vec::new()
    } else {
        rules
            .texts(&page.node(), &toc.next_toc_url, base)
            .iter()
            .flat_map(|text| text.lines())
            .map(|link| absolute_url(base, link))
            .filter(|link| !link.is_empty() && *link != page.url)
            .collect()
    };

    (chapters, next)
}

fn extract_content(
    rules: &RuleInterpreter,
    body_rule: &str,
    next_rule: &str,
    page: &LoadedPage,
) -> (String, Option<String>) {
    let document = page.node();
    let body = rules.markup(&document, body_rule, &page.url);
    let next = if next_rule.is_empty() {
        None
    } else {
        non_empty(rules.url(&document, next_rule, &page.url))
    };
    (body, next)
}

fn is_truthy(value: &str) -> bool {
    !matches!(value.trim().to_ascii_lowercase().as_str(), "" | "false" | "0" | "null" | "no")
}
