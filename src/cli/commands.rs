use std::path::Path;

use futures::StreamExt;

use crate::app::context::find_source;
use crate::app::{AppContext, Result};
use crate::domain::{Book, Source};

fn load_sources(ctx: &AppContext, path: Option<&Path>) -> Result<Vec<Source>> {
    let sources = ctx.load_sources(path)?;
    if sources.is_empty() {
        println!("No sources configured");
    }
    Ok(sources)
}

pub async fn search(ctx: &AppContext, sources_path: Option<&Path>, keyword: &str) -> Result<()> {
    let sources = load_sources(ctx, sources_path)?;
    let searchable = sources.iter().filter(|s| s.is_searchable()).count();
    if searchable == 0 {
        println!("No searchable sources");
        return Ok(());
    }

    println!(
        "Searching {} sources for \"{}\" ({} at a time)...",
        searchable,
        keyword,
        ctx.orchestrator.settings().workers
    );

    let mut stream = Box::pin(ctx.orchestrator.search(sources, keyword));
    let mut total = 0;
    while let Some(batch) = stream.next().await {
        println!("\n== {} ({} results)", batch.source_name, batch.books.len());
        for book in &batch.books {
            print_book_line(book);
        }
        total += batch.books.len();
    }

    println!("\n{} results", total);
    Ok(())
}

pub fn list_sources(ctx: &AppContext, sources_path: Option<&Path>) -> Result<()> {
    let sources = load_sources(ctx, sources_path)?;

    for source in &sources {
        let status = if source.enabled { " " } else { "x" };
        let group = source.group.as_deref().unwrap_or("");
        println!("[{}] {} - {} {}", status, source.display_name(), source.url, group);
    }

    Ok(())
}

pub fn list_explore(ctx: &AppContext, sources_path: Option<&Path>, source_url: &str) -> Result<()> {
    let sources = load_sources(ctx, sources_path)?;
    let source = find_source(&sources, source_url)?;

    let entries = source.explore_entries();
    if entries.is_empty() {
        println!("{} has no explore entries", source.display_name());
    }
    for entry in entries {
        println!("{}\t{}", entry.title, entry.url);
    }

    Ok(())
}

pub async fn explore(
    ctx: &AppContext,
    sources_path: Option<&Path>,
    source_url: &str,
    entry: &str,
    page: u32,
) -> Result<()> {
    let sources = load_sources(ctx, sources_path)?;
    let source = find_source(&sources, source_url)?;

    let books = ctx.orchestrator.explore(source, entry, page).await?;
    for book in &books {
        print_book_line(book);
    }
    println!("\n{} books", books.len());
    Ok(())
}

pub async fn book_info(
    ctx: &AppContext,
    sources_path: Option<&Path>,
    source_url: &str,
    book_url: &str,
) -> Result<()> {
    let sources = load_sources(ctx, sources_path)?;
    let source = find_source(&sources, source_url)?;

    let book = Book::new(&source.url, book_url, "");
    let book = ctx.orchestrator.book_info(source, &book).await?;

    println!("Name:    {}", book.name);
    println!("Author:  {}", book.display_author());
    if let Some(kind) = &book.kind {
        println!("Kind:    {}", kind);
    }
    if let Some(latest) = &book.latest_chapter {
        println!("Latest:  {}", latest);
    }
    if let Some(cover) = &book.cover_url {
        println!("Cover:   {}", cover);
    }
    println!("TOC:     {}", book.toc_url());
    if let Some(intro) = &book.intro {
        println!("\n{}", intro);
    }
    Ok(())
}

pub async fn toc(
    ctx: &AppContext,
    sources_path: Option<&Path>,
    source_url: &str,
    book_url: &str,
) -> Result<()> {
    let sources = load_sources(ctx, sources_path)?;
    let source = find_source(&sources, source_url)?;

    let book = Book::new(&source.url, book_url, "");
    let book = ctx.orchestrator.book_info(source, &book).await?;
    let chapters = ctx.orchestrator.chapter_list(source, &book).await?;

    for chapter in &chapters {
        if chapter.is_volume {
            println!("== {}", chapter.title);
        } else {
            println!("{:>5}  {}  {}", chapter.index, chapter.title, chapter.url);
        }
    }
    println!("\n{} chapters", chapters.len());
    Ok(())
}

pub async fn content(
    ctx: &AppContext,
    sources_path: Option<&Path>,
    source_url: &str,
    chapter_url: &str,
    next: Option<&str>,
) -> Result<()> {
    let sources = load_sources(ctx, sources_path)?;
    let source = find_source(&sources, source_url)?;

    let content = ctx.orchestrator.content(source, chapter_url, next).await;
    if content.text.is_empty() {
        println!("No content found at {}", chapter_url);
    } else {
        println!("{}", content.text);
    }
    Ok(())
}

fn print_book_line(book: &Book) {
    println!("  {} / {}  {}", book.name, book.display_author(), book.book_url);
}
