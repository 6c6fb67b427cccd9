use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use bookrule::app::AppContext;
use bookrule::cli::{commands, Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so command output stays pipeable
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let ctx = AppContext::new(cli.workers)?;
    let sources = cli.sources.as_deref();

    match cli.command {
        Commands::Search { keyword } => {
            commands::search(&ctx, sources, &keyword).await?;
        }
        Commands::Sources { explore } => match explore {
            Some(source) => commands::list_explore(&ctx, sources, &source)?,
            None => commands::list_sources(&ctx, sources)?,
        },
        Commands::Explore {
            source,
            entry,
            page,
        } => {
            commands::explore(&ctx, sources, &source, &entry, page).await?;
        }
        Commands::Info { source, book_url } => {
            commands::book_info(&ctx, sources, &source, &book_url).await?;
        }
        Commands::Toc { source, book_url } => {
            commands::toc(&ctx, sources, &source, &book_url).await?;
        }
        Commands::Content {
            source,
            chapter_url,
            next,
        } => {
            commands::content(&ctx, sources, &source, &chapter_url, next.as_deref()).await?;
        }
    }

    Ok(())
}
