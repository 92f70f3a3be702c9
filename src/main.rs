use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use ebook_hub::config::CatalogConfig;
use ebook_hub::db::memory::InMemoryStore;
use ebook_hub::db::repository::CatalogRepository;
use ebook_hub::db::store::DocumentStore;
use ebook_hub::demo_seeder::seed_demo_catalog;
use ebook_hub::mirror::cache::DocumentCache;
use ebook_hub::search::catalog::CatalogSearch;
use ebook_hub::search::query::{FilterChange, SortOrder};

#[derive(Parser, Debug)]
#[command(name = "ebook-hub")]
#[command(about = "Browse and seed the Ebook Hub catalog")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load the demo catalog into the configured store
    Seed,
    /// Search the catalog
    Search {
        /// Text matched against titles and descriptions
        term: Option<String>,
        /// Only documents of this major id
        #[arg(long)]
        major: Option<String>,
        /// Only documents carrying any of these tag ids
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// newest or oldest
        #[arg(long, default_value = "newest")]
        sort: String,
        /// Number of pages to load
        #[arg(long, default_value_t = 1)]
        pages: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ebook_hub=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = CatalogConfig::load().context("Failed to load configuration")?;
    let (store, in_memory) = open_store(&config).await?;
    let repo = CatalogRepository::new(store);

    match cli.command {
        Command::Seed => {
            let report = seed_demo_catalog(&repo).await?;
            println!(
                "Created {} majors, {} tags, {} documents",
                report.majors, report.tags, report.documents
            );
            if in_memory {
                tracing::warn!("No MongoDB configured; the seeded catalog is discarded on exit");
            }
        }
        Command::Search {
            term,
            major,
            tags,
            sort,
            pages,
        } => {
            if in_memory {
                seed_demo_catalog(&repo).await?;
            }

            let search = CatalogSearch::new(repo, DocumentCache::new(), &config);
            search.load_filter_options().await?;
            search.set_filter(FilterChange::Major(major)).await?;
            search.set_filter(FilterChange::Tags(tags)).await?;
            search
                .set_filter(FilterChange::Sort(SortOrder::parse(&sort)))
                .await?;
            search.submit(term.unwrap_or_default()).await?;
            for _ in 1..pages {
                search.load_more().await?;
            }

            let view = search.view();
            for doc in &view.documents {
                let major = view
                    .majors
                    .iter()
                    .find(|m| m.id == doc.major)
                    .map_or(doc.major.as_str(), |m| m.name.as_str());
                println!(
                    "{}  {:<45} [{}]  {}",
                    doc.created_at.format("%Y-%m-%d"),
                    doc.title,
                    major,
                    doc.document_link
                );
            }
            println!(
                "{} documents{}",
                view.documents.len(),
                if view.has_more { ", more available" } else { "" }
            );
        }
    }

    Ok(())
}

async fn open_store(config: &CatalogConfig) -> anyhow::Result<(Arc<dyn DocumentStore>, bool)> {
    #[cfg(feature = "mongo")]
    {
        if let Some(uri) = &config.mongodb_uri {
            let store = ebook_hub::db::mongo::MongoStore::connect(
                uri,
                &config.mongodb_database,
                config.batch_width,
            )
            .await
            .context("Failed to connect to MongoDB")?;
            tracing::info!("Connected to MongoDB database {}", config.mongodb_database);
            return Ok((Arc::new(store), false));
        }
    }

    #[cfg(not(feature = "mongo"))]
    {
        if config.mongodb_uri.is_some() {
            tracing::warn!("MongoDB URI ignored: built without the `mongo` feature");
        }
    }

    Ok((Arc::new(InMemoryStore::with_batch_width(config.batch_width)), true))
}
