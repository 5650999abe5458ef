/// # sidekick CLI
///
/// Command parsing and glue for the `sidekick` binary. Sync, conversion,
/// rendering and storage all live in `sidekick-core`; this module only
/// loads configuration, wires the real HTTP clients and reports outcomes.
///
/// - For command-line users: `sidekick --help`.
/// - For programmatic/integration use: call [`run`] with a constructed [`Cli`].
use crate::load_config::{load_config, CliConfig, API_KEY_ENV};
use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use sidekick_core::attachment::MediaStorage;
use sidekick_core::client::{HttpMediaFetcher, NotionClient};
use sidekick_core::collections::{preset, sync_all};
use sidekick_core::model::{schema_for, LocalRecord, LocalValue, ModelSchema, SUBSCRIBER};
use sidekick_core::render::{render_blocks, HtmlTemplates};
use sidekick_core::store::{self, OwnerRef, Store};
use sidekick_core::sync::push;
use std::path::PathBuf;

/// CLI for sidekick: mirror Notion databases into SQLite and render them.
#[derive(Parser)]
#[clap(
    name = "sidekick",
    version,
    about = "Sync Notion databases into a local SQLite store and render their content"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sync configured collections from Notion into the local database
    Sync {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Only sync this collection (e.g. newsletter.Post)
        #[clap(long)]
        collection: Option<String>,
    },
    /// Push one local record back to its Notion database
    Push {
        #[clap(long)]
        config: PathBuf,
        #[clap(long)]
        collection: String,
        /// Local primary key of the record
        #[clap(long)]
        pk: i64,
    },
    /// Render a record's content blocks as HTML to stdout
    Render {
        #[clap(long)]
        config: PathBuf,
        #[clap(long)]
        collection: String,
        #[clap(long)]
        pk: i64,
        /// Plain markup without wrapper divs or decorations
        #[clap(long)]
        simple: bool,
    },
    /// Create a subscriber locally and push it to Notion
    AddSubscriber {
        #[clap(long)]
        config: PathBuf,
        #[clap(long)]
        email: String,
        #[clap(long)]
        name: Option<String>,
        /// Tag the subscriber does not want to receive (repeatable)
        #[clap(long = "exclude-tag")]
        exclude_tags: Vec<String>,
        /// Skip pushing the new subscriber to Notion
        #[clap(long)]
        local_only: bool,
    },
    /// Register a local user so posts they author can be synced
    AddUser {
        #[clap(long)]
        config: PathBuf,
        #[clap(long)]
        email: String,
        #[clap(long)]
        name: Option<String>,
    },
}

fn open_store(config: &CliConfig) -> Result<Store> {
    Store::open(&config.database)
        .with_context(|| format!("Failed to open database {:?}", config.database))
}

fn notion_client(config: &CliConfig) -> Result<NotionClient> {
    if config.notion.api_key.is_empty() {
        bail!("{API_KEY_ENV} must be set to reach Notion");
    }
    Ok(NotionClient::new(config.notion.api_key.clone()))
}

fn schema(collection: &str) -> Result<&'static ModelSchema> {
    schema_for(collection).with_context(|| format!("Unknown collection '{collection}'"))
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Sync { config, collection } => {
            let config = load_config(config)?;
            let api = notion_client(&config)?;
            let mut store = open_store(&config)?;
            let storage = MediaStorage::new(&config.media_root);
            let fetcher = HttpMediaFetcher::new();
            tracing::info!(command = "sync", "Starting synchronisation");

            let reports = match collection {
                Some(collection) => vec![
                    preset(&collection)?
                        .sync(&api, &mut store, &config.notion, &storage, &fetcher)
                        .await?,
                ],
                None => sync_all(&api, &mut store, &config.notion, &storage, &fetcher).await?,
            };
            for report in &reports {
                println!(
                    "{}: {} synced, {} pruned",
                    report.collection,
                    report.synced.len(),
                    report.pruned
                );
            }
            tracing::info!(command = "sync", collections = reports.len(), "Synchronisation complete");
            Ok(())
        }
        Commands::Push {
            config,
            collection,
            pk,
        } => {
            let config = load_config(config)?;
            let api = notion_client(&config)?;
            let store = open_store(&config)?;
            let notion_id = push(&api, &store, &config.notion, schema(&collection)?, pk).await?;
            println!("{collection} {pk} -> {notion_id}");
            Ok(())
        }
        Commands::Render {
            config,
            collection,
            pk,
            simple,
        } => {
            let config = load_config(config)?;
            let schema = schema(&collection)?;
            if !schema.has_blocks {
                bail!("Collection '{collection}' has no content blocks");
            }
            let store = open_store(&config)?;
            // Fails with a clear error when the record does not exist.
            store.load_record(schema, pk)?;
            let blocks = store.blocks_for(OwnerRef::new(schema, pk))?;
            let templates = HtmlTemplates::new(config.media_url.clone());
            println!("{}", render_blocks(&blocks, &templates, simple)?);
            Ok(())
        }
        Commands::AddSubscriber {
            config,
            email,
            name,
            exclude_tags,
            local_only,
        } => {
            let config = load_config(config)?;
            let mut store = open_store(&config)?;

            let mut record = LocalRecord::new(None);
            record.set("email", LocalValue::Text(email.clone()));
            record.set("name", name.map_or(LocalValue::Null, LocalValue::Text));
            record.set("subscribed", LocalValue::DateTime(Utc::now()));

            let tx = store.transaction()?;
            store::full_clean(&tx, &SUBSCRIBER, &record)?;
            let pk = store::save_record(&tx, &SUBSCRIBER, &mut record)?;
            if let Some(field) = SUBSCRIBER.field("excluded_tags") {
                store::set_relation(&tx, field, pk, &LocalValue::Names(exclude_tags))?;
            }
            tx.commit()?;
            tracing::info!(pk, email = %email, "Subscriber created");

            if local_only {
                println!("subscriber {pk} created");
                return Ok(());
            }
            let api = notion_client(&config)?;
            let notion_id = push(&api, &store, &config.notion, &SUBSCRIBER, pk).await?;
            println!("subscriber {pk} created -> {notion_id}");
            Ok(())
        }
        Commands::AddUser {
            config,
            email,
            name,
        } => {
            let config = load_config(config)?;
            let store = open_store(&config)?;
            let pk = store.create_user(&email, name.as_deref())?;
            println!("user {pk} created");
            Ok(())
        }
    }
}
