use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use listing_desk::config::{self, StoreConfig};
use listing_desk::gateways::{
    rest, BlobGateway, MemoryBlobStore, MemoryRecordStore, RecordGateway, RestBlobGateway,
    RestRecordGateway,
};
use listing_desk::models::{AttachmentId, ListingId, StagedFile};
use listing_desk::{EditRequest, ImageStager, ListingForm, SubmissionOrchestrator};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "listing-desk")]
#[command(about = "Create and edit property listings with photos")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a listing from a JSON form
    Create {
        /// JSON file holding the listing form
        form: PathBuf,
        /// Photos, in display order
        images: Vec<PathBuf>,
    },
    /// Edit one of your listings
    Edit {
        listing_id: String,
        /// JSON file holding the listing form
        form: PathBuf,
        /// Attachment to delete (repeatable)
        #[arg(long = "remove", value_name = "ATTACHMENT_ID")]
        remove: Vec<String>,
        /// New photos, appended after the remaining ones
        images: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let auth = config::auth_from_env()?;
    let (records, blobs) = gateways()?;
    let orchestrator = SubmissionOrchestrator::new(records.clone(), blobs);

    let mut progress = orchestrator.subscribe();
    tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            info!("Submission state: {:?}", *progress.borrow());
        }
    });

    let report = match cli.command {
        Commands::Create { form, images } => {
            let form = read_form(&form).await?;
            let mut stager = ImageStager::new();
            stager.stage(read_images(&images).await?).await?;
            orchestrator.create(&auth, &form, stager.take()).await?
        }
        Commands::Edit {
            listing_id,
            form,
            remove,
            images,
        } => {
            let listing_id = ListingId(listing_id);
            let existing = records
                .fetch_listing(&listing_id, &auth.user_id)
                .await?
                .map(|l| l.images.len())
                .unwrap_or(0);

            let mut stager = ImageStager::for_existing(existing.saturating_sub(remove.len()));
            stager.stage(read_images(&images).await?).await?;

            let request = EditRequest {
                listing_id,
                form: read_form(&form).await?,
                remove: remove.into_iter().map(AttachmentId).collect(),
                files: stager.take(),
            };
            orchestrator.edit(&auth, request).await?
        }
    };

    if report.is_partial() {
        warn!(
            "Listing {} saved, but {} photo(s) and {} removal step(s) failed",
            report.listing_id,
            report.failures.len(),
            report.removal_failures.len()
        );
        for key in report.orphaned_blobs() {
            warn!("Orphaned blob left in storage: {}", key);
        }
    } else {
        info!("✅ Listing {} saved", report.listing_id);
    }

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn gateways() -> Result<(Arc<dyn RecordGateway>, Arc<dyn BlobGateway>)> {
    match StoreConfig::from_env()? {
        Some(config) => {
            info!("Using remote stores at {}", config.base_url);
            let client = rest::build_client(&config)?;
            Ok((
                Arc::new(RestRecordGateway::new(client.clone(), config.clone())),
                Arc::new(RestBlobGateway::new(client, config)),
            ))
        }
        None => {
            warn!("LISTING_STORE_URL not set, using in-memory stores");
            Ok((
                Arc::new(MemoryRecordStore::new()),
                Arc::new(MemoryBlobStore::default()),
            ))
        }
    }
}

async fn read_form(path: &Path) -> Result<ListingForm> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid listing form in {}", path.display()))
}

async fn read_images(paths: &[PathBuf]) -> Result<Vec<StagedFile>> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read image {}", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        files.push(StagedFile::new(name, bytes));
    }
    Ok(files)
}
