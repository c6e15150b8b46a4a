use std::env;

use anyhow::{bail, Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use tracing_subscriber::EnvFilter;

use docshare::{
    config::AppConfig,
    db,
    documents::purge_trashed_before,
    storage::{ObjectStorage, S3Storage},
};

const USAGE: &str = "Usage: maintenance purge-trashed <days>";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let mut args = env::args().skip(1);
    match args.next().as_deref() {
        Some("purge-trashed") => {
            let days = parse_days(args.next().as_deref())?;
            purge_trashed(days).await?;
        }
        Some(cmd) => {
            eprintln!("Unknown command: {cmd}\n{USAGE}");
            std::process::exit(1);
        }
        None => {
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    }

    Ok(())
}

fn parse_days(value: Option<&str>) -> Result<i64> {
    let Some(value) = value else {
        bail!("missing <days>\n{USAGE}");
    };
    let days: i64 = value
        .parse()
        .with_context(|| format!("<days> must be a whole number, got '{value}'"))?;
    if days < 0 {
        bail!("<days> must not be negative");
    }
    Ok(days)
}

async fn purge_trashed(days: i64) -> Result<()> {
    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "maintenance",
        database_url = %config.redacted_database_url(),
        s3_bucket = %config.s3_bucket,
        days,
        "purging trashed documents"
    );
    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    let storage = S3Storage::connect(&config).await?;

    let cutoff = (Utc::now() - ChronoDuration::days(days)).naive_utc();
    let purged = {
        let mut conn = pool.get().context("failed to get database connection")?;
        purge_trashed_before(&mut conn, cutoff).context("failed to purge trashed documents")?
    };

    if purged.is_empty() {
        println!("No trashed documents older than {days} day(s).");
        return Ok(());
    }

    for document in &purged {
        if let Err(err) = storage.delete_object(&document.file_id).await {
            eprintln!(
                "Failed to delete object {} for document {}: {err}",
                document.file_id, document.id
            );
        }
    }

    println!("Purged {} document(s).", purged.len());
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
