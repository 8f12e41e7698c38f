//! `namesync cursor show|reset`

use anyhow::{Context, Result};

use namesync_core::CursorStore;
use namesync_storage::SqliteStore;

use crate::StoreArgs;

async fn open(args: &StoreArgs) -> Result<SqliteStore> {
    SqliteStore::open(&args.db)
        .await
        .with_context(|| format!("opening {}", args.db))
}

pub async fn show(args: &StoreArgs) -> Result<()> {
    let store = open(args).await?;
    match store.load_cursor(&args.sync_id).await? {
        Some(cursor) => println!("{}", serde_json::to_string_pretty(&cursor)?),
        None => println!("no cursor stored for '{}'", args.sync_id),
    }
    println!("names in mirror: {}", store.name_count().await?);
    Ok(())
}

pub async fn reset(args: &StoreArgs) -> Result<()> {
    let store = open(args).await?;
    store.delete_cursor(&args.sync_id).await?;
    println!("cursor '{}' deleted; the next run starts from --start-block", args.sync_id);
    Ok(())
}
