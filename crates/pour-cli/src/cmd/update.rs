//! Update command

use anyhow::{Context, Result};
use pour_core::Installer;

/// Re-download the formula index into the cache.
pub async fn update(installer: &Installer) -> Result<()> {
    let path = installer
        .registry()
        .download_index()
        .await
        .context("Failed to download the formula index")?;
    println!("Updated {}", path.display());
    Ok(())
}
