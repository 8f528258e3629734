//! Deps command

use anyhow::{Context, Result};
use pour_core::{Installer, ResolveStrategy};

/// Print the install set of `name`, marking formulae already in the cellar.
pub async fn deps(installer: &Installer, name: &str, strategy: ResolveStrategy) -> Result<()> {
    let set = installer
        .resolve(name, strategy)
        .await
        .with_context(|| format!("Failed to resolve {name}"))?;

    for formula in &set {
        let mark = if installer.is_installed(&formula.name) {
            " (installed)"
        } else {
            ""
        };
        println!("{} {}{mark}", formula.name, formula.annotated_version());
    }
    Ok(())
}
