//! Info command

use anyhow::{Context, Result};
use pour_core::Installer;
use pour_schema::Formula;

/// Show a formula from the cached index, or from the API with `remote`.
pub async fn info(installer: &Installer, name: &str, remote: bool) -> Result<()> {
    let formula = if remote {
        installer
            .registry()
            .fetch_formula(name)
            .await
            .with_context(|| format!("Failed to fetch {name}"))?
    } else {
        let mut found = installer
            .resolver()
            .await?
            .locate(vec![name.to_string()])
            .await
            .with_context(|| format!("Formula '{name}' not found"))?;
        found.swap_remove(0)
    };

    print_formula(installer, &formula);
    Ok(())
}

fn print_formula(installer: &Installer, formula: &Formula) {
    let lw = 12;
    println!();
    println!("  {} {}", formula.name, formula.annotated_version());
    if let Some(desc) = &formula.desc {
        println!("  {desc}");
    }
    println!();

    if !formula.dependencies.is_empty() {
        println!("  {:<lw$}{}", "requires", formula.dependencies.join(", "));
    }
    let tag = &installer.platform().bottle_tag;
    match formula.bottle_for(tag) {
        Some(file) => println!("  {:<lw$}{} ({tag})", "bottle", file.url),
        None => println!("  {:<lw$}none for {tag}", "bottle"),
    }
    let status = if installer.is_installed(&formula.name) {
        "installed"
    } else {
        "not installed"
    };
    println!("  {:<lw$}{status}", "status");
    println!();
}
