//! Install command

use anyhow::{Context, Result};
use pour_core::{InstallOptions, Installer, ResolveStrategy, SchedulePolicy};

/// Install `name` and print what ended up in the cellar.
pub async fn install(
    installer: &Installer,
    name: &str,
    schedule: SchedulePolicy,
    strategy: ResolveStrategy,
) -> Result<()> {
    let options = InstallOptions { schedule, strategy };
    let report = installer
        .install(name, options)
        .await
        .with_context(|| format!("Failed to install {name}"))?;

    for skipped in &report.skipped {
        println!("  {skipped:<24} already installed");
    }
    for unit in &report.installed {
        match &unit.path {
            Some(path) => println!("  {:<24} {} -> {}", unit.name, unit.version, path.display()),
            None => println!("  {:<24} {} (not unpacked)", unit.name, unit.version),
        }
    }
    println!(
        "Installed {} formulae in {:.1}s",
        report.installed.len(),
        report.elapsed.as_secs_f64()
    );
    Ok(())
}
