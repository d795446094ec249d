// src/commands.rs

//! Command implementations behind the CLI definitions.

use crate::client::{AddOptions, Client};
use crate::settings::Settings;
use crate::source::Source;
use anyhow::{Context, Result};
use std::path::Path;

fn client(insecure_skip_tls_verify: bool) -> Result<Client> {
    let mut settings = Settings::from_env();
    settings.insecure_skip_tls_verify = insecure_skip_tls_verify;
    Ok(Client::new(settings)?)
}

/// `kpkg add <SOURCE>...`
pub fn add(sources: &[String], path: &str, insecure_skip_tls_verify: bool) -> Result<()> {
    let client = client(insecure_skip_tls_verify)?;
    let mut pkg = client
        .load(Path::new(path))
        .with_context(|| format!("loading package at '{path}'"))?;

    let mut options = AddOptions::new();
    for source in sources {
        // "name:version" is shorthand for the default registry.
        if !source.contains("://") && !Path::new(source).exists() {
            if let Some((name, version)) = source.split_once(':') {
                options = options.with_package(name, version);
                continue;
            }
        }
        options = options.with_source(Source::from_url(source)?);
    }

    client.add(&mut pkg, options)?;
    println!("added {} dependencies", pkg.mod_file.deps.len());
    Ok(())
}

/// `kpkg update`
pub fn update(path: &str, no_sum_check: bool, insecure_skip_tls_verify: bool) -> Result<()> {
    let client = client(insecure_skip_tls_verify)?;
    let mut pkg = client
        .load(Path::new(path))
        .with_context(|| format!("loading package at '{path}'"))?;
    pkg.no_sum_check = no_sum_check;

    client.update(&mut pkg)?;
    println!("resolved {} dependencies", pkg.lock_deps.len());
    Ok(())
}

/// `kpkg vendor`
pub fn vendor(path: &str, insecure_skip_tls_verify: bool) -> Result<()> {
    let client = client(insecure_skip_tls_verify)?;
    let mut pkg = client
        .load(Path::new(path))
        .with_context(|| format!("loading package at '{path}'"))?;

    client.vendor_deps(&mut pkg)?;
    println!(
        "vendored {} dependencies into '{}'",
        pkg.lock_deps.len(),
        pkg.vendor_path().display()
    );
    Ok(())
}

/// `kpkg cache-clean [SOURCE]`
pub fn cache_clean(source: Option<&str>, insecure_skip_tls_verify: bool) -> Result<()> {
    let client = client(insecure_skip_tls_verify)?;
    match source {
        Some(url) => {
            let source = Source::from_url(url)?;
            client.cache().remove(&source)?;
            println!("evicted '{url}'");
        }
        None => {
            client.cache().remove_all()?;
            println!(
                "removed cache root '{}'",
                client.settings().home_path.display()
            );
        }
    }
    Ok(())
}
