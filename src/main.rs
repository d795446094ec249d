// src/main.rs

//! kpkg - dependency manager for KCL packages, CLI entry point

use anyhow::Result;
use clap::Parser;
use kpkg::cli::{Cli, Commands};
use kpkg::commands;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("KPKG_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let insecure = cli.insecure_skip_tls_verify;

    match cli.command {
        Commands::Add { sources, path } => commands::add(&sources, &path, insecure),
        Commands::Update { path, no_sum_check } => commands::update(&path, no_sum_check, insecure),
        Commands::Vendor { path } => commands::vendor(&path, insecure),
        Commands::CacheClean { source } => commands::cache_clean(source.as_deref(), insecure),
    }
}
