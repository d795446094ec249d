// src/cli.rs

//! CLI definitions for the kpkg package manager
//!
//! This module contains the command-line interface definitions using
//! clap. The command implementations live in the `commands` module.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "kpkg")]
#[command(version)]
#[command(about = "Dependency manager for KCL packages", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Skip TLS certificate verification on remote fetches
    #[arg(long, global = true)]
    pub insecure_skip_tls_verify: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Add dependencies to the package in the current directory
    Add {
        /// Dependency sources: oci:// urls, git+ urls, paths, archives,
        /// or name:version against the default registry
        #[arg(required = true)]
        sources: Vec<String>,

        /// Package directory
        #[arg(long, default_value = ".")]
        path: String,
    },

    /// Resolve the dependency graph and rewrite kcl.mod / kcl.mod.lock
    Update {
        /// Package directory
        #[arg(long, default_value = ".")]
        path: String,

        /// Do not compute or verify content sums, and leave the
        /// lockfile untouched
        #[arg(long)]
        no_sum_check: bool,
    },

    /// Materialize all resolved dependencies under ./vendor
    Vendor {
        /// Package directory
        #[arg(long, default_value = ".")]
        path: String,
    },

    /// Remove fetched packages from the cache
    CacheClean {
        /// A single source url to evict; the whole cache when omitted
        source: Option<String>,
    },
}
