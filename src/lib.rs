// src/lib.rs

//! kpkg - dependency-management core for KCL packages
//!
//! Given a package manifest (`kcl.mod`) declaring direct dependencies,
//! kpkg resolves a complete, reproducible dependency set, fetches content
//! from heterogeneous sources (OCI registries, git trees, local paths,
//! local archives, virtual directories), verifies integrity against
//! canonical directory hashes, records the resolved graph in
//! `kcl.mod.lock`, and can materialize a self-contained vendor tree.
//!
//! # Architecture
//!
//! - Sources: one tagged variant describes where a package lives
//! - Visitors: a single `visit(source, callback)` entry point normalizes
//!   access across storage kinds
//! - Cache: content-addressed, process-safe, single producer per key
//! - MVS: version conflicts keep the semver-greater candidate, ties
//!   keep the incumbent
//! - Vendor: flat `vendor/<name>_<version>` snapshot of the graph

pub mod archive;
pub mod cache;
pub mod cli;
pub mod client;
pub mod commands;
pub mod deps;
mod error;
pub mod download;
pub mod fsutil;
pub mod hash;
pub mod lockfile;
pub mod manifest;
pub mod pkg;
pub mod settings;
pub mod source;
pub mod visitor;

pub use cache::PkgCache;
pub use client::{AddOptions, Client};
pub use deps::{full_name_of, DepStore, Dependency};
pub use error::{Error, Result};
pub use lockfile::{LockFile, LockedDep, MOD_LOCK_FILE};
pub use manifest::{ModFile, MOD_FILE};
pub use pkg::{load_package, Package};
pub use settings::Settings;
pub use source::{Remote, Source};
