// src/settings.rs

//! Runtime configuration for the dependency core
//!
//! Settings are plain data threaded through constructors; nothing here is
//! process-global. The CLI builds one value at startup from flags and
//! environment variables, tests build their own pointing at temp dirs.

use std::env;
use std::path::PathBuf;

/// Environment variable overriding the package home directory.
pub const ENV_HOME: &str = "KPKG_HOME";
/// Environment variable overriding the default OCI registry host.
pub const ENV_DEFAULT_OCI_REGISTRY: &str = "KPKG_DEFAULT_OCI_REGISTRY";
/// Environment variable overriding the default OCI repository prefix.
pub const ENV_DEFAULT_OCI_REPO: &str = "KPKG_DEFAULT_OCI_REPO";

const DEFAULT_OCI_REGISTRY: &str = "ghcr.io";
const DEFAULT_OCI_REPO: &str = "kcl-lang";

/// Shared configuration consumed by the loader, downloader, and cache.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Registry host substituted into dependencies that omit one.
    pub default_oci_registry: String,
    /// Repository prefix joined with the dependency name.
    pub default_oci_repo: String,
    /// Root of the package cache (`<home>/<full_name>` slots).
    pub home_path: PathBuf,
    /// Disable TLS certificate verification on remote fetches.
    pub insecure_skip_tls_verify: bool,
}

impl Settings {
    /// Build settings from the environment, falling back to
    /// `ghcr.io/kcl-lang` and `~/.kpkg` defaults.
    pub fn from_env() -> Self {
        let home_path = env::var_os(ENV_HOME)
            .map(PathBuf::from)
            .unwrap_or_else(default_home);

        Settings {
            default_oci_registry: env::var(ENV_DEFAULT_OCI_REGISTRY)
                .unwrap_or_else(|_| DEFAULT_OCI_REGISTRY.to_string()),
            default_oci_repo: env::var(ENV_DEFAULT_OCI_REPO)
                .unwrap_or_else(|_| DEFAULT_OCI_REPO.to_string()),
            home_path,
            insecure_skip_tls_verify: false,
        }
    }

    /// Settings rooted at an explicit home directory, with registry
    /// defaults. The form tests and embedders use.
    pub fn with_home(home_path: impl Into<PathBuf>) -> Self {
        Settings {
            default_oci_registry: DEFAULT_OCI_REGISTRY.to_string(),
            default_oci_repo: DEFAULT_OCI_REPO.to_string(),
            home_path: home_path.into(),
            insecure_skip_tls_verify: false,
        }
    }

    /// Join the default repo prefix with a package name, normalizing
    /// duplicate slashes.
    pub fn default_repo_for(&self, name: &str) -> String {
        format!(
            "{}/{}",
            self.default_oci_repo.trim_end_matches('/'),
            name.trim_start_matches('/')
        )
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings::from_env()
    }
}

fn default_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".kpkg")
}
