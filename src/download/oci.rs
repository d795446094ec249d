// src/download/oci.rs

//! OCI artifact pull
//!
//! Implements the minimal slice of the distribution API the cache needs:
//! anonymous bearer-token negotiation, manifest GET, and a single
//! tar-layer blob GET verified against its digest and extracted into the
//! destination directory.

use super::{classify_status, DownloadClient};
use crate::archive::{self, ArchiveKind};
use crate::error::{Error, Result};
use crate::hash;
use crate::source::OciSource;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Instant;
use tracing::debug;

const MANIFEST_ACCEPT: &str = "application/vnd.oci.image.manifest.v1+json, \
     application/vnd.docker.distribution.manifest.v2+json";

#[derive(Debug, Deserialize)]
struct OciManifest {
    #[serde(default)]
    layers: Vec<OciDescriptor>,
}

#[derive(Debug, Deserialize)]
struct OciDescriptor {
    #[serde(rename = "mediaType", default)]
    media_type: String,
    digest: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Vec<String>,
}

/// Pull the artifact `reg/repo:tag` into `dest`.
pub fn pull(
    client: &DownloadClient,
    oci: &OciSource,
    dest: &Path,
    deadline: Option<Instant>,
) -> Result<()> {
    if oci.tag.is_empty() {
        return Err(Error::UnsupportedSource(format!(
            "oci://{}/{}: no tag to pull",
            oci.reg, oci.repo
        )));
    }

    let token = client.with_retry(deadline, || authenticate(client, oci))?;
    let manifest = client.with_retry(deadline, || fetch_manifest(client, oci, token.as_deref()))?;

    let layer = manifest
        .layers
        .iter()
        .find(|l| l.media_type.contains("tar"))
        .ok_or_else(|| {
            Error::NotFound(format!(
                "oci://{}/{}:{} has no package layer",
                oci.reg, oci.repo, oci.tag
            ))
        })?;

    let blob_path = dest.join(".layer.blob");
    client.with_retry(deadline, || {
        fetch_blob(client, oci, &layer.digest, token.as_deref(), &blob_path)
    })?;

    let kind = if is_gzip(&blob_path)? {
        ArchiveKind::Tgz
    } else {
        ArchiveKind::Tar
    };
    archive::extract(&blob_path, kind, dest)?;
    fs::remove_file(&blob_path)?;

    Ok(())
}

/// List the tags published for `reg/repo`.
pub fn list_tags(
    client: &DownloadClient,
    oci: &OciSource,
    deadline: Option<Instant>,
) -> Result<Vec<String>> {
    let token = client.with_retry(deadline, || authenticate(client, oci))?;
    let url = format!("https://{}/v2/{}/tags/list", oci.reg, oci.repo);

    client.with_retry(deadline, || {
        let mut request = client.http().get(&url);
        if let Some(token) = token.as_deref() {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .map_err(|e| Error::NetworkFailure(format!("{url}: {e}")))?;
        if !response.status().is_success() {
            return Err(classify_status(response.status(), &url));
        }
        let tags: TagList = response
            .json()
            .map_err(|e| Error::NetworkFailure(format!("{url}: bad tag list: {e}")))?;
        Ok(tags.tags)
    })
}

/// Probe the registry; on a bearer challenge, fetch an anonymous pull
/// token for the repository.
fn authenticate(client: &DownloadClient, oci: &OciSource) -> Result<Option<String>> {
    let probe_url = format!("https://{}/v2/", oci.reg);
    let response = client
        .http()
        .get(&probe_url)
        .send()
        .map_err(|e| Error::NetworkFailure(format!("{probe_url}: {e}")))?;

    if response.status() != reqwest::StatusCode::UNAUTHORIZED {
        return Ok(None);
    }

    let challenge = response
        .headers()
        .get("www-authenticate")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_default();
    let (realm, service) = match parse_bearer_challenge(&challenge) {
        Some(parts) => parts,
        None => return Err(Error::AuthFailure(probe_url)),
    };

    let token_url = format!(
        "{realm}?service={service}&scope=repository:{}:pull",
        oci.repo
    );
    debug!("requesting anonymous pull token from {token_url}");
    let response = client
        .http()
        .get(&token_url)
        .send()
        .map_err(|e| Error::NetworkFailure(format!("{token_url}: {e}")))?;
    if !response.status().is_success() {
        return Err(classify_status(response.status(), &token_url));
    }

    let token: TokenResponse = response
        .json()
        .map_err(|e| Error::NetworkFailure(format!("{token_url}: bad token response: {e}")))?;
    Ok(token.token.or(token.access_token))
}

fn fetch_manifest(
    client: &DownloadClient,
    oci: &OciSource,
    token: Option<&str>,
) -> Result<OciManifest> {
    let url = format!(
        "https://{}/v2/{}/manifests/{}",
        oci.reg, oci.repo, oci.tag
    );
    let mut request = client.http().get(&url).header("Accept", MANIFEST_ACCEPT);
    if let Some(token) = token {
        request = request.bearer_auth(token);
    }

    let response = request
        .send()
        .map_err(|e| Error::NetworkFailure(format!("{url}: {e}")))?;
    if !response.status().is_success() {
        return Err(classify_status(response.status(), &url));
    }

    response
        .json()
        .map_err(|e| Error::NetworkFailure(format!("{url}: bad manifest: {e}")))
}

fn fetch_blob(
    client: &DownloadClient,
    oci: &OciSource,
    digest: &str,
    token: Option<&str>,
    dest: &Path,
) -> Result<()> {
    let url = format!("https://{}/v2/{}/blobs/{digest}", oci.reg, oci.repo);
    let mut request = client.http().get(&url);
    if let Some(token) = token {
        request = request.bearer_auth(token);
    }

    let mut response = request
        .send()
        .map_err(|e| Error::NetworkFailure(format!("{url}: {e}")))?;
    if !response.status().is_success() {
        return Err(classify_status(response.status(), &url));
    }

    let mut file = fs::File::create(dest)?;
    std::io::copy(&mut response, &mut file)
        .map_err(|e| Error::NetworkFailure(format!("{url}: {e}")))?;

    // The registry advertised the digest; the content must match it.
    if let Some(expected) = digest.strip_prefix("sha256:") {
        let actual = hash::sha256_file(dest)?;
        if actual != expected {
            return Err(Error::ChecksumMismatch {
                name: oci.repo.clone(),
                expected: expected.to_string(),
                actual,
            });
        }
    }

    Ok(())
}

fn parse_bearer_challenge(header: &str) -> Option<(String, String)> {
    let rest = header.strip_prefix("Bearer ")?;
    let mut realm = None;
    let mut service = None;
    for part in rest.split(',') {
        let (key, value) = part.trim().split_once('=')?;
        let value = value.trim_matches('"').to_string();
        match key {
            "realm" => realm = Some(value),
            "service" => service = Some(value),
            _ => {}
        }
    }
    Some((realm?, service?))
}

fn is_gzip(path: &Path) -> Result<bool> {
    use std::io::Read;
    let mut magic = [0u8; 2];
    let mut file = fs::File::open(path)?;
    let n = file.read(&mut magic)?;
    Ok(n == 2 && magic == [0x1f, 0x8b])
}
