// src/download/git.rs

//! Git source fetching: clone the repository into the destination and
//! check out the requested tag, branch, or commit with a detached HEAD.

use crate::error::{Error, Result};
use crate::source::{GitRef, GitSource};
use git2::build::RepoBuilder;
use git2::{CertificateCheckStatus, FetchOptions, RemoteCallbacks, Repository};
use std::path::Path;
use tracing::debug;

pub fn download(source: &GitSource, dest: &Path, insecure_skip_tls_verify: bool) -> Result<()> {
    debug!("cloning '{}' into '{}'", source.url, dest.display());

    let mut fetch = FetchOptions::new();
    if insecure_skip_tls_verify {
        let mut callbacks = RemoteCallbacks::new();
        callbacks.certificate_check(|_, _| Ok(CertificateCheckStatus::CertificateOk));
        fetch.remote_callbacks(callbacks);
    }

    let repo = RepoBuilder::new()
        .fetch_options(fetch)
        .clone(&source.url, dest)
        .map_err(|e| classify(&source.url, e))?;

    checkout(&repo, &source.url, &source.reference)
}

fn checkout(repo: &Repository, url: &str, reference: &GitRef) -> Result<()> {
    let refname = match reference {
        GitRef::Default => return Ok(()),
        GitRef::Tag(tag) => format!("refs/tags/{tag}"),
        GitRef::Branch(branch) => format!("refs/remotes/origin/{branch}"),
        GitRef::Commit(rev) => {
            let oid = git2::Oid::from_str(rev).map_err(|e| classify(url, e))?;
            let commit = repo.find_commit(oid).map_err(|e| classify(url, e))?;
            repo.checkout_tree(commit.as_object(), None)
                .map_err(|e| classify(url, e))?;
            repo.set_head_detached(oid).map_err(|e| classify(url, e))?;
            return Ok(());
        }
    };

    let commit = repo
        .find_reference(&refname)
        .and_then(|r| r.peel_to_commit())
        .map_err(|e| classify(url, e))?;
    repo.checkout_tree(commit.as_object(), None)
        .map_err(|e| classify(url, e))?;
    repo.set_head_detached(commit.id())
        .map_err(|e| classify(url, e))?;
    Ok(())
}

fn classify(url: &str, e: git2::Error) -> Error {
    use git2::ErrorClass;
    match e.class() {
        ErrorClass::Net | ErrorClass::Http | ErrorClass::Ssl => {
            Error::NetworkFailure(format!("{url}: {}", e.message()))
        }
        ErrorClass::Reference | ErrorClass::Odb if e.code() == git2::ErrorCode::NotFound => {
            Error::NotFound(format!("{url}: {}", e.message()))
        }
        _ => Error::Git(format!("{url}: {}", e.message())),
    }
}
