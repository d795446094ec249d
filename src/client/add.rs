// src/client/add.rs

//! The add pipeline: resolve candidate sources into dependency records,
//! merge them into the manifest store under MVS, then run update.

use super::Client;
use crate::deps::Dependency;
use crate::error::{Error, Result};
use crate::pkg::Package;
use crate::source::{NilSource, OciSource, Remote, Source};
use tracing::info;

/// Options for [`Client::add`]: an ordered list of candidate sources.
#[derive(Default)]
pub struct AddOptions {
    pub sources: Vec<Source>,
}

impl AddOptions {
    pub fn new() -> Self {
        AddOptions::default()
    }

    pub fn with_source(mut self, source: Source) -> Self {
        self.sources.push(source);
        self
    }

    /// Parse and append a source URL (`oci://…`, `git+…`, a path, or an
    /// archive).
    pub fn with_source_url(mut self, url: &str) -> Result<Self> {
        self.sources.push(Source::from_url(url)?);
        Ok(self)
    }

    /// Append a bare `(name, version)` request against the default
    /// registry.
    pub fn with_package(mut self, name: &str, version: &str) -> Self {
        self.sources.push(Source::Nil(NilSource {
            spec: Some(crate::source::PkgSpec {
                name: name.to_string(),
                version: version.to_string(),
            }),
        }));
        self
    }
}

impl Client {
    /// Add dependencies to `pkg` from the given sources, in order, then
    /// update the lockfile to a fixed point and persist both files.
    pub fn add(&self, pkg: &mut Package, options: AddOptions) -> Result<()> {
        for source in options.sources {
            let source = self.expand_nil_source(source)?;
            let visitor = self.visitor_for(&source)?;

            let mut added: Option<Dependency> = None;
            visitor.visit(&source, &mut |dep_pkg| {
                let mut dep =
                    Dependency::new(dep_pkg.name(), dep_pkg.version(), source.clone());
                dep.local_full_path = Some(dep_pkg.home_path.clone());
                dep.sum = self.acquire_dep_sum(&dep)?;
                added = Some(dep);
                Ok(())
            })?;

            let dep = added.ok_or_else(|| {
                Error::UnsupportedSource(format!("'{source}' yielded no package"))
            })?;
            info!("adding dependency '{}' {}", dep.name, dep.version);
            pkg.mod_file.deps.merge_mvs(dep)?;
        }

        self.update(pkg)
    }

    /// A nil source carrying a package spec expands against the default
    /// registry; a bare nil source is rejected.
    fn expand_nil_source(&self, source: Source) -> Result<Source> {
        let nil = match &source {
            Source::Nil(nil) => nil,
            _ => return Ok(source),
        };

        match &nil.spec {
            Some(spec) => Ok(Source::Remote(Remote::Oci(OciSource {
                reg: self.settings().default_oci_registry.clone(),
                repo: self.settings().default_repo_for(&spec.name),
                tag: spec.version.clone(),
                pkg_name: None,
                pkg_version: None,
            }))),
            None => Err(Error::UnsupportedSource(
                "nil source without a package spec".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;

    #[test]
    fn test_expand_nil_with_spec() {
        let client =
            Client::new(Settings::with_home("/tmp/kpkg-test-home")).unwrap();
        let source = Source::Nil(NilSource {
            spec: Some(crate::source::PkgSpec {
                name: "helloworld".to_string(),
                version: "0.1.4".to_string(),
            }),
        });

        let expanded = client.expand_nil_source(source).unwrap();
        match expanded {
            Source::Remote(Remote::Oci(o)) => {
                assert_eq!(o.reg, "ghcr.io");
                assert_eq!(o.repo, "kcl-lang/helloworld");
                assert_eq!(o.tag, "0.1.4");
            }
            other => panic!("expected oci expansion, got {other:?}"),
        }
    }

    #[test]
    fn test_bare_nil_rejected() {
        let client =
            Client::new(Settings::with_home("/tmp/kpkg-test-home")).unwrap();
        let result = client.expand_nil_source(Source::Nil(NilSource { spec: None }));
        assert!(matches!(result, Err(Error::UnsupportedSource(_))));
    }

    #[test]
    fn test_non_nil_passes_through() {
        let client =
            Client::new(Settings::with_home("/tmp/kpkg-test-home")).unwrap();
        let source = Source::from_url("oci://ghcr.io/kcl-lang/helloworld?tag=0.1.4").unwrap();
        let expanded = client.expand_nil_source(source.clone()).unwrap();
        assert_eq!(expanded, source);
    }
}
