//! Plugin path resolution.
//!
//! Each `-pluginpath` entry names a file. Missing files with a `url`
//! attribute are downloaded into place and checked against an optional
//! `sha1`/`sha256` digest before being added to the class path.

use anyhow::Context;
use reqwest::Url;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::error::PluginError;
use crate::memoize::CloseableMemoize;

use super::catalog::ClassPath;
use super::clause::{parse_declarations, DeclarationRecord, URL_ATTR};
use super::digest::{parse_hex, DigestAlgorithm};
use super::fetch::Fetch;
use super::registry::PluginRegistry;
use super::traits::{Closeable, Host};

/// Variable expanding to the plugin cache directory in declared paths.
pub const CACHE_VAR: &str = "PLUGIN_CACHE";

/// Expand `~` and `${VAR}` in `declared` and anchor it at `base_dir`.
///
/// `${PLUGIN_CACHE}` expands to `cache_dir`; unknown variables are left as
/// written.
pub fn expand_declared_path(
    declared: &str,
    base_dir: &Path,
    cache_dir: Option<&Path>,
) -> anyhow::Result<PathBuf> {
    let declared = declared.trim();
    if declared.is_empty() {
        anyhow::bail!("empty plugin path");
    }

    let mut missing_cache = false;
    let tilde = shellexpand::tilde(declared);
    let expanded = shellexpand::env_with_context_no_errors(tilde.as_ref(), |var| match var {
        CACHE_VAR => {
            missing_cache = cache_dir.is_none();
            cache_dir.map(|dir| dir.to_string_lossy().into_owned())
        }
        other => std::env::var(other).ok(),
    });
    if missing_cache {
        anyhow::bail!("{declared} refers to ${{{CACHE_VAR}}} but no cache directory is available");
    }

    let path = PathBuf::from(expanded.as_ref());
    Ok(if path.is_absolute() {
        path
    } else {
        base_dir.join(path)
    })
}

/// Makes `-pluginpath` entries available on a [`ClassPath`].
pub struct PluginPathResolver<'a> {
    host: &'a dyn Host,
    registry: &'a PluginRegistry,
}

impl<'a> PluginPathResolver<'a> {
    pub fn new(host: &'a dyn Host, registry: &'a PluginRegistry) -> Self {
        Self { host, registry }
    }

    /// Process every entry of `plugin_path`. Failures are reported and the
    /// entry skipped.
    ///
    /// The download client is only built if something has to be
    /// downloaded, and is closed before returning.
    pub fn load_plugin_path(&self, plugin_path: &str, class_path: &ClassPath) {
        let client = CloseableMemoize::new(|| self.host.download_client(self.registry));

        for record in parse_declarations(plugin_path) {
            self.load_entry(&record, &client, class_path);
        }

        if let Err(e) = client.close() {
            tracing::warn!(error = %e, "Failed to close plugin download client");
        }
    }

    fn load_entry(
        &self,
        record: &DeclarationRecord,
        client: &CloseableMemoize<'_, Box<dyn Fetch>>,
        class_path: &ClassPath,
    ) {
        let declared = record.class_name();
        let file = match self
            .host
            .resolve_path(declared)
            .and_then(|p| Ok(std::path::absolute(p)?))
        {
            Ok(file) => file,
            Err(e) => {
                self.host.report(PluginError::configuration(format!(
                    "Cannot resolve plugin path {declared}: {e:#}"
                )));
                return;
            }
        };

        if !file.is_file() {
            let Some(url) = record.attrs().get(URL_ATTR) else {
                self.host.report(PluginError::configuration(format!(
                    "No such file {declared} and no 'url' attribute on the path so it can be downloaded"
                )));
                return;
            };

            if let Err(e) = download(url, &file, client) {
                self.host.report(PluginError::Io {
                    path: declared.to_string(),
                    url: url.to_string(),
                    source: e,
                });
                return;
            }

            if !self.verify(record, url, &file) {
                return;
            }
        }

        tracing::debug!(path = %file.display(), "Adding to loader for plugins");
        class_path.add(file);
    }

    /// Check declared digests; returns `false` if the entry must be skipped.
    fn verify(&self, record: &DeclarationRecord, url: &str, file: &Path) -> bool {
        let declared = record.class_name();

        for algorithm in [DigestAlgorithm::Sha1, DigestAlgorithm::Sha256] {
            let Some(raw) = record.attrs().get(algorithm.attribute()) else {
                continue;
            };
            let Some(expected) = parse_hex(raw) else {
                self.host.report(PluginError::configuration(format!(
                    "Plugin path: {declared}, specified url {url} and a {algorithm} '{raw}' but this is not a hexadecimal"
                )));
                continue;
            };

            match algorithm.digest_file(file) {
                Ok(actual) if actual == expected => {}
                Ok(_) => {
                    self.host.report(PluginError::Integrity {
                        path: declared.to_string(),
                        url: url.to_string(),
                        algorithm: algorithm.attribute(),
                    });
                    if self.host.settings().strict_integrity {
                        if let Err(e) = std::fs::remove_file(file) {
                            tracing::warn!(path = %file.display(), error = %e, "Failed to remove rejected download");
                        }
                        return false;
                    }
                }
                Err(e) => {
                    self.host.report(PluginError::Io {
                        path: declared.to_string(),
                        url: url.to_string(),
                        source: anyhow::Error::new(e).context("failed to digest downloaded file"),
                    });
                    return false;
                }
            }
        }
        true
    }
}

impl std::fmt::Debug for PluginPathResolver<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginPathResolver").finish_non_exhaustive()
    }
}

/// Download `url` to `file` through a temporary file in the same directory.
fn download(url: &str, file: &Path, client: &CloseableMemoize<'_, Box<dyn Fetch>>) -> anyhow::Result<()> {
    let url = Url::parse(url).with_context(|| format!("invalid url {url}"))?;
    tracing::info!(url = %url, path = %file.display(), "Downloading plugin path entry");

    let parent = file
        .parent()
        .with_context(|| format!("{} has no parent directory", file.display()))?;
    std::fs::create_dir_all(parent)
        .with_context(|| format!("failed to create {}", parent.display()))?;

    let fetcher = client.get()?;
    let mut resource = fetcher.fetch(&url)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    resource.write_to(&mut tmp)?;
    let written = tmp.persist(file)?;
    if let Some(modified) = resource.last_modified() {
        written.set_modified(modified)?;
    }
    Ok(())
}
