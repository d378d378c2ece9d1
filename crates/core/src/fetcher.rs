//! Feature payload fetching
//!
//! For each resolved [`SourceInformation`] the fetcher materializes the
//! feature payload (scripts, metadata) under the build's destination
//! folder at `dstFolder/<source-info-string>/`. Sources are fetched
//! concurrently, bounded by the number of distinct source-info strings;
//! each set's subtree is owned by exactly one fetch, so writes are
//! conflict-free by construction.
//!
//! Network fetches honor a caller-configurable deadline (60s default) and
//! the caller's cancellation token at every suspension point.

use crate::cancel::CancelToken;
use crate::errors::{EngineError, ExtractError, FetchError, PayloadError, Result};
use crate::feature_ref::SourceInformation;
use bytes::Bytes;
use flate2::read::GzDecoder;
use futures::future::try_join_all;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::future::Future;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Release asset name expected on GitHub feature releases
const RELEASE_ASSET_NAME: &str = "devcontainer-features.tgz";

/// Environment variable overriding the bundled feature tree location
const BUNDLED_FEATURES_ENV: &str = "STEVEDORE_BUNDLED_FEATURES";

/// One unit of fetch work: a source plus the feature ids expected in it
#[derive(Debug, Clone)]
pub struct FetchEntry {
    pub source: SourceInformation,
    pub feature_ids: Vec<String>,
}

/// Fetcher configuration
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Location of the feature tree that ships with the tool, used for
    /// `local-cache` sources
    pub bundled_features_dir: Option<PathBuf>,
    /// Deadline for each network fetch
    pub fetch_timeout: Duration,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            bundled_features_dir: std::env::var(BUNDLED_FEATURES_ENV)
                .ok()
                .map(PathBuf::from),
            fetch_timeout: Duration::from_secs(60),
        }
    }
}

/// Materializes feature payloads into a build's destination folder
pub struct FeatureFetcher {
    client: reqwest::Client,
    config: FetcherConfig,
}

impl FeatureFetcher {
    pub fn new(config: FetcherConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    /// Fetch every entry, fanning out across distinct sources
    ///
    /// Entries resolving to the same source-info string are coalesced so
    /// each source is fetched exactly once. The first failure aborts the
    /// join; the engine performs no retries.
    #[instrument(skip(self, entries, cancel), fields(sources = entries.len()))]
    pub async fn fetch_all(
        &self,
        entries: &[FetchEntry],
        dst_folder: &Path,
        cancel: &CancelToken,
    ) -> Result<()> {
        let mut grouped: IndexMap<String, FetchEntry> = IndexMap::new();
        for entry in entries {
            let key = entry.source.source_info_string();
            grouped
                .entry(key)
                .and_modify(|existing| {
                    for id in &entry.feature_ids {
                        if !existing.feature_ids.contains(id) {
                            existing.feature_ids.push(id.clone());
                        }
                    }
                })
                .or_insert_with(|| entry.clone());
        }

        try_join_all(
            grouped
                .values()
                .map(|entry| self.fetch(&entry.source, &entry.feature_ids, dst_folder, cancel)),
        )
        .await?;
        Ok(())
    }

    /// Materialize one source under `dstFolder/<source-info-string>/`
    ///
    /// Returns the set folder. Fails with [`PayloadError`] if the
    /// materialized tree lacks a `features/<id>/` subtree for any of the
    /// expected ids.
    #[instrument(skip(self, cancel), fields(source = %source.source_info_string()))]
    pub async fn fetch(
        &self,
        source: &SourceInformation,
        feature_ids: &[String],
        dst_folder: &Path,
        cancel: &CancelToken,
    ) -> Result<PathBuf> {
        let set_folder = dst_folder.join(source.source_info_string());
        std::fs::create_dir_all(&set_folder)?;

        with_cancel(cancel, async {
            match source {
                SourceInformation::LocalCache => {
                    let bundled = self
                        .config
                        .bundled_features_dir
                        .as_deref()
                        .ok_or(PayloadError::NoBundledFeatures)?;
                    debug!(from = %bundled.display(), "Copying bundled feature tree");
                    copy_tree(bundled, &set_folder)?;
                }
                SourceInformation::FilePath { file_path, .. } => {
                    // The identifier's trailing segment is the feature id;
                    // the collection root is its parent.
                    let path = Path::new(file_path);
                    let root = path.parent().filter(|p| !p.as_os_str().is_empty());
                    let root = root.unwrap_or_else(|| Path::new("."));
                    debug!(from = %root.display(), "Copying feature collection from path");
                    copy_tree(root, &set_folder)?;
                }
                SourceInformation::DirectTarball { tarball_uri } => {
                    let bytes = self.download(tarball_uri, HashMap::new()).await?;
                    extract_tgz(&bytes, &set_folder)?;
                }
                SourceInformation::GithubRepo { .. } => {
                    self.fetch_github_release(source, &set_folder).await?;
                }
            }
            Ok(())
        })
        .await?;

        verify_payload(&set_folder, feature_ids)?;
        info!(folder = %set_folder.display(), "Fetched feature payload");
        Ok(set_folder)
    }

    /// Fetch a GitHub release asset, via the release API when a token is
    /// available and the public download URI otherwise
    async fn fetch_github_release(
        &self,
        source: &SourceInformation,
        set_folder: &Path,
    ) -> Result<()> {
        let SourceInformation::GithubRepo {
            api_uri,
            unauthenticated_uri,
            ..
        } = source
        else {
            unreachable!("caller matched the variant");
        };

        let token = std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty());
        let bytes = match token {
            Some(token) => {
                debug!(api = %api_uri, "Fetching release via GitHub API");
                let mut headers = HashMap::new();
                headers.insert("Authorization".to_string(), format!("Bearer {}", token));
                headers.insert(
                    "Accept".to_string(),
                    "application/vnd.github+json".to_string(),
                );
                let release = self.download(api_uri, headers).await?;
                let release: serde_json::Value = serde_json::from_slice(&release)?;

                let asset_url = release
                    .get("assets")
                    .and_then(|a| a.as_array())
                    .and_then(|assets| {
                        assets.iter().find(|asset| {
                            asset.get("name").and_then(|n| n.as_str())
                                == Some(RELEASE_ASSET_NAME)
                        })
                    })
                    .and_then(|asset| asset.get("url"))
                    .and_then(|u| u.as_str())
                    .ok_or_else(|| FetchError::Network {
                        url: api_uri.clone(),
                        message: format!("release has no {} asset", RELEASE_ASSET_NAME),
                    })?
                    .to_string();

                let mut headers = HashMap::new();
                headers.insert("Authorization".to_string(), format!("Bearer {}", token));
                headers.insert(
                    "Accept".to_string(),
                    "application/octet-stream".to_string(),
                );
                self.download(&asset_url, headers).await?
            }
            None => {
                debug!(url = %unauthenticated_uri, "Fetching release unauthenticated");
                self.download(unauthenticated_uri, HashMap::new()).await?
            }
        };

        extract_tgz(&bytes, set_folder)
    }

    /// Download a URL under the configured deadline
    async fn download(&self, url: &str, headers: HashMap<String, String>) -> Result<Bytes> {
        let mut request = self.client.get(url);
        for (key, value) in &headers {
            request = request.header(key, value);
        }

        let fetch = async {
            let response = request.send().await.map_err(|e| FetchError::Network {
                url: url.to_string(),
                message: e.to_string(),
            })?;

            let status = response.status();
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(FetchError::Auth {
                    url: url.to_string(),
                    message: format!("HTTP {}", status.as_u16()),
                }
                .into());
            }
            if !status.is_success() {
                return Err(FetchError::HttpStatus {
                    url: url.to_string(),
                    status: status.as_u16(),
                }
                .into());
            }

            response
                .bytes()
                .await
                .map_err(|e| {
                    FetchError::Network {
                        url: url.to_string(),
                        message: e.to_string(),
                    }
                    .into()
                })
        };

        match tokio::time::timeout(self.config.fetch_timeout, fetch).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout {
                url: url.to_string(),
                seconds: self.config.fetch_timeout.as_secs(),
            }
            .into()),
        }
    }
}

/// Race a future against the cancellation token
async fn with_cancel<T, F>(cancel: &CancelToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(EngineError::Cancelled),
        result = fut => result,
    }
}

/// Verify and extract a gzipped tar archive into `dest`
///
/// The gzip stream is fully decoded first so that compression corruption
/// and archive corruption surface as distinct errors.
pub fn extract_tgz(bytes: &[u8], dest: &Path) -> Result<()> {
    let mut decoder = GzDecoder::new(bytes);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| ExtractError::Gzip {
            message: e.to_string(),
        })?;

    let mut archive = tar::Archive::new(decompressed.as_slice());
    archive.unpack(dest).map_err(|e| ExtractError::Tar {
        message: e.to_string(),
    })?;
    Ok(())
}

/// Check that the materialized tree has a `features/<id>/` subtree for
/// every expected feature id
fn verify_payload(set_folder: &Path, feature_ids: &[String]) -> Result<()> {
    for id in feature_ids {
        let feature_dir = set_folder.join("features").join(id);
        if !feature_dir.is_dir() {
            return Err(PayloadError::MissingFeature {
                path: set_folder.display().to_string(),
                feature_id: id.clone(),
            }
            .into());
        }
    }
    Ok(())
}

/// Recursively copy a directory tree
fn copy_tree(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
