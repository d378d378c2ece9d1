//! Feature identifier resolution
//!
//! This module parses the feature identifier strings found under the
//! `features` key of a dev-container configuration into typed
//! [`SourceInformation`] values. Identifiers come in four shapes:
//!
//! - **Bare id**: `helloworld` — resolved from the tool's bundled cache
//! - **GitHub release**: `octocat/myfeatures/helloworld[@v0.0.4]`
//! - **Direct tarball**: `https://example.com/x/devcontainer-features.tgz#helloworld`
//! - **Filesystem path**: `./local/helloworld`, `../shared/helloworld`, `/abs/helloworld`
//!
//! Parsing is total: every input either produces exactly one
//! `(SourceInformation, feature id)` pair or is rejected with `None`.
//! Rejection is not an error; downstream assembly logs and skips the entry.

use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};

/// Resolved origin of a feature payload
///
/// Each variant maps to one fetch strategy and one canonical
/// [source-info string](SourceInformation::source_info_string) used as a
/// directory name and build-stage prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceInformation {
    /// Payload ships with the tool itself
    LocalCache,
    /// Payload is a release asset of a GitHub repository
    GithubRepo {
        owner: String,
        repo: String,
        /// Release tag; `None` selects the latest release
        tag: Option<String>,
        /// GitHub release API endpoint for this reference
        api_uri: String,
        /// Direct, unauthenticated download URI for the release asset
        unauthenticated_uri: String,
    },
    /// Payload is a tarball at an explicit URI
    DirectTarball { tarball_uri: String },
    /// Payload is a directory on the local filesystem
    FilePath {
        /// The path exactly as written in the identifier
        file_path: String,
        is_relative: bool,
    },
}

/// Stable map key derived from a source-info string
///
/// Newtype wrapper so feature-set lookups cannot accidentally mix plain
/// strings (feature ids, paths) with source keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceInfoKey(String);

impl SourceInfoKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SourceInfoKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl SourceInformation {
    /// Whether a GitHub reference points at the latest release
    ///
    /// True exactly when no tag is recorded. Non-GitHub variants return false.
    pub fn is_latest(&self) -> bool {
        matches!(self, SourceInformation::GithubRepo { tag: None, .. })
    }

    /// Canonical directory/stage name for this source
    ///
    /// Stable across runs and collision-resistant for distinct
    /// variant-plus-field combinations. The tarball variant embeds a
    /// content hash of the URI; the path variant slugs and hashes the
    /// *absolute* form of its path, so the same relative identifier seen
    /// from two working directories never shares a directory, and two
    /// spellings of one target coalesce.
    pub fn source_info_string(&self) -> String {
        match self {
            SourceInformation::LocalCache => "local-cache".to_string(),
            SourceInformation::GithubRepo {
                owner, repo, tag, ..
            } => {
                let tag = tag.as_deref().unwrap_or("latest");
                format!("github-{}-{}-{}", owner, repo, tag)
            }
            SourceInformation::DirectTarball { tarball_uri } => {
                format!("tarball-{}", short_hash(tarball_uri, 16))
            }
            SourceInformation::FilePath { file_path, .. } => {
                let absolute = absolute_file_path(file_path);
                let absolute = absolute.to_string_lossy();
                format!("file-{}-{}", slugify(&absolute), short_hash(&absolute, 8))
            }
        }
    }

    /// Source-info string wrapped as a typed map key
    pub fn key(&self) -> SourceInfoKey {
        SourceInfoKey(self.source_info_string())
    }
}

/// Parse a feature identifier into its source and feature id
///
/// Rules are evaluated in order; the first match wins:
///
/// 1. Strings containing `://` must be `<uri ending in .tgz>#<id>`
/// 2. Strings starting with `./`, `../` or `/` are filesystem paths whose
///    trailing segment is the feature id
/// 3. `<owner>/<repo>/<id>[@<tag>]` is a GitHub release reference
/// 4. A bare valid id resolves from the local cache
///
/// Anything else is rejected with `None`.
pub fn parse_feature_identifier(input: &str) -> Option<(SourceInformation, String)> {
    if input.contains("://") {
        return parse_direct_tarball(input);
    }
    if input.starts_with("./") || input.starts_with("../") || input.starts_with('/') {
        return parse_file_path(input);
    }
    if input.contains('/') {
        return parse_github_repo(input);
    }
    if is_valid_feature_id(input) {
        return Some((SourceInformation::LocalCache, input.to_string()));
    }
    None
}

/// Valid feature id: `[A-Za-z0-9_][A-Za-z0-9_-]*`
fn is_valid_feature_id(id: &str) -> bool {
    let mut chars = id.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphanumeric() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Valid GitHub owner/repo segment: alphanumerics plus `-`, `_`, `.`
fn is_valid_repo_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}

fn parse_direct_tarball(input: &str) -> Option<(SourceInformation, String)> {
    // A trailing slash or missing `#` rejects the whole identifier; URI
    // shapes never fall through to the other rules.
    let (uri, id) = input.rsplit_once('#')?;
    if !uri.ends_with(".tgz") || !is_valid_feature_id(id) {
        return None;
    }
    Some((
        SourceInformation::DirectTarball {
            tarball_uri: uri.to_string(),
        },
        id.to_string(),
    ))
}

fn parse_file_path(input: &str) -> Option<(SourceInformation, String)> {
    let id = input.rsplit('/').next().unwrap_or("");
    if !is_valid_feature_id(id) {
        return None;
    }
    Some((
        SourceInformation::FilePath {
            file_path: input.to_string(),
            is_relative: !input.starts_with('/'),
        },
        id.to_string(),
    ))
}

fn parse_github_repo(input: &str) -> Option<(SourceInformation, String)> {
    let (head, tag) = match input.split_once('@') {
        Some((head, tag)) => {
            if tag.is_empty() || tag.contains('/') || tag.contains('@') {
                return None;
            }
            (head, Some(tag.to_string()))
        }
        None => (input, None),
    };

    let segments: Vec<&str> = head.split('/').collect();
    let [owner, repo, id] = segments.as_slice() else {
        return None;
    };
    if !is_valid_repo_segment(owner) || !is_valid_repo_segment(repo) || !is_valid_feature_id(id) {
        return None;
    }

    let (api_uri, unauthenticated_uri) = match &tag {
        Some(tag) => (
            format!(
                "https://api.github.com/repos/{}/{}/releases/tags/{}",
                owner, repo, tag
            ),
            format!(
                "https://github.com/{}/{}/releases/download/{}/devcontainer-features.tgz",
                owner, repo, tag
            ),
        ),
        None => (
            format!("https://api.github.com/repos/{}/{}/releases/latest", owner, repo),
            format!(
                "https://github.com/{}/{}/releases/latest/download/devcontainer-features.tgz",
                owner, repo
            ),
        ),
    };

    Some((
        SourceInformation::GithubRepo {
            owner: owner.to_string(),
            repo: repo.to_string(),
            tag,
            api_uri,
            unauthenticated_uri,
        },
        id.to_string(),
    ))
}

/// Absolute form of a path identifier, for slugging and hashing
///
/// Prefers the filesystem-canonical path. Identifier paths usually do not
/// exist verbatim (the trailing segment is the feature id, not a real
/// directory), so the parent — the collection root — is canonicalized
/// next. Paths with no canonicalizable ancestor fall back to a lexical
/// absolutization against the current working directory.
fn absolute_file_path(file_path: &str) -> PathBuf {
    let path = Path::new(file_path);
    if let Ok(canonical) = std::fs::canonicalize(path) {
        return canonical;
    }
    if let (Some(parent), Some(name)) = (path.parent(), path.file_name()) {
        if let Ok(canonical) = std::fs::canonicalize(parent) {
            return canonical.join(name);
        }
    }
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => path.to_path_buf(),
        }
    };
    normalize_lexically(&absolute)
}

/// Resolve `.` and `..` components without touching the filesystem
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// Lowercase slug: runs of non-alphanumerics collapse to a single `-`
fn slugify(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_dash = true;
    for c in input.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

fn short_hash(input: &str, len: usize) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut hex = String::with_capacity(len);
    for byte in digest.iter() {
        hex.push_str(&format!("{:02x}", byte));
        if hex.len() >= len {
            break;
        }
    }
    hex.truncate(len);
    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> Option<(SourceInformation, String)> {
        parse_feature_identifier(input)
    }

    #[test]
    fn bare_id_resolves_from_local_cache() {
        let (source, id) = parse("helloworld").unwrap();
        assert_eq!(source, SourceInformation::LocalCache);
        assert_eq!(id, "helloworld");
    }

    #[test]
    fn github_reference_without_tag_is_latest() {
        let (source, id) = parse("octocat/myfeatures/helloworld").unwrap();
        assert_eq!(id, "helloworld");
        assert!(source.is_latest());
        match source {
            SourceInformation::GithubRepo {
                owner,
                repo,
                tag,
                api_uri,
                unauthenticated_uri,
            } => {
                assert_eq!(owner, "octocat");
                assert_eq!(repo, "myfeatures");
                assert_eq!(tag, None);
                assert_eq!(
                    api_uri,
                    "https://api.github.com/repos/octocat/myfeatures/releases/latest"
                );
                assert_eq!(
                    unauthenticated_uri,
                    "https://github.com/octocat/myfeatures/releases/latest/download/devcontainer-features.tgz"
                );
            }
            other => panic!("expected GithubRepo, got {:?}", other),
        }
    }

    #[test]
    fn github_reference_with_tag() {
        let (source, id) = parse("octocat/myfeatures/helloworld@v0.0.4").unwrap();
        assert_eq!(id, "helloworld");
        assert!(!source.is_latest());
        match source {
            SourceInformation::GithubRepo {
                tag,
                api_uri,
                unauthenticated_uri,
                ..
            } => {
                assert_eq!(tag.as_deref(), Some("v0.0.4"));
                assert_eq!(
                    api_uri,
                    "https://api.github.com/repos/octocat/myfeatures/releases/tags/v0.0.4"
                );
                assert_eq!(
                    unauthenticated_uri,
                    "https://github.com/octocat/myfeatures/releases/download/v0.0.4/devcontainer-features.tgz"
                );
            }
            other => panic!("expected GithubRepo, got {:?}", other),
        }
    }

    #[test]
    fn direct_tarball_with_fragment_id() {
        let (source, id) =
            parse("https://example.com/x/devcontainer-features.tgz#helloworld").unwrap();
        assert_eq!(id, "helloworld");
        assert_eq!(
            source,
            SourceInformation::DirectTarball {
                tarball_uri: "https://example.com/x/devcontainer-features.tgz".to_string()
            }
        );
    }

    #[test]
    fn relative_path_keeps_trailing_segment_as_id() {
        let (source, id) = parse("./some/helloworld").unwrap();
        assert_eq!(id, "helloworld");
        assert_eq!(
            source,
            SourceInformation::FilePath {
                file_path: "./some/helloworld".to_string(),
                is_relative: true,
            }
        );

        let (source, _) = parse("../some/long/path/to/helloworld").unwrap();
        match source {
            SourceInformation::FilePath {
                file_path,
                is_relative,
            } => {
                assert_eq!(file_path, "../some/long/path/to/helloworld");
                assert!(is_relative);
            }
            other => panic!("expected FilePath, got {:?}", other),
        }
    }

    #[test]
    fn absolute_path_is_not_relative() {
        let (source, id) = parse("/opt/features/helloworld").unwrap();
        assert_eq!(id, "helloworld");
        match source {
            SourceInformation::FilePath { is_relative, .. } => assert!(!is_relative),
            other => panic!("expected FilePath, got {:?}", other),
        }
    }

    #[test]
    fn malformed_identifiers_are_rejected() {
        assert_eq!(parse("octocat/myfeatures"), None);
        assert_eq!(parse("octocat/myfeatures#"), None);
        assert_eq!(
            parse("https://example.com/x/devcontainer-features.tgz/"),
            None
        );
        assert_eq!(parse("octocat/myfeatures/@x"), None);
        assert_eq!(parse("octocat/myfeatures/MY_$UPER"), None);
        assert_eq!(parse(""), None);
        assert_eq!(parse("https://example.com/x.tgz#"), None);
        assert_eq!(parse("https://example.com/x.tar#id"), None);
        assert_eq!(parse("./path/with/trailing/"), None);
        assert_eq!(parse("a/b/c/d"), None);
        assert_eq!(parse("-leading-dash"), None);
    }

    #[test]
    fn rejection_never_panics_on_arbitrary_input() {
        for input in ["@", "#", "a@b", "//", "://", "a//b", "🦀", "a b c"] {
            let _ = parse(input);
        }
    }

    #[test]
    fn source_info_string_for_github() {
        let (source, _) = parse("bob/mobileapp/app").unwrap();
        assert_eq!(source.source_info_string(), "github-bob-mobileapp-latest");

        let (source, _) = parse("bob/mobileapp/app@v0.0.4").unwrap();
        assert_eq!(source.source_info_string(), "github-bob-mobileapp-v0.0.4");
    }

    #[test]
    fn source_info_strings_are_distinct_across_sources() {
        let inputs = [
            "helloworld",
            "octocat/myfeatures/helloworld",
            "octocat/myfeatures/helloworld@v1",
            "octocat/otherfeatures/helloworld",
            "https://example.com/a/devcontainer-features.tgz#x",
            "https://example.com/b/devcontainer-features.tgz#x",
            "./local/x",
            "./other/x",
            "/abs/x",
        ];
        let mut seen = std::collections::HashSet::new();
        for input in inputs {
            let (source, _) = parse(input).unwrap();
            assert!(
                seen.insert(source.source_info_string()),
                "collision for {}",
                input
            );
        }
    }

    #[test]
    fn source_info_string_is_stable() {
        let (a, _) = parse("./some/helloworld").unwrap();
        let (b, _) = parse("./some/helloworld").unwrap();
        assert_eq!(a.source_info_string(), b.source_info_string());
    }

    #[test]
    fn path_source_strings_use_the_absolute_path() {
        // A relative identifier and its absolute spelling name one target.
        let cwd = std::env::current_dir().unwrap();
        let (relative, _) = parse("./local/x").unwrap();
        let absolute_input = format!("{}/local/x", cwd.display());
        let (absolute, _) = parse(&absolute_input).unwrap();
        assert_eq!(
            relative.source_info_string(),
            absolute.source_info_string()
        );

        // Dot segments resolve before slugging.
        let (dotted, _) = parse("/a/b/../c/x").unwrap();
        let (plain, _) = parse("/a/c/x").unwrap();
        assert_eq!(dotted.source_info_string(), plain.source_info_string());

        // Distinct targets spelled relatively still get distinct strings.
        let (one, _) = parse("./local/x").unwrap();
        let (two, _) = parse("./other/x").unwrap();
        assert_ne!(one.source_info_string(), two.source_info_string());
    }
}
