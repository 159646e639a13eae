//! Where release archives and version markers are downloaded from.
//!
//! A [`SourceSpec`] is what the operator configures: a repository reference, a
//! branch, and optionally a mirror prefix and an explicit version URL. It is
//! turned into concrete URLs here.
//!
//! | Repository | Archive URL |
//! |---|---|
//! | `owner/repo`, `https://github.com/owner/repo[.git]` | `https://github.com/owner/repo/archive/refs/heads/<branch>.zip` |
//! | other `github.com` paths | `https://api.github.com/repos/<owner>/<repo>/zipball/<branch>` |
//! | other `http(s)` hosts | `<scheme>://<host>/api/v3/repos/<owner>/<repo>/zipball/<branch>` |
//! | `file:///path/pkg.zip` | the file itself |
//!
//! For the fallback rows, owner and repo are the last two path segments. The
//! mirror prefix applies to every `http(s)` URL, never to `file://`.

use crate::constants::DEFAULT_VERSION_FILE;
use crate::core::{UpdateError, UpdateState};
use reqwest::Url;

const GITHUB_HOSTS: [&str; 2] = ["github.com", "www.github.com"];

/// A configured release source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSpec {
    pub repository: String,
    pub branch: String,
    pub mirror: Option<String>,
    pub version_url: Option<String>,
    pub version_file: String,
}

/// A repository reference after parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    /// Matches the canonical GitHub shape.
    GitHub {
        owner: String,
        repo: String,
    },
    /// Any other forge; URLs are derived from the API layout.
    Other {
        base: Url,
        owner: String,
        repo: String,
        canonical_host: bool,
    },
    /// A local archive, for offline installs.
    LocalArchive(Url),
}

impl SourceSpec {
    pub fn new(repository: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            repository: repository.into().trim().to_string(),
            branch: branch.into(),
            mirror: None,
            version_url: None,
            version_file: DEFAULT_VERSION_FILE.to_string(),
        }
    }

    #[must_use]
    pub fn with_mirror(mut self, mirror: impl Into<String>) -> Self {
        let mirror = mirror.into();
        self.mirror = if mirror.trim().is_empty() { None } else { Some(mirror.trim().to_string()) };
        self
    }

    #[must_use]
    pub fn with_version_url(mut self, url: impl Into<String>) -> Self {
        self.version_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn with_version_file(mut self, file: impl Into<String>) -> Self {
        self.version_file = file.into();
        self
    }

    /// Parse the repository reference.
    pub fn locate(&self) -> Result<SourceLocation, UpdateError> {
        self.locate_at(UpdateState::Fetching)
    }

    fn locate_at(&self, step: UpdateState) -> Result<SourceLocation, UpdateError> {
        let repository = self.repository.as_str();
        if repository.is_empty() {
            return Err(UpdateError::validation(step, "source repository is empty"));
        }

        if !repository.contains("://") {
            return match repository.split('/').collect::<Vec<_>>().as_slice() {
                [owner, repo] if !owner.is_empty() && !repo.is_empty() => Ok(SourceLocation::GitHub {
                    owner: (*owner).to_string(),
                    repo: strip_git_suffix(repo).to_string(),
                }),
                _ => Err(UpdateError::validation(
                    step,
                    format!("'{repository}' is neither owner/repo nor a URL"),
                )),
            };
        }

        let url = Url::parse(repository)
            .map_err(|e| UpdateError::validation(step, format!("invalid repository URL '{repository}': {e}")))?;

        match url.scheme() {
            "file" => Ok(SourceLocation::LocalArchive(url)),
            "http" | "https" => {
                let segments: Vec<&str> = url
                    .path_segments()
                    .map(|s| s.filter(|seg| !seg.is_empty()).collect())
                    .unwrap_or_default();
                let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
                let github = GITHUB_HOSTS.contains(&host.as_str());

                if github && url.scheme() == "https" && segments.len() == 2 {
                    return Ok(SourceLocation::GitHub {
                        owner: segments[0].to_string(),
                        repo: strip_git_suffix(segments[1]).to_string(),
                    });
                }

                let [.., owner, repo] = segments.as_slice() else {
                    return Err(UpdateError::validation(
                        step,
                        format!("repository URL '{repository}' needs an owner and a repository in its path"),
                    ));
                };
                Ok(SourceLocation::Other {
                    base: url.clone(),
                    owner: (*owner).to_string(),
                    repo: strip_git_suffix(repo).to_string(),
                    canonical_host: github,
                })
            }
            other => Err(UpdateError::validation(step, format!("unsupported URL scheme '{other}'"))),
        }
    }

    /// Download URL of the package archive, mirror-prefixed.
    pub fn archive_url(&self) -> Result<String, UpdateError> {
        let url = match self.locate()? {
            SourceLocation::GitHub {
                owner,
                repo,
            } => format!("https://github.com/{owner}/{repo}/archive/refs/heads/{}.zip", self.branch),
            SourceLocation::Other {
                base,
                owner,
                repo,
                canonical_host,
            } => {
                if canonical_host {
                    format!("https://api.github.com/repos/{owner}/{repo}/zipball/{}", self.branch)
                } else {
                    format!("{}/api/v3/repos/{owner}/{repo}/zipball/{}", origin(&base), self.branch)
                }
            }
            SourceLocation::LocalArchive(url) => return Ok(url.to_string()),
        };
        Ok(self.mirrored(&url))
    }

    /// URL of the remote version marker.
    ///
    /// An explicit `version_url` wins. Local archives look for the marker next
    /// to the archive file.
    pub fn remote_version_url(&self) -> Result<String, UpdateError> {
        if let Some(url) = &self.version_url {
            return Ok(url.clone());
        }

        let url = match self.locate_at(UpdateState::CheckingVersion)? {
            SourceLocation::GitHub {
                owner,
                repo,
            } => format!(
                "https://raw.githubusercontent.com/{owner}/{repo}/{}/{}",
                self.branch, self.version_file
            ),
            SourceLocation::Other {
                base,
                ..
            } => {
                let trimmed = base.as_str().trim_end_matches('/');
                format!("{}/raw/{}/{}", strip_git_suffix(trimmed), self.branch, self.version_file)
            }
            SourceLocation::LocalArchive(url) => {
                return url.join(&self.version_file).map(|u| u.to_string()).map_err(|e| {
                    UpdateError::validation(UpdateState::CheckingVersion, format!("cannot derive version URL: {e}"))
                });
            }
        };
        Ok(self.mirrored(&url))
    }

    fn mirrored(&self, url: &str) -> String {
        match &self.mirror {
            Some(prefix) if prefix.ends_with('/') => format!("{prefix}{url}"),
            Some(prefix) => format!("{prefix}/{url}"),
            None => url.to_string(),
        }
    }
}

fn strip_git_suffix(name: &str) -> &str {
    name.strip_suffix(".git").unwrap_or(name)
}

fn origin(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}://{host}:{port}", url.scheme()),
        None => format!("{}://{host}", url.scheme()),
    }
}
