//! Remote coordinates for registries and the projects they list.
//!
//! Entries in a registry manifest and the configured registry source are
//! written the way people paste repository links: `owner/repo`,
//! `owner/repo#branch`, `https://github.com/owner/repo/tree/branch`,
//! `git@github.com:owner/repo.git` and so on. [`RemoteCoordinate::parse`]
//! normalises all of them to a clone URL, a branch and the repository name
//! that doubles as the checkout directory under the registry root.

use std::fmt;
use std::path::Path;

use url::Url;

use crate::error::RegistryError;
use crate::error::Result;

/// Branch used when a coordinate does not name one.
pub const DEFAULT_BRANCH: &str = "master";

const DEFAULT_HOST: &str = "github.com";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCoordinate {
    /// Clone URL handed to the source sync.
    pub url: String,
    pub branch: String,
    /// Repository owner; `None` for local paths and `file://` URLs.
    pub owner: Option<String>,
    /// Repository name, also the directory name under the registry root.
    pub repo: String,
}

impl RemoteCoordinate {
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(invalid(input, "empty coordinate"));
        }

        let (body, fragment) = match trimmed.split_once('#') {
            Some((body, branch)) if !branch.is_empty() => (body, Some(branch.to_string())),
            Some((body, _)) => (body, None),
            None => (trimmed, None),
        };

        let mut coordinate = if let Some(rest) = body.strip_prefix("git@") {
            parse_scp_like(input, rest)?
        } else if body.contains("://") {
            parse_url(input, body)?
        } else if is_local_path(body) {
            local(input, body)?
        } else {
            parse_shorthand(input, body)?
        };

        if let Some(branch) = fragment {
            coordinate.branch = branch;
        }
        Ok(coordinate)
    }

    /// Replace the branch, e.g. with an explicit override from configuration.
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }
}

impl fmt::Display for RemoteCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.url, self.branch)
    }
}

fn invalid(input: &str, reason: impl Into<String>) -> RegistryError {
    RegistryError::Coordinate {
        input: input.to_string(),
        reason: reason.into(),
    }
}

fn hosted(host: &str, owner: &str, repo: &str, branch: Option<String>) -> RemoteCoordinate {
    let repo = repo.strip_suffix(".git").unwrap_or(repo);
    RemoteCoordinate {
        url: format!("https://{host}/{owner}/{repo}"),
        branch: branch.unwrap_or_else(|| DEFAULT_BRANCH.to_string()),
        owner: Some(owner.to_string()),
        repo: repo.to_string(),
    }
}

/// `owner/repo`
fn parse_shorthand(input: &str, body: &str) -> Result<RemoteCoordinate> {
    match body.split('/').collect::<Vec<_>>().as_slice() {
        [owner, repo] if !owner.is_empty() && !repo.is_empty() => {
            Ok(hosted(DEFAULT_HOST, owner, repo, None))
        }
        _ => Err(invalid(input, "expected owner/repo")),
    }
}

/// `git@host:owner/repo.git`
fn parse_scp_like(input: &str, rest: &str) -> Result<RemoteCoordinate> {
    let (host, path) = rest
        .split_once(':')
        .ok_or_else(|| invalid(input, "expected git@host:owner/repo"))?;
    match path.trim_matches('/').split('/').collect::<Vec<_>>().as_slice() {
        [owner, repo] if !host.is_empty() && !owner.is_empty() && !repo.is_empty() => {
            Ok(hosted(host, owner, repo, None))
        }
        _ => Err(invalid(input, "expected git@host:owner/repo")),
    }
}

/// `https://host/owner/repo[.git][/tree/<branch>]`, `git://…`, `ssh://…`,
/// and `file://` mirrors.
fn parse_url(input: &str, body: &str) -> Result<RemoteCoordinate> {
    let url = Url::parse(body).map_err(|err| invalid(input, err.to_string()))?;
    if url.scheme() == "file" {
        let path = url
            .to_file_path()
            .map_err(|()| invalid(input, "file URL does not name a local path"))?;
        return local_from_path(input, body, &path);
    }

    let host = url
        .host_str()
        .ok_or_else(|| invalid(input, "URL has no host"))?;
    let segments: Vec<&str> = url
        .path_segments()
        .map(|segments| segments.filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();
    match segments.as_slice() {
        [owner, repo] => Ok(hosted(host, owner, repo, None)),
        [owner, repo, "tree" | "blob" | "commits", branch @ ..] if !branch.is_empty() => {
            Ok(hosted(host, owner, repo, Some(branch.join("/"))))
        }
        _ => Err(invalid(input, "expected a repository URL")),
    }
}

/// `./…` and `../…` coordinates, which depend on the directory they are
/// resolved from.
pub(crate) fn is_relative_path(input: &str) -> bool {
    let input = input.trim();
    input.starts_with("./") || input.starts_with("../")
}

fn is_local_path(body: &str) -> bool {
    body.starts_with('/') || body.starts_with("./") || body.starts_with("../")
}

fn local(input: &str, body: &str) -> Result<RemoteCoordinate> {
    local_from_path(input, body, Path::new(body))
}

fn local_from_path(input: &str, url: &str, path: &Path) -> Result<RemoteCoordinate> {
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| invalid(input, "local path has no final component"))?;
    let repo = name.strip_suffix(".git").unwrap_or(name);
    Ok(RemoteCoordinate {
        url: url.to_string(),
        branch: DEFAULT_BRANCH.to_string(),
        owner: None,
        repo: repo.to_string(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn github(owner: &str, repo: &str, branch: &str) -> RemoteCoordinate {
        RemoteCoordinate {
            url: format!("https://github.com/{owner}/{repo}"),
            branch: branch.to_string(),
            owner: Some(owner.to_string()),
            repo: repo.to_string(),
        }
    }

    #[test]
    fn shorthand_defaults_to_github_master() {
        assert_eq!(
            RemoteCoordinate::parse("acme/checkout").unwrap(),
            github("acme", "checkout", "master")
        );
    }

    #[test]
    fn fragment_selects_branch() {
        assert_eq!(
            RemoteCoordinate::parse("acme/checkout#prod").unwrap(),
            github("acme", "checkout", "prod")
        );
        assert_eq!(
            RemoteCoordinate::parse("https://github.com/acme/checkout.git#prod").unwrap(),
            github("acme", "checkout", "prod")
        );
    }

    #[test]
    fn hosting_urls() {
        for input in [
            "https://github.com/acme/checkout",
            "https://github.com/acme/checkout/",
            "https://github.com/acme/checkout.git",
            "git://github.com/acme/checkout.git",
            "ssh://git@github.com/acme/checkout.git",
            "git@github.com:acme/checkout.git",
        ] {
            assert_eq!(
                RemoteCoordinate::parse(input).unwrap(),
                github("acme", "checkout", "master"),
                "{input}"
            );
        }
    }

    #[test]
    fn tree_urls_carry_the_branch() {
        assert_eq!(
            RemoteCoordinate::parse("https://github.com/acme/checkout/tree/release/2024").unwrap(),
            github("acme", "checkout", "release/2024")
        );
    }

    #[test]
    fn other_hosts_keep_their_host() {
        let coordinate = RemoteCoordinate::parse("git@git.example.com:team/flags.git").unwrap();
        assert_eq!(coordinate.url, "https://git.example.com/team/flags");
        assert_eq!(coordinate.repo, "flags");
    }

    #[test]
    fn local_paths_are_used_verbatim() {
        let coordinate = RemoteCoordinate::parse("/srv/mirrors/registry.git").unwrap();
        assert_eq!(coordinate.url, "/srv/mirrors/registry.git");
        assert_eq!(coordinate.repo, "registry");
        assert_eq!(coordinate.owner, None);

        let coordinate = RemoteCoordinate::parse("file:///srv/mirrors/registry#stable").unwrap();
        assert_eq!(coordinate.url, "file:///srv/mirrors/registry");
        assert_eq!(coordinate.repo, "registry");
        assert_eq!(coordinate.branch, "stable");
    }

    #[test]
    fn branch_override() {
        let coordinate = RemoteCoordinate::parse("acme/checkout#prod")
            .unwrap()
            .with_branch("staging");
        assert_eq!(coordinate.branch, "staging");
        assert_eq!(coordinate.to_string(), "https://github.com/acme/checkout#staging");
    }

    #[test]
    fn rejects_malformed_input() {
        for input in ["", "   ", "checkout", "a/b/c", "/", "https://github.com/acme", "git@github.com"] {
            assert!(
                matches!(
                    RemoteCoordinate::parse(input),
                    Err(RegistryError::Coordinate { .. })
                ),
                "{input:?} should be rejected"
            );
        }
    }
}
