//! Scope and host parsing.
//!
//! A scope is either an organization (`owner`) or a repository
//! (`owner/repo`). Hosts are kept as their web URL
//! (`https://github.example.com`); github.com is represented by `None`.

use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, CoreResult};

pub const DEFAULT_GITHUB_URL: &str = "https://github.com";
const DEFAULT_API_URL: &str = "https://api.github.com";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Organization { owner: String },
    Repository { owner: String, repo: String },
}

impl Scope {
    pub fn owner(&self) -> &str {
        match self {
            Scope::Organization { owner } | Scope::Repository { owner, .. } => owner,
        }
    }

    pub fn repo(&self) -> Option<&str> {
        match self {
            Scope::Organization { .. } => None,
            Scope::Repository { repo, .. } => Some(repo),
        }
    }

    pub fn is_repository(&self) -> bool {
        matches!(self, Scope::Repository { .. })
    }

    /// REST path prefix for runner endpoints (`repos/o/r` or `orgs/o`).
    pub fn api_path(&self) -> String {
        match self {
            Scope::Organization { owner } => format!("orgs/{owner}"),
            Scope::Repository { owner, repo } => format!("repos/{owner}/{repo}"),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Organization { owner } => write!(f, "{owner}"),
            Scope::Repository { owner, repo } => write!(f, "{owner}/{repo}"),
        }
    }
}

impl FromStr for Scope {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_matches('/');
        let parts: Vec<&str> = trimmed.split('/').collect();
        let valid = |p: &str| !p.is_empty() && !p.contains(char::is_whitespace);
        match parts.as_slice() {
            [owner] if valid(owner) => Ok(Scope::Organization {
                owner: owner.to_string(),
            }),
            [owner, repo] if valid(owner) && valid(repo) => Ok(Scope::Repository {
                owner: owner.to_string(),
                repo: repo.to_string(),
            }),
            _ => Err(CoreError::InvalidScope(s.to_string())),
        }
    }
}

/// Normalize a configured host URL: github.com becomes `None`.
pub fn host_domain_from_url(url: &str) -> Option<String> {
    let url = url.trim().trim_end_matches('/');
    if url.is_empty() || url == DEFAULT_GITHUB_URL || url == "https://www.github.com" {
        None
    } else {
        Some(url.to_string())
    }
}

/// REST API base for a host.
pub fn api_base_url(host_domain: Option<&str>) -> String {
    match host_domain {
        None => DEFAULT_API_URL.to_string(),
        Some(host) => format!("{}/api/v3", host.trim_end_matches('/')),
    }
}

/// Web URL of a repository (`https://github.com/owner/repo`).
pub fn repository_url(host_domain: Option<&str>, full_name: &str) -> String {
    let host = host_domain.unwrap_or(DEFAULT_GITHUB_URL).trim_end_matches('/');
    format!("{host}/{full_name}")
}

/// Split a repository web URL into `(host_domain, owner/repo)`.
pub fn parse_repository_url(url: &str) -> CoreResult<(Option<String>, String)> {
    let invalid = || CoreError::InvalidRepositoryUrl(url.to_string());
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(invalid)?;
    let scheme_len = url.len() - rest.len();
    let mut segments = rest.trim_end_matches('/').splitn(2, '/');
    let host = segments.next().filter(|h| !h.is_empty()).ok_or_else(invalid)?;
    let path = segments.next().ok_or_else(invalid)?;

    match path.parse::<Scope>() {
        Ok(scope @ Scope::Repository { .. }) => {
            let host_url = &url[..scheme_len + host.len()];
            Ok((host_domain_from_url(host_url), scope.to_string()))
        }
        _ => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_org_and_repo_scopes() {
        assert_eq!(
            "octocat".parse::<Scope>().unwrap(),
            Scope::Organization {
                owner: "octocat".into()
            }
        );
        let repo: Scope = "octocat/hello-world".parse().unwrap();
        assert_eq!(repo.owner(), "octocat");
        assert_eq!(repo.repo(), Some("hello-world"));
        assert_eq!(repo.api_path(), "repos/octocat/hello-world");
    }

    #[test]
    fn rejects_bad_scopes() {
        assert!("".parse::<Scope>().is_err());
        assert!("a/b/c".parse::<Scope>().is_err());
        assert!("a//".parse::<Scope>().is_ok());
        assert!("a b".parse::<Scope>().is_err());
    }

    #[test]
    fn github_dot_com_has_no_host_domain() {
        assert_eq!(host_domain_from_url("https://github.com/"), None);
        assert_eq!(
            host_domain_from_url("https://ghe.example.com"),
            Some("https://ghe.example.com".to_string())
        );
    }

    #[test]
    fn api_base_for_hosts() {
        assert_eq!(api_base_url(None), "https://api.github.com");
        assert_eq!(
            api_base_url(Some("https://ghe.example.com/")),
            "https://ghe.example.com/api/v3"
        );
    }

    #[test]
    fn repository_url_round_trips() {
        let url = repository_url(None, "octocat/hello-world");
        assert_eq!(url, "https://github.com/octocat/hello-world");
        assert_eq!(
            parse_repository_url(&url).unwrap(),
            (None, "octocat/hello-world".to_string())
        );

        let ghe = repository_url(Some("https://ghe.example.com"), "a/b");
        assert_eq!(
            parse_repository_url(&ghe).unwrap(),
            (Some("https://ghe.example.com".to_string()), "a/b".to_string())
        );
    }

    #[test]
    fn org_url_is_not_a_repository() {
        assert!(parse_repository_url("https://github.com/octocat").is_err());
        assert!(parse_repository_url("ftp://github.com/a/b").is_err());
    }
}
