//! Byte transport used by registry clients and the installer
//!
//! The broker only needs "give me the bytes behind this URL" and "list the
//! tags of this git remote"; everything else (pooling, redirects, proxies)
//! is the transport's business.

use super::RegistryError;
use reqwest::blocking::Client;
use std::process::Command;
use std::time::Duration;
use tracing::debug;

/// HTTP connect timeout
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Whole-request timeout; package manager tarballs can be large
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Credentials attached to registry requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Auth {
    Bearer(String),
    Basic { username: String, password: String },
}

/// A single GET request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    pub accept: Option<String>,
    pub auth: Option<Auth>,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        FetchRequest {
            url: url.into(),
            accept: None,
            auth: None,
        }
    }

    pub fn accept(mut self, accept: impl Into<String>) -> Self {
        self.accept = Some(accept.into());
        self
    }

    pub fn auth(mut self, auth: Option<Auth>) -> Self {
        self.auth = auth;
        self
    }
}

/// Capability to fetch remote content
pub trait Transport: Send + Sync {
    /// Fetch the full body behind a URL
    fn fetch(&self, request: &FetchRequest) -> Result<Vec<u8>, RegistryError>;

    /// List the tag refs (`refs/tags/...`) of a git remote
    fn list_remote_tags(&self, repository: &str) -> Result<Vec<String>, RegistryError>;
}

/// Blocking reqwest client plus the `git` executable
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, RegistryError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(format!("corepin/{}", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn fetch(&self, request: &FetchRequest) -> Result<Vec<u8>, RegistryError> {
        if !request.url.starts_with("http://") && !request.url.starts_with("https://") {
            return Err(RegistryError::InvalidUrl(request.url.clone()));
        }

        debug!(url = %request.url, "GET");
        let mut builder = self.client.get(&request.url);
        if let Some(ref accept) = request.accept {
            builder = builder.header(reqwest::header::ACCEPT, accept);
        }
        builder = match request.auth {
            Some(Auth::Bearer(ref token)) => builder.bearer_auth(token),
            Some(Auth::Basic {
                ref username,
                ref password,
            }) => builder.basic_auth(username, Some(password)),
            None => builder,
        };

        let response = builder.send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(RegistryError::HttpStatus {
                status: status.as_u16(),
                url: request.url.clone(),
            });
        }

        Ok(response.bytes()?.to_vec())
    }

    fn list_remote_tags(&self, repository: &str) -> Result<Vec<String>, RegistryError> {
        debug!(repository, "git ls-remote --tags");
        let output = Command::new("git")
            .args(["ls-remote", "--tags", repository])
            .output()
            .map_err(|e| RegistryError::Git(format!("failed to run git: {}", e)))?;

        if !output.status.success() {
            return Err(RegistryError::Git(format!(
                "git ls-remote {} failed: {}",
                repository,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(parse_ls_remote(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Extract ref names from `git ls-remote` output (`<sha>\t<ref>` per line)
pub fn parse_ls_remote(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.split('\t').nth(1))
        .map(|reference| reference.trim_end_matches("^{}").to_string())
        .collect()
}
