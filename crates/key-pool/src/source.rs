//! Credential sources
//!
//! A source yields the full current set of credential strings. The pool never
//! talks to a source directly; `reload` fetches and hands the result to
//! `CredentialPool::update`.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use tracing::debug;

use crate::error::{Error, Result};

/// Boxed future returned by [`KeySource::fetch`].
pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<String>>> + Send + 'a>>;

/// Where the credential set comes from.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn KeySource>`).
pub trait KeySource: Send + Sync {
    /// Short description for logs (path or URL).
    fn describe(&self) -> String;

    /// Fetch the complete current credential set.
    fn fetch(&self) -> FetchFuture<'_>;
}

/// Credentials stored as a JSON array of strings in a local file.
///
/// A missing file is an empty set, so a fresh deployment can start before
/// the file is provisioned.
pub struct FileKeySource {
    path: PathBuf,
}

impl FileKeySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn read(&self) -> Result<Vec<String>> {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "credential file not found, using empty set");
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(Error::Source(format!(
                    "reading {}: {e}",
                    self.path.display()
                )));
            }
        };

        if data.trim().is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = serde_json::from_str(&data).map_err(|e| {
            Error::Source(format!("parsing {}: {e}", self.path.display()))
        })?;
        Ok(normalize(keys))
    }
}

impl KeySource for FileKeySource {
    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }

    fn fetch(&self) -> FetchFuture<'_> {
        Box::pin(self.read())
    }
}

/// Credentials served by a provisioning service as a JSON array of strings.
pub struct HttpKeySource {
    client: reqwest::Client,
    url: String,
    /// `url` without userinfo, query or fragment; safe to log.
    display: String,
}

impl HttpKeySource {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        let url = url.into();
        let display = loggable_url(&url);
        Self {
            client,
            url,
            display,
        }
    }

    async fn get(&self) -> Result<Vec<String>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| Error::Source(format!("GET {}: {}", self.display, e.without_url())))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Source(format!("GET {} returned {status}", self.display)));
        }

        let keys: Vec<String> = response
            .json()
            .await
            .map_err(|e| {
                Error::Source(format!(
                    "decoding response from {}: {}",
                    self.display,
                    e.without_url()
                ))
            })?;
        Ok(normalize(keys))
    }
}

impl KeySource for HttpKeySource {
    fn describe(&self) -> String {
        self.display.clone()
    }

    fn fetch(&self) -> FetchFuture<'_> {
        Box::pin(self.get())
    }
}

/// Scheme, host and path of a provisioning URL. Query strings and userinfo
/// may carry access tokens.
fn loggable_url(url: &str) -> String {
    match reqwest::Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_query(None);
            parsed.set_fragment(None);
            let _ = parsed.set_username("");
            let _ = parsed.set_password(None);
            parsed.to_string()
        }
        Err(_) => url
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    }
}

/// Trim whitespace and drop blank entries.
fn normalize(keys: Vec<String>) -> Vec<String> {
    keys.into_iter()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect()
}
