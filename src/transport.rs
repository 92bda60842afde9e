//! License server transport.
use crate::error::Result;
#[cfg(feature = "http")]
use crate::error::Error;

/// An immutable, ordered set of request headers.
///
/// Names compare case-insensitively. [`HeaderSet::overlay`] builds a new set
/// where the overlaid entries win.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSet {
    entries: Vec<(String, String)>,
}

impl HeaderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a copy with `name` set to `value`.
    #[must_use]
    pub fn with(&self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let mut entries = self.entries.clone();
        insert(&mut entries, name.into(), value.into());
        Self { entries }
    }

    /// Return a copy with every header of `other` applied on top.
    #[must_use]
    pub fn overlay<'a, I, K, V>(&self, other: I) -> Self
    where
        I: IntoIterator<Item = (&'a K, &'a V)>,
        K: AsRef<str> + ?Sized + 'a,
        V: AsRef<str> + ?Sized + 'a,
    {
        let mut entries = self.entries.clone();
        for (name, value) in other {
            insert(
                &mut entries,
                name.as_ref().to_string(),
                value.as_ref().to_string(),
            );
        }
        Self { entries }
    }

    /// Value for `name`, if set.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn insert(entries: &mut Vec<(String, String)>, name: String, value: String) {
    match entries.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(&name)) {
        Some(entry) => *entry = (name, value),
        None => entries.push((name, value)),
    }
}

/// Performs license and provisioning POSTs.
///
/// Calls block the calling thread. Implementations do not retry.
pub trait Transport: Send + Sync {
    fn post(&self, url: &str, body: &[u8], headers: &HeaderSet) -> Result<Vec<u8>>;
}

/// Blocking HTTP transport backed by reqwest.
#[cfg(feature = "http")]
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

#[cfg(feature = "http")]
impl HttpTransport {
    /// Build a transport with the given user agent.
    pub fn new(user_agent: Option<&str>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(user_agent.unwrap_or(concat!("rsmediadrm/", env!("CARGO_PKG_VERSION"))))
            .build()
            .map_err(|e| Error::Transport(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Wrap an existing client.
    pub fn from_client(client: reqwest::blocking::Client) -> Self {
        Self { client }
    }
}

#[cfg(feature = "http")]
impl Transport for HttpTransport {
    fn post(&self, url: &str, body: &[u8], headers: &HeaderSet) -> Result<Vec<u8>> {
        let mut request = self.client.post(url).body(body.to_vec());
        for (name, value) in headers.iter() {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .map_err(|e| Error::Transport(format!("Request to {} failed: {}", url, e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Transport(format!(
                "Server responded with {} for {}",
                status, url
            )));
        }

        response
            .bytes()
            .map(|b| b.to_vec())
            .map_err(|e| Error::Transport(format!("Failed to read response body: {}", e)))
    }
}
