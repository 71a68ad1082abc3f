//! HTTP client for fetching Potree point cloud files.
//!
//! The client fetches the `cloud.js` description and the node and hierarchy
//! files below its octree directory. It is runtime-agnostic and works with
//! any async executor.

use crate::cache::{Cache, NoCache};
use crate::error::{Error, Result};
use potree_format::{CloudMetadata, parse_cloud_metadata};
use serde::Deserialize;
use serde::de::{Deserializer, MapAccess, Visitor};
use std::fmt;
use std::sync::Arc;

/// Name of the metadata file a point cloud path must point to.
const CLOUD_FILE: &str = "cloud.js";

/// Signing parameters for servers that require signed URLs.
///
/// Each node file is signed with the key of the last entry (in file order)
/// whose URL contains the file's path relative to the octree directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UrlSigner {
    /// Expiry timestamp passed through to the server.
    pub expires: String,
    /// Name of the signing key.
    #[serde(rename = "keyname", alias = "key_name")]
    pub key_name: String,
    /// Signed URLs and their signatures, in the order the file lists them.
    #[serde(deserialize_with = "ordered_entries")]
    pub urls: Vec<(String, String)>,
}

impl UrlSigner {
    /// Query suffix for `path`, or `None` if no signed URL contains it.
    #[must_use]
    pub fn query_for(&self, path: &str) -> Option<String> {
        let signature = self
            .urls
            .iter()
            .rev()
            .find(|(url, _)| url.contains(path))
            .map(|(_, signature)| signature)?;
        Some(format!(
            "?Expires={}&KeyName={}&Signature={signature}",
            self.expires, self.key_name
        ))
    }
}

/// Read a JSON object as key/value pairs without reordering them.
fn ordered_entries<'de, D>(
    deserializer: D,
) -> std::result::Result<Vec<(String, String)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct Entries;

    impl<'de> Visitor<'de> for Entries {
        type Value = Vec<(String, String)>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map of signed URLs to signatures")
        }

        fn visit_map<A>(self, mut map: A) -> std::result::Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some(entry) = map.next_entry()? {
                entries.push(entry);
            }
            Ok(entries)
        }
    }

    deserializer.deserialize_map(Entries)
}

/// HTTP client for one point cloud.
///
/// # Example
///
/// ```ignore
/// let client = Client::new("https://host/pointclouds/lion/cloud.js")?;
/// let metadata = client.fetch_cloud().await?;
/// ```
pub struct Client<C: Cache = NoCache> {
    http: reqwest::Client,
    cache: Arc<C>,
    cloud_url: String,
    base_dir: String,
    signer: Option<UrlSigner>,
}

impl Client<NoCache> {
    /// Create a new client for `cloud_url` with no caching.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedSource`] if the URL does not name a
    /// `cloud.js` file.
    pub fn new(cloud_url: &str) -> Result<Self> {
        Self::with_cache(cloud_url, NoCache)
    }
}

impl<C: Cache> Client<C> {
    /// Create a new client with a custom cache.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedSource`] if the URL does not name a
    /// `cloud.js` file.
    pub fn with_cache(cloud_url: &str, cache: C) -> Result<Self> {
        Self::with_http_and_cache(reqwest::Client::new(), cloud_url, cache)
    }

    /// Create a new client with a custom HTTP client and cache.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedSource`] if the URL does not name a
    /// `cloud.js` file.
    pub fn with_http_and_cache(http: reqwest::Client, cloud_url: &str, cache: C) -> Result<Self> {
        if !cloud_url.contains(CLOUD_FILE) {
            return Err(Error::UnsupportedSource {
                path: cloud_url.to_string(),
            });
        }
        let base_dir = cloud_url
            .rsplit_once('/')
            .map_or(".", |(dir, _)| dir)
            .to_string();
        Ok(Self {
            http,
            cache: Arc::new(cache),
            cloud_url: cloud_url.to_string(),
            base_dir,
            signer: None,
        })
    }

    /// Sign node and hierarchy URLs with `signer`.
    #[must_use]
    pub fn with_signer(mut self, signer: UrlSigner) -> Self {
        self.signer = Some(signer);
        self
    }

    /// URL of the `cloud.js` file.
    #[must_use]
    pub fn cloud_url(&self) -> &str {
        &self.cloud_url
    }

    /// The byte cache consulted before the network.
    #[must_use]
    pub fn cache(&self) -> &C {
        &self.cache
    }

    /// Resolve the octree directory named in `cloud.js`.
    ///
    /// Absolute URLs and root-relative paths are kept; anything else is
    /// relative to the directory holding `cloud.js`.
    #[must_use]
    pub fn octree_url(&self, octree_dir: &str) -> String {
        let dir = octree_dir.trim_end_matches('/');
        if dir.contains("://") || dir.starts_with('/') {
            dir.to_string()
        } else {
            format!("{}/{dir}", self.base_dir)
        }
    }

    /// Full URL of a file below the octree directory, signed if a signer is
    /// configured.
    #[must_use]
    pub fn file_url(&self, octree_dir: &str, path: &str) -> String {
        let mut url = format!("{}/{path}", self.octree_url(octree_dir));
        if let Some(signer) = &self.signer {
            match signer.query_for(path) {
                Some(query) => url.push_str(&query),
                None => tracing::debug!(path, "no signed url for path"),
            }
        }
        url
    }

    /// Fetch and parse the `cloud.js` file.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP request fails or the file cannot be parsed.
    pub async fn fetch_cloud(&self) -> Result<CloudMetadata> {
        let data = self.fetch_bytes(&self.cloud_url).await?;
        let metadata = parse_cloud_metadata(&data)?;
        tracing::info!(
            url = %self.cloud_url,
            version = %metadata.version,
            points = ?metadata.points,
            layout = %metadata.point_layout,
            "loaded point cloud metadata"
        );
        Ok(metadata)
    }

    /// Fetch a node or hierarchy file below the octree directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP request fails.
    pub async fn fetch_file(&self, octree_dir: &str, path: &str) -> Result<Vec<u8>> {
        let url = self.file_url(octree_dir, path);
        self.fetch_bytes(&url).await
    }

    /// Fetch raw bytes from a URL, using cache if available.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP request fails or returns a non-success
    /// status.
    pub async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        if let Some(data) = self.cache.get(url).await? {
            tracing::debug!(url, "cache hit");
            return Ok(data);
        }

        tracing::debug!(url, "fetching");

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Http {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let data = response
            .bytes()
            .await
            .map_err(|e| Error::Http {
                url: url.to_string(),
                message: e.to_string(),
            })?
            .to_vec();

        self.cache.put(url, data.clone()).await?;

        Ok(data)
    }
}
