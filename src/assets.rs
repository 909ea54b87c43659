//! Static asset serving

use crate::error::{PushError, Result};
use bytes::Bytes;
use std::path::{Component, Path, PathBuf};

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// A loaded asset
#[derive(Debug, Clone, PartialEq)]
pub struct Asset {
    pub body: Bytes,
    pub content_type: String,
}

/// Files under a root directory, addressed by request resource path
#[derive(Debug, Clone)]
pub struct StaticAssets {
    root: PathBuf,
}

impl StaticAssets {
    /// Serve files under `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Load the asset at `resource` (e.g. `/index.js`)
    ///
    /// Anything that would leave the root is reported as not found.
    pub async fn serve(&self, resource: &str) -> Result<Asset> {
        let path = self.resolve(resource)?;

        let body = match tokio::fs::read(&path).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PushError::NotFound(resource.to_string()));
            }
            Err(e) => {
                return Err(PushError::StorageUnavailable(format!(
                    "{}: {}",
                    path.display(),
                    e
                )));
            }
        };

        tracing::debug!(resource, bytes = body.len(), "Static asset served");
        Ok(Asset {
            body: Bytes::from(body),
            content_type: content_type(resource),
        })
    }

    fn resolve(&self, resource: &str) -> Result<PathBuf> {
        let relative = Path::new(resource.trim_start_matches('/'));
        let mut path = self.root.clone();
        let mut depth = 0;

        for component in relative.components() {
            match component {
                Component::Normal(segment) => {
                    path.push(segment);
                    depth += 1;
                }
                Component::CurDir => {}
                _ => return Err(PushError::NotFound(resource.to_string())),
            }
        }

        if depth == 0 {
            return Err(PushError::NotFound(resource.to_string()));
        }
        Ok(path)
    }
}

/// Content type from the first path segment of `resource`
///
/// `/index.js` is `text/javascript`; nested paths are typed by their top
/// directory, so `/img/logo.png` falls back to the default.
pub fn content_type(resource: &str) -> String {
    let first = resource.trim_start_matches('/').split('/').next().unwrap_or("");
    mime_guess::from_path(first)
        .first_raw()
        .unwrap_or(FALLBACK_CONTENT_TYPE)
        .to_string()
}
