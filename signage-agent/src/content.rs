//! Content units and their lazy resolution
//!
//! A zone entry only references an `app_id`. Resolution turns it into a
//! [`ContentUnit`], either from the inline definition carried by the manifest
//! or from `GET /apps/{id}`, and loads its media through the shared cache.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::cache::ContentCache;
use crate::cloud::CloudApi;
use crate::identity::DeviceIdentityManager;
use crate::manifest::ZoneApp;
use crate::render::{PlaybackError, ResolvedContent};

/// Kind of displayable content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Image,
    Video,
    #[serde(alias = "webpage", alias = "embed", alias = "url")]
    Web,
    #[serde(alias = "markup", alias = "text")]
    Html,
    Clock,
    Weather,
    #[serde(other)]
    Unsupported,
}

/// A typed, configured piece of displayable content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentUnit {
    pub id: String,
    #[serde(rename = "type", alias = "kind")]
    pub kind: ContentKind,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub media_url: Option<String>,
}

impl ContentUnit {
    /// URL of the media file to download, for image and video units only
    pub fn media_url(&self) -> Option<&str> {
        match self.kind {
            ContentKind::Image | ContentKind::Video => self
                .media_url
                .as_deref()
                .or_else(|| self.config.get("url").and_then(serde_json::Value::as_str)),
            _ => None,
        }
    }
}

/// Maps a zone entry to its content unit
#[async_trait]
pub trait ContentResolver: Send + Sync {
    async fn resolve(&self, item: &ZoneApp) -> Result<Arc<ContentUnit>, PlaybackError>;
}

/// Resolver backed by inline manifest data and the cloud `/apps` endpoint.
/// Units fetched from the cloud are memoised per `app_id`.
pub struct CatalogResolver {
    api: Arc<dyn CloudApi>,
    identity: Arc<DeviceIdentityManager>,
    units: Mutex<HashMap<String, Arc<ContentUnit>>>,
}

impl CatalogResolver {
    pub fn new(api: Arc<dyn CloudApi>, identity: Arc<DeviceIdentityManager>) -> Self {
        Self {
            api,
            identity,
            units: Mutex::new(HashMap::new()),
        }
    }

    pub fn forget(&self) {
        self.units.lock().clear();
    }
}

#[async_trait]
impl ContentResolver for CatalogResolver {
    async fn resolve(&self, item: &ZoneApp) -> Result<Arc<ContentUnit>, PlaybackError> {
        if let Some(inline) = &item.app {
            return Ok(Arc::new(inline.clone()));
        }
        if let Some(unit) = self.units.lock().get(&item.app_id) {
            return Ok(unit.clone());
        }

        let identity = self.identity.identity().ok_or_else(|| PlaybackError::ContentUnavailable {
            app_id: item.app_id.clone(),
            reason: "player is not paired".to_string(),
        })?;

        debug!("Resolving app {} from the cloud", item.app_id);
        let unit = self
            .api
            .fetch_app(&identity, &item.app_id)
            .await
            .map_err(|e| PlaybackError::ContentUnavailable {
                app_id: item.app_id.clone(),
                reason: e.to_string(),
            })?;

        let unit = Arc::new(unit);
        self.units.lock().insert(item.app_id.clone(), unit.clone());
        Ok(unit)
    }
}

/// Resolve `item` and load its media through `cache`
pub async fn resolve_content(
    resolver: &dyn ContentResolver,
    cache: &ContentCache,
    item: &ZoneApp,
) -> Result<ResolvedContent, PlaybackError> {
    let unit = resolver.resolve(item).await?;

    let media = match unit.media_url() {
        Some(url) => Some(cache.load(url).await.map_err(|e| PlaybackError::ContentUnavailable {
            app_id: item.app_id.clone(),
            reason: e.to_string(),
        })?),
        None => None,
    };

    Ok(ResolvedContent {
        app_id: item.app_id.clone(),
        unit,
        media,
    })
}
