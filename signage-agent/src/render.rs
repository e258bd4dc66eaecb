//! Presentation boundary
//!
//! The playback core never draws anything itself. It hands resolved content and
//! its interpolated [`Presentation`] to a [`RenderSink`], which may be a real
//! display surface, a test recorder, or the [`LoggingSink`] used by the headless
//! binary.

use std::sync::Arc;
use tracing::{debug, info};

use crate::cache::CachedContent;
use crate::content::{ContentKind, ContentUnit};
use crate::transition::Presentation;

/// Failure to show a piece of content. Always scoped to one zone.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlaybackError {
    #[error("Content {app_id} unavailable: {reason}")]
    ContentUnavailable { app_id: String, reason: String },
    #[error("Failed to render {app_id}: {reason}")]
    Render { app_id: String, reason: String },
}

/// Content unit plus its loaded media, ready to be shown
#[derive(Debug, Clone)]
pub struct ResolvedContent {
    pub app_id: String,
    pub unit: Arc<ContentUnit>,
    pub media: Option<Arc<CachedContent>>,
}

/// Capability to put content on a display surface
pub trait RenderSink: Send + Sync {
    /// Show (or update) `content` in `zone_id` with the given visual state
    fn present(&self, zone_id: &str, content: &ResolvedContent, state: Presentation) -> Result<(), PlaybackError>;

    /// Remove an item that is no longer visible
    fn discard(&self, zone_id: &str, content: &ResolvedContent);

    /// Blank the whole zone
    fn clear(&self, zone_id: &str);
}

/// Headless sink: reports what would be on screen
#[derive(Debug, Default)]
pub struct LoggingSink;

impl RenderSink for LoggingSink {
    fn present(&self, zone_id: &str, content: &ResolvedContent, state: Presentation) -> Result<(), PlaybackError> {
        if content.unit.kind == ContentKind::Unsupported {
            return Err(PlaybackError::Render {
                app_id: content.app_id.clone(),
                reason: "unsupported content type".to_string(),
            });
        }

        if state == Presentation::SETTLED {
            info!(
                "[{}] showing {} ({:?}{})",
                zone_id,
                content.app_id,
                content.unit.kind,
                content
                    .media
                    .as_ref()
                    .map(|m| format!(", {} bytes", m.payload.len()))
                    .unwrap_or_default()
            );
        } else {
            debug!("[{}] {} at {:?}", zone_id, content.app_id, state);
        }
        Ok(())
    }

    fn discard(&self, zone_id: &str, content: &ResolvedContent) {
        debug!("[{}] discarding {}", zone_id, content.app_id);
    }

    fn clear(&self, zone_id: &str) {
        info!("[{}] cleared", zone_id);
    }
}
