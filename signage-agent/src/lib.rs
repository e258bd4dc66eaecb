//! Signage Agent - headless digital signage player engine
//!
//! Pairs a screen with the signage cloud, downloads its channel manifest and
//! plays it zone by zone:
//! - Device pairing and credential storage (keyring or file)
//! - Heartbeats with resource metrics
//! - Per-zone playlists with timed rotation and visual transitions
//! - Shared, deduplicating content cache with batched preload
//!
//! Rendering is delegated to a [`render::RenderSink`].

pub mod cache;
pub mod cloud;
pub mod composer;
pub mod config;
pub mod content;
pub mod device;
pub mod identity;
pub mod manifest;
pub mod metrics;
pub mod player;
pub mod playlist;
pub mod render;
pub mod service;
pub mod store;
pub mod timer;
pub mod transition;

#[cfg(test)]
pub(crate) mod testing;
