//! Playback manifest model
//!
//! The manifest describes one screen:
//! - channel descriptor (background, default transition, version)
//! - zones in percentage coordinates, each with its own ordered app list
//!
//! A manifest is immutable once fetched and replaced wholesale on refresh.
//! [`Manifest::demo`] is the built-in fallback shown when the cloud is unreachable.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::content::{ContentKind, ContentUnit};
use crate::transition::TransitionKind;

/// Complete manifest document (`{ channel, zones }`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub channel: ChannelDescriptor,
    #[serde(default)]
    pub zones: Vec<Zone>,
}

/// Screen-level descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelDescriptor {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub background: Option<String>,
    #[serde(default)]
    pub transition_type: TransitionKind,
    #[serde(default = "default_transition_ms")]
    pub transition_duration_ms: u64,
}

/// Rectangular, independently scheduled area of the screen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub zone_id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub x_percent: f32,
    pub y_percent: f32,
    pub width_percent: f32,
    pub height_percent: f32,
    #[serde(default)]
    pub z_index: i32,
    #[serde(default)]
    pub background: Option<String>,
    /// Missing or null lists are treated as empty (the zone simply stays blank)
    #[serde(default, deserialize_with = "null_as_empty")]
    pub apps: Vec<ZoneApp>,
}

/// One scheduled content assignment within a zone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneApp {
    #[serde(default)]
    pub id: Option<String>,
    pub app_id: String,
    #[serde(default)]
    pub order: i64,
    /// Seconds on screen; zero or negative means "until told otherwise"
    #[serde(default)]
    pub duration_seconds: i64,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    /// Inline content definition, saves a round-trip to `/apps/{id}`
    #[serde(default)]
    pub app: Option<ContentUnit>,
}

fn default_transition_ms() -> u64 {
    500
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<ZoneApp>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<ZoneApp>>::deserialize(deserializer)?.unwrap_or_default())
}

impl Manifest {
    /// Parse a manifest from its JSON representation
    pub fn from_json(raw: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(raw)
    }

    /// Version string reported in heartbeats
    pub fn version(&self) -> Option<&str> {
        self.channel.version.as_deref()
    }

    /// Every media URL referenced by inline content, in zone order, without duplicates
    pub fn media_urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = Vec::new();
        for zone in &self.zones {
            for app in &zone.apps {
                if let Some(url) = app.app.as_ref().and_then(ContentUnit::media_url) {
                    if !urls.iter().any(|u| u == url) {
                        urls.push(url.to_string());
                    }
                }
            }
        }
        urls
    }

    /// Built-in three-zone layout used when no manifest can be fetched
    pub fn demo() -> Self {
        let inline = |id: &str, kind: ContentKind, config: serde_json::Value| ContentUnit {
            id: id.to_string(),
            kind,
            config,
            media_url: None,
        };

        Manifest {
            channel: ChannelDescriptor {
                id: Some("demo".to_string()),
                name: Some("Demo channel".to_string()),
                version: Some("demo".to_string()),
                background: Some("#101418".to_string()),
                transition_type: TransitionKind::Fade,
                transition_duration_ms: default_transition_ms(),
            },
            zones: vec![
                Zone {
                    zone_id: "main".to_string(),
                    name: Some("Main".to_string()),
                    x_percent: 0.0,
                    y_percent: 0.0,
                    width_percent: 75.0,
                    height_percent: 90.0,
                    z_index: 0,
                    background: None,
                    apps: vec![
                        ZoneApp {
                            id: None,
                            app_id: "demo-welcome".to_string(),
                            order: 0,
                            duration_seconds: 10,
                            start_date: None,
                            end_date: None,
                            app: Some(inline(
                                "demo-welcome",
                                ContentKind::Html,
                                json!({ "html": "<h1>Welcome</h1><p>This screen is not paired to a channel yet.</p>" }),
                            )),
                        },
                        ZoneApp {
                            id: None,
                            app_id: "demo-pairing-help".to_string(),
                            order: 1,
                            duration_seconds: 10,
                            start_date: None,
                            end_date: None,
                            app: Some(inline(
                                "demo-pairing-help",
                                ContentKind::Html,
                                json!({ "html": "<p>Assign a channel from the console to start playback.</p>" }),
                            )),
                        },
                    ],
                },
                Zone {
                    zone_id: "sidebar".to_string(),
                    name: Some("Sidebar".to_string()),
                    x_percent: 75.0,
                    y_percent: 0.0,
                    width_percent: 25.0,
                    height_percent: 90.0,
                    z_index: 0,
                    background: None,
                    apps: vec![ZoneApp {
                        id: None,
                        app_id: "demo-weather".to_string(),
                        order: 0,
                        duration_seconds: 0,
                        start_date: None,
                        end_date: None,
                        app: Some(inline(
                            "demo-weather",
                            ContentKind::Weather,
                            json!({ "location": "auto", "units": "metric" }),
                        )),
                    }],
                },
                Zone {
                    zone_id: "ticker".to_string(),
                    name: Some("Ticker".to_string()),
                    x_percent: 0.0,
                    y_percent: 90.0,
                    width_percent: 100.0,
                    height_percent: 10.0,
                    z_index: 1,
                    background: None,
                    apps: vec![ZoneApp {
                        id: None,
                        app_id: "demo-clock".to_string(),
                        order: 0,
                        duration_seconds: 0,
                        start_date: None,
                        end_date: None,
                        app: Some(inline(
                            "demo-clock",
                            ContentKind::Clock,
                            json!({ "format": "%H:%M", "timezone": "local" }),
                        )),
                    }],
                },
            ],
        }
    }
}

impl Zone {
    /// Apps whose date window contains `now`, still in document order
    pub fn active_apps(&self, now: DateTime<Utc>) -> Vec<ZoneApp> {
        self.apps.iter().filter(|app| app.is_active(now)).cloned().collect()
    }
}

impl ZoneApp {
    /// Whether `now` falls inside the optional start/end window.
    ///
    /// Bounds accept RFC 3339 timestamps or plain `YYYY-MM-DD` dates; a date-only
    /// end bound covers the whole day. Unparseable bounds are ignored.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        if let Some(start) = self.start_date.as_deref().and_then(|s| parse_bound(s, false)) {
            if now < start {
                return false;
            }
        }
        if let Some(end) = self.end_date.as_deref().and_then(|s| parse_bound(s, true)) {
            if now > end {
                return false;
            }
        }
        true
    }
}

fn parse_bound(raw: &str, end_of_day: bool) -> Option<DateTime<Utc>> {
    if raw.trim().is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        let time = if end_of_day {
            date.and_hms_opt(23, 59, 59)
        } else {
            date.and_hms_opt(0, 0, 0)
        };
        return time.map(|t| t.and_utc());
    }
    warn!("Ignoring unparseable schedule bound: {}", raw);
    None
}
