/*!
Ready-made documents for the stub cloud
*/

use serde_json::json;
use signage_agent::content::{ContentKind, ContentUnit};
use signage_agent::manifest::{ChannelDescriptor, Manifest, Zone, ZoneApp};
use signage_agent::transition::TransitionKind;

/// One-zone manifest rotating an inline HTML welcome page and the `promo` app
pub fn lobby_manifest(version: &str) -> Manifest {
    let entry = |app_id: &str, order: i64| ZoneApp {
        id: None,
        app_id: app_id.to_string(),
        order,
        duration_seconds: 10,
        start_date: None,
        end_date: None,
        app: None,
    };

    Manifest {
        channel: ChannelDescriptor {
            id: Some("lobby".to_string()),
            name: Some("Lobby".to_string()),
            version: Some(version.to_string()),
            background: None,
            transition_type: TransitionKind::Fade,
            transition_duration_ms: 300,
        },
        zones: vec![Zone {
            zone_id: "full".to_string(),
            name: None,
            x_percent: 0.0,
            y_percent: 0.0,
            width_percent: 100.0,
            height_percent: 100.0,
            z_index: 0,
            background: None,
            apps: vec![
                ZoneApp {
                    app: Some(ContentUnit {
                        id: "welcome".to_string(),
                        kind: ContentKind::Html,
                        config: json!({ "html": "<h1>Welcome</h1>" }),
                        media_url: None,
                    }),
                    ..entry("welcome", 0)
                },
                entry("promo", 1),
            ],
        }],
    }
}

/// Image unit served from `/apps/{id}`
pub fn image_app(id: &str, url: &str) -> ContentUnit {
    ContentUnit {
        id: id.to_string(),
        kind: ContentKind::Image,
        config: json!({ "fit": "cover" }),
        media_url: Some(url.to_string()),
    }
}
