/*!
In-memory stub of the signage cloud

Implements the player-facing endpoints:
- `GET  /players/pairing-code`
- `GET  /players/pairing-status?code=`
- `GET  /players/{id}/config`      (X-Device-Token)
- `POST /players/{id}/heartbeat`   (X-Device-Token)
- `GET  /channels/{id}/manifest`   (X-Device-Token)
- `GET  /apps/{id}`                (X-Device-Token)
- `GET  /media/{name}`             (public, optionally slowed down)

Codes are approved from the test side with [`StubCloud::approve`], standing in
for an operator typing the code into the console.
*/

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{Duration, Utc};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use signage_agent::cloud::{RemoteConfig, DEVICE_TOKEN_HEADER};
use signage_agent::content::ContentUnit;
use signage_agent::manifest::Manifest;

#[derive(Debug, Clone)]
struct Credentials {
    player_id: String,
    device_token: String,
}

#[derive(Default)]
struct CloudState {
    /// Issued codes, with credentials once approved
    codes: HashMap<String, Option<Credentials>>,
    /// player_id -> device token
    tokens: HashMap<String, String>,
    configs: HashMap<String, RemoteConfig>,
    heartbeats: HashMap<String, Vec<Value>>,
    manifests: HashMap<String, Manifest>,
    apps: HashMap<String, ContentUnit>,
    media: HashMap<String, MediaFile>,
}

#[derive(Debug, Clone)]
struct MediaFile {
    content_type: String,
    body: Vec<u8>,
    delay: std::time::Duration,
}

/// Shared handle to the stub's state
#[derive(Clone, Default)]
pub struct StubCloud {
    state: Arc<Mutex<CloudState>>,
}

#[derive(Debug, Deserialize)]
struct StatusParams {
    code: String,
}

impl StubCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// Approve `code` as the console would. Returns `(player_id, device_token)`.
    pub fn approve(&self, code: &str) -> Option<(String, String)> {
        let mut state = self.state.lock();
        let slot = state.codes.get_mut(code)?;
        let credentials = slot.get_or_insert_with(|| Credentials {
            player_id: format!("player-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]),
            device_token: uuid::Uuid::new_v4().simple().to_string(),
        });
        let credentials = credentials.clone();
        state
            .tokens
            .insert(credentials.player_id.clone(), credentials.device_token.clone());
        info!("Code {} approved as {}", code, credentials.player_id);
        Some((credentials.player_id, credentials.device_token))
    }

    /// Codes handed out so far
    pub fn issued_codes(&self) -> Vec<String> {
        self.state.lock().codes.keys().cloned().collect()
    }

    pub fn set_config(&self, player_id: &str, config: RemoteConfig) {
        self.state.lock().configs.insert(player_id.to_string(), config);
    }

    /// Serve `manifest` at `/channels/{channel_id}/manifest`
    pub fn set_manifest(&self, channel_id: &str, manifest: Manifest) {
        self.state.lock().manifests.insert(channel_id.to_string(), manifest);
    }

    pub fn add_app(&self, unit: ContentUnit) {
        self.state.lock().apps.insert(unit.id.clone(), unit);
    }

    /// Serve `body` at `/media/{name}`, answering only after `delay`
    pub fn add_media(&self, name: &str, content_type: &str, body: &[u8], delay: std::time::Duration) {
        self.state.lock().media.insert(
            name.to_string(),
            MediaFile {
                content_type: content_type.to_string(),
                body: body.to_vec(),
                delay,
            },
        );
    }

    /// Heartbeat bodies received for `player_id`, oldest first
    pub fn heartbeats(&self, player_id: &str) -> Vec<Value> {
        self.state.lock().heartbeats.get(player_id).cloned().unwrap_or_default()
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/players/pairing-code", get(pairing_code))
            .route("/players/pairing-status", get(pairing_status))
            .route("/players/{id}/config", get(player_config))
            .route("/players/{id}/heartbeat", post(heartbeat))
            .route("/channels/{id}/manifest", get(manifest))
            .route("/apps/{id}", get(app))
            .route("/media/{name}", get(media))
            .with_state(self.clone())
    }

    /// Serve on an ephemeral localhost port
    pub async fn serve(&self) -> Result<RunningStub> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let app = self.router();
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("Stub cloud stopped: {}", e);
            }
        });
        info!("Stub cloud listening on {}", addr);
        Ok(RunningStub { addr, handle })
    }

    fn token_matches(&self, player_id: &str, headers: &HeaderMap) -> bool {
        let presented = headers.get(DEVICE_TOKEN_HEADER).and_then(|v| v.to_str().ok());
        match (self.state.lock().tokens.get(player_id), presented) {
            (Some(expected), Some(presented)) => expected == presented,
            _ => false,
        }
    }

    fn any_token_matches(&self, headers: &HeaderMap) -> bool {
        let Some(presented) = headers.get(DEVICE_TOKEN_HEADER).and_then(|v| v.to_str().ok()) else {
            return false;
        };
        self.state.lock().tokens.values().any(|t| t == presented)
    }
}

/// A stub bound to a local port. Stops serving when dropped.
pub struct RunningStub {
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl RunningStub {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

impl Drop for RunningStub {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

// GET /players/pairing-code
async fn pairing_code(State(cloud): State<StubCloud>) -> Json<Value> {
    let code: String = uuid::Uuid::new_v4()
        .simple()
        .to_string()
        .to_ascii_uppercase()
        .chars()
        .take(6)
        .collect();
    cloud.state.lock().codes.insert(code.clone(), None);
    debug!("Issued pairing code {}", code);
    Json(json!({ "code": code, "expires_at": Utc::now() + Duration::minutes(15) }))
}

// GET /players/pairing-status?code=
async fn pairing_status(
    State(cloud): State<StubCloud>,
    Query(params): Query<StatusParams>,
) -> Result<Json<Value>, StatusCode> {
    let state = cloud.state.lock();
    match state.codes.get(&params.code) {
        None => Err(StatusCode::NOT_FOUND),
        Some(None) => Ok(Json(json!({ "paired": false }))),
        Some(Some(credentials)) => Ok(Json(json!({
            "paired": true,
            "player_id": credentials.player_id,
            "device_token": credentials.device_token,
        }))),
    }
}

// GET /players/{id}/config
async fn player_config(
    State(cloud): State<StubCloud>,
    Path(player_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<RemoteConfig>, StatusCode> {
    if !cloud.token_matches(&player_id, &headers) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    let config = cloud
        .state
        .lock()
        .configs
        .get(&player_id)
        .cloned()
        .unwrap_or_else(|| RemoteConfig::safe_default(&player_id));
    Ok(Json(config))
}

// POST /players/{id}/heartbeat
async fn heartbeat(
    State(cloud): State<StubCloud>,
    Path(player_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    if !cloud.token_matches(&player_id, &headers) {
        return StatusCode::UNAUTHORIZED;
    }
    cloud.state.lock().heartbeats.entry(player_id).or_default().push(body);
    StatusCode::NO_CONTENT
}

// GET /channels/{id}/manifest
async fn manifest(
    State(cloud): State<StubCloud>,
    Path(channel_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Manifest>, StatusCode> {
    if !cloud.any_token_matches(&headers) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    let state = cloud.state.lock();
    let Some(manifest) = state.manifests.get(&channel_id) else {
        return Err(StatusCode::NOT_FOUND);
    };
    Ok(Json(manifest.clone()))
}

// GET /apps/{id}
async fn app(
    State(cloud): State<StubCloud>,
    Path(app_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ContentUnit>, StatusCode> {
    if !cloud.any_token_matches(&headers) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    cloud
        .state
        .lock()
        .apps
        .get(&app_id)
        .cloned()
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

// GET /media/{name}
async fn media(State(cloud): State<StubCloud>, Path(name): Path<String>) -> Response {
    let file = cloud.state.lock().media.get(&name).cloned();
    let Some(file) = file else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if !file.delay.is_zero() {
        tokio::time::sleep(file.delay).await;
    }
    ([(header::CONTENT_TYPE, file.content_type)], file.body).into_response()
}
