//! Device identity and the pairing protocol
//!
//! Handles:
//! - Loading the persisted identity at start-up
//! - Pairing code issuance (cloud first, local fallback when offline)
//! - Pairing status polling on a fixed interval with an absolute ceiling
//! - Remote config fetch with a safe default on network failure
//! - Unpairing
//!
//! The manager is the single owner of the identity for a running agent. The
//! identity is one value (`Option<DeviceIdentity>`), so a half-written
//! credential cannot exist.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::cloud::{CloudApi, RemoteConfig};
use crate::store::{IdentityStore, StoreError};
use crate::timer::TimerHandle;

/// Characters used for locally generated codes (no 0/O, 1/I)
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const CODE_LENGTH: usize = 6;

/// Credentials issued by the cloud at pairing time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceIdentity {
    pub player_id: String,
    pub device_token: String,
    pub paired_at: DateTime<Utc>,
}

impl DeviceIdentity {
    pub fn new(player_id: &str, device_token: &str) -> Self {
        Self {
            player_id: player_id.to_string(),
            device_token: device_token.to_string(),
            paired_at: Utc::now(),
        }
    }
}

/// Where a pairing code came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeSource {
    Cloud,
    /// Generated on the device because the cloud was unreachable
    Local,
}

/// A code waiting to be entered in the console
#[derive(Debug, Clone, PartialEq)]
pub struct PairingSession {
    pub code: String,
    pub expires_at: DateTime<Utc>,
    pub source: CodeSource,
}

/// Observable pairing state
#[derive(Debug, Clone, PartialEq)]
pub enum PairingState {
    Unpaired,
    Pairing(PairingSession),
    Paired { player_id: String },
}

/// Polling cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairingTimings {
    pub poll_interval: Duration,
    pub session_timeout: Duration,
}

impl Default for PairingTimings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            session_timeout: Duration::from_secs(15 * 60),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("Device is already paired; unpair it first")]
    AlreadyPaired,
    #[error("Device is not paired")]
    NotPaired,
    #[error("Identity storage failed: {0}")]
    Storage(#[from] StoreError),
}

type PairedCallback = Arc<dyn Fn(RemoteConfig) + Send + Sync>;

struct Inner {
    identity: Option<DeviceIdentity>,
    /// Bumped whenever a session starts or ends; stale poll tasks compare against it
    generation: u64,
    poll: Option<TimerHandle>,
}

enum PollOutcome {
    Continue,
    Done,
}

pub struct DeviceIdentityManager {
    api: Arc<dyn CloudApi>,
    store: Arc<dyn IdentityStore>,
    timings: PairingTimings,
    inner: Mutex<Inner>,
    state: watch::Sender<PairingState>,
    on_paired: Mutex<Option<PairedCallback>>,
}

impl DeviceIdentityManager {
    /// Build the manager, restoring any identity found in `store`
    pub fn new(api: Arc<dyn CloudApi>, store: Arc<dyn IdentityStore>) -> Self {
        let identity = match store.load() {
            Ok(identity) => identity,
            Err(e) => {
                error!("Failed to load stored identity, starting unpaired: {}", e);
                None
            }
        };

        let initial = match &identity {
            Some(id) => {
                info!("Restored identity for player {}", id.player_id);
                PairingState::Paired { player_id: id.player_id.clone() }
            }
            None => PairingState::Unpaired,
        };
        let (state, _) = watch::channel(initial);

        Self {
            api,
            store,
            timings: PairingTimings::default(),
            inner: Mutex::new(Inner {
                identity,
                generation: 0,
                poll: None,
            }),
            state,
            on_paired: Mutex::new(None),
        }
    }

    pub fn with_timings(mut self, timings: PairingTimings) -> Self {
        self.timings = timings;
        self
    }

    /// Register the callback invoked (with a fresh config) once pairing succeeds
    pub fn on_paired<F>(&self, callback: F)
    where
        F: Fn(RemoteConfig) + Send + Sync + 'static,
    {
        *self.on_paired.lock() = Some(Arc::new(callback));
    }

    pub fn is_paired(&self) -> bool {
        self.inner.lock().identity.is_some()
    }

    pub fn identity(&self) -> Option<DeviceIdentity> {
        self.inner.lock().identity.clone()
    }

    pub fn state(&self) -> PairingState {
        self.state.borrow().clone()
    }

    /// Watch pairing progress (e.g. to display the code)
    pub fn subscribe(&self) -> watch::Receiver<PairingState> {
        self.state.subscribe()
    }

    /// Whether a pairing poll is currently running
    pub fn is_polling(&self) -> bool {
        self.inner
            .lock()
            .poll
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Obtain a pairing code and start polling for its approval.
    ///
    /// Replaces any session already in progress.
    pub async fn request_pairing_code(self: &Arc<Self>) -> Result<PairingSession, IdentityError> {
        if self.is_paired() {
            return Err(IdentityError::AlreadyPaired);
        }

        let fallback_expiry = Utc::now() + chrono::Duration::from_std(self.timings.session_timeout)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let session = match self.api.request_pairing_code().await {
            Ok(response) => PairingSession {
                code: response.code,
                expires_at: response.expires_at.unwrap_or(fallback_expiry),
                source: CodeSource::Cloud,
            },
            Err(e) => {
                warn!("Pairing code request failed ({}), using a locally generated code", e);
                PairingSession {
                    code: generate_local_code(),
                    expires_at: fallback_expiry,
                    source: CodeSource::Local,
                }
            }
        };

        self.begin_session(session.clone())?;
        info!("Pairing code {} issued ({:?})", session.code, session.source);
        Ok(session)
    }

    /// Current remote config, or a safe default when the cloud is unreachable
    pub async fn fetch_config(&self) -> Result<RemoteConfig, IdentityError> {
        let identity = self.identity().ok_or(IdentityError::NotPaired)?;

        match self.api.fetch_config(&identity).await {
            Ok(config) => Ok(config),
            Err(e) => {
                warn!("Config fetch failed, continuing with defaults: {}", e);
                Ok(RemoteConfig::safe_default(&identity.player_id))
            }
        }
    }

    /// Forget the identity and cancel any pairing in progress
    pub fn unpair(&self) -> Result<(), IdentityError> {
        {
            let mut inner = self.inner.lock();
            inner.identity = None;
            inner.generation += 1;
            if let Some(poll) = inner.poll.take() {
                poll.cancel();
            }
        }
        self.state.send_replace(PairingState::Unpaired);
        info!("Device unpaired");

        self.store.clear()?;
        Ok(())
    }

    fn begin_session(self: &Arc<Self>, session: PairingSession) -> Result<(), IdentityError> {
        let mut inner = self.inner.lock();
        if inner.identity.is_some() {
            return Err(IdentityError::AlreadyPaired);
        }
        if let Some(previous) = inner.poll.take() {
            debug!("Replacing previous pairing session");
            previous.cancel();
        }

        inner.generation += 1;
        let generation = inner.generation;
        self.state.send_replace(PairingState::Pairing(session));

        let manager = Arc::downgrade(self);
        let timings = self.timings;
        inner.poll = Some(TimerHandle::spawn(poll_loop(manager, generation, timings)));
        Ok(())
    }

    async fn poll_once(&self, generation: u64) -> PollOutcome {
        let session = match self.state() {
            PairingState::Pairing(session) => session,
            _ => return PollOutcome::Done,
        };

        if session.source == CodeSource::Local {
            // The cloud has never seen a local code; swap it for a real one as soon as possible
            match self.api.request_pairing_code().await {
                Ok(response) => {
                    let upgraded = PairingSession {
                        code: response.code,
                        expires_at: response.expires_at.unwrap_or(session.expires_at),
                        source: CodeSource::Cloud,
                    };
                    if self.inner.lock().generation == generation {
                        info!("Cloud reachable again, pairing code is now {}", upgraded.code);
                        self.state.send_replace(PairingState::Pairing(upgraded));
                    }
                }
                Err(e) => debug!("Still offline, keeping local pairing code: {}", e),
            }
            return PollOutcome::Continue;
        }

        let status = match self.api.pairing_status(&session.code).await {
            Ok(status) => status,
            Err(e) => {
                debug!("Pairing status poll failed: {}", e);
                return PollOutcome::Continue;
            }
        };
        if !status.paired {
            return PollOutcome::Continue;
        }

        let (player_id, device_token) = match (status.player_id, status.device_token) {
            (Some(player_id), Some(device_token)) => (player_id, device_token),
            _ => {
                warn!("Pairing reported without credentials, still waiting");
                return PollOutcome::Continue;
            }
        };

        let identity = DeviceIdentity::new(&player_id, &device_token);
        {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                return PollOutcome::Done;
            }
            if let Err(e) = self.store.save(&identity) {
                error!("Failed to persist identity, pairing will not survive a restart: {}", e);
            }
            inner.identity = Some(identity);
            inner.generation += 1;
        }
        self.state.send_replace(PairingState::Paired { player_id: player_id.clone() });
        info!("Paired as player {}", player_id);

        let config = match self.fetch_config().await {
            Ok(config) => config,
            Err(_) => RemoteConfig::safe_default(&player_id),
        };
        let callback = self.on_paired.lock().clone();
        if let Some(callback) = callback {
            callback(config);
        }

        PollOutcome::Done
    }

    fn expire(&self, generation: u64) {
        {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                return;
            }
            inner.generation += 1;
        }
        self.state.send_replace(PairingState::Unpaired);
        warn!("Pairing session expired without approval");
    }
}

async fn poll_loop(manager: Weak<DeviceIdentityManager>, generation: u64, timings: PairingTimings) {
    let started = Instant::now();
    let deadline = started + timings.session_timeout;
    let mut ticker = interval_at(started + timings.poll_interval, timings.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = sleep_until(deadline) => {
                if let Some(manager) = manager.upgrade() {
                    manager.expire(generation);
                }
                break;
            }
            _ = ticker.tick() => {
                let Some(manager) = manager.upgrade() else { break };
                if let PollOutcome::Done = manager.poll_once(generation).await {
                    break;
                }
            }
        }
    }
}

/// Short human-enterable code, used only when the cloud cannot issue one
fn generate_local_code() -> String {
    uuid::Uuid::new_v4()
        .as_bytes()
        .iter()
        .take(CODE_LENGTH)
        .map(|b| CODE_ALPHABET[*b as usize % CODE_ALPHABET.len()] as char)
        .collect()
}
