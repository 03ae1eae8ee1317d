use super::store::{MemoryTokenStore, StoredSession, TokenStore};
use crate::resilience::BreakerCategory;
use crate::Result;
use arc_swap::ArcSwapOption;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 32;
const FINGERPRINT_LEN: usize = 12;

/// Notifications for UI code about the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    /// The token was set, replaced or removed, locally or by another process.
    TokenChanged { present: bool },
    /// An auth endpoint answered 401 and the session was dropped.
    TokenCleared { endpoint: String },
    /// A non-auth endpoint answered 401. The session is kept; the UI may prompt.
    Unauthorized { endpoint: String },
}

/// Owner of the in-memory bearer token and cached identity.
pub struct TokenManager {
    token: ArcSwapOption<String>,
    identity: ArcSwapOption<Value>,
    store: Arc<dyn TokenStore>,
    events: broadcast::Sender<AuthEvent>,
}

impl TokenManager {
    /// Build a manager seeded from the persisted session.
    pub async fn new(store: Arc<dyn TokenStore>) -> Result<Self> {
        let session = store.load().await?;
        let manager = Self::unloaded(store);
        manager.install(&session);
        debug!(has_token = session.token.is_some(), "token manager initialised");
        Ok(manager)
    }

    /// A manager backed by a fresh in-memory store.
    pub fn in_memory() -> Self {
        Self::unloaded(Arc::new(MemoryTokenStore::new()))
    }

    fn unloaded(store: Arc<dyn TokenStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            token: ArcSwapOption::const_empty(),
            identity: ArcSwapOption::const_empty(),
            store,
            events,
        }
    }

    fn install(&self, session: &StoredSession) {
        self.token.store(session.token.clone().map(Arc::new));
        self.identity.store(session.user.clone().map(Arc::new));
    }

    fn snapshot(&self) -> StoredSession {
        StoredSession {
            token: self.token().map(|t| t.as_ref().clone()),
            user: self.identity().map(|u| u.as_ref().clone()),
        }
    }

    fn emit(&self, event: AuthEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub fn token(&self) -> Option<Arc<String>> {
        self.token.load_full()
    }

    pub fn has_token(&self) -> bool {
        self.token.load().is_some()
    }

    pub fn identity(&self) -> Option<Arc<Value>> {
        self.identity.load_full()
    }

    /// Short digest of the current token, distinguishing identities in dedup keys without
    /// exposing the token itself.
    pub fn fingerprint(&self) -> String {
        match self.token.load().as_deref() {
            Some(token) => fingerprint_of(token),
            None => "anonymous".to_string(),
        }
    }

    /// Replace (or remove) the token, keeping the cached identity, and persist it.
    ///
    /// Memory is updated before the store, so a storage failure leaves this process using
    /// the new token while the error is returned.
    pub async fn set_token(&self, token: Option<String>) -> Result<()> {
        let present = token.is_some();
        self.token.store(token.map(Arc::new));
        self.emit(AuthEvent::TokenChanged { present });
        self.store.save(&self.snapshot()).await
    }

    /// Replace token and identity together, as after a login.
    pub async fn set_session(&self, token: String, user: Option<Value>) -> Result<()> {
        let session = StoredSession {
            token: Some(token),
            user,
        };
        self.install(&session);
        self.emit(AuthEvent::TokenChanged { present: true });
        self.store.save(&session).await
    }

    pub async fn set_identity(&self, user: Option<Value>) -> Result<()> {
        self.identity.store(user.map(Arc::new));
        self.store.save(&self.snapshot()).await
    }

    /// Drop token and identity from memory and from the store.
    pub async fn clear(&self) -> Result<()> {
        self.install(&StoredSession::default());
        self.emit(AuthEvent::TokenChanged { present: false });
        self.store.save(&StoredSession::default()).await
    }

    /// Apply the 401 policy for a response from `endpoint` to a request sent with `rejected`.
    ///
    /// Only a rejection by the auth subsystem itself proves the token is bad; elsewhere a
    /// 401 can be a permission quirk of one endpoint and the session is kept. A rejected
    /// token that has since been replaced is not cleared.
    pub async fn handle_unauthorized(
        &self,
        endpoint: &str,
        category: BreakerCategory,
        rejected: Option<&str>,
    ) {
        if category != BreakerCategory::Auth {
            warn!(endpoint, "401 from non-auth endpoint, keeping token");
            self.emit(AuthEvent::Unauthorized {
                endpoint: endpoint.to_string(),
            });
            return;
        }

        let current = self.token.load_full();
        if current.as_deref().map(String::as_str) != rejected {
            debug!(endpoint, "401 for a token that was already replaced, keeping session");
            return;
        }
        let previous = self.token.compare_and_swap(&current, None);
        if (*previous).as_ref().map(Arc::as_ptr) != current.as_ref().map(Arc::as_ptr) {
            debug!(endpoint, "token replaced while handling 401, keeping session");
            return;
        }

        self.identity.store(None);
        if let Err(e) = self.store.save(&StoredSession::default()).await {
            warn!(endpoint, error = %e, "failed to clear persisted token");
        }
        info!(endpoint, "auth endpoint rejected token, session cleared");
        self.emit(AuthEvent::TokenCleared {
            endpoint: endpoint.to_string(),
        });
    }

    /// Adopt a session written by another process. Nothing is written back.
    pub fn apply_external(&self, session: &StoredSession) {
        let before = self.token.load_full();
        self.install(session);
        if before.as_deref() != session.token.as_ref() {
            debug!(has_token = session.token.is_some(), "adopted external token change");
            self.emit(AuthEvent::TokenChanged {
                present: session.token.is_some(),
            });
        }
    }

    /// Follow the store's change channel until the manager or the store goes away.
    pub fn spawn_sync(self: &Arc<Self>) -> JoinHandle<()> {
        let mut rx = self.store.subscribe();
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                let change = rx.recv().await;
                let Some(manager) = weak.upgrade() else { break };
                match change {
                    Ok(session) => manager.apply_external(&session),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "token change channel lagged, reloading store");
                        match manager.store.load().await {
                            Ok(session) => manager.apply_external(&session),
                            Err(e) => warn!(error = %e, "failed to reload token store"),
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

fn fingerprint_of(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    hex[..FINGERPRINT_LEN].to_string()
}
