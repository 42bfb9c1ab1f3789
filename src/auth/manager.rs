//! Single-flight credential manager.
//!
//! Many jobs ask for a token concurrently; at most one refresh is ever in
//! flight. The first caller that finds no valid token becomes the leader and
//! performs the refresh; everyone arriving while it runs subscribes to the
//! same pending result. On failure all subscribers observe the same error.

use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tracing::debug;

use super::endpoint::{AuthEndpoint, AuthError, Credential};

/// Pending-refresh slot: `None` until the leader publishes its result.
/// Failures are carried as a message so the result is cloneable to every
/// subscriber.
type RefreshSlot = Option<Result<Arc<Credential>, String>>;

struct Flight {
    current: Option<Arc<Credential>>,
    inflight: Option<watch::Receiver<RefreshSlot>>,
}

enum Role {
    Leader(watch::Sender<RefreshSlot>),
    Follower(watch::Receiver<RefreshSlot>),
}

pub struct CredentialManager<A> {
    endpoint: A,
    state: Mutex<Flight>,
}

impl<A: AuthEndpoint> CredentialManager<A> {
    pub fn new(endpoint: A) -> Self {
        Self {
            endpoint,
            state: Mutex::new(Flight {
                current: None,
                inflight: None,
            }),
        }
    }

    /// Return a currently-valid token, refreshing if necessary.
    ///
    /// Concurrent callers needing a refresh collapse onto one underlying
    /// `acquire_token` call.
    pub async fn token(&self) -> Result<Arc<Credential>, AuthError> {
        loop {
            let role = {
                let mut state = self.state.lock().expect("credential state poisoned");
                if let Some(cred) = &state.current
                    && cred.is_valid()
                {
                    return Ok(Arc::clone(cred));
                }
                match &state.inflight {
                    Some(rx) => Role::Follower(rx.clone()),
                    None => {
                        let (tx, rx) = watch::channel(None);
                        state.inflight = Some(rx);
                        Role::Leader(tx)
                    }
                }
            };

            match role {
                Role::Leader(tx) => {
                    debug!("refreshing auth token");
                    let result = self
                        .endpoint
                        .acquire_token()
                        .await
                        .map(Arc::new)
                        .map_err(|e| e.to_string());

                    let mut state = self.state.lock().expect("credential state poisoned");
                    state.inflight = None;
                    if let Ok(cred) = &result {
                        state.current = Some(Arc::clone(cred));
                    }
                    drop(state);

                    // Subscribers may already be gone; that's fine.
                    let _ = tx.send(Some(result.clone()));
                    return result.map_err(AuthError::Refresh);
                }
                Role::Follower(mut rx) => {
                    let waited = rx.wait_for(|slot| slot.is_some()).await.map(|slot| {
                        slot.clone()
                            .expect("wait_for guarantees a published result")
                    });
                    match waited {
                        Ok(result) => {
                            return result.map_err(AuthError::Refresh);
                        }
                        Err(_) => {
                            // The leader was dropped before publishing
                            // (cancelled mid-refresh). Clear the stale flight
                            // and elect a new leader.
                            let mut state =
                                self.state.lock().expect("credential state poisoned");
                            if state
                                .inflight
                                .as_ref()
                                .is_some_and(|r| r.same_channel(&rx))
                            {
                                state.inflight = None;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Drop the held token if it is still the one that was rejected.
    ///
    /// Compare-and-invalidate: a token refreshed by another job in the
    /// meantime is left alone.
    pub fn invalidate(&self, used_token: &str) {
        let mut state = self.state.lock().expect("credential state poisoned");
        if state
            .current
            .as_ref()
            .is_some_and(|c| c.token == used_token)
        {
            debug!("invalidating rejected auth token");
            state.current = None;
        }
    }
}
