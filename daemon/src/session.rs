//! One login attempt against one broker.
//!
//! The coordinator owns the protocol state machine for a single attempt
//! and guarantees that no exit path, including cancellation and panics,
//! leaks a provisional registry entry.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time;

use authgate_common::broker_proto::{AccessVerdict, FieldMap, ACCESS_CANCELLED};

use crate::broker::{Broker, BrokerError};
use crate::tempentries::{RegistryError, TempIdentityRegistry};

// How long a cancelled IsAuthorized call is given to acknowledge the
// cancellation before the attempt stops waiting for it.
const CANCEL_GRACE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// The attempt exists but no broker session has been established.
    Created,
    /// Authentication modes may be queried (or re-queried).
    ModeQuery,
    /// A mode is selected; authorization may begin or the mode may change.
    ModeSelected,
    /// An IsAuthorized call is in flight.
    Authorizing,
    Authorized,
    Denied,
    Cancelled,
    Errored,
    Ended,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("broker call failed: {0}")]
    Broker(#[from] BrokerError),
    #[error("registry operation failed: {0}")]
    Registry(#[from] RegistryError),
    #[error("operation not valid in session state {0:?}")]
    State(SessionState),
}

/// Drives one login attempt. Calls are strictly sequential per attempt;
/// concurrency across attempts is the registry's concern.
pub struct SessionCoordinator {
    broker: Arc<dyn Broker + Send + Sync>,
    registry: Arc<TempIdentityRegistry>,
    username: String,
    uid: u32,
    session_id: String,
    encryption_key: String,
    state: SessionState,
    authorize_timeout: Duration,
    shutdown_rx: broadcast::Receiver<()>,
    ended: bool,
}

impl SessionCoordinator {
    /// Starts a new attempt: claims a provisional identity, then opens the
    /// broker session.
    ///
    /// The registry is consulted first so that a full registry rejects the
    /// attempt before any broker-side state exists. If the broker refuses
    /// the session, the just-claimed identity is released again.
    pub async fn begin(
        broker: Arc<dyn Broker + Send + Sync>,
        registry: Arc<TempIdentityRegistry>,
        username: &str,
        lang: &str,
        authorize_timeout: Duration,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<Self, SessionError> {
        let uid = registry.register_pre_auth_user(username)?;

        let mut coordinator = SessionCoordinator {
            broker,
            registry,
            username: username.to_string(),
            uid,
            session_id: String::new(),
            encryption_key: String::new(),
            state: SessionState::Created,
            authorize_timeout,
            shutdown_rx,
            ended: false,
        };

        let result = coordinator
            .broker
            .new_session(&coordinator.username, lang)
            .await;

        match result {
            Ok((session_id, encryption_key)) => {
                debug!(
                    "broker session {:?} established for {:?}",
                    session_id, coordinator.username
                );
                coordinator.session_id = session_id;
                coordinator.encryption_key = encryption_key;
                coordinator.state = SessionState::ModeQuery;
                Ok(coordinator)
            }
            Err(err) => {
                // Dropping the coordinator releases the registry entry.
                coordinator.state = SessionState::Errored;
                Err(err.into())
            }
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The broker-assigned key the caller uses to protect credential
    /// payloads. Opaque here.
    pub fn encryption_key(&self) -> &str {
        &self.encryption_key
    }

    /// Asks the broker which authentication modes it offers given the
    /// layouts the caller can render. Valid before and after a mode has
    /// been selected, so the caller may loop back and choose differently.
    pub async fn authentication_modes(
        &mut self,
        supported_ui_layouts: &[FieldMap],
    ) -> Result<Vec<FieldMap>, SessionError> {
        match self.state {
            SessionState::ModeQuery | SessionState::ModeSelected => {}
            state => return Err(SessionError::State(state)),
        }

        let result = self
            .broker
            .get_authentication_modes(&self.session_id, supported_ui_layouts)
            .await;

        match result {
            Ok(modes) => {
                self.state = SessionState::ModeQuery;
                Ok(modes)
            }
            Err(err) => {
                self.state = SessionState::Errored;
                Err(err.into())
            }
        }
    }

    /// Selects one of the offered modes and returns the UI layout the
    /// caller must render for it.
    pub async fn select_mode(&mut self, mode_id: &str) -> Result<FieldMap, SessionError> {
        match self.state {
            SessionState::ModeQuery | SessionState::ModeSelected => {}
            state => return Err(SessionError::State(state)),
        }

        let result = self
            .broker
            .select_authentication_mode(&self.session_id, mode_id)
            .await;

        match result {
            Ok(layout) => {
                self.state = SessionState::ModeSelected;
                Ok(layout)
            }
            Err(err) => {
                self.state = SessionState::Errored;
                Err(err.into())
            }
        }
    }

    /// Submits the authentication data and waits for the broker's verdict.
    ///
    /// The call itself is unbounded; the shutdown channel and the
    /// configured authorize timeout are the only ways out of a broker that
    /// never answers. Both fire a best-effort CancelIsAuthorized, then
    /// give the pending call a short grace period to come back before the
    /// attempt is recorded as cancelled.
    pub async fn authorize(
        &mut self,
        authentication_data: &str,
    ) -> Result<(AccessVerdict, String), SessionError> {
        if self.state != SessionState::ModeSelected {
            return Err(SessionError::State(self.state));
        }
        self.state = SessionState::Authorizing;

        let broker = self.broker.clone();
        let session_id = self.session_id.clone();

        let call = broker.is_authorized(&session_id, authentication_data);
        tokio::pin!(call);

        let result = tokio::select! {
            res = &mut call => res,
            // A closed channel means the daemon is going away, same as an
            // explicit shutdown signal.
            _ = self.shutdown_rx.recv() => {
                debug!("authorization for session {:?} interrupted by shutdown", session_id);
                cancel_pending(broker.as_ref(), &session_id, call).await
            }
            _ = time::sleep(self.authorize_timeout) => {
                warn!("authorization for session {:?} timed out", session_id);
                cancel_pending(broker.as_ref(), &session_id, call).await
            }
        };

        let (access, user_info) = match result {
            Ok(v) => v,
            Err(err) => {
                self.state = SessionState::Errored;
                return Err(err.into());
            }
        };

        let verdict = AccessVerdict::from_wire(&access);
        match verdict {
            AccessVerdict::Granted => {
                // Confirm the provisional identity now that a verdict has
                // been reached. Idempotent: the entry already exists.
                if let Err(err) = self.registry.register_pre_auth_user(&self.username) {
                    error!(
                        "could not confirm provisional user {:?}: {:?}",
                        self.username, err
                    );
                    self.state = SessionState::Errored;
                    return Err(err.into());
                }
                self.state = SessionState::Authorized;
            }
            AccessVerdict::Denied | AccessVerdict::Retry => {
                self.state = SessionState::Denied;
            }
            AccessVerdict::Cancelled => {
                self.state = SessionState::Cancelled;
            }
            AccessVerdict::Other(ref code) => {
                warn!(
                    "broker returned unrecognized access verdict {:?} for session {:?}",
                    code, session_id
                );
                self.state = SessionState::Errored;
            }
        }

        Ok((verdict, user_info))
    }

    /// Unconditional, idempotent teardown.
    ///
    /// Exactly one EndSession attempt is made; its failure is logged and
    /// discarded since the attempt is over either way. The provisional
    /// identity is released unless the attempt reached `Authorized`, in
    /// which case it stays for promotion to the permanent user database.
    pub async fn end(&mut self) {
        if self.ended {
            return;
        }

        if !self.session_id.is_empty() {
            if let Err(err) = self.broker.end_session(&self.session_id).await {
                warn!(
                    "EndSession for {:?} failed during teardown: {:?}",
                    self.session_id, err
                );
            }
        }

        if self.state != SessionState::Authorized {
            self.registry.delete_pre_auth_user(self.uid);
        }

        self.state = SessionState::Ended;
        // Only now: if this task is torn down during the broker call
        // above, the drop guard still releases the registry entry.
        self.ended = true;
    }
}

impl Drop for SessionCoordinator {
    fn drop(&mut self) {
        if self.ended {
            return;
        }
        if self.state != SessionState::Authorized {
            self.registry.delete_pre_auth_user(self.uid);
        }
        if !self.session_id.is_empty() {
            warn!(
                "session {:?} dropped without teardown, broker-side session may linger",
                self.session_id
            );
        }
    }
}

/// Fires CancelIsAuthorized and gives the pending call a grace period to
/// acknowledge it. If the broker never comes back the call is abandoned
/// and the outcome synthesized as cancelled.
async fn cancel_pending<F>(
    broker: &(dyn Broker + Send + Sync),
    session_id: &str,
    mut call: Pin<&mut F>,
) -> Result<(String, String), BrokerError>
where
    F: Future<Output = Result<(String, String), BrokerError>>,
{
    broker.cancel_is_authorized(session_id).await;

    match time::timeout(CANCEL_GRACE_TIMEOUT, &mut call).await {
        Ok(res) => res,
        Err(_) => {
            warn!(
                "pending IsAuthorized call for session {:?} abandoned after cancellation grace period",
                session_id
            );
            Ok((ACCESS_CANCELLED.to_string(), String::new()))
        }
    }
}
