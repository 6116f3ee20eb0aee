// SPDX-License-Identifier: MIT

//! The EDS authentication flow.
//!
//! A single attempt runs: connect to the daemon, sign a fresh challenge,
//! have the backend verify it, reconcile the session and role against the
//! canonical profile, and release the daemon connection. Failures identify
//! the step they happened in and are never retried here; retry policy
//! belongs to the caller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::instrument;

use crate::backend::{BackendClient, LoginResponse};
use crate::client::SigningClient;
use crate::config::Config;
use crate::error::{AuthError, BackendError};
use crate::protocol::{AuthChallenge, KeyPurpose};
use crate::session::{reconcile_role, Role, Session, SessionStore};

/// Orchestrates authentication against the signing daemon and the backend.
pub struct Authenticator {
    config: Arc<Config>,
    signing: SigningClient,
    backend: BackendClient,
    store: Arc<dyn SessionStore>,
    in_flight: AtomicBool,
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("backend_url", &self.config.backend_url)
            .finish_non_exhaustive()
    }
}

impl Authenticator {
    pub fn new(config: Config, store: Arc<dyn SessionStore>) -> Self {
        let config = Arc::new(config);
        Self {
            signing: SigningClient::new(Arc::clone(&config)),
            backend: BackendClient::new(config.backend_url.clone()),
            store,
            config,
            in_flight: AtomicBool::new(false),
        }
    }

    /// The signing client, for callers that need daemon operations outside
    /// the login flow (availability probes, locale changes).
    pub fn signing(&self) -> &SigningClient {
        &self.signing
    }

    /// The currently stored session, if any.
    pub fn session(&self) -> Result<Option<Session>, AuthError> {
        self.store.load().map_err(AuthError::Store)
    }

    /// Authenticate with the user's EDS through the signing daemon.
    ///
    /// On success the returned session is persisted in the store. A session
    /// with `is_new_user` set signals that the caller should direct the
    /// user to profile completion instead of the dashboard. The daemon
    /// connection is released when the attempt completes, whatever the
    /// outcome.
    #[instrument(skip_all)]
    pub async fn login_with_eds(&self) -> Result<Session, AuthError> {
        let _attempt = self.begin()?;
        let result = self.eds_flow().await;
        // The daemon accepts one local connection per client; holding it
        // across attempts would starve the next login.
        self.signing.connection().close().await;
        result
    }

    async fn eds_flow(&self) -> Result<Session, AuthError> {
        tracing::debug!("Connecting to the signing daemon");
        self.signing
            .connection()
            .connect()
            .await
            .map_err(AuthError::Connection)?;

        let challenge = AuthChallenge::new();
        let xml = challenge.to_xml();
        tracing::debug!(timestamp = %challenge.timestamp, "Signing the authentication challenge");
        let signed = self
            .signing
            .sign_xml(&self.config.default_store, KeyPurpose::Authentication, &xml)
            .await
            .map_err(AuthError::Signing)?;

        tracing::debug!("Submitting the signed challenge for verification");
        let login = self
            .backend
            .eds_login(&signed)
            .await
            .map_err(AuthError::Verification)?;

        // The backend may not assign a role at first EDS login; the user is
        // an employee until the profile says otherwise.
        self.commit_login(login, Some("employee")).await
    }

    /// Authenticate with email and password.
    ///
    /// Unlike EDS login the backend assigns no default role here; if the
    /// response carries none, the profile's `is_superuser` flag decides.
    #[instrument(skip_all)]
    pub async fn login_with_email(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, AuthError> {
        let _attempt = self.begin()?;
        let login = self
            .backend
            .email_login(email, password)
            .await
            .map_err(AuthError::Verification)?;
        self.commit_login(login, None).await
    }

    /// Persist a provisional session, refresh it against the canonical
    /// profile, and commit the result.
    ///
    /// If anything fails after the provisional write, the store is rolled
    /// back to its prior contents so a failed attempt leaves no partial
    /// state.
    async fn commit_login(
        &self,
        login: LoginResponse,
        assumed_role: Option<&str>,
    ) -> Result<Session, AuthError> {
        let snapshot = self.store.load().map_err(AuthError::Store)?;
        let login_role = login.role.as_deref().or(assumed_role);
        let provisional = Session {
            token: login.access_token.clone(),
            role: login_role.map(Role::parse_lenient).unwrap_or(Role::Employee),
            is_new_user: login.is_new_user.unwrap_or(false),
            profile: login.profile.clone(),
        };
        self.store.save(&provisional).map_err(AuthError::Store)?;

        match self.refresh_against(login_role, &provisional).await {
            Ok(session) => {
                tracing::info!(role = %session.role, is_new_user = session.is_new_user, "Login complete");
                Ok(session)
            }
            Err(error) => {
                let rollback = match &snapshot {
                    Some(prior) => self.store.save(prior),
                    None => self.store.clear(),
                };
                if let Err(rollback_error) = rollback {
                    tracing::error!(%rollback_error, "Failed to roll back the session store");
                }
                Err(error)
            }
        }
    }

    /// Fetch the canonical profile and merge it into a new session.
    async fn refresh_against(
        &self,
        stored_role: Option<&str>,
        current: &Session,
    ) -> Result<Session, AuthError> {
        let profile = self
            .backend
            .me(&current.token)
            .await
            .map_err(AuthError::Profile)?;
        let role = reconcile_role(stored_role, profile.is_superuser);
        let session = Session {
            token: current.token.clone(),
            role,
            // The flag is only meaningful until the profile is completed;
            // keep what login established unless the profile says otherwise.
            is_new_user: profile.is_new_user.unwrap_or(current.is_new_user),
            profile: profile.fields,
        };
        self.store.save(&session).map_err(AuthError::Store)?;
        Ok(session)
    }

    /// Refresh the stored session against the canonical profile.
    ///
    /// The stored role is preserved per the reconciliation rules. A 401
    /// from the backend invalidates the session before the error is
    /// returned: the token is gone and the user must authenticate again.
    #[instrument(skip_all)]
    pub async fn refresh_profile(&self) -> Result<Session, AuthError> {
        let current = self
            .store
            .load()
            .map_err(AuthError::Store)?
            .ok_or(AuthError::NotAuthenticated)?;
        let result = self
            .refresh_against(Some(current.role.as_str()), &current)
            .await;
        if matches!(&result, Err(AuthError::Profile(BackendError::Unauthorized))) {
            tracing::info!("Session token is no longer valid; clearing the session");
            self.invalidate_session();
        }
        result
    }

    /// Drop the stored session.
    ///
    /// Called on logout and whenever a collaborator reports the token as
    /// unauthorized during normal API usage.
    pub fn invalidate_session(&self) {
        if let Err(error) = self.store.clear() {
            tracing::error!(%error, "Failed to clear the session store");
        }
    }

    /// Log the user out.
    pub fn logout(&self) {
        tracing::debug!("Logging out");
        self.invalidate_session();
    }

    fn begin(&self) -> Result<AttemptGuard<'_>, AuthError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("Rejecting re-entrant authentication attempt");
            return Err(AuthError::AlreadyInProgress);
        }
        Ok(AttemptGuard {
            flag: &self.in_flight,
        })
    }
}

/// Clears the in-flight flag when the attempt completes, also on panic.
struct AttemptGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}
