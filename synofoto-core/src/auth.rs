use std::fmt;

use serde::de::IgnoredAny;
use tracing::{debug, info, warn};

use crate::client::{
    AUTH_API, ApiRequest, Envelope, LoginData, SynoClient, SynoError, USER_INFO_API, UserInfo,
};

const SESSION_NAME: &str = "SynoFoto";

#[derive(Clone)]
pub struct Credentials {
    pub account: String,
    pub password: String,
}

impl Credentials {
    pub fn new(account: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("account", &self.account)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl SynoClient {
    /// Opens a fresh session, replacing any existing one. The caller's own
    /// user id is looked up once and kept for the lifetime of the client.
    pub async fn login(&self) -> Result<(), SynoError> {
        let _gate = self.login_gate.lock().await;
        self.login_locked().await.map(|_| ())
    }

    /// Drops the session. Calling this without a session is a no-op; the
    /// local session is forgotten even when the remote call fails.
    pub async fn logout(&self) -> Result<(), SynoError> {
        let Some(sid) = self.lock_state().sid.take() else {
            debug!("logout requested without an active session");
            return Ok(());
        };
        let request = ApiRequest::new(AUTH_API, 6, "logout").param("session", SESSION_NAME);
        let envelope: Envelope<IgnoredAny> = self.execute(&request, Some(&sid)).await?;
        envelope.into_unit(AUTH_API)?;
        info!("logged out");
        Ok(())
    }

    pub fn is_logged_in(&self) -> bool {
        self.lock_state().sid.is_some()
    }

    pub fn own_user_id(&self) -> Option<i64> {
        self.lock_state().own_user_id
    }

    /// Returns the live session id, logging in first when there is none.
    pub(crate) async fn ensure_session(&self) -> Result<String, SynoError> {
        if let Some(sid) = self.lock_state().sid.clone() {
            return Ok(sid);
        }
        let _gate = self.login_gate.lock().await;
        if let Some(sid) = self.lock_state().sid.clone() {
            return Ok(sid);
        }
        self.login_locked().await
    }

    /// Forgets `stale` unless another caller already replaced it.
    pub(crate) fn invalidate_session(&self, stale: &str) {
        let mut state = self.lock_state();
        if state.sid.as_deref() == Some(stale) {
            state.sid = None;
        }
    }

    async fn login_locked(&self) -> Result<String, SynoError> {
        self.fetch_api_info().await.map_err(login_failure)?;
        let request = ApiRequest::new(AUTH_API, 6, "login")
            .param("account", self.credentials.account.clone())
            .param("passwd", self.credentials.password.clone())
            .param("session", SESSION_NAME)
            .param("format", "sid");
        let data: LoginData = self.send(&request, None).await.map_err(login_failure)?;
        self.lock_state().sid = Some(data.sid.clone());
        info!(account = %self.credentials.account, "login successful");

        if self.own_user_id().is_none() {
            match self.who_am_i(&data.sid).await {
                Ok(Some(id)) => {
                    debug!(user_id = id, "resolved own user id");
                    self.lock_state().own_user_id = Some(id);
                }
                Ok(None) => warn!("user info carries no id; all albums count as shared"),
                Err(err) => {
                    warn!("failed to get user information, all albums count as shared: {err}")
                }
            }
        }
        Ok(data.sid)
    }

    async fn who_am_i(&self, sid: &str) -> Result<Option<i64>, SynoError> {
        let request = ApiRequest::new(USER_INFO_API, 1, "me");
        let info: UserInfo = self.send(&request, Some(sid)).await?;
        Ok(info.id)
    }
}

fn login_failure(err: SynoError) -> SynoError {
    match err {
        SynoError::Auth(_) => err,
        SynoError::Protocol { code, .. } => {
            SynoError::Auth(format!("credentials rejected (code {code})"))
        }
        other => SynoError::Auth(format!("login request failed: {other}")),
    }
}
