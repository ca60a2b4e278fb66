// src/services/auth.rs

use std::sync::Arc;

use chrono::{DateTime, Utc};
use validator::Validate;

use crate::{
    error::{AppError, AuthError},
    models::{
        session::{
            AuthResponse, DeviceInfo, NewSession, RevocationReason, RevokedToken, Session,
            TokenKind, TokenPair,
        },
        user::{ExternalIdentity, LoginRequest, NewUser, RegisterRequest, Role, User},
    },
    store::{RevocationList, SessionStore, UserDirectory},
    utils::{
        hash::{hash_password, verify_password},
        jwt::{Claims, TokenCodec},
    },
};

/// Session and token manager.
///
/// Access tokens are checked against the revocation list only. Refresh tokens
/// must also be bound to an active session, and each one rotates on use.
pub struct AuthService {
    users: Arc<dyn UserDirectory>,
    sessions: Arc<dyn SessionStore>,
    revocations: Arc<dyn RevocationList>,
    codec: TokenCodec,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserDirectory>,
        sessions: Arc<dyn SessionStore>,
        revocations: Arc<dyn RevocationList>,
        codec: TokenCodec,
    ) -> Self {
        Self {
            users,
            sessions,
            revocations,
            codec,
        }
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    /// Creates a password account and signs it in.
    pub async fn register(
        &self,
        req: RegisterRequest,
        device: DeviceInfo,
    ) -> Result<AuthResponse, AppError> {
        req.validate()?;

        let name = req.name.trim();
        if name.is_empty() {
            return Err(AppError::BadRequest("Name is required.".to_string()));
        }

        let role = req.role.unwrap_or(Role::Student);
        if role == Role::Admin {
            return Err(AppError::Forbidden("Cannot self-register as admin.".to_string()));
        }

        let user = self
            .users
            .create_user(NewUser {
                name: name.to_string(),
                email: normalize_email(&req.email),
                password: Some(hash_password(&req.password)?),
                role,
                external_id: None,
            })
            .await?;

        tracing::info!(user_id = user.id, role = %user.role, "User registered");

        self.open_session(user, device).await
    }

    pub async fn login(
        &self,
        req: LoginRequest,
        device: DeviceInfo,
    ) -> Result<AuthResponse, AppError> {
        req.validate()?;

        let user = self
            .users
            .find_user_by_email(&normalize_email(&req.email))
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        if !user.is_active {
            return Err(AppError::Forbidden("Account is deactivated.".to_string()));
        }

        let Some(password_hash) = user.password.as_deref() else {
            return Err(AppError::BadRequest(
                "This account uses external sign-in.".to_string(),
            ));
        };

        if !verify_password(&req.password, password_hash)? {
            return Err(AuthError::InvalidCredentials.into());
        }

        tracing::info!(user_id = user.id, "User logged in");

        self.open_session(user, device).await
    }

    /// Signs in a user whose identity an external provider already verified.
    pub async fn oauth_exchange(
        &self,
        identity: ExternalIdentity,
        device: DeviceInfo,
    ) -> Result<AuthResponse, AppError> {
        let identity = ExternalIdentity {
            email: normalize_email(&identity.email),
            ..identity
        };

        let user = self.users.upsert_external_user(&identity).await?;
        if !user.is_active {
            return Err(AppError::Forbidden("Account is deactivated.".to_string()));
        }

        self.open_session(user, device).await
    }

    /// Mints a token pair and makes its session the user's only active one.
    async fn open_session(&self, user: User, device: DeviceInfo) -> Result<AuthResponse, AppError> {
        let (refresh_token, refresh) = self.codec.issue(TokenKind::Refresh, &user)?;

        self.sessions
            .open_exclusive_session(NewSession {
                user_id: user.id,
                refresh_token_id: refresh.jti.clone(),
                device_info: device,
                expires_at: refresh.expires_at(),
            })
            .await?;

        let (access_token, _) = self.codec.issue(TokenKind::Access, &user)?;

        Ok(AuthResponse {
            tokens: TokenPair {
                access_token,
                refresh_token,
            },
            user,
        })
    }

    /// Exchanges a refresh token for a new pair. Each refresh token works once.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AppError> {
        let claims = match self.verify(TokenKind::Refresh, refresh_token).await {
            Err(AppError::Auth(AuthError::Revoked)) => {
                tracing::warn!("Revoked refresh token presented");
                return Err(AuthError::Revoked.into());
            }
            other => other?,
        };

        let Some(session) = self.sessions.find_active_session(&claims.jti).await? else {
            // A concurrent refresh may have rotated the session in between.
            if self.revocations.is_revoked(&claims.jti).await? {
                return Err(AuthError::Revoked.into());
            }
            return Err(AuthError::NoActiveSession.into());
        };

        let user = match self.users.find_user(claims.user_id()?).await? {
            Some(user) if user.is_active => user,
            _ => return Err(AuthError::UserUnavailable.into()),
        };

        // The insert-if-absent is the rotation mutex: of two concurrent
        // requests with the same token, only one gets `true`.
        let claimed = self
            .revocations
            .revoke(RevokedToken {
                token_id: claims.jti.clone(),
                user_id: user.id,
                token_type: TokenKind::Refresh,
                reason: RevocationReason::Refresh,
                expires_at: claims.expires_at(),
            })
            .await?;

        if !claimed {
            tracing::warn!(user_id = user.id, "Refresh token reuse detected");
            return Err(AuthError::Revoked.into());
        }

        let (refresh_token, refresh) = self.codec.issue(TokenKind::Refresh, &user)?;

        let rotated = self
            .sessions
            .rotate_session(session.id, &claims.jti, &refresh.jti, refresh.expires_at())
            .await?;

        if !rotated {
            return Err(AuthError::NoActiveSession.into());
        }

        let (access_token, _) = self.codec.issue(TokenKind::Access, &user)?;

        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }

    /// Revokes the caller's access token and ends their session.
    ///
    /// When `refresh_token` is given it must belong to the caller; otherwise
    /// whatever session is currently active for the caller is closed.
    pub async fn logout(
        &self,
        access: &Claims,
        refresh_token: Option<&str>,
    ) -> Result<(), AppError> {
        let user_id = access.user_id()?;

        self.revocations
            .revoke(RevokedToken {
                token_id: access.jti.clone(),
                user_id,
                token_type: TokenKind::Access,
                reason: RevocationReason::Logout,
                expires_at: access.expires_at(),
            })
            .await?;

        match refresh_token {
            Some(token) => {
                let refresh = self.codec.decode_allow_expired(TokenKind::Refresh, token)?;
                if refresh.user_id()? != user_id {
                    return Err(AppError::Forbidden(
                        "Refresh token belongs to another user.".to_string(),
                    ));
                }
                self.revoke_refresh(
                    user_id,
                    &refresh.jti,
                    refresh.expires_at(),
                    RevocationReason::Logout,
                )
                .await?;
                self.sessions.deactivate_session_by_token(&refresh.jti).await?;
            }
            None => {
                for session in self.sessions.list_active_sessions(user_id).await? {
                    self.end_session(&session, RevocationReason::Logout).await?;
                }
            }
        }

        tracing::info!(user_id, "User logged out");
        Ok(())
    }

    /// Verifies an access token: signature and type, then revocation, then
    /// expiry. A revoked token reports `Revoked` even after it has expired.
    pub async fn authenticate(&self, access_token: &str) -> Result<Claims, AppError> {
        self.verify(TokenKind::Access, access_token).await
    }

    async fn verify(&self, kind: TokenKind, token: &str) -> Result<Claims, AppError> {
        let claims = self.codec.decode_allow_expired(kind, token)?;

        if self.revocations.is_revoked(&claims.jti).await? {
            return Err(AuthError::Revoked.into());
        }

        Ok(self.codec.decode(kind, token)?)
    }

    pub async fn profile(&self, user_id: i64) -> Result<User, AppError> {
        match self.users.find_user(user_id).await? {
            Some(user) if user.is_active => Ok(user),
            _ => Err(AuthError::UserUnavailable.into()),
        }
    }

    pub async fn list_sessions(&self, user_id: i64) -> Result<Vec<Session>, AppError> {
        self.sessions.list_active_sessions(user_id).await
    }

    /// Ends one of the caller's sessions and blacklists its refresh token.
    pub async fn revoke_session(&self, user_id: i64, session_id: i64) -> Result<(), AppError> {
        let session = self
            .sessions
            .find_user_session(session_id, user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Session not found".to_string()))?;

        if session.is_active {
            self.end_session(&session, RevocationReason::Security).await?;
        }

        tracing::info!(user_id, session_id, "Session revoked");
        Ok(())
    }

    /// Drops revocation entries and sessions that can no longer matter.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<(u64, u64), AppError> {
        let revocations = self.revocations.purge_expired_revocations(now).await?;
        let sessions = self.sessions.purge_expired_sessions(now).await?;

        tracing::debug!(revocations, sessions, "Purged expired auth records");
        Ok((revocations, sessions))
    }

    async fn end_session(
        &self,
        session: &Session,
        reason: RevocationReason,
    ) -> Result<(), AppError> {
        self.revoke_refresh(session.user_id, &session.refresh_token_id, session.expires_at, reason)
            .await?;
        self.sessions.deactivate_session(session.id).await?;
        Ok(())
    }

    async fn revoke_refresh(
        &self,
        user_id: i64,
        token_id: &str,
        expires_at: DateTime<Utc>,
        reason: RevocationReason,
    ) -> Result<(), AppError> {
        self.revocations
            .revoke(RevokedToken {
                token_id: token_id.to_string(),
                user_id,
                token_type: TokenKind::Refresh,
                reason,
                expires_at,
            })
            .await?;
        Ok(())
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
