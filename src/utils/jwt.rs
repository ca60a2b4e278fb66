// src/utils/jwt.rs

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, header},
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    config::Config,
    error::{AppError, AuthError},
    models::{session::TokenKind, user::{Actor, Role, User}},
    services::auth::AuthService,
};

/// JWT Claims structure, shared by access and refresh tokens.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Claims {
    /// Subject - Stores the User ID (as string).
    pub sub: String,
    pub email: String,
    pub role: Role,
    #[serde(rename = "type")]
    pub token_type: TokenKind,
    /// Issued-at, Unix seconds.
    pub iat: i64,
    /// Expiration, Unix seconds.
    pub exp: i64,
    /// Token id; the revocation list and sessions are keyed on it.
    pub jti: String,
}

impl Claims {
    pub fn user_id(&self) -> Result<i64, AuthError> {
        self.sub.parse().map_err(|_| AuthError::InvalidToken)
    }

    pub fn actor(&self) -> Result<Actor, AuthError> {
        Ok(Actor {
            user_id: self.user_id()?,
            role: self.role,
        })
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or(DateTime::UNIX_EPOCH)
    }
}

#[derive(Clone)]
struct KeyPair {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl KeyPair {
    fn from_secret(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }
}

/// Stateless encoder/verifier for both token kinds.
///
/// Access and refresh tokens are signed with different keys, so one kind can
/// never verify as the other.
#[derive(Clone)]
pub struct TokenCodec {
    access: KeyPair,
    refresh: KeyPair,
    access_ttl: i64,
    refresh_ttl: i64,
}

impl TokenCodec {
    pub fn new(
        access_secret: &str,
        refresh_secret: &str,
        access_ttl: u64,
        refresh_ttl: u64,
    ) -> Self {
        Self {
            access: KeyPair::from_secret(access_secret),
            refresh: KeyPair::from_secret(refresh_secret),
            access_ttl: access_ttl as i64,
            refresh_ttl: refresh_ttl as i64,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.jwt_secret,
            &config.jwt_refresh_secret,
            config.access_token_ttl,
            config.refresh_token_ttl,
        )
    }

    fn keys(&self, kind: TokenKind) -> &KeyPair {
        match kind {
            TokenKind::Access => &self.access,
            TokenKind::Refresh => &self.refresh,
        }
    }

    fn ttl(&self, kind: TokenKind) -> i64 {
        match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        }
    }

    /// Signs a new token of `kind` for `user`.
    pub fn issue(&self, kind: TokenKind, user: &User) -> Result<(String, Claims), AppError> {
        self.issue_at(kind, user, Utc::now())
    }

    /// Same as [`issue`](Self::issue) with an explicit issue time.
    pub fn issue_at(
        &self,
        kind: TokenKind,
        user: &User,
        now: DateTime<Utc>,
    ) -> Result<(String, Claims), AppError> {
        let iat = now.timestamp();
        let claims = Claims {
            sub: user.id.to_string(),
            email: user.email.clone(),
            role: user.role,
            token_type: kind,
            iat,
            exp: iat + self.ttl(kind),
            jti: Uuid::new_v4().to_string(),
        };

        let token = encode(&Header::default(), &claims, &self.keys(kind).encoding)
            .map_err(|e| AppError::InternalServerError(e.to_string()))?;

        Ok((token, claims))
    }

    /// Verifies signature, expiry and token type.
    pub fn decode(&self, kind: TokenKind, token: &str) -> Result<Claims, AuthError> {
        self.decode_with(kind, token, true)
    }

    /// Verifies signature and token type but tolerates expiry.
    /// Used where a stale token must still be attributed, e.g. logout.
    pub fn decode_allow_expired(&self, kind: TokenKind, token: &str) -> Result<Claims, AuthError> {
        self.decode_with(kind, token, false)
    }

    fn decode_with(
        &self,
        kind: TokenKind,
        token: &str,
        validate_exp: bool,
    ) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = validate_exp;

        let claims = decode::<Claims>(token, &self.keys(kind).decoding, &validation)?.claims;

        if claims.token_type != kind {
            return Err(AuthError::WrongTokenType);
        }

        Ok(claims)
    }
}

/// Extracts the token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Axum Middleware: Authentication.
///
/// Validates the bearer token (signature, expiry, type, revocation list) and
/// injects the `Claims` into the request extensions for handlers to use.
pub async fn auth_middleware(
    State(auth): State<Arc<AuthService>>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(req.headers())
        .ok_or(AuthError::MissingToken)?
        .to_owned();

    let claims = auth.authenticate(&token).await?;
    req.extensions_mut().insert(claims);

    Ok(next.run(req).await)
}

/// Axum Middleware: Staff Authorization.
///
/// Must be used AFTER `auth_middleware`. Lets instructors and admins through.
pub async fn staff_middleware(req: Request<Body>, next: Next) -> Result<Response, AppError> {
    let claims = req
        .extensions()
        .get::<Claims>()
        .ok_or(AuthError::MissingToken)?;

    if !claims.role.is_staff() {
        return Err(AppError::Forbidden("Access denied.".to_string()));
    }

    Ok(next.run(req).await)
}
