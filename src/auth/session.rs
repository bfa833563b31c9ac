use std::time::Duration;

use axum::{
    extract::FromRef,
    http::{header, HeaderMap},
};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use thiserror::Error;
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::debug;

use super::claims::SessionClaims;
use crate::{config::SessionConfig, state::AppState};

/// Any token that fails verification. Callers treat it as "no session".
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("invalid or expired session")]
pub struct InvalidSession;

/// Signing material and cookie policy for session tokens.
#[derive(Clone)]
pub struct SessionKeys {
    pub encoding: EncodingKey,
    pub decoding: DecodingKey,
    pub issuer: String,
    pub audience: String,
    pub ttl: Duration,
    pub cookie_name: String,
    pub secure_cookie: bool,
}

impl SessionKeys {
    pub fn from_config(cfg: &SessionConfig, is_production: bool) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.app_id.clone(),
            ttl: Duration::from_secs((cfg.ttl_minutes.max(0) as u64) * 60),
            cookie_name: cfg.cookie_name.clone(),
            secure_cookie: is_production,
        }
    }

    pub fn issue(&self, open_id: &str, name: &str) -> anyhow::Result<String> {
        self.issue_with_ttl(open_id, name, self.ttl)
    }

    pub fn issue_with_ttl(&self, open_id: &str, name: &str, ttl: Duration) -> anyhow::Result<String> {
        let now = OffsetDateTime::now_utc();
        let exp = now + TimeDuration::seconds(ttl.as_secs() as i64);
        let claims = SessionClaims {
            sub: open_id.to_string(),
            name: name.to_string(),
            iat: now.unix_timestamp() as usize,
            exp: exp.unix_timestamp() as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?;
        debug!(open_id, "session issued");
        Ok(token)
    }

    /// Signature, issuer, audience and expiry must all check out.
    pub fn verify(&self, token: &str) -> Result<SessionClaims, InvalidSession> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        let data = decode::<SessionClaims>(token, &self.decoding, &validation).map_err(|e| {
            debug!(error = %e, "session rejected");
            InvalidSession
        })?;
        if data.claims.sub.is_empty() {
            return Err(InvalidSession);
        }
        Ok(data.claims)
    }

    /// `Set-Cookie` value carrying a fresh token.
    pub fn session_cookie(&self, token: &str) -> String {
        let mut cookie = format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            self.cookie_name,
            token,
            self.ttl.as_secs()
        );
        if self.secure_cookie {
            cookie.push_str("; Secure");
        }
        cookie
    }

    /// `Set-Cookie` value that makes the client discard the session.
    pub fn clear_session_cookie(&self) -> String {
        let mut cookie = format!(
            "{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT",
            self.cookie_name
        );
        if self.secure_cookie {
            cookie.push_str("; Secure");
        }
        cookie
    }

    pub fn read_session_cookie<'a>(&self, headers: &'a HeaderMap) -> Option<&'a str> {
        headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, value)| *name == self.cookie_name && !value.is_empty())
            .map(|(_, value)| value)
    }
}

impl FromRef<AppState> for SessionKeys {
    fn from_ref(state: &AppState) -> Self {
        state.keys.clone()
    }
}
