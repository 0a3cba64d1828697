// parquedb-token - Signed transfer tokens
//
// Upload and download tokens over the wire format
// base64url(json(payload)) "." base64url(hmac_sha256(payload_bytes)),
// URL-safe alphabet, no padding. Signing requires the process secret
// (SYNC_SECRET); verification failures of any kind return None. Upload
// tokens are single-use: the jti nonce is recorded in a shared KV with the
// token's remaining lifetime as TTL, falling back to an in-process LRU when
// the KV is unreachable. Download tokens are idempotent.

mod replay;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use replay::{ReplayGuard, DEFAULT_NONCE_CAPACITY};

use parquedb_storage::SharedKv;

type HmacSha256 = Hmac<Sha256>;

pub const SECRET_ENV: &str = "SYNC_SECRET";

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("signing secret is not configured (set {SECRET_ENV})")]
    MissingSecret,

    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Upload,
    Download,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPayload {
    #[serde(rename = "databaseId")]
    pub database_id: String,
    pub path: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    /// Wall-clock ms.
    #[serde(rename = "expiresAt")]
    pub expires_at: i64,
    #[serde(rename = "type")]
    pub kind: TokenKind,
    /// Fresh random nonce per token.
    pub jti: String,
}

pub struct TokenService {
    secret: Option<Vec<u8>>,
    replay: ReplayGuard,
}

impl TokenService {
    pub fn new(secret: Option<Vec<u8>>, kv: Option<Arc<dyn SharedKv>>) -> Self {
        Self {
            secret,
            replay: ReplayGuard::new(kv, DEFAULT_NONCE_CAPACITY),
        }
    }

    /// Secret from `SYNC_SECRET`; absent leaves signing unavailable.
    pub fn from_env(kv: Option<Arc<dyn SharedKv>>) -> Self {
        let secret = std::env::var(SECRET_ENV).ok().map(String::into_bytes);
        Self::new(secret, kv)
    }

    pub fn sign_upload(
        &self,
        database_id: &str,
        path: &str,
        user_id: &str,
        ttl: Duration,
    ) -> Result<String, TokenError> {
        self.sign(self.payload(TokenKind::Upload, database_id, path, user_id, ttl))
    }

    pub fn sign_download(
        &self,
        database_id: &str,
        path: &str,
        user_id: &str,
        ttl: Duration,
    ) -> Result<String, TokenError> {
        self.sign(self.payload(TokenKind::Download, database_id, path, user_id, ttl))
    }

    fn payload(
        &self,
        kind: TokenKind,
        database_id: &str,
        path: &str,
        user_id: &str,
        ttl: Duration,
    ) -> TokenPayload {
        TokenPayload {
            database_id: database_id.to_string(),
            path: path.to_string(),
            user_id: user_id.to_string(),
            expires_at: chrono::Utc::now().timestamp_millis() + ttl.as_millis() as i64,
            kind,
            jti: uuid::Uuid::new_v4().simple().to_string(),
        }
    }

    pub fn sign(&self, payload: TokenPayload) -> Result<String, TokenError> {
        let secret = self.secret.as_deref().ok_or(TokenError::MissingSecret)?;
        let payload_bytes = serde_json::to_vec(&payload)?;

        let mut mac =
            HmacSha256::new_from_slice(secret).expect("hmac accepts any key length");
        mac.update(&payload_bytes);
        let tag = mac.finalize().into_bytes();

        Ok(format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&payload_bytes),
            URL_SAFE_NO_PAD.encode(tag)
        ))
    }

    /// Verify with replay protection on upload tokens.
    pub async fn verify(&self, token: &str, kind: TokenKind) -> Option<TokenPayload> {
        self.verify_with(token, kind, true).await
    }

    /// Verify; `check_replay = false` skips nonce consumption. Download
    /// tokens never consume either way.
    pub async fn verify_with(
        &self,
        token: &str,
        kind: TokenKind,
        check_replay: bool,
    ) -> Option<TokenPayload> {
        let secret = self.secret.as_deref()?;

        let (payload_b64, tag_b64) = token.split_once('.')?;
        let payload_bytes = URL_SAFE_NO_PAD.decode(payload_b64).ok()?;
        let tag = URL_SAFE_NO_PAD.decode(tag_b64).ok()?;

        let mut mac =
            HmacSha256::new_from_slice(secret).expect("hmac accepts any key length");
        mac.update(&payload_bytes);
        // Constant-time comparison
        mac.verify_slice(&tag).ok()?;

        let payload: TokenPayload = serde_json::from_slice(&payload_bytes).ok()?;
        if payload.kind != kind {
            return None;
        }

        let now = chrono::Utc::now().timestamp_millis();
        if payload.expires_at < now {
            return None;
        }

        if payload.kind == TokenKind::Upload && check_replay {
            let remaining = Duration::from_millis((payload.expires_at - now) as u64);
            if !self.replay.check_and_consume(&payload.jti, remaining).await {
                tracing::debug!("upload token replay rejected (jti {})", payload.jti);
                return None;
            }
        }

        Some(payload)
    }
}

static GLOBAL: Lazy<RwLock<Option<Arc<TokenService>>>> = Lazy::new(|| RwLock::new(None));

/// Process-wide service, built from the environment on first use.
pub fn global() -> Arc<TokenService> {
    if let Some(service) = GLOBAL.read().as_ref() {
        return service.clone();
    }
    let mut slot = GLOBAL.write();
    slot.get_or_insert_with(|| Arc::new(TokenService::from_env(None)))
        .clone()
}

/// Drop the process-wide service; tests use this to re-read the environment.
pub fn reset_global() {
    *GLOBAL.write() = None;
}
