use std::fmt;
use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use metrics::counter;
use rand::RngCore;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use sha2::Sha256;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::models::api_key::{self, ApiKeyStatus};
use crate::services::{ensure_owner_or_admin, load_user};
use crate::state_machine::ensure_transition;

type HmacSha256 = Hmac<Sha256>;

pub const PREFIX_LEN: usize = 8;
const SECRET_BYTES: usize = 32;
const MAX_PREFIX_ATTEMPTS: usize = 3;

/// A freshly generated key pair. The prefix is public and indexed; the
/// secret is only ever stored as a keyed hash.
#[derive(Clone, PartialEq, Eq)]
pub struct GeneratedKey {
    pub prefix: String,
    pub secret: String,
}

impl GeneratedKey {
    /// The full key handed to the caller: `<prefix>.<secret>`.
    pub fn full_key(&self) -> String {
        format!("{}.{}", self.prefix, self.secret)
    }
}

impl fmt::Debug for GeneratedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratedKey")
            .field("prefix", &self.prefix)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Prefix from a random UUID, secret from the OS-seeded thread RNG.
pub fn generate_key() -> GeneratedKey {
    let prefix = Uuid::new_v4().simple().to_string()[..PREFIX_LEN].to_string();

    let mut bytes = [0u8; SECRET_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);

    GeneratedKey {
        prefix,
        secret: URL_SAFE_NO_PAD.encode(bytes),
    }
}

/// Hex HMAC-SHA256 of the secret under the configured pepper.
pub fn hash_secret(pepper: &[u8], secret: &str) -> Result<String, ServiceError> {
    let mut mac = HmacSha256::new_from_slice(pepper)
        .map_err(|e| ServiceError::HashError(e.to_string()))?;
    mac.update(secret.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time comparison of a presented secret against a stored hash.
pub fn verify_secret(pepper: &[u8], secret: &str, stored_hash: &str) -> bool {
    let Ok(expected) = hex::decode(stored_hash) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(pepper) else {
        return false;
    };
    mac.update(secret.as_bytes());
    mac.verify_slice(&expected).is_ok()
}

/// Splits `<prefix>.<secret>`, rejecting anything with a malformed prefix.
pub fn split_key(presented: &str) -> Option<(&str, &str)> {
    let (prefix, secret) = presented.trim().split_once('.')?;
    let well_formed = prefix.len() == PREFIX_LEN
        && prefix.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        && !secret.is_empty();
    well_formed.then_some((prefix, secret))
}

/// A stored key plus the raw key, which is never retrievable again.
pub struct IssuedApiKey {
    pub record: api_key::Model,
    pub key: String,
}

impl fmt::Debug for IssuedApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedApiKey")
            .field("record", &self.record)
            .field("key", &"<redacted>")
            .finish()
    }
}

#[derive(Clone)]
pub struct ApiKeyService {
    db: Arc<DatabaseConnection>,
    pepper: Arc<Vec<u8>>,
    default_ttl: Option<Duration>,
}

impl ApiKeyService {
    pub fn new(db: Arc<DatabaseConnection>, pepper: &str, default_ttl: Option<Duration>) -> Self {
        Self {
            db,
            pepper: Arc::new(pepper.as_bytes().to_vec()),
            default_ttl,
        }
    }

    pub fn from_config(db: Arc<DatabaseConnection>, config: &AppConfig) -> Self {
        Self::new(db, &config.api_key_pepper, config.api_key_ttl())
    }

    /// Issues a key that expires after the configured default lifetime.
    pub async fn issue_key(
        &self,
        user_id: i64,
        key_name: &str,
    ) -> Result<IssuedApiKey, ServiceError> {
        self.issue_key_with_ttl(user_id, key_name, self.default_ttl).await
    }

    #[instrument(skip(self))]
    pub async fn issue_key_with_ttl(
        &self,
        user_id: i64,
        key_name: &str,
        ttl: Option<Duration>,
    ) -> Result<IssuedApiKey, ServiceError> {
        let owner = load_user(&*self.db, user_id).await?;
        if !owner.is_active {
            return Err(ServiceError::InvalidOperation(format!(
                "user {} is inactive",
                user_id
            )));
        }
        let key_name = key_name.trim();
        if key_name.is_empty() || key_name.len() > 100 {
            return Err(ServiceError::ValidationError(
                "key name must be 1 to 100 characters".to_string(),
            ));
        }

        let now = Utc::now();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let generated = generate_key();
            let record = api_key::ActiveModel {
                user_id: Set(user_id),
                key_name: Set(key_name.to_string()),
                key_prefix: Set(generated.prefix.clone()),
                key_hash: Set(hash_secret(&self.pepper, &generated.secret)?),
                status: Set(ApiKeyStatus::Active),
                last_used: Set(None),
                expires_at: Set(ttl.map(|ttl| now + ttl)),
                created_at: Set(now),
                ..Default::default()
            };

            match record.insert(&*self.db).await {
                Ok(record) => {
                    counter!("freightlink.api_keys.issued", 1);
                    info!(key_id = record.id, prefix = %record.key_prefix, "API key issued");
                    return Ok(IssuedApiKey {
                        record,
                        key: generated.full_key(),
                    });
                }
                Err(e) => {
                    let err =
                        ServiceError::from_write(e, || "api key prefix collision".to_string());
                    if err.is_conflict() && attempt < MAX_PREFIX_ATTEMPTS {
                        warn!(attempt, "API key prefix collided, regenerating");
                        continue;
                    }
                    error!("Failed to store API key: {}", err);
                    return Err(err);
                }
            }
        }
    }

    /// Authenticates a presented key at `now` and stamps `last_used`.
    ///
    /// Every failure surfaces as the same `Unauthorized` error; the specific
    /// reason only goes to the log.
    #[instrument(skip(self, presented))]
    pub async fn verify_key(
        &self,
        presented: &str,
        now: DateTime<Utc>,
    ) -> Result<api_key::Model, ServiceError> {
        let denied = |reason: &str| {
            counter!("freightlink.api_keys.verifications", 1, "outcome" => "denied");
            warn!(reason, "API key rejected");
            ServiceError::Unauthorized("invalid API key".to_string())
        };

        let Some((prefix, secret)) = split_key(presented) else {
            return Err(denied("malformed"));
        };

        let Some(found) = api_key::Entity::find()
            .filter(api_key::Column::KeyPrefix.eq(prefix))
            .one(&*self.db)
            .await?
        else {
            return Err(denied("unknown prefix"));
        };

        if !verify_secret(&self.pepper, secret, &found.key_hash) {
            return Err(denied("secret mismatch"));
        }
        if found.status != ApiKeyStatus::Active {
            return Err(denied("not active"));
        }
        if found.is_expired(now) {
            return Err(denied("expired"));
        }

        let mut active: api_key::ActiveModel = found.into();
        active.last_used = Set(Some(now));
        let stamped = active.update(&*self.db).await?;

        counter!("freightlink.api_keys.verifications", 1, "outcome" => "accepted");
        Ok(stamped)
    }

    pub async fn deactivate(
        &self,
        key_id: i64,
        actor_id: i64,
    ) -> Result<api_key::Model, ServiceError> {
        self.set_status(key_id, actor_id, ApiKeyStatus::Inactive).await
    }

    pub async fn reactivate(
        &self,
        key_id: i64,
        actor_id: i64,
    ) -> Result<api_key::Model, ServiceError> {
        self.set_status(key_id, actor_id, ApiKeyStatus::Active).await
    }

    pub async fn revoke(
        &self,
        key_id: i64,
        actor_id: i64,
    ) -> Result<api_key::Model, ServiceError> {
        self.set_status(key_id, actor_id, ApiKeyStatus::Revoked).await
    }

    #[instrument(skip(self))]
    async fn set_status(
        &self,
        key_id: i64,
        actor_id: i64,
        to: ApiKeyStatus,
    ) -> Result<api_key::Model, ServiceError> {
        let actor = load_user(&*self.db, actor_id).await?;
        let found = api_key::Entity::find_by_id(key_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("API key", key_id))?;
        ensure_owner_or_admin(&actor, &[found.user_id], "manage this API key")?;
        ensure_transition(found.status, to)?;

        let result = api_key::Entity::update_many()
            .col_expr(api_key::Column::Status, Expr::value(to))
            .filter(api_key::Column::Id.eq(key_id))
            .filter(api_key::Column::Status.eq(found.status))
            .exec(&*self.db)
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::Conflict(format!(
                "API key {} changed concurrently",
                key_id
            )));
        }

        info!(key_id, from = %found.status, to = %to, "API key status changed");
        api_key::Entity::find_by_id(key_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("API key", key_id))
    }

    pub async fn keys_for_user(&self, user_id: i64) -> Result<Vec<api_key::Model>, ServiceError> {
        Ok(api_key::Entity::find()
            .filter(api_key::Column::UserId.eq(user_id))
            .order_by_desc(api_key::Column::CreatedAt)
            .order_by_desc(api_key::Column::Id)
            .all(&*self.db)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PEPPER: &[u8] = b"unit-test-pepper-unit-test-pepper-0001";

    #[test]
    fn generated_keys_have_expected_shape() {
        let key = generate_key();
        assert_eq!(key.prefix.len(), PREFIX_LEN);
        assert!(key.prefix.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(URL_SAFE_NO_PAD.decode(&key.secret).unwrap().len(), SECRET_BYTES);
        assert!(!key.secret.contains('='));

        let full = key.full_key();
        assert_eq!(split_key(&full), Some((key.prefix.as_str(), key.secret.as_str())));
    }

    #[test]
    fn prefix_does_not_leak_secret() {
        let a = generate_key();
        let b = generate_key();
        assert_ne!(a.secret, b.secret);
        assert!(!a.secret.starts_with(&a.prefix));
    }

    #[test]
    fn stored_hash_verifies_only_the_secret() {
        let key = generate_key();
        let hash = hash_secret(PEPPER, &key.secret).unwrap();
        assert_eq!(hash.len(), 64);
        assert!(verify_secret(PEPPER, &key.secret, &hash));
        assert!(!verify_secret(PEPPER, "something-else", &hash));
        assert!(!verify_secret(b"another-pepper", &key.secret, &hash));
        assert!(!verify_secret(PEPPER, &key.secret, "zz-not-hex"));
    }

    #[test]
    fn malformed_keys_do_not_split() {
        assert_eq!(split_key("no-dot-here"), None);
        assert_eq!(split_key("ABCDEF12.secret"), None);
        assert_eq!(split_key("abc.secret"), None);
        assert_eq!(split_key("abcdef12."), None);
    }

    #[test]
    fn debug_output_redacts_secret() {
        let key = generate_key();
        let rendered = format!("{:?}", key);
        assert!(!rendered.contains(&key.secret));
    }
}
