use std::{sync::Arc, time::Duration};

use serde_json::Value as Json;
use sqlx::{PgPool, Row};

use crate::{
    cache::RoutingCache,
    error::{Error, Result},
    model::{FindDeviceQuery, PrincipalKind, ResourceLink, TokenGrant},
    token::{DEFAULT_TOKEN_ENTROPY_BYTES, generate_token},
};

/// Whether `RefreshToken` mints a new refresh token or keeps handing back
/// the one the caller already has. Design Note open question (i): the
/// source is ambiguous, default is "preserve".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTokenPolicy {
    Preserve,
    Rotate,
}

impl Default for RefreshTokenPolicy {
    fn default() -> Self {
        Self::Preserve
    }
}

#[derive(Debug, Clone)]
pub struct RegistryOptions {
    pub token_entropy_bytes: usize,
    pub access_token_ttl_secs: u64,
    pub refresh_token_policy: RefreshTokenPolicy,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            token_entropy_bytes: DEFAULT_TOKEN_ENTROPY_BYTES,
            access_token_ttl_secs: 6000,
            refresh_token_policy: RefreshTokenPolicy::default(),
        }
    }
}

/// The narrow set of operations used by both daemons (spec §4.1). `Kind`
/// parameters collapse the Device/Client symmetric pairs the spec
/// describes (`ProvisionDevice/Client`, `RegisterDevice/Client`,
/// `DeleteDevice/Client`) into one call each.
#[async_trait::async_trait]
pub trait Registry: Send + Sync {
    async fn register_user(&self, username: &str, auth_provider: &str) -> Result<String>;

    async fn provision_mediator(&self, username: &str, user_token: &str) -> Result<String>;

    async fn provision_principal(
        &self,
        kind: PrincipalKind,
        uuid: &str,
        mediator_token: &str,
    ) -> Result<String>;

    async fn register_principal(
        &self,
        kind: PrincipalKind,
        uuid: &str,
        one_time_access_token: &str,
    ) -> Result<TokenGrant>;

    async fn refresh_token(
        &self,
        kind: PrincipalKind,
        principal_id: &str,
        user_id: &str,
        refresh_token: &str,
    ) -> Result<TokenGrant>;

    async fn update_session(
        &self,
        device_id: &str,
        user_id: &str,
        access_token: &str,
        pod_addr: &str,
        logged_in: bool,
    ) -> Result<u64>;

    async fn publish_resource(&self, device_id: &str, resources: Json) -> Result<()>;

    async fn find_device(&self, user_id: &str, query: &FindDeviceQuery) -> Result<Vec<ResourceLink>>;

    async fn delete_principal(
        &self,
        kind: PrincipalKind,
        id: &str,
        access_token: &str,
    ) -> Result<()>;
}

/// `sqlx`-backed registry over the logical schema from spec §6: `user`,
/// `mediator`, `token`, `device`, `client`, related by foreign keys.
pub struct PostgresRegistry {
    pool: PgPool,
    cache: Arc<dyn RoutingCache>,
    options: RegistryOptions,
}

impl PostgresRegistry {
    pub fn new(pool: PgPool, cache: Arc<dyn RoutingCache>, options: RegistryOptions) -> Self {
        Self { pool, cache, options }
    }

    fn principal_table(kind: PrincipalKind) -> &'static str {
        match kind {
            PrincipalKind::Device => "device",
            PrincipalKind::Client => "client",
        }
    }

    fn principal_column(kind: PrincipalKind) -> &'static str {
        match kind {
            PrincipalKind::Device => "device_uuid",
            PrincipalKind::Client => "client_uuid",
        }
    }
}

#[async_trait::async_trait]
impl Registry for PostgresRegistry {
    async fn register_user(&self, username: &str, auth_provider: &str) -> Result<String> {
        let user_token = generate_token(self.options.token_entropy_bytes);

        sqlx::query(
            "INSERT INTO \"user\" (username, auth_provider, user_token) VALUES ($1, $2, $3)",
        )
        .bind(username)
        .bind(auth_provider)
        .bind(&user_token)
        .execute(&self.pool)
        .await?;

        Ok(user_token)
    }

    async fn provision_mediator(&self, username: &str, user_token: &str) -> Result<String> {
        let row = sqlx::query("SELECT id FROM \"user\" WHERE username = $1 AND user_token = $2")
            .bind(username)
            .bind(user_token)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(Error::Unauthorized("username/userToken mismatch".into()))?;
        let user_id: i64 = row.try_get("id")?;

        let mediator_token = generate_token(self.options.token_entropy_bytes);
        sqlx::query(
            "INSERT INTO mediator (user_id, mediator_token, permissions) VALUES ($1, $2, 0)",
        )
        .bind(user_id)
        .bind(&mediator_token)
        .execute(&self.pool)
        .await?;

        Ok(mediator_token)
    }

    async fn provision_principal(
        &self,
        kind: PrincipalKind,
        uuid: &str,
        mediator_token: &str,
    ) -> Result<String> {
        let row = sqlx::query("SELECT id, user_id FROM mediator WHERE mediator_token = $1")
            .bind(mediator_token)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(Error::NotFound)?;
        let mediator_id: i64 = row.try_get("id")?;
        let user_id: i64 = row.try_get("user_id")?;

        let one_time_token = generate_token(self.options.token_entropy_bytes);

        // Design Note fix: token row + principal row in one transaction,
        // not two separate writes.
        let mut tx = self.pool.begin().await.map_err(Error::from)?;

        let token_row = sqlx::query("INSERT INTO token (access_token) VALUES ($1) RETURNING id")
            .bind(&one_time_token)
            .fetch_one(&mut *tx)
            .await?;
        let token_id: i64 = token_row.try_get("id")?;

        let table = Self::principal_table(kind);
        let column = Self::principal_column(kind);
        let sql = format!(
            "INSERT INTO {table} ({column}, user_id, mediator_id, token_id) VALUES ($1, $2, $3, $4)"
        );
        sqlx::query(&sql)
            .bind(uuid)
            .bind(user_id)
            .bind(mediator_id)
            .bind(token_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await.map_err(Error::from)?;
        Ok(one_time_token)
    }

    async fn register_principal(
        &self,
        kind: PrincipalKind,
        uuid: &str,
        one_time_access_token: &str,
    ) -> Result<TokenGrant> {
        let table = Self::principal_table(kind);
        let column = Self::principal_column(kind);
        let sql = format!(
            "SELECT p.user_id, p.token_id, t.access_token
             FROM {table} p JOIN token t ON t.id = p.token_id
             WHERE p.{column} = $1"
        );
        let row = sqlx::query(&sql)
            .bind(uuid)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(Error::NotFound)?;

        let stored_access_token: String = row.try_get("access_token")?;
        // Open question (ii): registration is rejected as Unauthorized when
        // the stored token no longer matches the one-time token supplied
        // (already registered, or never provisioned with this value).
        if stored_access_token != one_time_access_token {
            return Err(Error::Unauthorized("access token mismatch".into()));
        }

        let user_id: i64 = row.try_get("user_id")?;
        let token_id: i64 = row.try_get("token_id")?;

        let access_token = generate_token(self.options.token_entropy_bytes);
        let refresh_token = generate_token(self.options.token_entropy_bytes);
        let ttl = self.options.access_token_ttl_secs;

        sqlx::query(
            "UPDATE token SET access_token = $1, refresh_token = $2,
             expires_at = now() + make_interval(secs => $3) WHERE id = $4",
        )
        .bind(&access_token)
        .bind(&refresh_token)
        .bind(ttl as f64)
        .bind(token_id)
        .execute(&self.pool)
        .await?;

        Ok(TokenGrant {
            access_token,
            user_id: user_id.to_string(),
            refresh_token,
            ttl_secs: ttl,
        })
    }

    async fn refresh_token(
        &self,
        kind: PrincipalKind,
        principal_id: &str,
        user_id: &str,
        refresh_token: &str,
    ) -> Result<TokenGrant> {
        let table = Self::principal_table(kind);
        let column = Self::principal_column(kind);
        let sql = format!(
            "SELECT t.id FROM {table} p JOIN token t ON t.id = p.token_id
             WHERE p.{column} = $1 AND p.user_id = $2 AND t.refresh_token = $3"
        );
        let row = sqlx::query(&sql)
            .bind(principal_id)
            .bind(user_id.parse::<i64>().map_err(|_| Error::BadInput("userID".into()))?)
            .bind(refresh_token)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(Error::NotFound)?;
        let token_id: i64 = row.try_get("id")?;

        let new_access_token = generate_token(self.options.token_entropy_bytes);
        let new_refresh_token = match self.options.refresh_token_policy {
            RefreshTokenPolicy::Rotate => generate_token(self.options.token_entropy_bytes),
            RefreshTokenPolicy::Preserve => refresh_token.to_string(),
        };
        let ttl = self.options.access_token_ttl_secs;

        sqlx::query(
            "UPDATE token SET access_token = $1, refresh_token = $2,
             expires_at = now() + make_interval(secs => $3) WHERE id = $4",
        )
        .bind(&new_access_token)
        .bind(&new_refresh_token)
        .bind(ttl as f64)
        .bind(token_id)
        .execute(&self.pool)
        .await?;

        Ok(TokenGrant {
            access_token: new_access_token,
            user_id: user_id.to_string(),
            refresh_token: new_refresh_token,
            ttl_secs: ttl,
        })
    }

    async fn update_session(
        &self,
        device_id: &str,
        user_id: &str,
        access_token: &str,
        pod_addr: &str,
        logged_in: bool,
    ) -> Result<u64> {
        let row = sqlx::query(
            "SELECT t.access_token, t.expires_at
             FROM device d JOIN token t ON t.id = d.token_id
             WHERE d.device_uuid = $1 AND d.user_id = $2",
        )
        .bind(device_id)
        .bind(user_id.parse::<i64>().map_err(|_| Error::BadInput("userID".into()))?)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(Error::NotFound)?;

        let stored_access_token: String = row.try_get("access_token")?;
        if stored_access_token != access_token {
            return Err(Error::Unauthorized("access token mismatch".into()));
        }

        if logged_in {
            let expires_at: Option<chrono::DateTime<chrono::Utc>> = row.try_get("expires_at")?;
            let ttl = expires_at
                .map(|at| (at - chrono::Utc::now()).num_seconds().max(0) as u64)
                .unwrap_or(self.options.access_token_ttl_secs);

            self.cache.set_pod(device_id, pod_addr, Duration::from_secs(ttl.max(1))).await?;
            sqlx::query("UPDATE device SET logged_in = true WHERE device_uuid = $1")
                .bind(device_id)
                .execute(&self.pool)
                .await?;
            Ok(ttl)
        } else {
            self.cache.clear_pod(device_id).await?;
            sqlx::query("UPDATE device SET logged_in = false WHERE device_uuid = $1")
                .bind(device_id)
                .execute(&self.pool)
                .await?;
            Ok(0)
        }
    }

    async fn publish_resource(&self, device_id: &str, resources: Json) -> Result<()> {
        sqlx::query("UPDATE device SET published_resources = $1 WHERE device_uuid = $2")
            .bind(resources)
            .bind(device_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_device(&self, user_id: &str, query: &FindDeviceQuery) -> Result<Vec<ResourceLink>> {
        let rows = sqlx::query(
            "SELECT device_uuid, published_resources FROM device
             WHERE user_id = $1 ORDER BY device_uuid",
        )
        .bind(user_id.parse::<i64>().map_err(|_| Error::BadInput("userID".into()))?)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::new();
        for row in rows {
            let device_id: String = row.try_get("device_uuid")?;
            let resources: Json = row.try_get("published_resources")?;
            out.extend(filter_links(&device_id, &resources, query));
        }
        Ok(out)
    }

    async fn delete_principal(
        &self,
        kind: PrincipalKind,
        id: &str,
        access_token: &str,
    ) -> Result<()> {
        let table = Self::principal_table(kind);
        let column = Self::principal_column(kind);
        let sql = format!(
            "DELETE FROM {table} p USING token t
             WHERE p.token_id = t.id AND p.{column} = $1 AND t.access_token = $2
             RETURNING t.id"
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(access_token)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(Error::NotFound)?;
        let token_id: i64 = row.try_get("id")?;

        sqlx::query("DELETE FROM token WHERE id = $1")
            .bind(token_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Pulls the OCF links out of a device's `published_resources` JSON blob,
/// filtering by `rt`/`if`/`href`/`anchor` and preserving insertion order
/// (spec §4.1, `FindDevice` tie-break). Shared with [`crate::fake::InMemoryRegistry`]
/// so both implementations of `find_device` apply the same AND-over-specified-
/// fields semantics.
pub(crate) fn filter_links(device_id: &str, resources: &Json, query: &FindDeviceQuery) -> Vec<ResourceLink> {
    let links = resources.get("links").and_then(Json::as_array).cloned().unwrap_or_default();

    links
        .into_iter()
        .filter_map(|link| {
            let href = link.get("href")?.as_str()?.to_string();
            let rt = string_array(link.get("rt"));
            let if_ = string_array(link.get("if"));
            let anchor = link.get("anchor").and_then(Json::as_str).map(str::to_string);

            if query.href.as_deref().is_none_or(|h| h == href)
                && query.rt.as_deref().is_none_or(|rt_q| rt.iter().any(|r| r == rt_q))
                && query.if_.as_deref().is_none_or(|if_q| if_.iter().any(|i| i == if_q))
                && query.anchor.as_deref().is_none_or(|a| anchor.as_deref() == Some(a))
            {
                Some(ResourceLink { device_id: device_id.to_string(), href, rt, if_, anchor })
            } else {
                None
            }
        })
        .collect()
}

fn string_array(value: Option<&Json>) -> Vec<String> {
    value
        .and_then(Json::as_array)
        .map(|arr| arr.iter().filter_map(Json::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}
