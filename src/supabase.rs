//! Supabase client: PostgREST row access and GoTrue authentication.

use crate::config::Settings;
use crate::error::StoreError;
use crate::store::{describe, Filter, RowStore};
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

/// Supabase client configuration.
#[derive(Clone)]
pub struct SupabaseClient {
    client: Client,
    base_url: String,
    service_role_key: String,
    anon_key: String,
}

impl SupabaseClient {
    pub fn new(base_url: &str, service_role_key: &str, anon_key: &str) -> Result<Self, StoreError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            service_role_key: service_role_key.to_string(),
            anon_key: anon_key.to_string(),
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, StoreError> {
        Self::new(
            &settings.supabase_url,
            &settings.service_role_key,
            &settings.anon_key,
        )
    }

    fn rest(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.service_role_key)
            .header("Authorization", format!("Bearer {}", self.service_role_key))
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    // ========================================================================
    // Auth
    // ========================================================================

    /// Register a new account with email and password.
    pub async fn sign_up(&self, credentials: &Credentials) -> Result<Session, StoreError> {
        let resp = self
            .client
            .post(self.auth_url("signup"))
            .header("apikey", &self.anon_key)
            .json(credentials)
            .send()
            .await?;
        decode(check(resp).await?, "sign-up").await
    }

    /// Exchange email and password for a session.
    pub async fn sign_in(&self, credentials: &Credentials) -> Result<Session, StoreError> {
        let resp = self
            .client
            .post(self.auth_url("token"))
            .query(&[("grant_type", "password")])
            .header("apikey", &self.anon_key)
            .json(credentials)
            .send()
            .await?;
        decode(check(resp).await?, "sign-in").await
    }

    /// Revoke the session behind `access_token`.
    pub async fn sign_out(&self, access_token: &str) -> Result<(), StoreError> {
        let resp = self
            .client
            .post(self.auth_url("logout"))
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    /// The user that owns `access_token`, if the token is still valid.
    pub async fn get_session(&self, access_token: &str) -> Result<Option<AuthUser>, StoreError> {
        let resp = self
            .client
            .get(self.auth_url("user"))
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .send()
            .await?;

        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Ok(None);
        }
        decode(check(resp).await?, "session").await.map(Some)
    }
}

#[async_trait::async_trait]
impl RowStore for SupabaseClient {
    async fn select(
        &self,
        table: &str,
        filters: &[Filter],
        columns: &str,
    ) -> Result<Vec<Value>, StoreError> {
        let mut query: Vec<(String, String)> = vec![("select".to_string(), columns.to_string())];
        query.extend(filter_query(filters));

        let resp = self
            .rest(self.client.get(self.table_url(table)))
            .query(&query)
            .send()
            .await?;

        let rows: Vec<Value> = decode(check(resp).await?, table).await?;
        debug!("Selected {} rows from {}", rows.len(), table);
        Ok(rows)
    }

    async fn insert(&self, table: &str, row: &Value) -> Result<Value, StoreError> {
        let resp = self
            .rest(self.client.post(self.table_url(table)))
            .header("Prefer", "return=representation")
            .json(row)
            .send()
            .await?;

        let mut rows: Vec<Value> = decode(check(resp).await?, table).await?;
        Ok(if rows.is_empty() {
            row.clone()
        } else {
            rows.swap_remove(0)
        })
    }

    async fn update(
        &self,
        table: &str,
        filters: &[Filter],
        patch: &Value,
    ) -> Result<(), StoreError> {
        let resp = self
            .rest(self.client.patch(self.table_url(table)))
            .query(&filter_query(filters))
            .header("Prefer", "return=representation")
            .json(patch)
            .send()
            .await?;

        let rows: Vec<Value> = decode(check(resp).await?, table).await?;
        if rows.is_empty() {
            return Err(StoreError::NotFound {
                table: table.to_string(),
                filter: describe(filters),
            });
        }
        debug!("Updated {} rows in {} ({})", rows.len(), table, describe(filters));
        Ok(())
    }
}

fn filter_query(filters: &[Filter]) -> Vec<(String, String)> {
    filters
        .iter()
        .map(|f| (f.column.clone(), format!("{}.{}", f.op.as_str(), f.operand())))
        .collect()
}

/// PostgREST / GoTrue error body.
#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: Option<Value>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// Turn a non-success response into a [`StoreError`].
async fn check(resp: Response) -> Result<Response, StoreError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let text = resp.text().await.unwrap_or_default();
    let parsed: Option<ApiError> = serde_json::from_str(&text).ok();
    let message = parsed
        .as_ref()
        .and_then(|e| {
            e.message
                .clone()
                .or_else(|| e.msg.clone())
                .or_else(|| e.error_description.clone())
        })
        .unwrap_or_else(|| text.clone());
    let code = parsed
        .as_ref()
        .and_then(|e| e.code.as_ref())
        .map(crate::store::cell_text);

    if code.as_deref() == Some("23505") || status == reqwest::StatusCode::CONFLICT {
        return Err(StoreError::UniqueViolation { message });
    }
    Err(StoreError::Rejected {
        status: status.as_u16(),
        message,
    })
}

async fn decode<T: serde::de::DeserializeOwned>(
    resp: Response,
    context: &str,
) -> Result<T, StoreError> {
    let bytes = resp.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|source| StoreError::Decode {
        context: context.to_string(),
        source,
    })
}

// ============================================================================
// Auth types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
    /// Profile fields stored as user metadata on sign-up.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub user: Option<AuthUser>,
}

#[cfg(test)]
impl Credentials {
    pub fn new(email: &str, password: &str) -> Self {
        Self {
            email: email.to_string(),
            password: password.to_string(),
            data: json!(null),
        }
    }
}
