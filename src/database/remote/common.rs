// Shared types and utilities for remote Supabase operations

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use super::payload::WireRow;
use super::rows;
use crate::models::sync::SyncTable;

/// Error type for Supabase sync operations
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// HTTP request failed (network error, timeout)
    #[error("Request failed: {0}")]
    RequestFailed(String),
    /// Supabase API returned an error
    #[error("Supabase API error {status}: {message}")]
    ApiError { status: u16, message: String },
    /// Failed to parse response
    #[error("Parse error: {0}")]
    ParseError(String),
    /// Update/delete matched no row
    #[error("{table} row {id} not found")]
    NotFound { table: SyncTable, id: String },
}

/// The remote relational backend, one table per synced collection
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Create a row and return its server-assigned id
    async fn insert(
        &self,
        table: SyncTable,
        row: &WireRow,
        access_token: &str,
    ) -> Result<String, SyncError>;

    /// Update the row with server id `id`
    async fn update(
        &self,
        table: SyncTable,
        id: &str,
        row: &WireRow,
        access_token: &str,
    ) -> Result<(), SyncError>;

    /// Delete the row with server id `id`
    async fn delete(&self, table: SyncTable, id: &str, access_token: &str)
        -> Result<(), SyncError>;

    /// `select * where user_id = :user_id`
    async fn select_owned(
        &self,
        table: SyncTable,
        user_id: &str,
        access_token: &str,
    ) -> Result<Vec<Value>, SyncError>;
}

/// Response wrapper for Supabase write operations with RETURNING
#[derive(Debug, Deserialize)]
struct ReturnedId {
    #[serde(deserialize_with = "rows::server_id")]
    id: String,
}

/// Supabase client configuration
pub struct SupabaseClient {
    client: Client,
    base_url: String,
    anon_key: String,
}

impl SupabaseClient {
    /// Create a new Supabase client. `timeout` bounds every request.
    pub fn new(base_url: String, anon_key: String, timeout: Duration) -> Result<Self, SyncError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::RequestFailed(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key,
        })
    }

    fn table_url(&self, table: SyncTable) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authed(&self, request: RequestBuilder, access_token: &str) -> RequestBuilder {
        request
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", access_token))
    }

    async fn send(request: RequestBuilder) -> Result<Response, SyncError> {
        let res = request
            .send()
            .await
            .map_err(|e| SyncError::RequestFailed(e.to_string()))?;

        if !res.status().is_success() {
            let status = res.status().as_u16();
            let text = res.text().await.unwrap_or_default();
            return Err(SyncError::ApiError {
                status,
                message: text,
            });
        }
        Ok(res)
    }

    async fn returned_ids(res: Response) -> Result<Vec<ReturnedId>, SyncError> {
        let body = res
            .text()
            .await
            .map_err(|e| SyncError::ParseError(e.to_string()))?;

        serde_json::from_str(&body)
            .map_err(|e| SyncError::ParseError(format!("Failed to parse response: {}", e)))
    }
}

#[async_trait]
impl RemoteBackend for SupabaseClient {
    async fn insert(
        &self,
        table: SyncTable,
        row: &WireRow,
        access_token: &str,
    ) -> Result<String, SyncError> {
        let request = self
            .client
            .post(self.table_url(table))
            .query(&[("select", "id")])
            .header("Content-Type", "application/json")
            .header("Prefer", "return=representation")
            .json(row);

        let res = Self::send(self.authed(request, access_token)).await?;

        // Response is an array with one element
        Self::returned_ids(res)
            .await?
            .pop()
            .map(|r| r.id)
            .ok_or_else(|| SyncError::ParseError("No ID returned from insert".to_string()))
    }

    async fn update(
        &self,
        table: SyncTable,
        id: &str,
        row: &WireRow,
        access_token: &str,
    ) -> Result<(), SyncError> {
        let request = self
            .client
            .patch(self.table_url(table))
            .query(&[("id", format!("eq.{}", id)), ("select", "id".to_string())])
            .header("Content-Type", "application/json")
            .header("Prefer", "return=representation")
            .json(row);

        let res = Self::send(self.authed(request, access_token)).await?;

        // PostgREST answers 200 with an empty array when no row matched
        if Self::returned_ids(res).await?.is_empty() {
            return Err(SyncError::NotFound {
                table,
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn delete(
        &self,
        table: SyncTable,
        id: &str,
        access_token: &str,
    ) -> Result<(), SyncError> {
        let request = self
            .client
            .delete(self.table_url(table))
            .query(&[("id", format!("eq.{}", id)), ("select", "id".to_string())])
            .header("Prefer", "return=representation");

        let res = Self::send(self.authed(request, access_token)).await?;

        if Self::returned_ids(res).await?.is_empty() {
            return Err(SyncError::NotFound {
                table,
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn select_owned(
        &self,
        table: SyncTable,
        user_id: &str,
        access_token: &str,
    ) -> Result<Vec<Value>, SyncError> {
        let request = self
            .client
            .get(self.table_url(table))
            .query(&[("select", "*".to_string()), ("user_id", format!("eq.{}", user_id))]);

        let res = Self::send(self.authed(request, access_token)).await?;
        let body = res
            .text()
            .await
            .map_err(|e| SyncError::ParseError(e.to_string()))?;

        serde_json::from_str(&body)
            .map_err(|e| SyncError::ParseError(format!("Failed to parse {} rows: {}", table, e)))
    }
}
