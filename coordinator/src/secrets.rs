//! Credential lookup for the search engine.
//!
//! Secrets come from Bitwarden Secrets Manager when a machine-account token
//! (`BWS_ACCESS_TOKEN`) is configured, otherwise from a plain environment
//! variable so local runs need no Bitwarden account.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

/// Where one secret lives: a Bitwarden id (overridable through an env var)
/// and the environment variable consulted as fallback.
pub struct SecretRef {
    pub id_var: &'static str,
    pub default_id: &'static str,
    pub env_fallback: &'static str,
}

impl SecretRef {
    fn id(&self) -> String {
        std::env::var(self.id_var).unwrap_or_else(|_| self.default_id.to_string())
    }
}

/// Password for the search engine's basic auth user.
pub const ENGINE_PASSWORD: SecretRef = SecretRef {
    id_var: "BWS_ENGINE_PASSWORD_ID",
    default_id: "search-engine-password",
    env_fallback: "DASHBOARD_ENGINE_PASSWORD",
};

#[derive(Deserialize)]
struct BwsSecretResponse {
    value: String,
}

/// Bitwarden Secrets Manager client with an environment fallback.
pub struct SecretsClient {
    access_token: Option<String>,
    api_url: String,
    http: reqwest::Client,
}

impl SecretsClient {
    /// Token from `BWS_ACCESS_TOKEN`, API base from `BWS_API_URL` (default
    /// `https://api.bitwarden.com`).
    pub fn from_env() -> Self {
        let api_url = std::env::var("BWS_API_URL")
            .unwrap_or_else(|_| "https://api.bitwarden.com".to_string());
        Self::new(std::env::var("BWS_ACCESS_TOKEN").ok(), api_url)
    }

    /// Without a token every lookup goes straight to the fallback variable.
    pub fn new(access_token: Option<String>, api_url: String) -> Self {
        Self {
            access_token,
            api_url,
            http: reqwest::Client::new(),
        }
    }

    /// Bitwarden first when a token is present, then the fallback variable.
    pub async fn resolve(&self, secret: &SecretRef) -> Result<String> {
        let id = secret.id();
        if let Some(token) = &self.access_token {
            match self.fetch(token, &id).await {
                Ok(value) => return Ok(value),
                Err(e) => tracing::warn!(
                    secret_id = %id,
                    error = %e,
                    "Bitwarden lookup failed, falling back to env var"
                ),
            }
        }

        std::env::var(secret.env_fallback).with_context(|| {
            format!(
                "Secret '{id}' not found in Bitwarden and env var '{}' is not set",
                secret.env_fallback
            )
        })
    }

    async fn fetch(&self, token: &str, id: &str) -> Result<String> {
        let resp = self
            .http
            .get(format!("{}/secrets/{id}", self.api_url))
            .bearer_auth(token)
            .send()
            .await
            .context("HTTP request to Bitwarden Secrets Manager failed")?;

        if !resp.status().is_success() {
            return Err(anyhow!("Bitwarden API returned status {}", resp.status()));
        }

        let body: BwsSecretResponse = resp
            .json()
            .await
            .context("Failed to parse Bitwarden response")?;
        Ok(body.value)
    }
}

/// Resolve `secret` with a client configured from the environment.
pub async fn get_secret(secret: &SecretRef) -> Result<String> {
    SecretsClient::from_env().resolve(secret).await
}
