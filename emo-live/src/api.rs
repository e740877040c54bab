//! REST calls to the emotion backend: login and single-image prediction.

use std::path::Path;
use std::sync::Arc;

use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use emo_core::CredentialProvider;

/// Errors from the REST helpers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not logged in")]
    Unauthenticated,
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

/// Body of a successful `/auth/login`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AuthResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// Body of a successful `/predict`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PredictionResponse {
    #[serde(alias = "emotion_name")]
    pub emotion: String,
    pub confidence: f64,
    #[serde(default, alias = "model_version_tag")]
    pub model_version: Option<String>,
    #[serde(default)]
    pub processing_time_ms: Option<f64>,
}

/// Thin client over the backend REST API.
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    credentials: Arc<dyn CredentialProvider>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            credentials,
        }
    }

    /// Exchange a username and password for an access token.
    pub async fn login(&self, username: &str, password: &str) -> Result<AuthResponse, ApiError> {
        let url = self.endpoint("/auth/login");
        info!("logging in as {username}");
        let response = self
            .client
            .post(&url)
            .json(&LoginRequest { username, password })
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|source| ApiError::Http {
                url: url.clone(),
                source,
            })?;

        response
            .json::<AuthResponse>()
            .await
            .map_err(|source| ApiError::Http { url, source })
    }

    /// Upload one image file for classification.
    pub async fn predict(&self, path: &Path) -> Result<PredictionResponse, ApiError> {
        let token = self
            .credentials
            .access_token()
            .ok_or(ApiError::Unauthenticated)?;
        let url = self.endpoint("/predict");

        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "frame.jpg".into());
        debug!("uploading {file_name} ({} bytes)", bytes.len());

        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(mime_for(path))
            .map_err(|source| ApiError::Http {
                url: url.clone(),
                source,
            })?;

        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .multipart(Form::new().part("file", part))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|source| ApiError::Http {
                url: url.clone(),
                source,
            })?;

        response
            .json::<PredictionResponse>()
            .await
            .map_err(|source| ApiError::Http { url, source })
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("png") => "image/png",
        _ => "image/jpeg",
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use emo_core::StaticToken;

    #[test]
    fn endpoint_joins_cleanly() {
        let api = ApiClient::new("http://localhost:8000/api/", Arc::new(StaticToken::none()));
        assert_eq!(api.endpoint("/predict"), "http://localhost:8000/api/predict");
        assert_eq!(
            api.endpoint("auth/login"),
            "http://localhost:8000/api/auth/login"
        );
    }

    #[test]
    fn mime_from_extension() {
        assert_eq!(mime_for(Path::new("a.PNG")), "image/png");
        assert_eq!(mime_for(Path::new("a.jpeg")), "image/jpeg");
        assert_eq!(mime_for(Path::new("a")), "image/jpeg");
    }

    #[test]
    fn prediction_response_accepts_wire_names() {
        let r: PredictionResponse = serde_json::from_str(
            r#"{"emotion_name":"fear","confidence":0.61,"model_version_tag":"v3","processing_time_ms":12}"#,
        )
        .unwrap();
        assert_eq!(r.emotion, "fear");
        assert_eq!(r.model_version.as_deref(), Some("v3"));

        let r: PredictionResponse =
            serde_json::from_str(r#"{"emotion":"neutral","confidence":0.5}"#).unwrap();
        assert!(r.processing_time_ms.is_none());
    }

    #[test]
    fn auth_response_shape() {
        let r: AuthResponse = serde_json::from_str(
            r#"{"access_token":"abc","token_type":"bearer","expires_in":900}"#,
        )
        .unwrap();
        assert_eq!(r.access_token, "abc");
        assert_eq!(r.expires_in, Some(900));
    }

    #[tokio::test]
    async fn predict_requires_token() {
        let api = ApiClient::new("http://localhost:1", Arc::new(StaticToken::none()));
        let err = api.predict(Path::new("missing.jpg")).await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthenticated));
    }
}
