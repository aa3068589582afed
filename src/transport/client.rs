//! REST client for the GradEx API.

use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use super::Endpoints;
use crate::error::ApiError;
use crate::models::{DimensionScore, PostData, PreAnalysis, ScoredUser};
use crate::rubric::StructuredRubric;

/// Response of the extraction endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedDocument {
    #[serde(default)]
    pub text_and_image_analysis: String,
}

#[derive(Serialize)]
struct ThesisRequest<'a> {
    thesis: &'a str,
}

/// Thin typed wrapper around every REST call the client makes.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    endpoints: Endpoints,
    timeout_seconds: u64,
}

impl ApiClient {
    pub fn new(endpoints: Endpoints, timeout_seconds: u64) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()?;

        Ok(Self {
            http,
            endpoints,
            timeout_seconds,
        })
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Uploads a document for text and image extraction.
    pub async fn extract_document(&self, path: &Path) -> Result<ExtractedDocument, ApiError> {
        let part = file_part(path).await?;
        let form = Form::new().part("file", part);
        let url = self.endpoints.extract();

        let response = self
            .http
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.map_send_error(e, &url))?;

        self.decode(response, &url).await
    }

    /// Extracts name, degree and topic from the document text.
    pub async fn pre_analyze(&self, thesis: &str) -> Result<PreAnalysis, ApiError> {
        self.post_json(&self.endpoints.pre_analyze(), &ThesisRequest { thesis })
            .await
    }

    /// Persists a completed evaluation.
    pub async fn post_user_data(&self, data: &PostData) -> Result<(), ApiError> {
        let _: Value = self.post_json(&self.endpoints.post_user_data(), data).await?;
        Ok(())
    }

    /// Derives the dissertation's declared scope from its summary.
    pub async fn extract_scope(&self, thesis: &str) -> Result<Value, ApiError> {
        self.post_json(&self.endpoints.scope_extraction(), &ThesisRequest { thesis })
            .await
    }

    /// Rewrites the feedback so it only judges what is inside `scope`.
    pub async fn generate_scoped_feedback(
        &self,
        feedback: &str,
        scope: &Value,
    ) -> Result<Value, ApiError> {
        self.post_json(
            &self.endpoints.scoped_feedback(),
            &json!({ "feedback": feedback, "scope": scope }),
        )
        .await
    }

    pub async fn list_rubrics(&self) -> Result<Vec<StructuredRubric>, ApiError> {
        self.get_json(&self.endpoints.rubrics()).await
    }

    pub async fn fetch_rubric(&self, id: i64) -> Result<StructuredRubric, ApiError> {
        self.get_json(&self.endpoints.rubric(id)).await
    }

    /// Hands a set of documents to the server for queued processing.
    pub async fn submit_batch(&self, files: &[PathBuf], rubric: &Value) -> Result<Value, ApiError> {
        let mut form = Form::new();
        for path in files {
            form = form.part("files", file_part(path).await?);
        }
        form = form.text("rubric", rubric.to_string());

        let url = self.endpoints.batch_input();
        let response = self
            .http
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.map_send_error(e, &url))?;

        self.decode(response, &url).await
    }

    pub async fn list_users(&self) -> Result<Vec<ScoredUser>, ApiError> {
        self.get_json(&self.endpoints.users()).await
    }

    /// Replaces a user's dimension scores.
    pub async fn update_scores(
        &self,
        user_id: i64,
        scores: &[DimensionScore],
    ) -> Result<Value, ApiError> {
        let url = self.endpoints.user_scores(user_id);
        let response = self
            .http
            .put(&url)
            .json(scores)
            .send()
            .await
            .map_err(|e| self.map_send_error(e, &url))?;

        self.decode(response, &url).await
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ApiError> {
        debug!("GET {}", url);
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| self.map_send_error(e, url))?;

        self.decode(response, url).await
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        debug!("POST {}", url);
        let response = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e, url))?;

        self.decode(response, url).await
    }

    async fn decode<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
        url: &str,
    ) -> Result<T, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                endpoint: url.to_string(),
                status,
                body,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| self.map_send_error(e, url))
    }

    fn map_send_error(&self, e: reqwest::Error, url: &str) -> ApiError {
        if e.is_timeout() {
            ApiError::Timeout {
                endpoint: url.to_string(),
                seconds: self.timeout_seconds,
            }
        } else if e.is_connect() {
            ApiError::Connect(self.endpoints.api_base().to_string())
        } else {
            ApiError::Http(e)
        }
    }
}

async fn file_part(path: &Path) -> Result<Part, ApiError> {
    let bytes = tokio::fs::read(path).await.map_err(|source| ApiError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());

    Ok(Part::bytes(bytes)
        .file_name(file_name)
        .mime_str(mime_for(path))?)
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .as_deref()
    {
        Some("pdf") => "application/pdf",
        Some("docx") => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        _ => "application/octet-stream",
    }
}
