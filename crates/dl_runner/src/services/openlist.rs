use std::path::Path;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Body;
use serde_json::json;
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::error::UploadError;

const SHORT_TIMEOUT: Duration = Duration::from_secs(10);
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Byte-level progress callback: (uploaded, total).
pub type ProgressFn = Box<dyn FnMut(u64, u64) + Send>;

/// Token-authenticated uploads to an openlist/alist instance.
#[derive(Debug, Clone)]
pub struct OpenlistClient {
    http: reqwest::Client,
    base_url: String,
}

impl OpenlistClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self { http, base_url }
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<String, UploadError> {
        let response: serde_json::Value = self
            .http
            .post(format!("{}/api/auth/login", self.base_url))
            .timeout(SHORT_TIMEOUT)
            .json(&json!({ "username": username, "password": password }))
            .send()
            .await?
            .json()
            .await?;

        if response["code"] != 200 {
            return Err(UploadError::Openlist(format!(
                "Login failed: {}",
                response["message"].as_str().unwrap_or("unknown error")
            )));
        }
        response["data"]["token"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| UploadError::Openlist("Login successful, but token not found".into()))
    }

    /// Creates the remote directory; an already-exists answer counts as
    /// success.
    pub async fn mkdir(&self, token: &str, remote_dir: &str) -> Result<(), UploadError> {
        let response: serde_json::Value = self
            .http
            .post(format!("{}/api/fs/mkdir", self.base_url))
            .timeout(SHORT_TIMEOUT)
            .header("Authorization", token)
            .json(&json!({ "path": remote_dir.trim_end_matches('/') }))
            .send()
            .await?
            .json()
            .await?;

        let message = response["message"].as_str().unwrap_or_default();
        match response["code"].as_i64() {
            Some(200) => Ok(()),
            Some(400) if message.contains("exist") => Ok(()),
            _ => Err(UploadError::Openlist(format!(
                "Directory creation failed: {message}"
            ))),
        }
    }

    /// Streaming PUT of one file into `remote_dir`, reporting byte progress.
    /// Returns the remote path of the uploaded file.
    pub async fn upload_file(
        &self,
        token: &str,
        local: &Path,
        remote_dir: &str,
        mut on_progress: ProgressFn,
    ) -> Result<String, UploadError> {
        let file_name = local
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.bin".to_string());
        let full_path = format!("{}/{}", remote_dir.trim_end_matches('/'), file_name);

        let total = tokio::fs::metadata(local).await?.len();
        let handle = tokio::fs::File::open(local).await?;
        let mut uploaded = 0u64;
        let stream = ReaderStream::new(handle).map(move |chunk| {
            if let Ok(bytes) = &chunk {
                uploaded += bytes.len() as u64;
                on_progress(uploaded, total);
            }
            chunk
        });

        debug!(file = %full_path, total, "Starting openlist upload");
        let response: serde_json::Value = self
            .http
            .put(format!("{}/api/fs/put", self.base_url))
            .timeout(UPLOAD_TIMEOUT)
            .header("Authorization", token)
            .header("File-Path", urlencoding::encode(&full_path).into_owned())
            .header("Content-Type", "application/octet-stream")
            .header("As-Task", "false")
            .body(Body::wrap_stream(stream))
            .send()
            .await?
            .json()
            .await?;

        if response["code"] == 200 {
            Ok(full_path)
        } else {
            Err(UploadError::Openlist(format!(
                "Upload failed: {}",
                response["message"].as_str().unwrap_or("unknown error")
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slashes_are_stripped() {
        let client = OpenlistClient::new(reqwest::Client::new(), "https://list.example.com///");
        assert_eq!(client.base_url, "https://list.example.com");
    }
}
