use std::path::Path;

use reqwest::multipart::{Form, Part};
use reqwest::Body;
use tokio_util::io::ReaderStream;
use tracing::info;

use crate::error::UploadError;

const SERVERS_URL: &str = "https://api.gofile.io/servers";
const FALLBACK_SERVER: &str = "store1";

/// Direct gofile.io uploads. Anonymous uploads are allowed; a token plus
/// folder id targets an account folder instead.
#[derive(Debug, Clone)]
pub struct GofileClient {
    http: reqwest::Client,
}

impl GofileClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Uploads one file and returns its download page link. `log` receives
    /// human-readable progress lines.
    pub async fn upload(
        &self,
        file: &Path,
        token: Option<&str>,
        folder_id: Option<&str>,
        mut log: impl FnMut(&str),
    ) -> Result<String, UploadError> {
        log("Fetching Gofile server...");
        let server = match self.best_server().await {
            Some(server) => server,
            None => {
                log("Failed to fetch servers, using default.");
                FALLBACK_SERVER.to_string()
            }
        };
        log(&format!("Uploading to {server}..."));

        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.bin".to_string());
        let handle = tokio::fs::File::open(file).await?;
        let part = Part::stream(Body::wrap_stream(ReaderStream::new(handle)))
            .file_name(file_name.clone());

        let mut form = Form::new().part("file", part);
        if let Some(token) = token {
            form = form.text("token", token.to_string());
        }
        if let Some(folder_id) = folder_id {
            form = form.text("folderId", folder_id.to_string());
        }

        let response: serde_json::Value = self
            .http
            .post(format!("https://{server}.gofile.io/uploadFile"))
            .multipart(form)
            .send()
            .await?
            .json()
            .await?;

        if response["status"] == "ok" {
            let link = response["data"]["downloadPage"]
                .as_str()
                .ok_or_else(|| UploadError::Gofile("Response missing downloadPage".into()))?
                .to_string();
            info!(file = %file_name, link = %link, "Gofile upload complete");
            Ok(link)
        } else {
            Err(UploadError::Gofile(response.to_string()))
        }
    }

    async fn best_server(&self) -> Option<String> {
        let response: serde_json::Value =
            self.http.get(SERVERS_URL).send().await.ok()?.json().await.ok()?;
        if response["status"] != "ok" {
            return None;
        }
        response["data"]["servers"]
            .as_array()?
            .first()?
            .get("name")?
            .as_str()
            .map(str::to_string)
    }
}
