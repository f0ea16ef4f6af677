use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::config::Settings;
use crate::error::UploadError;
use crate::models::types::TaskParams;
use crate::services::command::{CommandRunner, CommandSpec};

/// Resolved credentials for one rclone remote, ready to render.
#[derive(Debug, Clone)]
pub enum RemoteSpec {
    Webdav {
        url: String,
        user: String,
        obscured_pass: String,
    },
    S3 {
        provider: String,
        access_key_id: String,
        secret_access_key: String,
        region: String,
        endpoint: Option<String>,
    },
    B2 {
        account: String,
        key: String,
    },
}

/// Renders the rclone config for one remote. Credentials end up on disk, so
/// the caller writes the result under the private config dir only.
pub fn render_config(service: &str, remote: &RemoteSpec) -> String {
    let mut content = format!("[remote]\ntype = {service}\n");
    match remote {
        RemoteSpec::Webdav {
            url,
            user,
            obscured_pass,
        } => {
            content.push_str(&format!("url = {url}\n"));
            content.push_str("vendor = other\n");
            content.push_str(&format!("user = {user}\n"));
            content.push_str(&format!("pass = {obscured_pass}\n"));
        }
        RemoteSpec::S3 {
            provider,
            access_key_id,
            secret_access_key,
            region,
            endpoint,
        } => {
            content.push_str(&format!("provider = {provider}\n"));
            content.push_str(&format!("access_key_id = {access_key_id}\n"));
            content.push_str(&format!("secret_access_key = {secret_access_key}\n"));
            content.push_str(&format!("region = {region}\n"));
            if let Some(endpoint) = endpoint {
                content.push_str(&format!("endpoint = {endpoint}\n"));
            }
        }
        RemoteSpec::B2 { account, key } => {
            content.push_str(&format!("account = {account}\n"));
            content.push_str(&format!("key = {key}\n"));
        }
    }
    content
}

/// Per-task rclone config file. Removed on drop so credentials never outlive
/// the upload, whichever way it ends.
#[derive(Debug)]
pub struct RcloneConfigFile {
    path: PathBuf,
}

impl RcloneConfigFile {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RcloneConfigFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[derive(Debug)]
pub struct RcloneUploader {
    settings: Arc<Settings>,
    runner: Arc<CommandRunner>,
}

impl RcloneUploader {
    pub fn new(settings: Arc<Settings>, runner: Arc<CommandRunner>) -> Self {
        Self { settings, runner }
    }

    fn rclone_bin(&self) -> String {
        self.settings.tool("rclone_bin", "rclone")
    }

    /// Resolves credentials (request override > stored > environment) and
    /// writes the per-task config under a 0700 temp directory.
    pub async fn write_config(
        &self,
        task_id: Uuid,
        service: &str,
        params: &TaskParams,
    ) -> Result<RcloneConfigFile, UploadError> {
        let remote = self.resolve_remote(service, params).await?;
        let content = render_config(service, &remote);

        let dir = std::env::temp_dir().join("dl_runner_rclone");
        create_private_dir(&dir)?;
        let path = dir.join(format!("{task_id}.conf"));
        fs::write(&path, content)?;
        debug!(task_id = %task_id, service, "Wrote rclone config");
        Ok(RcloneConfigFile { path })
    }

    async fn resolve_remote(
        &self,
        service: &str,
        params: &TaskParams,
    ) -> Result<RemoteSpec, UploadError> {
        match service {
            "webdav" => {
                let url = self
                    .settings
                    .resolve(params.webdav_url.as_deref(), "webdav_url")
                    .ok_or(UploadError::MissingCredentials("webdav"))?;
                let user = self
                    .settings
                    .resolve(params.webdav_user.as_deref(), "webdav_user")
                    .ok_or(UploadError::MissingCredentials("webdav"))?;
                let pass = self
                    .settings
                    .resolve(params.webdav_pass.as_deref(), "webdav_pass")
                    .ok_or(UploadError::MissingCredentials("webdav"))?;
                Ok(RemoteSpec::Webdav {
                    url,
                    user,
                    obscured_pass: self.obscure(&pass).await?,
                })
            }
            "s3" => Ok(RemoteSpec::S3 {
                provider: self
                    .settings
                    .resolve_or(params.s3_provider.as_deref(), "s3_provider", "AWS"),
                access_key_id: self
                    .settings
                    .resolve(params.s3_access_key_id.as_deref(), "s3_access_key_id")
                    .ok_or(UploadError::MissingCredentials("s3"))?,
                secret_access_key: self
                    .settings
                    .resolve(
                        params.s3_secret_access_key.as_deref(),
                        "s3_secret_access_key",
                    )
                    .ok_or(UploadError::MissingCredentials("s3"))?,
                region: self
                    .settings
                    .resolve(params.s3_region.as_deref(), "s3_region")
                    .ok_or(UploadError::MissingCredentials("s3"))?,
                endpoint: self
                    .settings
                    .resolve(params.s3_endpoint.as_deref(), "s3_endpoint"),
            }),
            "b2" => Ok(RemoteSpec::B2 {
                account: self
                    .settings
                    .resolve(params.b2_account_id.as_deref(), "b2_account_id")
                    .ok_or(UploadError::MissingCredentials("b2"))?,
                key: self
                    .settings
                    .resolve(params.b2_application_key.as_deref(), "b2_application_key")
                    .ok_or(UploadError::MissingCredentials("b2"))?,
            }),
            // Any other service name is handed to rclone as an unauthenticated
            // remote type; rclone itself rejects what it cannot serve.
            other => Err(UploadError::Rclone(format!(
                "No rclone credential mapping for service '{other}'"
            ))),
        }
    }

    async fn obscure(&self, password: &str) -> Result<String, UploadError> {
        let output = tokio::process::Command::new(self.rclone_bin())
            .arg("obscure")
            .arg(password)
            .output()
            .await?;
        if !output.status.success() {
            return Err(UploadError::Rclone("Failed to obscure password".into()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// `rclone copyto` of a single archive to `remote:<dest>`.
    pub async fn copy_file(
        &self,
        task_id: Uuid,
        config: &RcloneConfigFile,
        file: &Path,
        remote_dest: &str,
        bwlimit: Option<&str>,
        log_path: &Path,
    ) -> Result<(), UploadError> {
        let spec = self
            .base_spec("copyto", config)
            .arg(file.to_string_lossy())
            .arg(format!("remote:{remote_dest}"));
        let spec = apply_bwlimit(spec, bwlimit);
        self.runner.run(task_id, &spec, log_path).await?;
        Ok(())
    }

    /// `rclone copy` of the whole download directory to `remote:<dest>`.
    pub async fn copy_dir(
        &self,
        task_id: Uuid,
        config: &RcloneConfigFile,
        dir: &Path,
        remote_dest: &str,
        bwlimit: Option<&str>,
        log_path: &Path,
    ) -> Result<(), UploadError> {
        let spec = self
            .base_spec("copy", config)
            .arg(dir.to_string_lossy())
            .arg(format!("remote:{remote_dest}"));
        let spec = apply_bwlimit(spec, bwlimit);
        self.runner.run(task_id, &spec, log_path).await?;
        Ok(())
    }

    fn base_spec(&self, verb: &str, config: &RcloneConfigFile) -> CommandSpec {
        CommandSpec::new(self.rclone_bin())
            .arg(verb)
            .arg("--config")
            .arg(config.path().to_string_lossy())
    }
}

fn apply_bwlimit(spec: CommandSpec, bwlimit: Option<&str>) -> CommandSpec {
    let spec = spec.args(["-P", "--log-level=INFO", "--retries", "5"]);
    match bwlimit {
        Some(limit) => spec.arg("--bwlimit").arg(limit),
        None => spec,
    }
}

fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::create_dir_all(dir)?;
    fs::set_permissions(dir, fs::Permissions::from_mode(0o700))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webdav_config_carries_obscured_pass_and_vendor() {
        let content = render_config(
            "webdav",
            &RemoteSpec::Webdav {
                url: "https://dav.example.com/remote.php".into(),
                user: "alice".into(),
                obscured_pass: "AbCdEf".into(),
            },
        );
        assert_eq!(
            content,
            "[remote]\ntype = webdav\nurl = https://dav.example.com/remote.php\nvendor = other\nuser = alice\npass = AbCdEf\n"
        );
    }

    #[test]
    fn s3_config_omits_endpoint_when_unset() {
        let content = render_config(
            "s3",
            &RemoteSpec::S3 {
                provider: "AWS".into(),
                access_key_id: "AKIA".into(),
                secret_access_key: "secret".into(),
                region: "us-east-1".into(),
                endpoint: None,
            },
        );
        assert!(content.contains("provider = AWS\n"));
        assert!(content.contains("region = us-east-1\n"));
        assert!(!content.contains("endpoint"));

        let with_endpoint = render_config(
            "s3",
            &RemoteSpec::S3 {
                provider: "Minio".into(),
                access_key_id: "AKIA".into(),
                secret_access_key: "secret".into(),
                region: "us-east-1".into(),
                endpoint: Some("https://minio.local:9000".into()),
            },
        );
        assert!(with_endpoint.contains("endpoint = https://minio.local:9000\n"));
    }

    #[test]
    fn b2_config_renders_account_and_key() {
        let content = render_config(
            "b2",
            &RemoteSpec::B2 {
                account: "0001".into(),
                key: "K000".into(),
            },
        );
        assert_eq!(
            content,
            "[remote]\ntype = b2\naccount = 0001\nkey = K000\n"
        );
    }
}
