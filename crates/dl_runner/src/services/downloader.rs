use std::path::Path;
use std::sync::Arc;

use crate::config::Settings;
use crate::models::types::{DownloaderKind, TaskParams};
use crate::services::command::CommandSpec;
use crate::utils::cookies::CookieJar;

/// Builds the download command for a task. Returns the cookie jar guard when
/// one was written so the caller can keep it alive for the run.
#[derive(Debug)]
pub struct DownloaderService {
    settings: Arc<Settings>,
}

impl DownloaderService {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self { settings }
    }

    pub fn build(
        &self,
        params: &TaskParams,
        dest: &Path,
    ) -> std::io::Result<(CommandSpec, Option<CookieJar>)> {
        match params.downloader {
            DownloaderKind::KemonoDl => self.build_kemono_dl(params, dest),
            DownloaderKind::MegaDl => Ok((self.build_megadl(params, dest), None)),
            DownloaderKind::GalleryDl => self.build_gallery_dl(params, dest),
        }
    }

    fn build_kemono_dl(
        &self,
        params: &TaskParams,
        dest: &Path,
    ) -> std::io::Result<(CommandSpec, Option<CookieJar>)> {
        let python = self.settings.tool("python_bin", "python3");
        let mut spec = CommandSpec::new(python)
            .args(["-m", "kemono_dl", "--path"])
            .arg(dest.to_string_lossy())
            .arg(&params.url)
            .args(["--output", "{service}/{creator_name}/{post_title}/{filename}"]);

        let mut jar = None;
        if let Some(cookies) = params.cookies.as_deref() {
            let cookie_jar = CookieJar::write(cookies)?;
            spec = spec
                .arg("--cookies")
                .arg(cookie_jar.path().to_string_lossy());
            jar = Some(cookie_jar);
        } else {
            let user = self
                .settings
                .resolve(params.kemono_username.as_deref(), "kemono_username");
            let pass = self
                .settings
                .resolve(params.kemono_password.as_deref(), "kemono_password");
            if let (Some(user), Some(pass)) = (user, pass) {
                spec = spec.arg("--kemono-login").arg(user).secret_arg(pass);
            }
        }
        Ok((spec, jar))
    }

    fn build_megadl(&self, params: &TaskParams, dest: &Path) -> CommandSpec {
        let megadl = self.settings.tool("megadl_bin", "megadl");
        let mut spec = CommandSpec::new(megadl)
            .arg("--path")
            .arg(dest.to_string_lossy());
        if let Some(limit) = params.rate_limit.as_deref() {
            spec = spec.arg("--limit-speed").arg(limit);
        }
        spec.arg(&params.url)
    }

    fn build_gallery_dl(
        &self,
        params: &TaskParams,
        dest: &Path,
    ) -> std::io::Result<(CommandSpec, Option<CookieJar>)> {
        let gallery_dl = self.settings.tool("gallery_dl_bin", "gallery-dl");
        let mut spec = CommandSpec::new(gallery_dl)
            .arg("--verbose")
            .arg("--directory")
            .arg(dest.to_string_lossy());

        let mut jar = None;
        if let Some(cookies) = params.cookies.as_deref() {
            let cookie_jar = CookieJar::write(cookies)?;
            spec = spec
                .arg("--cookies")
                .arg(cookie_jar.path().to_string_lossy());
            jar = Some(cookie_jar);
        }

        if let Some(posts) = params.kemono_posts {
            spec = spec
                .arg("-o")
                .arg(format!("extractor.kemono.posts={posts}"));
        }
        if params.kemono_revisions {
            spec = spec.arg("-o").arg("extractor.kemono.revisions=true");
        }
        if params.pixiv_ugoira == Some(false) {
            spec = spec.arg("-o").arg("extractor.pixiv.ugoira=false");
        }
        if params.kemono_path_template {
            spec = spec.arg("-o").arg("directory=['{user}', '{title}']");
        }
        if let (Some(id), Some(secret)) = (
            params.deviantart_client_id.as_deref(),
            params.deviantart_client_secret.as_deref(),
        ) {
            spec = spec
                .arg("-o")
                .arg(format!("extractor.deviantart.client-id={id}"))
                .arg("-o")
                .secret_arg(format!("extractor.deviantart.client-secret={secret}"));
        }
        if let Some(proxy) = params.proxy.as_deref() {
            spec = spec.arg("--proxy").arg(proxy);
        }
        if let Some(limit) = params.rate_limit.as_deref() {
            spec = spec.arg("--limit-rate").arg(limit);
        }
        if let Some(extra) = self.settings.get("gallery_dl_args") {
            spec = spec.args(extra.split_whitespace().map(str::to_string));
        }
        Ok((spec.arg(&params.url), jar))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn service_with(settings: HashMap<String, String>) -> DownloaderService {
        DownloaderService::new(Arc::new(Settings::new(settings)))
    }

    fn base_params(url: &str) -> TaskParams {
        TaskParams {
            url: url.into(),
            upload_service: "gofile".into(),
            ..Default::default()
        }
    }

    #[test]
    fn gallery_dl_gets_engine_options_and_extra_args() {
        let service = service_with(HashMap::from([(
            "gallery_dl_args".to_string(),
            "--sleep 2".to_string(),
        )]));
        let mut params = base_params("https://kemono.su/patreon/user/1");
        params.kemono_posts = Some(25);
        params.kemono_revisions = true;
        params.kemono_path_template = true;

        let (spec, jar) = service
            .build(&params, Path::new("/tmp/dl/task"))
            .unwrap();
        assert!(jar.is_none());
        assert_eq!(spec.program, "gallery-dl");
        assert!(spec.args.contains(&"extractor.kemono.posts=25".to_string()));
        assert!(spec
            .args
            .contains(&"extractor.kemono.revisions=true".to_string()));
        assert!(spec
            .args
            .contains(&"directory=['{user}', '{title}']".to_string()));
        assert!(spec.args.contains(&"--sleep".to_string()));
        // URL always last so extra args cannot swallow it.
        assert_eq!(
            spec.args.last().map(String::as_str),
            Some("https://kemono.su/patreon/user/1")
        );
    }

    #[test]
    fn gallery_dl_cookie_string_becomes_a_jar_file() {
        let service = service_with(HashMap::new());
        let mut params = base_params("https://pixiv.net/en/artworks/1");
        params.cookies = Some("PHPSESSID=xyz".into());

        let (spec, jar) = service.build(&params, Path::new("/tmp/dl/t")).unwrap();
        let jar = jar.expect("cookie jar should be created");
        assert!(jar.path().exists());
        let idx = spec.args.iter().position(|a| a == "--cookies").unwrap();
        assert_eq!(spec.args[idx + 1], jar.path().to_string_lossy());
    }

    #[test]
    fn megadl_applies_rate_limit_and_url_last() {
        let service = service_with(HashMap::new());
        let mut params = base_params("https://mega.nz/file/abc");
        params.downloader = DownloaderKind::MegaDl;
        params.rate_limit = Some("512K".into());

        let (spec, _) = service.build(&params, Path::new("/tmp/dl/t")).unwrap();
        assert_eq!(spec.program, "megadl");
        assert!(spec.args.contains(&"--limit-speed".to_string()));
        assert_eq!(
            spec.args.last().map(String::as_str),
            Some("https://mega.nz/file/abc")
        );
    }

    #[test]
    fn kemono_dl_prefers_cookies_over_login() {
        let service = service_with(HashMap::from([
            ("kemono_username".to_string(), "stored-user".to_string()),
            ("kemono_password".to_string(), "stored-pass".to_string()),
        ]));
        let mut params = base_params("https://kemono.su/fanbox/user/2");
        params.downloader = DownloaderKind::KemonoDl;

        let (spec, _) = service.build(&params, Path::new("/tmp/dl/t")).unwrap();
        assert!(spec.args.contains(&"--kemono-login".to_string()));
        assert!(spec.args.contains(&"stored-pass".to_string()));
        assert!(!spec.display.contains("stored-pass"));

        params.cookies = Some("session=s".into());
        let (spec, jar) = service.build(&params, Path::new("/tmp/dl/t")).unwrap();
        assert!(jar.is_some());
        assert!(spec.args.contains(&"--cookies".to_string()));
        assert!(!spec.args.contains(&"--kemono-login".to_string()));
    }
}
