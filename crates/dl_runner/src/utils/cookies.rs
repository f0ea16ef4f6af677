use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use uuid::Uuid;

/// Domains a pasted cookie string is replicated onto. Browser cookie headers
/// carry no domain, so each pair is written once per supported site.
pub const COOKIE_DOMAINS: &[&str] = &[
    ".kemono.cr",
    ".kemono.su",
    ".coomer.st",
    ".coomer.su",
    ".pixiv.net",
    ".twitter.com",
];

/// A Netscape-format cookie jar written to a temp file for the duration of a
/// download. Removed on drop.
#[derive(Debug)]
pub struct CookieJar {
    path: PathBuf,
}

impl CookieJar {
    /// Rewrites a `name=value; name2=value2` cookie string into jar format.
    pub fn write(cookies: &str) -> std::io::Result<Self> {
        let path = std::env::temp_dir().join(format!("cookies_{}.txt", Uuid::new_v4()));
        fs::write(&path, render_jar(cookies))?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CookieJar {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn render_jar(cookies: &str) -> String {
    let mut content = String::from(
        "# Netscape HTTP Cookie File\n# http://curl.haxx.se/rfc/cookie_spec.html\n\n",
    );
    for cookie in cookies.split(';') {
        let Some((name, value)) = cookie.trim().split_once('=') else {
            continue;
        };
        for domain in COOKIE_DOMAINS {
            let _ = writeln!(content, "{domain}\tTRUE\t/\tFALSE\t0\t{name}\t{value}");
        }
    }
    content
}
