use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::config::{Settings, TaskPaths};
use crate::error::ArchiveError;
use crate::services::command::{CommandRunner, CommandSpec};

/// Drives `tar | zstd` over the downloaded directory. The pipeline runs under
/// one `sh -c` so the whole thing shares a process group and pause/cancel
/// signals reach both ends.
#[derive(Debug)]
pub struct Archiver {
    settings: Arc<Settings>,
    runner: Arc<CommandRunner>,
    paths: TaskPaths,
}

impl Archiver {
    pub fn new(settings: Arc<Settings>, runner: Arc<CommandRunner>, paths: TaskPaths) -> Self {
        Self {
            settings,
            runner,
            paths,
        }
    }

    /// Produces one archive, or several volumes when `split_size` is set.
    /// Returns the archive paths in creation order.
    pub async fn compress(
        &self,
        task_id: Uuid,
        source: &Path,
        split_size: Option<u64>,
        log_path: &Path,
    ) -> Result<Vec<PathBuf>, ArchiveError> {
        match split_size {
            None => self.compress_single(task_id, source, log_path).await,
            Some(max_bytes) => {
                self.compress_chunks(task_id, source, max_bytes, log_path)
                    .await
            }
        }
    }

    async fn compress_single(
        &self,
        task_id: Uuid,
        source: &Path,
        log_path: &Path,
    ) -> Result<Vec<PathBuf>, ArchiveError> {
        let out = self.paths.archive_file(task_id, None);
        let script = format!(
            "{tar} -cf - -C '{src}' . | {zstd} -o '{out}'",
            tar = self.settings.tool("tar_bin", "tar"),
            zstd = self.settings.tool("zstd_bin", "zstd"),
            src = source.display(),
            out = out.display(),
        );
        let spec = CommandSpec::shell(self.settings.tool("sh_bin", "sh"), script);
        self.runner.run(task_id, &spec, log_path).await?;
        info!(task_id = %task_id, archive = %out.display(), "Archive created");
        Ok(vec![out])
    }

    async fn compress_chunks(
        &self,
        task_id: Uuid,
        source: &Path,
        max_bytes: u64,
        log_path: &Path,
    ) -> Result<Vec<PathBuf>, ArchiveError> {
        let chunks = plan_chunks(source, max_bytes)?;
        let mut archives = Vec::with_capacity(chunks.len());

        for (index, chunk) in chunks.iter().enumerate() {
            let n = index + 1;
            let list_file = self.paths.chunk_list_file(task_id, n);
            let mut listing = String::new();
            for rel in chunk {
                listing.push_str(&rel.to_string_lossy());
                listing.push('\n');
            }
            fs::write(&list_file, listing)?;

            let out = self.paths.archive_file(task_id, Some(n));
            let script = format!(
                "{tar} -cf - -C '{src}' --files-from='{list}' | {zstd} -o '{out}'",
                tar = self.settings.tool("tar_bin", "tar"),
                zstd = self.settings.tool("zstd_bin", "zstd"),
                src = source.display(),
                list = list_file.display(),
                out = out.display(),
            );
            let spec = CommandSpec::shell(self.settings.tool("sh_bin", "sh"), script);
            let result = self.runner.run(task_id, &spec, log_path).await;
            let _ = fs::remove_file(&list_file);
            result?;
            archives.push(out);
        }

        info!(task_id = %task_id, volumes = archives.len(), "Split archive created");
        Ok(archives)
    }
}

/// Greedy grouping of the source files by cumulative size. Files are visited
/// in sorted order so the plan is deterministic; a file larger than the
/// budget gets a volume of its own.
pub fn plan_chunks(source: &Path, max_bytes: u64) -> std::io::Result<Vec<Vec<PathBuf>>> {
    let mut files = Vec::new();
    collect_files(source, source, &mut files)?;
    files.sort_by(|a, b| a.0.cmp(&b.0));

    let mut chunks: Vec<Vec<PathBuf>> = Vec::new();
    let mut current: Vec<PathBuf> = Vec::new();
    let mut current_size = 0u64;

    for (rel, size) in files {
        if !current.is_empty() && current_size + size > max_bytes {
            chunks.push(std::mem::take(&mut current));
            current_size = 0;
        }
        current_size += size;
        current.push(rel);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    Ok(chunks)
}

fn collect_files(
    root: &Path,
    dir: &Path,
    out: &mut Vec<(PathBuf, u64)>,
) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let meta = entry.metadata()?;
        if meta.is_dir() {
            collect_files(root, &path, out)?;
        } else if meta.is_file() {
            let rel = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
            out.push((rel, meta.len()));
        }
    }
    Ok(())
}
