use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::session::{DiscardPolicy, Verdict};

/// Apply a verdict to every track file of a session. Returns where the
/// files ended up; a file that could not be moved is reported at its
/// original path.
pub async fn apply(
    verdict: Verdict,
    paths: &[PathBuf],
    archive_dir: Option<&Path>,
    policy: DiscardPolicy,
) -> Vec<PathBuf> {
    let mut final_paths = Vec::new();

    for path in paths {
        match apply_one(verdict, path, archive_dir, policy).await {
            Ok(Some(final_path)) => final_paths.push(final_path),
            Ok(None) => {}
            Err(e) => {
                error!("Finalize of {} failed: {:#}", path.display(), e);
                final_paths.push(path.clone());
            }
        }
    }

    final_paths
}

async fn apply_one(
    verdict: Verdict,
    path: &Path,
    archive_dir: Option<&Path>,
    policy: DiscardPolicy,
) -> Result<Option<PathBuf>> {
    match verdict {
        Verdict::Archive => match tokio::fs::metadata(path).await {
            // A device that went silent before writing anything
            Ok(meta) if meta.len() == 0 => {
                info!("Discarding empty track {}", path.display());
                discard(path, policy).await
            }
            Ok(_) => archive(path, archive_dir).await.map(Some),
            Err(_) => {
                warn!("Track {} was never written", path.display());
                Ok(None)
            }
        },
        Verdict::Discard(reason) => {
            info!("Discarding {} ({})", path.display(), reason);
            discard(path, policy).await
        }
    }
}

async fn archive(output_path: &Path, archive_dir: Option<&Path>) -> Result<PathBuf> {
    let Some(dir) = archive_dir else {
        info!("Archived {}", output_path.display());
        return Ok(output_path.to_path_buf());
    };

    let file_name = output_path
        .file_name()
        .with_context(|| format!("Output path has no file name: {}", output_path.display()))?;
    let target = dir.join(file_name);

    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create archive directory {}", dir.display()))?;
    move_file(output_path, &target).await?;

    info!("Archived {} -> {}", output_path.display(), target.display());
    Ok(target)
}

/// Remove or set aside a discarded output. Missing files are fine: a capture
/// that never started writes nothing.
pub async fn discard(output_path: &Path, policy: DiscardPolicy) -> Result<Option<PathBuf>> {
    if tokio::fs::metadata(output_path).await.is_err() {
        return Ok(None);
    }

    match policy {
        DiscardPolicy::Delete => {
            tokio::fs::remove_file(output_path)
                .await
                .with_context(|| format!("Failed to delete {}", output_path.display()))?;
            Ok(None)
        }
        DiscardPolicy::Rename => {
            let mut name = output_path.as_os_str().to_os_string();
            name.push(".discarded");
            let target = PathBuf::from(name);
            move_file(output_path, &target).await?;
            Ok(Some(target))
        }
    }
}

/// Discard every file of a session that never got to finalize
pub async fn discard_all(paths: &[PathBuf], policy: DiscardPolicy) {
    for path in paths {
        if let Err(e) = discard(path, policy).await {
            error!("Failed to discard {}: {:#}", path.display(), e);
        }
    }
}

// rename, falling back to copy + remove across filesystems
async fn move_file(from: &Path, to: &Path) -> Result<()> {
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }

    warn!("Rename {} -> {} failed, copying instead", from.display(), to.display());
    tokio::fs::copy(from, to)
        .await
        .with_context(|| format!("Failed to copy {} to {}", from.display(), to.display()))?;
    tokio::fs::remove_file(from)
        .await
        .with_context(|| format!("Failed to remove {}", from.display()))?;
    Ok(())
}
