//! Artifact persistence.

use std::path::{Path, PathBuf};

use tracing::debug;

/// Resolve a name collision by suffixing `(1)`, `(2)`, … before the
/// extension.
pub fn unique_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }
    let folder = path.parent().unwrap_or_else(|| Path::new(""));
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    let ext = path.extension().and_then(|e| e.to_str());

    let mut i = 1;
    loop {
        let name = match ext {
            Some(ext) => format!("{stem}({i}).{ext}"),
            None => format!("{stem}({i})"),
        };
        let candidate = folder.join(name);
        if !candidate.exists() {
            return candidate;
        }
        i += 1;
    }
}

/// Persist a finished build artifact for `job_id`, returning the path
/// written. Never overwrites an existing artifact.
pub async fn write_artifact(
    dir: &Path,
    job_id: &str,
    bytes: &[u8],
) -> Result<PathBuf, std::io::Error> {
    tokio::fs::create_dir_all(dir).await?;
    let target = unique_path(&dir.join(format!("{job_id}.dctzip")));
    tokio::fs::write(&target, bytes).await?;
    debug!(path = %target.display(), size = bytes.len(), "artifact written");
    Ok(target)
}
