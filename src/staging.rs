//! Transactional output: files are written to a staging tree next to the
//! output root and published only once every file has been staged.
use crate::emit::OutputFile;
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Component, Path, PathBuf};

const TXN_PREFIX: &str = ".storegen-txn";

pub fn write_staged_text(staging_root: &Path, rel_path: &str, text: &str) -> Result<()> {
    let rel = Path::new(rel_path);
    if rel.is_absolute() || rel.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(anyhow!("output path {rel_path} escapes the output root"));
    }
    let staging_path = staging_root.join(rel);
    if let Some(parent) = staging_path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    fs::write(&staging_path, text).with_context(|| format!("write {}", staging_path.display()))?;
    Ok(())
}

/// Stage every file under a transaction directory inside `out_root`, then
/// publish them all. On failure nothing new is left behind and replaced files
/// are restored.
pub fn write_outputs(out_root: &Path, files: &[OutputFile]) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(out_root).with_context(|| format!("create {}", out_root.display()))?;
    let txn = tempfile::Builder::new()
        .prefix(TXN_PREFIX)
        .tempdir_in(out_root)
        .with_context(|| format!("create staging directory in {}", out_root.display()))?;
    let staging_root = txn.path().join("staging");
    for file in files {
        write_staged_text(&staging_root, &file.path, &file.content)?;
    }
    let published = publish_staging(&staging_root, out_root)?;
    tracing::debug!(
        out = %out_root.display(),
        files = published.len(),
        "outputs published"
    );
    Ok(published)
}

/// Move every staged file into `out_root`. Replaced files are parked in a
/// backup directory beside the staging tree until the whole batch succeeds.
pub fn publish_staging(staging_root: &Path, out_root: &Path) -> Result<Vec<PathBuf>> {
    let staged = files_under(staging_root)?;
    let txn_root = staging_root
        .parent()
        .ok_or_else(|| anyhow!("staging root has no parent"))?;
    let mut publication = Publication::new(txn_root.join("backup"));
    for source in staged {
        let rel = source
            .strip_prefix(staging_root)
            .context("strip staging prefix")?;
        if let Err(err) = publication.place(&source, rel, out_root) {
            publication.undo();
            return Err(err);
        }
    }
    Ok(publication.into_published())
}

enum Change {
    Created(PathBuf),
    Replaced { dest: PathBuf, backup: PathBuf },
}

impl Change {
    fn dest(&self) -> &Path {
        match self {
            Change::Created(dest) | Change::Replaced { dest, .. } => dest,
        }
    }
}

/// Changes applied to the output tree so far, in order.
struct Publication {
    backup_root: PathBuf,
    changes: Vec<Change>,
}

impl Publication {
    fn new(backup_root: PathBuf) -> Self {
        Self {
            backup_root,
            changes: Vec::new(),
        }
    }

    fn place(&mut self, source: &Path, rel: &Path, out_root: &Path) -> Result<()> {
        let dest = out_root.join(rel);
        if dest.is_dir() {
            return Err(anyhow!("output path {} is a directory", dest.display()));
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        if dest.exists() {
            let backup = self.backup_root.join(rel);
            if let Some(parent) = backup.parent() {
                fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
            }
            fs::rename(&dest, &backup).with_context(|| format!("back up {}", dest.display()))?;
            self.changes.push(Change::Replaced {
                dest: dest.clone(),
                backup,
            });
        } else {
            self.changes.push(Change::Created(dest.clone()));
        }
        // staging lives inside the output root, so this is a same-volume rename
        fs::rename(source, &dest).with_context(|| format!("publish {}", dest.display()))
    }

    /// Best effort, newest change first.
    fn undo(self) {
        for change in self.changes.into_iter().rev() {
            match change {
                Change::Created(dest) => {
                    let _ = fs::remove_file(dest);
                }
                Change::Replaced { dest, backup } => {
                    if let Err(err) = fs::rename(&backup, &dest) {
                        tracing::warn!(path = %dest.display(), %err, "could not restore replaced output");
                    }
                }
            }
        }
    }

    fn into_published(self) -> Vec<PathBuf> {
        self.changes
            .iter()
            .map(|change| change.dest().to_path_buf())
            .collect()
    }
}

/// Regular files below `root` in path order; a missing root has none.
pub fn files_under(root: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        if !dir.is_dir() {
            continue;
        }
        let entries = fs::read_dir(&dir).with_context(|| format!("read {}", dir.display()))?;
        for entry in entries {
            let path = entry.with_context(|| format!("read {}", dir.display()))?.path();
            if path.is_dir() {
                pending.push(path);
            } else if path.is_file() {
                found.push(path);
            }
        }
    }
    found.sort();
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(path: &str, content: &str) -> OutputFile {
        OutputFile {
            path: path.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn writes_outputs_and_leaves_no_staging_behind() {
        let out = tempfile::tempdir().expect("tempdir");
        let files = vec![
            output("artifacts/A.json", "{}\n"),
            output("stores/A.js", "export default 1\n"),
        ];
        let published = write_outputs(out.path(), &files).expect("write");
        assert_eq!(published.len(), 2);
        assert_eq!(
            fs::read_to_string(out.path().join("stores/A.js")).expect("read"),
            "export default 1\n"
        );
        let names: Vec<_> = fs::read_dir(out.path())
            .expect("read_dir")
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .collect();
        assert!(names.iter().all(|name| !name.starts_with(TXN_PREFIX)), "{names:?}");
    }

    #[test]
    fn replaces_existing_outputs() {
        let out = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(out.path().join("artifacts")).expect("mkdir");
        fs::write(out.path().join("artifacts/A.json"), "old").expect("seed");
        write_outputs(out.path(), &[output("artifacts/A.json", "new")]).expect("write");
        assert_eq!(
            fs::read_to_string(out.path().join("artifacts/A.json")).expect("read"),
            "new"
        );
    }

    #[test]
    fn rejects_paths_outside_the_output_root() {
        let out = tempfile::tempdir().expect("tempdir");
        let err = write_outputs(out.path(), &[output("../escape.js", "x")]).unwrap_err();
        assert!(err.to_string().contains("escapes"));
    }

    #[test]
    fn failed_publish_restores_the_previous_tree() {
        let out = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(out.path().join("artifacts")).expect("mkdir");
        fs::write(out.path().join("artifacts/A.json"), "old").expect("seed");
        fs::create_dir_all(out.path().join("stores/A.js")).expect("blocking directory");
        let files = [
            output("artifacts/A.json", "new"),
            output("artifacts/B.json", "added"),
            output("stores/A.js", "export default 1\n"),
        ];
        let err = write_outputs(out.path(), &files).unwrap_err();
        assert!(err.to_string().contains("is a directory"), "{err}");
        assert_eq!(
            fs::read_to_string(out.path().join("artifacts/A.json")).expect("read"),
            "old"
        );
        assert!(!out.path().join("artifacts/B.json").exists());
    }

    #[test]
    fn files_under_walks_nested_directories_in_order() {
        let root = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(root.path().join("b/c")).expect("mkdir");
        fs::write(root.path().join("b/c/z.graphql"), "").expect("write");
        fs::write(root.path().join("a.graphql"), "").expect("write");
        let found = files_under(root.path()).expect("walk");
        let rel: Vec<_> = found
            .iter()
            .map(|path| path.strip_prefix(root.path()).expect("prefix").to_path_buf())
            .collect();
        assert_eq!(rel, [PathBuf::from("a.graphql"), PathBuf::from("b/c/z.graphql")]);
        assert!(files_under(&root.path().join("missing")).expect("walk").is_empty());
    }
}
