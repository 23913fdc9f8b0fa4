use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex as ParkingMutex;
use rustc_hash::FxHashMap;

/// File system access used by alligator loads, `/output`, and config
/// discovery.
#[async_trait]
pub trait FileSystem: Send + Sync + std::fmt::Debug {
    async fn exists(&self, path: &Path) -> bool;
    async fn is_directory(&self, path: &Path) -> bool;
    async fn read_file(&self, path: &Path) -> io::Result<String>;
    async fn write_file(&self, path: &Path, contents: &str) -> io::Result<()>;
    async fn append_file(&self, path: &Path, contents: &str) -> io::Result<()>;
    async fn mkdir(&self, path: &Path) -> io::Result<()>;
    async fn list(&self, path: &Path) -> io::Result<Vec<PathBuf>>;

    /// Expand a glob pattern relative to `base`, returning matches in
    /// lexical order.
    async fn glob(&self, pattern: &str, base: &Path) -> io::Result<Vec<PathBuf>>;
}

/// Standard-library/tokio implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsFileSystem;

#[async_trait]
impl FileSystem for OsFileSystem {
    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    async fn is_directory(&self, path: &Path) -> bool {
        tokio::fs::metadata(path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    async fn read_file(&self, path: &Path) -> io::Result<String> {
        tokio::fs::read_to_string(path).await
    }

    async fn write_file(&self, path: &Path, contents: &str) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, contents).await
    }

    async fn append_file(&self, path: &Path, contents: &str) -> io::Result<()> {
        use tokio::io::AsyncWriteExt;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(contents.as_bytes()).await
    }

    async fn mkdir(&self, path: &Path) -> io::Result<()> {
        tokio::fs::create_dir_all(path).await
    }

    async fn list(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(path).await?;
        let mut out = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            out.push(entry.path());
        }
        out.sort();
        Ok(out)
    }

    async fn glob(&self, pattern: &str, base: &Path) -> io::Result<Vec<PathBuf>> {
        let full = if Path::new(pattern).is_absolute() {
            pattern.to_string()
        } else {
            base.join(pattern).to_string_lossy().into_owned()
        };
        let paths = glob::glob(&full)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let mut out: Vec<PathBuf> = paths.filter_map(|p| p.ok()).collect();
        out.sort();
        Ok(out)
    }
}

/// In-memory file system for tests: a flat map from absolute path to
/// contents, with directories implied by prefixes.
#[derive(Debug, Default)]
pub struct MemoryFileSystem {
    files: ParkingMutex<FxHashMap<PathBuf, String>>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, path: impl Into<PathBuf>, contents: impl Into<String>) {
        let _ = self.files.lock().insert(path.into(), contents.into());
    }

    pub fn contents(&self, path: &Path) -> Option<String> {
        self.files.lock().get(path).cloned()
    }
}

#[async_trait]
impl FileSystem for MemoryFileSystem {
    async fn exists(&self, path: &Path) -> bool {
        let files = self.files.lock();
        files.contains_key(path) || files.keys().any(|k| k.starts_with(path))
    }

    async fn is_directory(&self, path: &Path) -> bool {
        let files = self.files.lock();
        !files.contains_key(path) && files.keys().any(|k| k.starts_with(path))
    }

    async fn read_file(&self, path: &Path) -> io::Result<String> {
        self.files
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.display().to_string()))
    }

    async fn write_file(&self, path: &Path, contents: &str) -> io::Result<()> {
        let _ = self
            .files
            .lock()
            .insert(path.to_path_buf(), contents.to_string());
        Ok(())
    }

    async fn append_file(&self, path: &Path, contents: &str) -> io::Result<()> {
        let mut files = self.files.lock();
        files
            .entry(path.to_path_buf())
            .or_default()
            .push_str(contents);
        Ok(())
    }

    async fn mkdir(&self, _path: &Path) -> io::Result<()> {
        Ok(())
    }

    async fn list(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let files = self.files.lock();
        let mut out: Vec<PathBuf> = files
            .keys()
            .filter(|k| k.parent() == Some(path))
            .cloned()
            .collect();
        out.sort();
        Ok(out)
    }

    async fn glob(&self, pattern: &str, base: &Path) -> io::Result<Vec<PathBuf>> {
        let full = if Path::new(pattern).is_absolute() {
            pattern.to_string()
        } else {
            base.join(pattern).to_string_lossy().into_owned()
        };
        let matcher = glob::Pattern::new(&full)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let files = self.files.lock();
        let mut out: Vec<PathBuf> = files
            .keys()
            .filter(|k| matcher.matches_path(k))
            .cloned()
            .collect();
        out.sort();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn os_fs_round_trips_and_globs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fs = OsFileSystem;

        let a = dir.path().join("notes/a.md");
        let b = dir.path().join("notes/b.md");
        fs.write_file(&a, "alpha").await.unwrap();
        fs.write_file(&b, "beta").await.unwrap();

        assert!(fs.exists(&a).await);
        assert!(fs.is_directory(&dir.path().join("notes")).await);
        assert_eq!(fs.read_file(&a).await.unwrap(), "alpha");

        fs.append_file(&a, "!").await.unwrap();
        assert_eq!(fs.read_file(&a).await.unwrap(), "alpha!");

        let matches = fs.glob("notes/*.md", dir.path()).await.unwrap();
        assert_eq!(matches.len(), 2);
        assert!(matches[0].ends_with("a.md"));
    }

    #[tokio::test]
    async fn memory_fs_globs_seeded_paths() {
        let fs = MemoryFileSystem::new();
        fs.seed("/project/docs/a.md", "A");
        fs.seed("/project/docs/b.txt", "B");

        let matches = fs
            .glob("docs/*.md", Path::new("/project"))
            .await
            .unwrap();
        assert_eq!(matches, vec![PathBuf::from("/project/docs/a.md")]);
    }
}
