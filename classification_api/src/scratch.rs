use std::{
    fs, io,
    path::{Path, PathBuf},
};
use uuid::Uuid;

/// Scratch directory for the file-backed classification path. Every saved
/// upload is owned by a [`ScratchFile`] guard, so the file is removed when
/// the request ends whether the batch succeeded or died halfway through.
#[derive(Debug)]
pub struct ScratchStore {
    dir: PathBuf,
}

impl ScratchStore {
    pub fn new(dir: &Path) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn save(&self, filename: &str, data: &[u8]) -> io::Result<ScratchFile> {
        // keep only the basename so uploads cannot escape the scratch dir
        let basename = Path::new(filename)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("upload");
        let path = self.dir.join(format!("{}-{}", Uuid::new_v4(), basename));
        fs::write(&path, data)?;
        Ok(ScratchFile { path })
    }
}

#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
}

impl ScratchFile {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::error!("Failed to remove scratch file {:?}: {}", self.path, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saved_file_is_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let store = ScratchStore::new(dir.path()).unwrap();

        let file = store.save("photo.jpg", b"bytes").unwrap();
        let path = file.path().to_path_buf();
        assert_eq!(fs::read(&path).unwrap(), b"bytes");

        drop(file);
        assert!(!path.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn guards_clean_up_when_a_batch_dies_halfway() {
        let dir = tempfile::tempdir().unwrap();
        let store = ScratchStore::new(dir.path()).unwrap();

        let process = || -> io::Result<()> {
            let _first = store.save("a.jpg", b"a")?;
            let _second = store.save("b.jpg", b"b")?;
            Err(io::Error::new(io::ErrorKind::InvalidData, "mid-batch failure"))
        };

        assert!(process().is_err());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn upload_names_are_reduced_to_their_basename() {
        let dir = tempfile::tempdir().unwrap();
        let store = ScratchStore::new(dir.path()).unwrap();

        let file = store.save("../../etc/passwd", b"x").unwrap();
        assert_eq!(file.path().parent().unwrap(), dir.path());
        assert!(file
            .path()
            .file_name()
            .unwrap()
            .to_str()
            .unwrap()
            .ends_with("-passwd"));
    }

    #[test]
    fn store_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("scratch/uploads");
        ScratchStore::new(&nested).unwrap();
        assert!(nested.is_dir());
    }
}
