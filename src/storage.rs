use std::{
    collections::HashMap,
    fmt, fs,
    io::{self, Write},
    path::{Component, Path, PathBuf},
    sync::RwLock,
};

use thiserror::Error;
use tracing::debug;

/// 儲存操作可能發生的錯誤類型。
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Key is invalid: {0}")]
    InvalidKey(String),
    #[error("Key not found: {0}")]
    NotFound(String),
    #[error("Lock poisoned")]
    LockPoisoned,
}

/// 儲存操作的結果類型，封裝 [`StorageError`]。
pub type Result<T> = std::result::Result<T, StorageError>;

/// 帳戶檔案等小型資料的鍵值儲存。
///
/// 鍵是以 `/` 分隔的相對路徑，不得逃出儲存根目錄。
pub trait Storage: Send + Sync + fmt::Debug {
    /// 讀取指定 key 所對應檔案的內容。
    fn read_file(&self, key: &str) -> Result<Vec<u8>>;

    /// 將資料寫入指定 key，必要時建立父目錄。
    fn write_file(&self, key: &str, value: &[u8]) -> Result<()>;

    /// 刪除指定 key；不存在時不視為錯誤。
    fn remove(&self, key: &str) -> Result<()>;

    fn exists(&self, key: &str) -> Result<bool>;
}

/// 私有工具，提供 key 正規化與驗證。
struct KeyUtils;

impl KeyUtils {
    /// 將 key 正規化為相對路徑，並檢查不合法字元與格式。
    fn normalize(key: &str) -> Result<PathBuf> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey("Empty key".to_string()));
        }
        if key.contains('\0') || key.contains('\n') || key.contains('\r') || key.contains('\\') {
            return Err(StorageError::InvalidKey(format!(
                "Invalid characters in key: {}",
                key
            )));
        }
        if key.ends_with('/') {
            return Err(StorageError::InvalidKey(format!(
                "File key cannot end with '/': {}",
                key
            )));
        }

        let mut normalized = PathBuf::new();
        for component in Path::new(key).components() {
            match component {
                Component::RootDir | Component::CurDir => {}
                Component::ParentDir => {
                    if !normalized.pop() {
                        return Err(StorageError::InvalidKey(format!(
                            "Cannot use '..' to escape root directory: {}",
                            key
                        )));
                    }
                }
                Component::Normal(name) => normalized.push(name),
                Component::Prefix(_) => {
                    return Err(StorageError::InvalidKey(format!("Invalid path: {}", key)))
                }
            }
        }
        if normalized.as_os_str().is_empty() {
            return Err(StorageError::InvalidKey(format!("Invalid path: {}", key)));
        }
        Ok(normalized)
    }
}

/// 以目錄為根的檔案儲存；每個 key 對應一個權限為 `0600` 的檔案。
#[derive(Debug)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    /// 開啟（必要時建立）儲存根目錄。
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        Ok(self.root.join(KeyUtils::normalize(key)?))
    }

    #[cfg(unix)]
    fn create_private(path: &Path) -> io::Result<fs::File> {
        use std::os::unix::fs::OpenOptionsExt;

        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
    }

    #[cfg(not(unix))]
    fn create_private(path: &Path) -> io::Result<fs::File> {
        fs::File::create(path)
    }
}

impl Storage for FileStorage {
    fn read_file(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        fs::read(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => StorageError::NotFound(key.to_string()),
            _ => StorageError::Io(e),
        })
    }

    fn write_file(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = Self::create_private(&path)?;
        file.write_all(value)?;
        file.sync_all()?;
        debug!(path = %path.display(), bytes = value.len(), "wrote storage file");
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.path_for(key)?.is_file())
    }
}

/// 基於記憶體的儲存實作。
#[derive(Debug, Default)]
pub struct MemStorage {
    data: RwLock<HashMap<PathBuf, Vec<u8>>>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemStorage {
    fn read_file(&self, key: &str) -> Result<Vec<u8>> {
        let path = KeyUtils::normalize(key)?;
        let data = self.data.read().map_err(|_| StorageError::LockPoisoned)?;
        data.get(&path)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    fn write_file(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = KeyUtils::normalize(key)?;
        self.data
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .insert(path, value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = KeyUtils::normalize(key)?;
        self.data
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .remove(&path);
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool> {
        let path = KeyUtils::normalize(key)?;
        Ok(self
            .data
            .read()
            .map_err(|_| StorageError::LockPoisoned)?
            .contains_key(&path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn exercise(storage: &dyn Storage) -> Result<()> {
        storage.write_file("dir1/file1.txt", b"Hello, Storage")?;
        assert_eq!(storage.read_file("dir1/file1.txt")?, b"Hello, Storage");
        assert_eq!(storage.read_file("./dir1/../dir1/file1.txt")?, b"Hello, Storage");

        assert!(storage.exists("dir1/file1.txt")?);
        storage.remove("dir1/file1.txt")?;
        storage.remove("dir1/file1.txt")?;
        assert!(!storage.exists("dir1/file1.txt")?);
        match storage.read_file("dir1/file1.txt") {
            Err(StorageError::NotFound(_)) => {}
            other => panic!("預期 NotFound 錯誤，得到 {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_key_normalization() {
        assert_eq!(KeyUtils::normalize("/a/./b").unwrap(), PathBuf::from("a/b"));
        for bad in ["", "../etc/passwd", "a/../../b", "dir/", "a\\b", "/", "a\nb"] {
            assert!(
                matches!(KeyUtils::normalize(bad), Err(StorageError::InvalidKey(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_mem_storage_basic_operations() -> Result<()> {
        exercise(&MemStorage::new())
    }

    #[test]
    fn test_file_storage_basic_operations() -> Result<()> {
        let temp_dir = tempdir()?;
        exercise(&FileStorage::open(temp_dir.path().join("store"))?)
    }

    #[test]
    fn test_file_storage_stays_inside_root() -> Result<()> {
        let temp_dir = tempdir()?;
        let storage = FileStorage::open(temp_dir.path().join("store"))?;
        assert!(matches!(
            storage.write_file("../escape.txt", b"x"),
            Err(StorageError::InvalidKey(_))
        ));
        assert!(!temp_dir.path().join("escape.txt").exists());
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_file_storage_permissions() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = tempdir()?;
        let storage = FileStorage::open(temp_dir.path())?;
        storage.write_file("accounts/a.json", b"{}")?;
        let mode = fs::metadata(temp_dir.path().join("accounts/a.json"))?
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
        Ok(())
    }
}
