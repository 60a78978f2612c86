use axum::body::Bytes;
use std::io::{ErrorKind, Write};
use std::path::PathBuf;

use crate::error::StoreError;

/// 缓存条目扩展名
const ENTRY_EXT: &str = "png";
/// 键的最大字节数；加上扩展名仍远低于常见文件系统 255 字节的文件名上限
pub const MAX_KEY_LEN: usize = 200;

/// 单目录、一键一文件的持久化缓存。
///
/// - 条目永不过期，服务自身不做删除；
/// - 写入走“同目录临时文件 + persist”，多进程共享目录时读方不会看到半截文件；
/// - 同一键并发写入时后写者覆盖（last-write-wins）。
#[derive(Debug, Clone)]
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// 条目路径：`{root}/{key}.png`
    pub fn entry_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        validate_key(key)?;
        Ok(self.root.join(format!("{key}.{ENTRY_EXT}")))
    }

    /// 条目是否存在。只做 stat，不会创建目录。
    pub async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let path = self.entry_path(key)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// 读取完整条目，不存在时返回 `StoreError::NotFound`
    pub async fn read(&self, key: &str) -> Result<Bytes, StoreError> {
        let path = self.entry_path(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StoreError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// 写入（覆盖）条目；根目录按需创建，可重复调用
    pub async fn write(&self, key: &str, bytes: Bytes) -> Result<(), StoreError> {
        let path = self.entry_path(key)?;
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            std::fs::create_dir_all(&root)?;
            // 临时文件名随机且与目标同目录，persist 即原子 rename；失败时临时文件随 drop 删除
            let mut tmp = tempfile::NamedTempFile::new_in(&root)?;
            tmp.write_all(&bytes)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&path).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Io(std::io::Error::other(e)))?
    }
}

fn validate_key(key: &str) -> Result<(), StoreError> {
    if key.is_empty() || key.len() > MAX_KEY_LEN || key.contains(['/', '\\', '\0']) {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("cutout_store_{}", Uuid::new_v4().simple()))
    }

    #[tokio::test]
    async fn exists_does_not_create_root() {
        let root = temp_root();
        let store = DiskStore::new(&root);
        assert!(!store.exists("abc").await.expect("exists"));
        assert!(!root.exists(), "exists() must not create the store root");
    }

    #[tokio::test]
    async fn read_missing_is_not_found() {
        let store = DiskStore::new(temp_root());
        let err = store.read("missing").await.expect_err("expected NotFound");
        assert!(matches!(err, StoreError::NotFound(ref k) if k == "missing"));
    }

    #[tokio::test]
    async fn write_creates_root_and_roundtrips() {
        let root = temp_root();
        let store = DiskStore::new(&root);
        store.write("k1", Bytes::from_static(b"first")).await.expect("write");
        assert!(store.exists("k1").await.expect("exists"));
        assert_eq!(store.read("k1").await.expect("read").as_ref(), b"first");
        assert_eq!(
            store.entry_path("k1").expect("path"),
            root.join("k1.png")
        );

        // 重复写入：目录已存在不报错，内容整体覆盖
        store.write("k1", Bytes::from_static(b"second")).await.expect("overwrite");
        assert_eq!(store.read("k1").await.expect("read").as_ref(), b"second");

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn write_leaves_no_temp_files() {
        let root = temp_root();
        let store = DiskStore::new(&root);
        store.write("k2", Bytes::from(vec![0u8; 4096])).await.expect("write");

        let names: Vec<String> = std::fs::read_dir(&root)
            .expect("read dir")
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["k2.png".to_string()]);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn concurrent_writes_are_last_write_wins() {
        let root = temp_root();
        let store = DiskStore::new(&root);
        let a = store.clone();
        let b = store.clone();
        let (ra, rb) = tokio::join!(
            a.write("same", Bytes::from_static(b"aaaa")),
            b.write("same", Bytes::from_static(b"bbbb"))
        );
        ra.expect("write a");
        rb.expect("write b");

        let data = store.read("same").await.expect("read");
        assert!(data.as_ref() == b"aaaa" || data.as_ref() == b"bbbb");

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn rejects_keys_with_path_separators() {
        let store = DiskStore::new(temp_root());
        for bad in ["", "a/b", "..\\x"] {
            assert!(matches!(
                store.exists(bad).await,
                Err(StoreError::InvalidKey(_))
            ));
        }
    }

    #[tokio::test]
    async fn longest_derived_filename_key_roundtrips() {
        use crate::features::cutout::key::{KeyPolicy, MAX_NAME_LEN};

        let root = temp_root();
        let store = DiskStore::new(&root);
        let url = format!("https://cdn.example.com/{}.jpg?size=large", "n".repeat(300));
        let key = KeyPolicy::Filename.derive(&url, &[]);
        assert!(key.len() > MAX_NAME_LEN);

        assert!(!store.exists(&key).await.expect("exists before write"));
        std::fs::create_dir_all(&root).expect("create root");
        assert!(!store.exists(&key).await.expect("exists with root"));
        store
            .write(&key, Bytes::from_static(b"png"))
            .await
            .expect("write long key");
        assert!(store.exists(&key).await.expect("exists after write"));
        assert_eq!(store.read(&key).await.expect("read").as_ref(), b"png");

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn oversized_keys_are_rejected_before_touching_disk() {
        let root = temp_root();
        let store = DiskStore::new(&root);
        let key = "k".repeat(MAX_KEY_LEN + 1);
        assert!(matches!(
            store.exists(&key).await,
            Err(StoreError::InvalidKey(_))
        ));
        assert!(matches!(
            store.write(&key, Bytes::from_static(b"x")).await,
            Err(StoreError::InvalidKey(_))
        ));
        assert!(!root.exists());
    }
}
