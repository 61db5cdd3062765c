use anyhow::{Context, Result};
use parking_lot::Mutex;
use redb::{Database, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

// 设置与历史表定义
const KV_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("kv");

/// 外部键值持久化接口，值是不透明字节
pub trait KeyValueStore: Send + Sync + 'static {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn set(&self, key: &str, value: &[u8]) -> Result<()>;
}

/// 读取 JSON 值，缺失或解析失败时返回默认值
pub fn load_or_default<T: DeserializeOwned + Default>(store: &dyn KeyValueStore, key: &str) -> T {
    match store.get(key) {
        Ok(Some(bytes)) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
            warn!("键 {} 的数据无法解析，使用默认值: {}", key, e);
            T::default()
        }),
        Ok(None) => T::default(),
        Err(e) => {
            warn!("读取键 {} 失败，使用默认值: {}", key, e);
            T::default()
        }
    }
}

pub fn save_json<T: Serialize + ?Sized>(store: &dyn KeyValueStore, key: &str, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec(value)?;
    store.set(key, &bytes)
}

/// redb 文件存储
pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)
            .with_context(|| format!("无法打开数据库 {}", path.display()))?;
        Ok(Self { db })
    }
}

impl KeyValueStore for RedbStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let tx = self.db.begin_read()?;
        let table = match tx.open_table(KV_TABLE) {
            Ok(t) => t,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let value = table.get(key)?.map(|v| v.value().to_vec());
        Ok(value)
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let tx = self.db.begin_write()?;
        {
            let mut table = tx.open_table(KV_TABLE)?;
            table.insert(key, value)?;
        }
        tx.commit()?;
        Ok(())
    }
}

/// 内存实现，可模拟写入失败
#[derive(Default)]
pub struct MemoryKv {
    data: Mutex<HashMap<String, Vec<u8>>>,
    fail_writes: AtomicBool,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl KeyValueStore for MemoryKv {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.data.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            anyhow::bail!("写入 {} 失败（模拟）", key);
        }
        self.data.lock().insert(key.to_string(), value.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redb_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kv.redb");
        {
            let store = RedbStore::open(&path).unwrap();
            assert_eq!(store.get("missing").unwrap(), None);
            store.set("k", b"v1").unwrap();
            store.set("k", b"v2").unwrap();
        }
        let store = RedbStore::open(&path).unwrap();
        assert_eq!(store.get("k").unwrap(), Some(b"v2".to_vec()));
    }

    #[test]
    fn json_helpers_fall_back_on_garbage() {
        let kv = MemoryKv::new();
        kv.set("list", b"not json").unwrap();
        let list: Vec<String> = load_or_default(&kv, "list");
        assert!(list.is_empty());

        save_json(&kv, "list", &vec!["a".to_string()]).unwrap();
        let list: Vec<String> = load_or_default(&kv, "list");
        assert_eq!(list, vec!["a".to_string()]);
    }

    #[test]
    fn memory_kv_can_simulate_write_failure() {
        let kv = MemoryKv::new();
        kv.set_fail_writes(true);
        assert!(kv.set("k", b"v").is_err());
        kv.set_fail_writes(false);
        assert!(kv.set("k", b"v").is_ok());
    }
}
