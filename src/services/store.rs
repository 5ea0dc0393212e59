//! 克隆记录存储 - 业务能力层
//!
//! 只负责"保存 / 查询克隆记录"能力，不关心流程
//!
//! - `MemoryCloneStore`：进程内存储，测试和无状态部署使用
//! - `TomlCloneStore`：每条记录一个 `<store_dir>/<id>.toml` 文件

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::models::record::sort_newest_first;
use crate::models::{ClonePage, CloneRecord, GeneratedFile};

/// 克隆记录存储能力
#[async_trait]
pub trait CloneStore: Send + Sync {
    /// 保存记录，ID 相同时覆盖
    async fn save(&self, record: &CloneRecord) -> Result<(), StoreError>;

    /// 按创建时间倒序分页
    async fn list(&self, page: usize, per_page: usize) -> Result<ClonePage, StoreError>;

    async fn get(&self, id: &str) -> Result<Option<CloneRecord>, StoreError>;

    async fn get_files(&self, id: &str) -> Result<Option<Vec<GeneratedFile>>, StoreError> {
        Ok(self.get(id).await?.map(|record| record.files))
    }

    /// `since` 之后创建的记录数量
    async fn count_since(&self, since: DateTime<Utc>) -> Result<usize, StoreError>;
}

/// 进程内存储
#[derive(Default)]
pub struct MemoryCloneStore {
    records: RwLock<Vec<CloneRecord>>,
}

impl MemoryCloneStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CloneStore for MemoryCloneStore {
    async fn save(&self, record: &CloneRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        records.retain(|r| r.id != record.id);
        records.push(record.clone());
        Ok(())
    }

    async fn list(&self, page: usize, per_page: usize) -> Result<ClonePage, StoreError> {
        let mut records = self.records.read().await.clone();
        sort_newest_first(&mut records);
        Ok(ClonePage::slice(&records, page, per_page))
    }

    async fn get(&self, id: &str) -> Result<Option<CloneRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records.iter().find(|r| r.id == id).cloned())
    }

    async fn count_since(&self, since: DateTime<Utc>) -> Result<usize, StoreError> {
        let records = self.records.read().await;
        Ok(records.iter().filter(|r| r.created_at >= since).count())
    }
}

/// TOML 文件存储
pub struct TomlCloneStore {
    dir: PathBuf,
}

impl TomlCloneStore {
    /// 创建存储目录（如果不存在）
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await.map_err(|e| io_error(&dir, e))?;
        info!("✓ 克隆记录目录: {}", dir.display());
        Ok(Self { dir })
    }

    fn record_path(&self, id: &str) -> Option<PathBuf> {
        // ID 直接用作文件名，只接受简单字符
        if id.is_empty()
            || !id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return None;
        }
        Some(self.dir.join(format!("{}.toml", id)))
    }

    async fn load_record(path: &Path) -> Result<CloneRecord, StoreError> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| io_error(path, e))?;
        toml::from_str(&content).map_err(|e| StoreError::Serialize {
            message: format!("无法解析 {}: {}", path.display(), e),
        })
    }

    /// 读取目录下的所有记录，解析失败的文件只记录警告
    async fn load_all(&self) -> Result<Vec<CloneRecord>, StoreError> {
        let mut records = Vec::new();
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| io_error(&self.dir, e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error(&self.dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("toml") {
                continue;
            }
            match Self::load_record(&path).await {
                Ok(record) => records.push(record),
                Err(e) => warn!("加载克隆记录失败 {}: {}", path.display(), e),
            }
        }

        Ok(records)
    }
}

#[async_trait]
impl CloneStore for TomlCloneStore {
    async fn save(&self, record: &CloneRecord) -> Result<(), StoreError> {
        let path = self.record_path(&record.id).ok_or_else(|| StoreError::Io {
            path: record.id.clone(),
            message: "非法的记录 ID".to_string(),
        })?;
        let content = toml::to_string(record).map_err(|e| StoreError::Serialize {
            message: e.to_string(),
        })?;

        // 先写临时文件再改名，避免读到半截记录
        let tmp = path.with_extension("toml.tmp");
        fs::write(&tmp, content).await.map_err(|e| io_error(&tmp, e))?;
        fs::rename(&tmp, &path).await.map_err(|e| io_error(&path, e))?;
        debug!("已保存克隆记录: {}", path.display());
        Ok(())
    }

    async fn list(&self, page: usize, per_page: usize) -> Result<ClonePage, StoreError> {
        let mut records = self.load_all().await?;
        sort_newest_first(&mut records);
        Ok(ClonePage::slice(&records, page, per_page))
    }

    async fn get(&self, id: &str) -> Result<Option<CloneRecord>, StoreError> {
        let Some(path) = self.record_path(id) else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }
        Self::load_record(&path).await.map(Some)
    }

    async fn count_since(&self, since: DateTime<Utc>) -> Result<usize, StoreError> {
        let records = self.load_all().await?;
        Ok(records.iter().filter(|r| r.created_at >= since).count())
    }
}

fn io_error(path: &Path, err: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}
