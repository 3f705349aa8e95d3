//! 忽略更新数据库
//!
//! 以 `manager\id -> version` 形式持久化到 JSON 文件，`*` 表示忽略所有版本。

use super::Package;
use anyhow::Result;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

pub const ALL_VERSIONS: &str = "*";

#[derive(Debug)]
pub struct IgnoredUpdates {
    path: Option<PathBuf>,
    entries: Mutex<HashMap<String, String>>,
}

impl IgnoredUpdates {
    /// 仅存在于内存中的数据库（测试或只读场景）
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// 从文件加载；文件损坏时记录警告并从空库开始
    pub fn load(path: PathBuf) -> Self {
        let entries = match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str::<HashMap<String, String>>(&raw).unwrap_or_else(|e| {
                log::warn!("忽略更新数据库 {} 已损坏，已重置: {}", path.display(), e);
                HashMap::new()
            }),
            Err(_) => HashMap::new(),
        };
        Self {
            path: Some(path),
            entries: Mutex::new(entries),
        }
    }

    pub fn ignored_id(package: &Package) -> String {
        format!("{}\\{}", package.source.manager.to_lowercase(), package.id)
    }

    /// 忽略该包的某个版本（`*` 表示全部）
    pub fn add(&self, package: &Package, version: &str) -> Result<()> {
        self.lock().insert(Self::ignored_id(package), version.to_string());
        self.save()
    }

    pub fn remove(&self, package: &Package) -> Result<()> {
        let removed = self.lock().remove(&Self::ignored_id(package)).is_some();
        if removed {
            self.save()?;
        }
        Ok(())
    }

    /// `version` 为 None 时只要存在任何忽略记录就返回 true
    pub fn has_ignored(&self, package: &Package, version: Option<&str>) -> bool {
        match self.lock().get(&Self::ignored_id(package)) {
            Some(ignored) => match version {
                None => true,
                Some(v) => ignored == ALL_VERSIONS || ignored == v,
            },
            None => false,
        }
    }

    pub fn ignored_version(&self, package: &Package) -> Option<String> {
        self.lock().get(&Self::ignored_id(package)).cloned()
    }

    fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(&*self.lock())?;
        fs::write(path, raw)?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}
