//! Package 相关数据类型定义

use super::identity::fingerprint;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// 包在界面上的状态标记，不参与身份判断
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PackageTag {
    #[default]
    Default,
    BeingProcessed,
    OnQueue,
    Failed,
    AlreadyInstalled,
    IsUpgradable,
    Pinned,
}

/// 软件源引用：源名称 + 所属包管理器
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceRef {
    pub manager: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl SourceRef {
    pub fn new(manager: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            manager: manager.into(),
            name: name.into(),
            url: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

/// 同一个逻辑包可能同时以独立对象存在于多个集合中
#[derive(Debug)]
pub struct Package {
    pub id: String,
    pub name: String,
    pub version: String,
    pub new_version: Option<String>,
    pub source: SourceRef,
    tag: Mutex<PackageTag>,
    hash: i64,
    versioned_hash: i64,
}

pub type PackageRef = Arc<Package>;

impl Package {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
        source: SourceRef,
    ) -> Self {
        let id = id.into();
        let version = version.into();
        let hash = fingerprint(&source.manager, &source.name, &id, None);
        let versioned_hash = fingerprint(&source.manager, &source.name, &id, Some(&version));
        Self {
            id,
            name: name.into(),
            version,
            new_version: None,
            source,
            tag: Mutex::new(PackageTag::Default),
            hash,
            versioned_hash,
        }
    }

    /// 标记为可升级包
    pub fn with_new_version(mut self, new_version: impl Into<String>) -> Self {
        self.new_version = Some(new_version.into());
        self
    }

    pub fn into_ref(self) -> PackageRef {
        Arc::new(self)
    }

    pub fn fingerprint(&self, versioned: bool) -> i64 {
        if versioned {
            self.versioned_hash
        } else {
            self.hash
        }
    }

    /// 忽略版本，判断是否为同一个包
    pub fn is_equivalent_to(&self, other: &Package) -> bool {
        self.hash == other.hash
    }

    pub fn manager(&self) -> &str {
        &self.source.manager
    }

    pub fn tag(&self) -> PackageTag {
        *self.tag.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_tag(&self, tag: PackageTag) {
        *self.tag.lock().unwrap_or_else(|e| e.into_inner()) = tag;
    }

    pub fn is_upgradable(&self) -> bool {
        self.new_version.is_some()
    }
}

impl Clone for Package {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            name: self.name.clone(),
            version: self.version.clone(),
            new_version: self.new_version.clone(),
            source: self.source.clone(),
            tag: Mutex::new(self.tag()),
            hash: self.hash,
            versioned_hash: self.versioned_hash,
        }
    }
}
