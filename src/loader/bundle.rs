//! 包组的 JSON 导入 / 导出

use super::PackageLoader;
use crate::error::EngineError;
use crate::manager::ManagerRegistry;
use crate::package::{Package, PackageRef, SourceRef};
use anyhow::Result;
use serde::{Deserialize, Serialize};

pub const EXPORT_VERSION: f64 = 2.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleEntry {
    pub id: String,
    pub name: String,
    pub version: String,
    pub manager: String,
    pub source: String,
}

/// 没有对应包管理器、无法安装的条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncompatibleEntry {
    pub id: String,
    pub name: String,
    pub version: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializableBundle {
    pub export_version: f64,
    #[serde(default)]
    pub packages: Vec<BundleEntry>,
    #[serde(default)]
    pub incompatible_packages: Vec<IncompatibleEntry>,
}

#[derive(Debug, Default)]
pub struct BundleImport {
    pub added: Vec<PackageRef>,
    pub incompatible: Vec<IncompatibleEntry>,
}

/// 生成包组 JSON，按 id、名称排序
pub fn create_bundle(packages: &[PackageRef], registry: &ManagerRegistry) -> Result<String> {
    let mut sorted: Vec<&PackageRef> = packages.iter().collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id).then_with(|| a.name.cmp(&b.name)));

    let mut bundle = SerializableBundle {
        export_version: EXPORT_VERSION,
        packages: Vec::new(),
        incompatible_packages: Vec::new(),
    };
    for package in sorted {
        if registry.get(package.manager()).is_some() {
            bundle.packages.push(BundleEntry {
                id: package.id.clone(),
                name: package.name.clone(),
                version: package.version.clone(),
                manager: package.manager().to_string(),
                source: package.source.name.clone(),
            });
        } else {
            bundle.incompatible_packages.push(IncompatibleEntry {
                id: package.id.clone(),
                name: package.name.clone(),
                version: package.version.clone(),
                source: package.source.name.clone(),
            });
        }
    }
    Ok(serde_json::to_string_pretty(&bundle)?)
}

/// 解析包组 JSON 并加入包组集合
pub fn import_bundle(
    raw: &str,
    registry: &ManagerRegistry,
    target: &PackageLoader,
) -> Result<BundleImport> {
    let bundle: SerializableBundle =
        serde_json::from_str(raw).map_err(|e| EngineError::MalformedBundle(e.to_string()))?;

    let mut incompatible = bundle.incompatible_packages;
    let mut packages = Vec::new();
    for entry in bundle.packages {
        if registry.get(&entry.manager).is_none() {
            log::warn!("包组条目 {} 的包管理器 {} 不存在", entry.id, entry.manager);
            incompatible.push(IncompatibleEntry {
                id: entry.id,
                name: entry.name,
                version: entry.version,
                source: entry.source,
            });
            continue;
        }
        let source = SourceRef::new(entry.manager, entry.source);
        packages.push(Package::new(entry.id, entry.name, entry.version, source).into_ref());
    }

    let added = target.add_packages(packages);
    Ok(BundleImport {
        added,
        incompatible,
    })
}
