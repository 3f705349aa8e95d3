//! 四种集合的差异化策略：查询哪个接口、过滤条件、添加后的联动

use super::LoaderLinks;
use crate::manager::ManagerAdapter;
use crate::package::{ignored::ALL_VERSIONS, Package, PackageRef, PackageTag};
use anyhow::Result;
use std::time::Duration;

pub trait LoaderPolicy: Send + Sync {
    /// 是否按 (id, source, version) 区分同一个包的多个版本
    fn versioned(&self) -> bool {
        false
    }

    /// 为 false 的集合只通过外部插入维护，reload 不查询任何包管理器
    fn reload_enabled(&self) -> bool {
        true
    }

    fn fetch(&self, manager: &dyn ManagerAdapter, query: &str) -> Result<Vec<Package>>;

    fn is_valid(&self, _package: &PackageRef, _links: &LoaderLinks) -> bool {
        true
    }

    fn on_added(&self, _package: &PackageRef, _links: &LoaderLinks) {}

    /// reload 清空集合之后、开始查询之前调用
    fn on_reload_started(&self, _links: &LoaderLinks) {}

    /// 加载完成后多久自动再次加载
    fn auto_reload_interval(&self) -> Option<Duration> {
        None
    }
}

/// 已安装的包；同一个包的多个已安装版本分别保存
#[derive(Debug, Default)]
pub struct InstalledPolicy;

impl LoaderPolicy for InstalledPolicy {
    fn versioned(&self) -> bool {
        true
    }

    fn fetch(&self, manager: &dyn ManagerAdapter, _query: &str) -> Result<Vec<Package>> {
        manager.installed_packages()
    }

    fn on_added(&self, package: &PackageRef, links: &LoaderLinks) {
        if links.ignored().has_ignored(package, Some(ALL_VERSIONS)) {
            package.set_tag(PackageTag::Pinned);
        } else if links
            .upgradable()
            .is_some_and(|u| u.get_equivalent(package).is_some())
        {
            package.set_tag(PackageTag::IsUpgradable);
        }

        if let Some(available) = links.discover().and_then(|d| d.get_equivalent(package)) {
            available.set_tag(PackageTag::AlreadyInstalled);
        }
    }
}

/// 有可用更新的包
#[derive(Debug, Default)]
pub struct UpgradablePolicy {
    interval: Option<Duration>,
}

impl UpgradablePolicy {
    /// `interval` 为 None 时关闭定时检查更新
    pub fn new(interval: Option<Duration>) -> Self {
        Self { interval }
    }
}

impl LoaderPolicy for UpgradablePolicy {
    fn fetch(&self, manager: &dyn ManagerAdapter, _query: &str) -> Result<Vec<Package>> {
        manager.available_updates()
    }

    fn is_valid(&self, package: &PackageRef, links: &LoaderLinks) -> bool {
        let Some(new_version) = package.new_version.as_deref() else {
            return false;
        };
        if new_version == package.version {
            return false;
        }
        if links.ignored().has_ignored(package, Some(new_version)) {
            log::debug!("{} {} 的更新已被忽略", package.id, new_version);
            links.record_skipped_update(package.clone());
            return false;
        }
        // 新版本已经以另一个实例的形式安装
        if let Some(installed) = links.installed() {
            if installed
                .get_all_equivalents(package)
                .iter()
                .any(|p| p.version == new_version)
            {
                return false;
            }
        }
        true
    }

    fn on_added(&self, package: &PackageRef, links: &LoaderLinks) {
        if let Some(available) = links.discover().and_then(|d| d.get_equivalent(package)) {
            available.set_tag(PackageTag::IsUpgradable);
        }
        if let Some(installed) = links.installed() {
            for p in installed.get_all_equivalents(package) {
                if p.tag() != PackageTag::Pinned {
                    p.set_tag(PackageTag::IsUpgradable);
                }
            }
        }
    }

    // 被忽略的更新按本次查询结果重新统计
    fn on_reload_started(&self, links: &LoaderLinks) {
        links.clear_skipped_updates();
    }

    fn auto_reload_interval(&self) -> Option<Duration> {
        self.interval
    }
}

/// 搜索结果；查询字符串为空时不返回任何包
#[derive(Debug, Default)]
pub struct DiscoverPolicy;

impl LoaderPolicy for DiscoverPolicy {
    fn fetch(&self, manager: &dyn ManagerAdapter, query: &str) -> Result<Vec<Package>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        manager.find_packages(query)
    }

    fn on_added(&self, package: &PackageRef, links: &LoaderLinks) {
        if links.upgradable().is_some_and(|u| u.contains(package)) {
            package.set_tag(PackageTag::IsUpgradable);
        } else if links
            .installed()
            .is_some_and(|i| !i.get_all_equivalents(package).is_empty())
        {
            package.set_tag(PackageTag::AlreadyInstalled);
        }
    }
}

/// 用户整理的包组，只能通过导入或手动添加维护
#[derive(Debug, Default)]
pub struct BundlePolicy;

impl LoaderPolicy for BundlePolicy {
    fn versioned(&self) -> bool {
        true
    }

    fn reload_enabled(&self) -> bool {
        false
    }

    fn fetch(&self, _manager: &dyn ManagerAdapter, _query: &str) -> Result<Vec<Package>> {
        Ok(Vec::new())
    }

    fn on_added(&self, package: &PackageRef, links: &LoaderLinks) {
        if links
            .installed()
            .is_some_and(|i| !i.get_all_equivalents(package).is_empty())
        {
            package.set_tag(PackageTag::AlreadyInstalled);
        }
    }
}
