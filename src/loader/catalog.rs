//! 四个互相联动的包集合

use super::{
    BundlePolicy, DiscoverPolicy, InstalledPolicy, LoaderLinks, PackageLoader, UpgradablePolicy,
};
use crate::manager::ManagerRegistry;
use crate::package::{ignored::ALL_VERSIONS, IgnoredUpdates, Package, PackageRef, PackageTag};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
pub struct Catalog {
    pub installed: Arc<PackageLoader>,
    pub upgradable: Arc<PackageLoader>,
    pub discover: Arc<PackageLoader>,
    pub bundle: Arc<PackageLoader>,
    links: Arc<LoaderLinks>,
}

impl Catalog {
    /// `update_interval` 为 None 时可升级集合不会定时刷新
    pub fn new(
        registry: ManagerRegistry,
        ignored: Arc<IgnoredUpdates>,
        update_interval: Option<Duration>,
    ) -> Self {
        let links = Arc::new(LoaderLinks::new(ignored));
        let installed = PackageLoader::new(
            "installed",
            Box::new(InstalledPolicy),
            registry.clone(),
            Arc::clone(&links),
        );
        let upgradable = PackageLoader::new(
            "upgradable",
            Box::new(UpgradablePolicy::new(update_interval)),
            registry.clone(),
            Arc::clone(&links),
        );
        let discover = PackageLoader::new(
            "discover",
            Box::new(DiscoverPolicy),
            registry.clone(),
            Arc::clone(&links),
        );
        let bundle = PackageLoader::new("bundle", Box::new(BundlePolicy), registry, Arc::clone(&links));
        links.link(&installed, &upgradable, &discover, &bundle);

        Self {
            installed,
            upgradable,
            discover,
            bundle,
            links,
        }
    }

    pub fn ignored(&self) -> &Arc<IgnoredUpdates> {
        self.links.ignored()
    }

    /// 因被忽略而没有出现在可升级集合中的更新
    pub fn skipped_updates(&self) -> Vec<PackageRef> {
        self.links.skipped_updates()
    }

    pub async fn search(&self, query: &str) {
        self.discover.set_query(query);
        self.discover.reload().await;
    }

    /// 先加载已安装集合，可升级集合的过滤依赖它
    pub async fn reload_all(&self) {
        self.installed.reload().await;
        self.upgradable.reload().await;
    }

    /// 忽略某个包的更新（`*` 表示所有版本）并从可升级集合移除
    pub fn ignore_update(&self, package: &Package, version: &str) -> Result<()> {
        self.ignored().add(package, version)?;
        self.upgradable.remove(package);
        for p in self.installed.get_all_equivalents(package) {
            p.set_tag(if version == ALL_VERSIONS {
                PackageTag::Pinned
            } else {
                PackageTag::Default
            });
        }
        Ok(())
    }

    pub fn unignore_update(&self, package: &Package) -> Result<()> {
        self.ignored().remove(package)?;
        self.links.forget_skipped_update(package);
        for p in self.installed.get_all_equivalents(package) {
            if p.tag() == PackageTag::Pinned {
                p.set_tag(PackageTag::Default);
            }
        }
        Ok(())
    }
}
