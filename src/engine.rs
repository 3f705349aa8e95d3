//! 引擎上下文：把配置、包管理器、包集合和调度器组装在一起

use crate::config::Config;
use crate::loader::Catalog;
use crate::manager::{ManagerAdapter, ManagerRegistry};
use crate::operation::{OperationHistory, Scheduler};
use crate::package::IgnoredUpdates;
use anyhow::Result;
use std::sync::Arc;

#[derive(Debug)]
pub struct Engine {
    config: Arc<Config>,
    registry: ManagerRegistry,
    catalog: Arc<Catalog>,
    scheduler: Arc<Scheduler>,
}

impl Engine {
    /// 配置中禁用的包管理器不会进入注册表
    pub fn new(config: Config, managers: Vec<Arc<dyn ManagerAdapter>>) -> Result<Self> {
        config.ensure_data_dir()?;

        let managers: Vec<_> = managers
            .into_iter()
            .filter(|m| {
                let disabled = config.is_manager_disabled(m.name());
                if disabled {
                    log::info!("包管理器 {} 已在配置中禁用", m.name());
                }
                !disabled
            })
            .collect();
        let registry = ManagerRegistry::new(managers);
        log::info!("已注册的包管理器: {:?}", registry);

        let ignored = Arc::new(IgnoredUpdates::load(config.ignored_updates_path()));
        let catalog = Arc::new(Catalog::new(
            registry.clone(),
            ignored,
            config.updates_check_interval(),
        ));
        let history = OperationHistory::new(config.history_path(), config.history_max_lines);

        let config = Arc::new(config);
        let scheduler = Scheduler::new(
            Arc::clone(&config),
            registry.clone(),
            Arc::clone(&catalog),
            history,
        );

        Ok(Self {
            config,
            registry,
            catalog,
            scheduler,
        })
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn registry(&self) -> &ManagerRegistry {
        &self.registry
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// 取消未完成的操作并等待它们结束，然后释放提权凭证
    pub async fn shutdown(&self) {
        self.scheduler.cancel_all();
        self.scheduler.wait_all().await;
        for loader in [
            &self.catalog.installed,
            &self.catalog.upgradable,
            &self.catalog.discover,
        ] {
            loader.stop_loading(false);
        }
        self.scheduler.elevation().release().await;
    }
}
