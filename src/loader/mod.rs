//! 包集合加载器
//!
//! 每个 [`PackageLoader`] 并发查询所有可用的包管理器，把结果按指纹去重后
//! 合并成一个可观察的集合。四种集合（已安装 / 可升级 / 搜索 / 包组）共用
//! 同一实现，差异全部放在 [`LoaderPolicy`] 中。

pub mod bundle;
pub mod catalog;
pub mod policy;

pub use catalog::Catalog;
pub use policy::{BundlePolicy, DiscoverPolicy, InstalledPolicy, LoaderPolicy, UpgradablePolicy};

use crate::manager::ManagerRegistry;
use crate::package::{IgnoredUpdates, Package, PackageRef};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};
use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};

const EVENT_CAPACITY: usize = 256;

/// 集合变更通知
#[derive(Debug, Clone)]
pub enum LoaderEvent {
    /// `procedural` 为 true 表示增量变化，false 表示集合被整体清空/重建
    PackagesChanged {
        procedural: bool,
        added: Vec<PackageRef>,
        removed: Vec<PackageRef>,
    },
    StartedLoading,
    FinishedLoading,
}

/// 集合之间的弱引用，供策略在添加包时联动其他集合的标记
#[derive(Debug)]
pub struct LoaderLinks {
    installed: OnceLock<Weak<PackageLoader>>,
    upgradable: OnceLock<Weak<PackageLoader>>,
    discover: OnceLock<Weak<PackageLoader>>,
    bundle: OnceLock<Weak<PackageLoader>>,
    ignored: Arc<IgnoredUpdates>,
    /// 因被忽略而没有进入可升级集合的包，key 为忽略库 id
    skipped_updates: Mutex<HashMap<String, PackageRef>>,
}

impl LoaderLinks {
    pub fn new(ignored: Arc<IgnoredUpdates>) -> Self {
        Self {
            installed: OnceLock::new(),
            upgradable: OnceLock::new(),
            discover: OnceLock::new(),
            bundle: OnceLock::new(),
            ignored,
            skipped_updates: Mutex::new(HashMap::new()),
        }
    }

    pub fn installed(&self) -> Option<Arc<PackageLoader>> {
        self.installed.get().and_then(Weak::upgrade)
    }

    pub fn upgradable(&self) -> Option<Arc<PackageLoader>> {
        self.upgradable.get().and_then(Weak::upgrade)
    }

    pub fn discover(&self) -> Option<Arc<PackageLoader>> {
        self.discover.get().and_then(Weak::upgrade)
    }

    pub fn bundle(&self) -> Option<Arc<PackageLoader>> {
        self.bundle.get().and_then(Weak::upgrade)
    }

    pub fn ignored(&self) -> &Arc<IgnoredUpdates> {
        &self.ignored
    }

    pub(crate) fn link(
        &self,
        installed: &Arc<PackageLoader>,
        upgradable: &Arc<PackageLoader>,
        discover: &Arc<PackageLoader>,
        bundle: &Arc<PackageLoader>,
    ) {
        let _ = self.installed.set(Arc::downgrade(installed));
        let _ = self.upgradable.set(Arc::downgrade(upgradable));
        let _ = self.discover.set(Arc::downgrade(discover));
        let _ = self.bundle.set(Arc::downgrade(bundle));
    }

    pub fn record_skipped_update(&self, package: PackageRef) {
        self.skipped_updates
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(IgnoredUpdates::ignored_id(&package), package);
    }

    pub(crate) fn clear_skipped_updates(&self) {
        self.skipped_updates
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub(crate) fn forget_skipped_update(&self, package: &Package) {
        self.skipped_updates
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&IgnoredUpdates::ignored_id(package));
    }

    pub fn skipped_updates(&self) -> Vec<PackageRef> {
        self.skipped_updates
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }
}

#[derive(Debug, Default)]
struct LoaderState {
    /// 插入顺序
    items: Vec<PackageRef>,
    /// 指纹 -> 包；与 items 始终是同一组包
    index: HashMap<i64, PackageRef>,
    is_loaded: bool,
    is_loading: bool,
}

impl LoaderState {
    fn insert(&mut self, package: PackageRef, versioned: bool) -> bool {
        let key = package.fingerprint(versioned);
        if self.index.contains_key(&key) {
            return false;
        }
        self.index.insert(key, Arc::clone(&package));
        self.items.push(package);
        true
    }

    fn remove(&mut self, key: i64) -> Option<PackageRef> {
        let removed = self.index.remove(&key)?;
        self.items.retain(|p| !Arc::ptr_eq(p, &removed));
        Some(removed)
    }

    fn clear(&mut self) -> Vec<PackageRef> {
        self.index.clear();
        std::mem::take(&mut self.items)
    }
}

pub struct PackageLoader {
    name: &'static str,
    policy: Box<dyn LoaderPolicy>,
    registry: ManagerRegistry,
    links: Arc<LoaderLinks>,
    state: Mutex<LoaderState>,
    epoch: AtomicU64,
    query: Mutex<String>,
    events: broadcast::Sender<LoaderEvent>,
    auto_reload: Mutex<Option<JoinHandle<()>>>,
}

impl PackageLoader {
    pub fn new(
        name: &'static str,
        policy: Box<dyn LoaderPolicy>,
        registry: ManagerRegistry,
        links: Arc<LoaderLinks>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            name,
            policy,
            registry,
            links,
            state: Mutex::new(LoaderState::default()),
            epoch: AtomicU64::new(0),
            query: Mutex::new(String::new()),
            events,
            auto_reload: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LoaderEvent> {
        self.events.subscribe()
    }

    pub fn is_loaded(&self) -> bool {
        self.lock().is_loaded
    }

    pub fn is_loading(&self) -> bool {
        self.lock().is_loading
    }

    /// 搜索集合使用的查询字符串
    pub fn set_query(&self, query: impl Into<String>) {
        *self.query.lock().unwrap_or_else(|e| e.into_inner()) = query.into();
    }

    pub fn query(&self) -> String {
        self.query.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// 清空集合并从所有可用的包管理器重新加载
    ///
    /// 更新的 reload 开始后，本次尚未返回的结果全部丢弃。
    pub async fn reload(self: &Arc<Self>) {
        if !self.policy.reload_enabled() {
            self.emit(LoaderEvent::PackagesChanged {
                procedural: false,
                added: Vec::new(),
                removed: Vec::new(),
            });
            return;
        }
        self.cancel_auto_reload();

        let (epoch, removed) = {
            let mut state = self.lock();
            let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
            state.is_loading = true;
            state.is_loaded = false;
            (epoch, state.clear())
        };
        self.policy.on_reload_started(&self.links);
        self.emit(LoaderEvent::StartedLoading);
        self.emit(LoaderEvent::PackagesChanged {
            procedural: false,
            added: Vec::new(),
            removed,
        });

        let mut tasks = self.spawn_queries();
        while let Some(joined) = tasks.join_next().await {
            if !self.is_current(epoch) {
                log::debug!("[{}] 加载批次 {} 已被取代，丢弃剩余结果", self.name, epoch);
                return;
            }
            match joined {
                Ok((manager, Ok(packages))) => {
                    let added = self.add_batch(packages, Some(epoch), false);
                    log::debug!("[{}] {} 返回 {} 个包", self.name, manager, added.len());
                    self.emit(LoaderEvent::PackagesChanged {
                        procedural: true,
                        added,
                        removed: Vec::new(),
                    });
                }
                Ok((manager, Err(e))) => {
                    log::warn!("[{}] 从 {} 加载包失败: {:#}", self.name, manager, e);
                }
                Err(e) => {
                    log::error!("[{}] 查询任务异常退出: {}", self.name, e);
                }
            }
        }

        let finished = {
            let mut state = self.lock();
            if self.is_current(epoch) {
                state.is_loading = false;
                state.is_loaded = true;
                true
            } else {
                false
            }
        };
        if finished {
            self.emit(LoaderEvent::FinishedLoading);
            self.schedule_auto_reload();
        }
    }

    /// 只补充集合中尚不存在的包，不清空也不开始新的批次
    pub async fn reload_silently(self: &Arc<Self>) {
        if !self.policy.reload_enabled() {
            return;
        }
        let epoch = self.epoch.load(Ordering::SeqCst);
        let mut tasks = self.spawn_queries();
        let mut added = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(packages))) => {
                    added.extend(self.add_batch(packages, Some(epoch), true));
                }
                Ok((manager, Err(e))) => {
                    log::warn!("[{}] 从 {} 静默刷新失败: {:#}", self.name, manager, e);
                }
                Err(e) => log::error!("[{}] 查询任务异常退出: {}", self.name, e),
            }
        }
        if !added.is_empty() {
            self.emit(LoaderEvent::PackagesChanged {
                procedural: true,
                added,
                removed: Vec::new(),
            });
        }
    }

    /// 使当前加载批次失效
    pub fn stop_loading(&self, emit_finished: bool) {
        {
            let mut state = self.lock();
            self.epoch.fetch_add(1, Ordering::SeqCst);
            state.is_loading = false;
            state.is_loaded = false;
        }
        if emit_finished {
            self.emit(LoaderEvent::FinishedLoading);
        }
    }

    /// 插入在正常加载流程之外发现的包；已存在时什么也不做
    pub fn add_foreign(&self, package: PackageRef) {
        let inserted = self.lock().insert(Arc::clone(&package), self.policy.versioned());
        if inserted {
            self.emit(LoaderEvent::PackagesChanged {
                procedural: true,
                added: vec![package],
                removed: Vec::new(),
            });
        }
    }

    /// 插入一批包并执行集合的添加钩子（包组导入使用）
    pub fn add_packages(&self, packages: Vec<PackageRef>) -> Vec<PackageRef> {
        let added = self.add_refs(packages, None, true);
        if !added.is_empty() {
            self.emit(LoaderEvent::PackagesChanged {
                procedural: true,
                added: added.clone(),
                removed: Vec::new(),
            });
        }
        added
    }

    pub fn remove(&self, package: &Package) {
        let removed = self.lock().remove(package.fingerprint(self.policy.versioned()));
        if let Some(removed) = removed {
            self.emit(LoaderEvent::PackagesChanged {
                procedural: true,
                added: Vec::new(),
                removed: vec![removed],
            });
        }
    }

    /// 清空集合（不影响加载批次）
    pub fn clear(&self) {
        let removed = self.lock().clear();
        self.emit(LoaderEvent::PackagesChanged {
            procedural: false,
            added: Vec::new(),
            removed,
        });
    }

    pub fn contains(&self, package: &Package) -> bool {
        self.lock()
            .index
            .contains_key(&package.fingerprint(self.policy.versioned()))
    }

    /// 按本集合的版本策略查找等价包
    pub fn get_equivalent(&self, package: &Package) -> Option<PackageRef> {
        self.lock()
            .index
            .get(&package.fingerprint(self.policy.versioned()))
            .cloned()
    }

    /// 忽略版本，返回所有等价包
    pub fn get_all_equivalents(&self, package: &Package) -> Vec<PackageRef> {
        self.lock()
            .items
            .iter()
            .filter(|p| p.is_equivalent_to(package))
            .cloned()
            .collect()
    }

    pub fn get_package_for_id(&self, id: &str, source: Option<&str>) -> Option<PackageRef> {
        self.lock()
            .items
            .iter()
            .find(|p| p.id == id && source.map_or(true, |s| p.source.name == s))
            .cloned()
    }

    /// 当前集合的快照（插入顺序）
    pub fn packages(&self) -> Vec<PackageRef> {
        self.lock().items.clone()
    }

    pub fn count(&self) -> usize {
        self.lock().items.len()
    }

    pub fn any(&self) -> bool {
        !self.lock().items.is_empty()
    }

    fn spawn_queries(self: &Arc<Self>) -> JoinSet<(String, anyhow::Result<Vec<Package>>)> {
        let query = self.query();
        let mut tasks = JoinSet::new();
        for manager in self.registry.available() {
            let this = Arc::clone(self);
            let query = query.clone();
            tasks.spawn_blocking(move || {
                let result = this.policy.fetch(manager.as_ref(), &query);
                (manager.name().to_string(), result)
            });
        }
        tasks
    }

    /// 校验并插入一批包，返回真正插入的包
    ///
    /// `epoch` 为 Some 时，批次过期后的包一律丢弃。
    fn add_batch(&self, packages: Vec<Package>, epoch: Option<u64>, skip_present: bool) -> Vec<PackageRef> {
        self.add_refs(packages.into_iter().map(Package::into_ref), epoch, skip_present)
    }

    fn add_refs(
        &self,
        packages: impl IntoIterator<Item = PackageRef>,
        epoch: Option<u64>,
        skip_present: bool,
    ) -> Vec<PackageRef> {
        let versioned = self.policy.versioned();
        let mut added = Vec::new();
        for package in packages {
            if skip_present && self.contains(&package) {
                continue;
            }
            if !self.policy.is_valid(&package, &self.links) {
                continue;
            }
            let inserted = {
                let mut state = self.lock();
                if epoch.is_some_and(|e| !self.is_current(e)) {
                    return added;
                }
                state.insert(Arc::clone(&package), versioned)
            };
            if !inserted {
                log::warn!(
                    "[{}] 重复的包 {} ({}/{}) 被拒绝",
                    self.name,
                    package.id,
                    package.manager(),
                    package.source.name
                );
                continue;
            }
            self.policy.on_added(&package, &self.links);
            added.push(package);
        }
        added
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    fn schedule_auto_reload(self: &Arc<Self>) {
        let Some(interval) = self.policy.auto_reload_interval() else {
            return;
        };
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            // 取走自己的句柄，避免 reload 时把正在运行的自己 abort 掉
            this.auto_reload.lock().unwrap_or_else(|e| e.into_inner()).take();
            log::info!("[{}] 定时刷新", this.name);
            this.reload().await;
        });
        if let Some(previous) = self.auto_reload.lock().unwrap_or_else(|e| e.into_inner()).replace(handle) {
            previous.abort();
        }
    }

    fn cancel_auto_reload(&self) {
        if let Some(previous) = self.auto_reload.lock().unwrap_or_else(|e| e.into_inner()).take() {
            previous.abort();
        }
    }

    fn emit(&self, event: LoaderEvent) {
        let _ = self.events.send(event);
    }

    fn lock(&self) -> MutexGuard<'_, LoaderState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for PackageLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageLoader")
            .field("name", &self.name)
            .field("count", &self.count())
            .finish()
    }
}
