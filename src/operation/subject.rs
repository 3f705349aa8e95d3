//! 操作对象：单个包或软件源
//!
//! 标题文字、命令行参数、结果判定以及成功 / 失败后对各集合的联动
//! 都按对象类型分派到这里，调度器本身不关心具体是哪种操作。

use super::OperationMetadata;
use crate::loader::Catalog;
use crate::manager::{ManagerAdapter, Veredict};
use crate::package::{
    ignored::ALL_VERSIONS, InstallOptions, OperationKind, PackageRef, PackageTag, SourceOperationKind,
    SourceRef,
};

/// 包管理器无法报告已安装版本时使用的版本号
pub const UNKNOWN_VERSION: &str = "Unknown";

#[derive(Debug, Clone)]
pub enum OperationSubject {
    Package {
        package: PackageRef,
        kind: OperationKind,
    },
    Source {
        source: SourceRef,
        kind: SourceOperationKind,
    },
}

impl OperationSubject {
    pub fn manager(&self) -> &str {
        match self {
            OperationSubject::Package { package, .. } => package.manager(),
            OperationSubject::Source { source, .. } => &source.manager,
        }
    }

    pub fn package(&self) -> Option<&PackageRef> {
        match self {
            OperationSubject::Package { package, .. } => Some(package),
            OperationSubject::Source { .. } => None,
        }
    }

    pub(crate) fn metadata(&self) -> OperationMetadata {
        match self {
            OperationSubject::Package { package, kind } => {
                let name = &package.name;
                let (verb, doing, done) = match kind {
                    OperationKind::Install => ("安装", "正在安装", "已安装"),
                    OperationKind::Update => ("更新", "正在更新", "已更新"),
                    OperationKind::Uninstall => ("卸载", "正在卸载", "已卸载"),
                };
                OperationMetadata {
                    title: format!("{} {}", verb, name),
                    status: format!("{} {}", doing, name),
                    success_title: format!("{}成功", verb),
                    success_message: format!("{} {}", name, done),
                    failure_title: format!("{}失败", verb),
                    failure_message: format!("{} 无法{}", name, verb),
                }
            }
            OperationSubject::Source { source, kind } => {
                let verb = match kind {
                    SourceOperationKind::Add => "添加软件源",
                    SourceOperationKind::Remove => "移除软件源",
                };
                OperationMetadata {
                    title: format!("{} {}", verb, source.name),
                    status: format!("正在{} {}", verb, source.name),
                    success_title: format!("{}成功", verb),
                    success_message: format!("{}: {} 完成", verb, source.name),
                    failure_title: format!("{}失败", verb),
                    failure_message: format!("{}: {} 失败", verb, source.name),
                }
            }
        }
    }

    pub(crate) fn information(&self, options: &InstallOptions) -> String {
        match self {
            OperationSubject::Package { package, kind } => {
                let mut info = format!(
                    "{} {} {} (来源 {} / {})",
                    kind.label(),
                    package.id,
                    package.version,
                    package.manager(),
                    package.source.name
                );
                if *kind == OperationKind::Update {
                    if let Some(new_version) = &package.new_version {
                        info.push_str(&format!(" -> {}", new_version));
                    }
                }
                info.push_str(&format!("\n{}", options));
                info
            }
            OperationSubject::Source { source, kind } => format!(
                "{:?} source {} ({}) url={}",
                kind,
                source.name,
                source.manager,
                source.url.as_deref().unwrap_or("-")
            ),
        }
    }

    pub(crate) fn arguments(&self, adapter: &dyn ManagerAdapter, options: &InstallOptions) -> Vec<String> {
        match self {
            OperationSubject::Package { package, kind } => {
                adapter.operation_arguments(package, options, *kind)
            }
            OperationSubject::Source { source, kind } => adapter.source_arguments(source, *kind),
        }
    }

    pub(crate) fn veredict(&self, adapter: &dyn ManagerAdapter, exit_code: i32, output: &[String]) -> Veredict {
        match self {
            OperationSubject::Package { package, kind } => {
                adapter.interpret_result(package, *kind, exit_code, output)
            }
            OperationSubject::Source { source, kind } => {
                adapter.interpret_source_result(source, *kind, exit_code, output)
            }
        }
    }

    /// 是否需要通过提权程序执行
    pub(crate) fn needs_elevation(
        &self,
        adapter: &dyn ManagerAdapter,
        options: &InstallOptions,
        always_elevate: bool,
    ) -> bool {
        if options.run_as_admin || always_elevate || adapter.always_elevates() {
            return true;
        }
        matches!(self, OperationSubject::Source { .. }) && adapter.capabilities().sources_require_admin
    }

    pub(crate) fn on_enqueued(&self) {
        self.tag(PackageTag::OnQueue);
    }

    pub(crate) fn on_started(&self) {
        self.tag(PackageTag::BeingProcessed);
    }

    pub(crate) fn on_canceled(&self) {
        self.tag(PackageTag::Default);
    }

    pub(crate) fn on_failure(&self) {
        self.tag(PackageTag::Failed);
    }

    /// 成功后在各集合之间移动包
    pub(crate) fn on_success(&self, catalog: &Catalog) {
        let OperationSubject::Package { package, kind } = self else {
            return;
        };
        match kind {
            OperationKind::Install => {
                package.set_tag(PackageTag::AlreadyInstalled);
                let installed = (**package).clone();
                installed.set_tag(PackageTag::Default);
                catalog.installed.add_foreign(installed.into_ref());
            }
            OperationKind::Update => {
                package.set_tag(PackageTag::Default);
                for p in catalog.installed.get_all_equivalents(package) {
                    p.set_tag(PackageTag::Default);
                }
                if let Some(available) = catalog.discover.get_equivalent(package) {
                    available.set_tag(PackageTag::AlreadyInstalled);
                }
                catalog.upgradable.remove(package);

                let ignored = catalog.ignored();
                if ignored
                    .ignored_version(package)
                    .is_some_and(|v| v != ALL_VERSIONS)
                {
                    if let Err(e) = ignored.remove(package) {
                        log::warn!("移除 {} 的忽略记录失败: {:#}", package.id, e);
                    }
                }
                // 版本未知时无法判断更新是否已生效，忽略刚装上的版本避免反复提示
                if package.version == UNKNOWN_VERSION {
                    if let Some(new_version) = &package.new_version {
                        if let Err(e) = ignored.add(package, new_version) {
                            log::warn!("忽略 {} {} 失败: {:#}", package.id, new_version, e);
                        }
                    }
                }
            }
            OperationKind::Uninstall => {
                package.set_tag(PackageTag::Default);
                if let Some(available) = catalog.discover.get_equivalent(package) {
                    available.set_tag(PackageTag::Default);
                }
                catalog.upgradable.remove(package);
                catalog.installed.remove(package);
            }
        }
    }

    fn tag(&self, tag: PackageTag) {
        if let OperationSubject::Package { package, .. } = self {
            package.set_tag(tag);
        }
    }
}
