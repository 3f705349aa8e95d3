//! 包管理器适配层
//!
//! 加载器和操作只通过 [`ManagerAdapter`] 访问具体的包管理器：
//! 查询包列表、构造命令行参数、解释子进程结果。

#[cfg(test)]
pub mod fake;
pub mod pacman;

use crate::package::{InstallOptions, OperationKind, Package, SourceOperationKind, SourceRef};
use crate::process::CommandLine;
use anyhow::Result;
use std::sync::Arc;

/// 子进程结束后的判定结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Veredict {
    Success,
    Failure,
    Canceled,
    /// 需要先修正环境（例如打开某个设置）再自动重新排队
    AutoRetry,
    RestartRequired,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub can_run_as_admin: bool,
    pub can_run_interactively: bool,
    pub can_skip_integrity_checks: bool,
    pub supports_custom_sources: bool,
    pub sources_require_admin: bool,
}

pub trait ManagerAdapter: Send + Sync {
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    fn is_enabled(&self) -> bool {
        true
    }

    /// 可执行文件已找到且可以调用
    fn is_ready(&self) -> bool;

    /// 所有操作都必须提权执行（例如直接调用 pacman）
    fn always_elevates(&self) -> bool {
        false
    }

    /// 可执行文件及其固定前置参数
    fn executable(&self) -> CommandLine;

    fn find_packages(&self, query: &str) -> Result<Vec<Package>>;

    fn installed_packages(&self) -> Result<Vec<Package>>;

    fn available_updates(&self) -> Result<Vec<Package>>;

    fn operation_arguments(
        &self,
        package: &Package,
        options: &InstallOptions,
        kind: OperationKind,
    ) -> Vec<String>;

    fn source_arguments(&self, source: &SourceRef, kind: SourceOperationKind) -> Vec<String>;

    fn interpret_result(
        &self,
        package: &Package,
        kind: OperationKind,
        exit_code: i32,
        output: &[String],
    ) -> Veredict;

    fn interpret_source_result(
        &self,
        _source: &SourceRef,
        _kind: SourceOperationKind,
        exit_code: i32,
        _output: &[String],
    ) -> Veredict {
        if exit_code == 0 {
            Veredict::Success
        } else {
            Veredict::Failure
        }
    }

    /// 子进程卡在交互确认时会输出的提示；命中后向 stdin 写入空行
    fn stdin_unblock_patterns(&self) -> Vec<String> {
        Vec::new()
    }
}

/// 进程内所有包管理器的只读注册表
#[derive(Clone, Default)]
pub struct ManagerRegistry {
    managers: Arc<Vec<Arc<dyn ManagerAdapter>>>,
}

impl ManagerRegistry {
    pub fn new(managers: Vec<Arc<dyn ManagerAdapter>>) -> Self {
        Self {
            managers: Arc::new(managers),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ManagerAdapter>> {
        self.managers.iter().find(|m| m.name() == name).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ManagerAdapter>> {
        self.managers.iter()
    }

    /// 已启用且就绪、可以参与查询的包管理器
    pub fn available(&self) -> Vec<Arc<dyn ManagerAdapter>> {
        self.managers
            .iter()
            .filter(|m| m.is_enabled() && m.is_ready())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.managers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.managers.is_empty()
    }
}

impl std::fmt::Debug for ManagerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.managers.iter().map(|m| m.name().to_string()))
            .finish()
    }
}
