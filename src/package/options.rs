//! 操作选项与操作类型

use serde::{Deserialize, Serialize};
use std::fmt;

/// 针对单个包的操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    Install,
    Update,
    Uninstall,
}

impl OperationKind {
    pub fn label(&self) -> &'static str {
        match self {
            OperationKind::Install => "install",
            OperationKind::Update => "update",
            OperationKind::Uninstall => "uninstall",
        }
    }
}

/// 软件源操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceOperationKind {
    Add,
    Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstallScope {
    User,
    Machine,
}

/// 安装 / 更新 / 卸载时传给包管理器的选项
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallOptions {
    pub run_as_admin: bool,
    pub interactive: bool,
    pub skip_hash_check: bool,
    pub scope: Option<InstallScope>,
    pub version: Option<String>,
    pub custom_parameters: Vec<String>,
}

impl fmt::Display for InstallOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<InstallOptions: admin={} interactive={} skip_hash={} scope={:?} version={:?} params={:?}>",
            self.run_as_admin,
            self.interactive,
            self.skip_hash_check,
            self.scope,
            self.version,
            self.custom_parameters
        )
    }
}
