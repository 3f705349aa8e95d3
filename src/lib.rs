//! pkgdeck：多包管理器前端引擎
//!
//! - [`loader`]：已安装 / 可升级 / 搜索 / 包组四个联动的包集合
//! - [`operation`]：安装、更新、卸载操作的排队、执行与重试
//! - [`process`]：流式读取子进程输出，支持取消
//! - [`manager`]：包管理器适配层（目前内置 pacman 系列）

pub mod config;
pub mod engine;
pub mod error;
pub mod loader;
pub mod manager;
pub mod operation;
pub mod package;
pub mod process;

pub use config::Config;
pub use engine::Engine;
pub use error::EngineError;
pub use loader::{Catalog, LoaderEvent, PackageLoader};
pub use manager::{Capabilities, ManagerAdapter, ManagerRegistry, Veredict};
pub use operation::{
    Operation, OperationRef, OperationStatus, RetryMode, Scheduler, SchedulerEvent,
};
pub use package::{InstallOptions, OperationKind, Package, PackageRef, PackageTag, SourceRef};
