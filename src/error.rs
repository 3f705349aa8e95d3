//! 引擎层错误类型

use crate::operation::OperationStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("未知的包管理器: {0}")]
    UnknownManager(String),

    #[error("包管理器 {0} 当前不可用")]
    ManagerUnavailable(String),

    #[error("未知的操作 #{0}")]
    UnknownOperation(u64),

    #[error("操作 #{id} 处于 {status:?} 状态，无法执行 {action}")]
    InvalidTransition {
        id: u64,
        status: OperationStatus,
        action: &'static str,
    },

    #[error("重试模式 {0} 不适用于软件源操作")]
    UnsupportedRetry(&'static str),

    #[error("包集合文件格式错误: {0}")]
    MalformedBundle(String),
}
