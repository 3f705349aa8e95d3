//! 操作记录与状态机
//!
//! ```text
//! InQueue ──▶ Running ──▶ Succeeded
//!    │           │  ╲
//!    │           │   ╲──▶ Failed ──(retry)──▶ InQueue
//!    │           ╰──(AutoRetry)──▶ InQueue
//!    ╰──────────────────▶ Canceled ◀── Running（取消）
//! ```

pub mod elevation;
pub mod history;
pub mod queue;
pub mod scheduler;
pub mod subject;

pub use elevation::ElevationCache;
pub use history::OperationHistory;
pub use queue::OperationQueue;
pub use scheduler::{Scheduler, SchedulerEvent};
pub use subject::OperationSubject;

use crate::manager::ManagerAdapter;
use crate::package::InstallOptions;
use crate::process::CancelHandle;
use chrono::{DateTime, Local};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

pub type OperationRef = Arc<Operation>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationStatus {
    InQueue,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationStatus::Succeeded | OperationStatus::Failed | OperationStatus::Canceled
        )
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationStatus::InQueue => "排队中",
            OperationStatus::Running => "运行中",
            OperationStatus::Succeeded => "成功",
            OperationStatus::Failed => "失败",
            OperationStatus::Canceled => "已取消",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetryMode {
    Retry,
    RetryAsAdmin,
    RetryInteractive,
    RetrySkipIntegrity,
}

impl RetryMode {
    pub fn label(&self) -> &'static str {
        match self {
            RetryMode::Retry => "retry",
            RetryMode::RetryAsAdmin => "retry-as-admin",
            RetryMode::RetryInteractive => "retry-interactive",
            RetryMode::RetrySkipIntegrity => "retry-skip-integrity",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    /// 引擎自己写入的说明行（命令行、时间、退出码等）
    Info,
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub text: String,
    pub kind: OutputKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationMetadata {
    pub title: String,
    pub status: String,
    pub success_title: String,
    pub success_message: String,
    pub failure_title: String,
    pub failure_message: String,
}

#[derive(Debug)]
struct OperationState {
    status: OperationStatus,
    options: InstallOptions,
    metadata: OperationMetadata,
    information: String,
    output: Vec<OutputLine>,
    status_text: String,
    queue_position: Option<usize>,
    run_now: bool,
}

pub struct Operation {
    id: u64,
    subject: OperationSubject,
    adapter: Arc<dyn ManagerAdapter>,
    cancel: Arc<CancelHandle>,
    state: Mutex<OperationState>,
    executions: AtomicUsize,
    created_at: DateTime<Local>,
}

impl Operation {
    pub(crate) fn new(
        id: u64,
        subject: OperationSubject,
        adapter: Arc<dyn ManagerAdapter>,
        options: InstallOptions,
    ) -> Self {
        let metadata = subject.metadata();
        let information = subject.information(&options);
        let status_text = metadata.status.clone();
        Self {
            id,
            subject,
            adapter,
            cancel: Arc::new(CancelHandle::new()),
            state: Mutex::new(OperationState {
                status: OperationStatus::InQueue,
                options,
                metadata,
                information,
                output: Vec::new(),
                status_text,
                queue_position: None,
                run_now: false,
            }),
            executions: AtomicUsize::new(0),
            created_at: Local::now(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn subject(&self) -> &OperationSubject {
        &self.subject
    }

    pub fn adapter(&self) -> &Arc<dyn ManagerAdapter> {
        &self.adapter
    }

    pub fn created_at(&self) -> DateTime<Local> {
        self.created_at
    }

    pub fn status(&self) -> OperationStatus {
        self.lock().status
    }

    pub fn options(&self) -> InstallOptions {
        self.lock().options.clone()
    }

    pub fn metadata(&self) -> OperationMetadata {
        self.lock().metadata.clone()
    }

    /// 操作对象与选项的描述
    pub fn information(&self) -> String {
        self.lock().information.clone()
    }

    /// 状态栏文字：排队位置或最近一行有意义的输出
    pub fn status_text(&self) -> String {
        self.lock().status_text.clone()
    }

    pub fn output(&self) -> Vec<OutputLine> {
        self.lock().output.clone()
    }

    pub fn output_text(&self) -> Vec<String> {
        self.lock().output.iter().map(|l| l.text.clone()).collect()
    }

    pub fn queue_position(&self) -> Option<usize> {
        self.lock().queue_position
    }

    /// 子进程被启动的次数（AutoRetry 与手动重试都会累加）
    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// 失败后当前可用的重试方式
    pub fn retry_modes(&self) -> Vec<RetryMode> {
        let state = self.lock();
        if state.status != OperationStatus::Failed {
            return Vec::new();
        }
        let mut modes = vec![RetryMode::Retry];
        let caps = self.adapter.capabilities();
        if caps.can_run_as_admin && !state.options.run_as_admin {
            modes.push(RetryMode::RetryAsAdmin);
        }
        if let OperationSubject::Package { .. } = self.subject {
            if caps.can_run_interactively && !state.options.interactive {
                modes.push(RetryMode::RetryInteractive);
            }
            if caps.can_skip_integrity_checks && !state.options.skip_hash_check {
                modes.push(RetryMode::RetrySkipIntegrity);
            }
        }
        modes
    }

    pub(crate) fn cancel_handle(&self) -> &Arc<CancelHandle> {
        &self.cancel
    }

    pub(crate) fn set_status(&self, status: OperationStatus) {
        let mut state = self.lock();
        state.status = status;
        if status != OperationStatus::InQueue {
            state.queue_position = None;
        }
        state.status_text = match status {
            OperationStatus::InQueue | OperationStatus::Running => state.metadata.status.clone(),
            OperationStatus::Succeeded => state.metadata.success_message.clone(),
            OperationStatus::Failed => state.metadata.failure_message.clone(),
            OperationStatus::Canceled => format!("{}：{}", state.metadata.title, status),
        };
    }

    /// 在状态栏显示排队位置；位置没有变化时返回 false
    pub(crate) fn set_queue_position(&self, position: usize) -> bool {
        let mut state = self.lock();
        if state.queue_position == Some(position) {
            return false;
        }
        state.queue_position = Some(position);
        state.status_text = format!("排队中（位置 {}）", position);
        true
    }

    pub(crate) fn push_line(&self, text: impl Into<String>, kind: OutputKind) {
        let text = text.into();
        let mut state = self.lock();
        if kind != OutputKind::Info && !text.trim().is_empty() {
            state.status_text = text.clone();
        }
        state.output.push(OutputLine { text, kind });
    }

    /// 进度行只更新状态栏
    pub(crate) fn set_progress(&self, text: impl Into<String>) {
        self.lock().status_text = text.into();
    }

    pub(crate) fn mark_run_now(&self) {
        self.lock().run_now = true;
    }

    pub(crate) fn run_now(&self) -> bool {
        self.lock().run_now
    }

    pub(crate) fn count_execution(&self) -> usize {
        self.executions.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// 按重试方式修改选项，清空输出并回到排队状态
    pub(crate) fn prepare_retry(&self, mode: RetryMode) {
        let mut state = self.lock();
        match mode {
            RetryMode::Retry => {}
            RetryMode::RetryAsAdmin => state.options.run_as_admin = true,
            RetryMode::RetryInteractive => state.options.interactive = true,
            RetryMode::RetrySkipIntegrity => state.options.skip_hash_check = true,
        }
        state.information = self.subject.information(&state.options);
        state.output.clear();
        state.status = OperationStatus::InQueue;
        state.status_text = state.metadata.status.clone();
        state.queue_position = None;
        state.run_now = false;
        drop(state);
        self.cancel.reset();
    }

    fn lock(&self) -> MutexGuard<'_, OperationState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("id", &self.id)
            .field("subject", &self.subject)
            .field("status", &self.status())
            .finish()
    }
}
