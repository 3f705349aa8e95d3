//! 单元测试用的包管理器：查询结果预先设定，操作执行 `sh -c` 脚本

use super::{Capabilities, ManagerAdapter, Veredict};
use crate::package::{InstallOptions, OperationKind, Package, SourceOperationKind, SourceRef};
use crate::process::CommandLine;
use anyhow::{anyhow, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// 退出码 75 被解释为 AutoRetry
pub const AUTO_RETRY_EXIT: i32 = 75;

#[derive(Debug, Clone)]
struct Reply {
    delay: Duration,
    result: Result<Vec<Package>, String>,
}

/// 依次弹出预设值，只剩最后一个时重复使用它
#[derive(Debug)]
struct Script<T: Clone>(Mutex<VecDeque<T>>);

impl<T: Clone> Default for Script<T> {
    fn default() -> Self {
        Self(Mutex::new(VecDeque::new()))
    }
}

impl<T: Clone> Script<T> {
    fn push(&self, item: T) {
        self.0.lock().unwrap().push_back(item);
    }

    fn next(&self) -> Option<T> {
        let mut queue = self.0.lock().unwrap();
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[derive(Debug, Default)]
pub struct FakeAdapter {
    name: String,
    pub caps: Capabilities,
    pub elevates: bool,
    installed: Script<Reply>,
    updates: Script<Reply>,
    search: Script<Reply>,
    scripts: Script<String>,
    runs: AtomicUsize,
}

impl FakeAdapter {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn package(&self, id: &str, version: &str) -> Package {
        Package::new(id, id, version, SourceRef::new(&self.name, "main"))
    }

    pub fn update(&self, id: &str, version: &str, new_version: &str) -> Package {
        self.package(id, version).with_new_version(new_version)
    }

    pub fn push_installed(&self, delay: Duration, packages: Vec<Package>) {
        self.installed.push(Reply { delay, result: Ok(packages) });
    }

    pub fn push_installed_error(&self, message: &str) {
        self.installed.push(Reply {
            delay: Duration::ZERO,
            result: Err(message.to_string()),
        });
    }

    pub fn push_updates(&self, packages: Vec<Package>) {
        self.updates.push(Reply { delay: Duration::ZERO, result: Ok(packages) });
    }

    pub fn push_search(&self, packages: Vec<Package>) {
        self.search.push(Reply { delay: Duration::ZERO, result: Ok(packages) });
    }

    /// 下一次操作执行的 shell 脚本
    pub fn push_script(&self, script: &str) {
        self.scripts.push(script.to_string());
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    fn answer(script: &Script<Reply>) -> Result<Vec<Package>> {
        let Some(reply) = script.next() else {
            return Ok(Vec::new());
        };
        std::thread::sleep(reply.delay);
        reply.result.map_err(|e| anyhow!(e))
    }
}

impl ManagerAdapter for FakeAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        self.caps
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn always_elevates(&self) -> bool {
        self.elevates
    }

    fn executable(&self) -> CommandLine {
        CommandLine::new("sh")
    }

    fn find_packages(&self, _query: &str) -> Result<Vec<Package>> {
        Self::answer(&self.search)
    }

    fn installed_packages(&self) -> Result<Vec<Package>> {
        Self::answer(&self.installed)
    }

    fn available_updates(&self) -> Result<Vec<Package>> {
        Self::answer(&self.updates)
    }

    fn operation_arguments(
        &self,
        _package: &Package,
        _options: &InstallOptions,
        _kind: OperationKind,
    ) -> Vec<String> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let script = self.scripts.next().unwrap_or_else(|| "true".to_string());
        vec!["-c".to_string(), script]
    }

    fn source_arguments(&self, source: &SourceRef, kind: SourceOperationKind) -> Vec<String> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let verb = match kind {
            SourceOperationKind::Add => "add",
            SourceOperationKind::Remove => "remove",
        };
        vec!["-c".to_string(), format!("echo {} {}", verb, source.name)]
    }

    fn interpret_result(
        &self,
        _package: &Package,
        _kind: OperationKind,
        exit_code: i32,
        _output: &[String],
    ) -> Veredict {
        match exit_code {
            0 => Veredict::Success,
            AUTO_RETRY_EXIT => Veredict::AutoRetry,
            _ => Veredict::Failure,
        }
    }
}
