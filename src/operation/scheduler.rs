//! 操作调度：排队等待、执行子进程、判定结果、重试与取消

use super::{
    ElevationCache, Operation, OperationHistory, OperationQueue, OperationRef, OperationStatus,
    OperationSubject, OutputKind, RetryMode,
};
use crate::config::Config;
use crate::error::EngineError;
use crate::loader::Catalog;
use crate::manager::{ManagerAdapter, ManagerRegistry, Veredict};
use crate::package::{InstallOptions, OperationKind, PackageRef, SourceOperationKind, SourceRef};
use crate::process::{run_process, StreamLine};
use anyhow::Result;
use chrono::Local;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    Submitted { id: u64 },
    StatusChanged { id: u64, status: OperationStatus },
    QueuePositionChanged { id: u64, position: usize },
    OutputChanged { id: u64 },
    /// 操作从可见列表中移除
    Closed { id: u64 },
}

pub struct Scheduler {
    config: Arc<Config>,
    registry: ManagerRegistry,
    catalog: Arc<Catalog>,
    queue: OperationQueue,
    elevation: ElevationCache,
    history: OperationHistory,
    operations: Mutex<Vec<OperationRef>>,
    next_id: AtomicU64,
    events: broadcast::Sender<SchedulerEvent>,
}

impl Scheduler {
    pub fn new(
        config: Arc<Config>,
        registry: ManagerRegistry,
        catalog: Arc<Catalog>,
        history: OperationHistory,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            elevation: ElevationCache::from_config(&config),
            config,
            registry,
            catalog,
            queue: OperationQueue::new(),
            history,
            operations: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.events.subscribe()
    }

    pub fn queue(&self) -> &OperationQueue {
        &self.queue
    }

    pub fn history(&self) -> &OperationHistory {
        &self.history
    }

    pub fn elevation(&self) -> &ElevationCache {
        &self.elevation
    }

    /// 当前可见的所有操作（按提交顺序）
    pub fn operations(&self) -> Vec<OperationRef> {
        self.ops().clone()
    }

    pub fn get(&self, id: u64) -> Result<OperationRef, EngineError> {
        self.ops()
            .iter()
            .find(|op| op.id() == id)
            .cloned()
            .ok_or(EngineError::UnknownOperation(id))
    }

    pub fn install(self: &Arc<Self>, package: PackageRef, options: InstallOptions) -> Result<OperationRef> {
        self.submit(package, OperationKind::Install, options)
    }

    pub fn update(self: &Arc<Self>, package: PackageRef, options: InstallOptions) -> Result<OperationRef> {
        self.submit(package, OperationKind::Update, options)
    }

    pub fn uninstall(self: &Arc<Self>, package: PackageRef, options: InstallOptions) -> Result<OperationRef> {
        self.submit(package, OperationKind::Uninstall, options)
    }

    /// 提交一个包操作并立即开始排队
    pub fn submit(
        self: &Arc<Self>,
        package: PackageRef,
        kind: OperationKind,
        options: InstallOptions,
    ) -> Result<OperationRef> {
        let adapter = self.adapter_for(package.manager())?;
        let subject = OperationSubject::Package { package, kind };
        Ok(self.register(subject, adapter, options))
    }

    pub fn submit_source(
        self: &Arc<Self>,
        source: SourceRef,
        kind: SourceOperationKind,
    ) -> Result<OperationRef> {
        let adapter = self.adapter_for(&source.manager)?;
        let subject = OperationSubject::Source { source, kind };
        Ok(self.register(subject, adapter, InstallOptions::default()))
    }

    pub fn skip_queue(&self, id: u64) -> Result<(), EngineError> {
        self.reorder(id, "skip-queue", OperationQueue::skip_queue)
    }

    pub fn run_next(&self, id: u64) -> Result<(), EngineError> {
        self.reorder(id, "run-next", OperationQueue::run_next)
    }

    pub fn run_last(&self, id: u64) -> Result<(), EngineError> {
        self.reorder(id, "run-last", OperationQueue::run_last)
    }

    /// 不再等待队首与串行名额，立即开始执行
    pub fn run_now(&self, id: u64) -> Result<(), EngineError> {
        let op = self.get(id)?;
        if op.status() != OperationStatus::InQueue {
            return Err(EngineError::InvalidTransition {
                id,
                status: op.status(),
                action: "run-now",
            });
        }
        op.mark_run_now();
        self.queue.skip_queue(id);
        Ok(())
    }

    /// 取消操作：排队中的立即结束，运行中的终止子进程
    pub fn cancel(self: &Arc<Self>, id: u64) -> Result<(), EngineError> {
        let op = self.get(id)?;
        let status = op.status();
        if status.is_terminal() {
            return Err(EngineError::InvalidTransition {
                id,
                status,
                action: "cancel",
            });
        }

        log::info!("取消操作 #{} ({})", id, status);
        op.cancel_handle().cancel();
        // 仍在排队序列中：这里直接结束；已经开始运行则由执行流程在进程退出后结束
        if self.queue.remove(id) {
            self.finish_operation(&op, OperationStatus::Canceled);
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                let this = Arc::clone(self);
                handle.spawn(async move { this.release_elevation_if_idle().await });
            }
        }
        Ok(())
    }

    /// 以指定方式重试失败的操作
    pub fn retry(self: &Arc<Self>, id: u64, mode: RetryMode) -> Result<(), EngineError> {
        let op = self.get(id)?;
        let status = op.status();
        if status != OperationStatus::Failed {
            return Err(EngineError::InvalidTransition {
                id,
                status,
                action: "retry",
            });
        }
        if matches!(op.subject(), OperationSubject::Source { .. })
            && matches!(mode, RetryMode::RetryInteractive | RetryMode::RetrySkipIntegrity)
        {
            return Err(EngineError::UnsupportedRetry(mode.label()));
        }

        log::info!("重试操作 #{} ({})", id, mode.label());
        op.prepare_retry(mode);
        self.emit(SchedulerEvent::StatusChanged {
            id,
            status: OperationStatus::InQueue,
        });
        self.start(op);
        Ok(())
    }

    /// 从可见列表中移除已结束的操作
    pub fn close(&self, id: u64) -> Result<(), EngineError> {
        let op = self.get(id)?;
        let status = op.status();
        if !status.is_terminal() {
            return Err(EngineError::InvalidTransition {
                id,
                status,
                action: "close",
            });
        }
        self.ops().retain(|o| o.id() != id);
        self.emit(SchedulerEvent::Closed { id });
        Ok(())
    }

    /// 等待操作进入终态（AutoRetry 的中间状态不算）
    pub async fn wait(&self, id: u64) -> Result<OperationStatus, EngineError> {
        let op = self.get(id)?;
        let mut events = self.events.subscribe();
        loop {
            let status = op.status();
            if status.is_terminal() {
                return Ok(status);
            }
            match events.recv().await {
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return Ok(op.status()),
            }
        }
    }

    /// 等待当前所有操作进入终态
    pub async fn wait_all(&self) {
        for op in self.operations() {
            let _ = self.wait(op.id()).await;
        }
    }

    /// 退出前取消所有未结束的操作
    pub fn cancel_all(self: &Arc<Self>) {
        for op in self.operations() {
            if !op.status().is_terminal() {
                let _ = self.cancel(op.id());
            }
        }
    }

    fn adapter_for(&self, manager: &str) -> Result<Arc<dyn ManagerAdapter>, EngineError> {
        let adapter = self
            .registry
            .get(manager)
            .ok_or_else(|| EngineError::UnknownManager(manager.to_string()))?;
        if !adapter.is_enabled() || !adapter.is_ready() {
            return Err(EngineError::ManagerUnavailable(manager.to_string()));
        }
        Ok(adapter)
    }

    fn register(
        self: &Arc<Self>,
        subject: OperationSubject,
        adapter: Arc<dyn ManagerAdapter>,
        options: InstallOptions,
    ) -> OperationRef {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let op = Arc::new(Operation::new(id, subject, adapter, options));
        log::info!("提交操作 #{}: {}", id, op.metadata().title);
        self.ops().push(Arc::clone(&op));
        self.emit(SchedulerEvent::Submitted { id });
        self.start(Arc::clone(&op));
        op
    }

    /// 进入排队序列并启动执行流程
    fn start(self: &Arc<Self>, op: OperationRef) {
        op.subject().on_enqueued();
        self.queue.enqueue(Arc::clone(&op));
        if !self.bypasses_queue(&op) {
            self.refresh_position(&op);
        }
        let this = Arc::clone(self);
        tokio::spawn(async move { this.drive(op).await });
    }

    async fn drive(self: Arc<Self>, op: OperationRef) {
        loop {
            if !self.wait_for_admission(&op).await {
                return;
            }
            let veredict = self.run_once(&op).await;
            self.queue.finish(op.id());

            // 用户取消优先于任何判定结果
            let veredict = if op.is_cancel_requested() {
                Veredict::Canceled
            } else {
                veredict
            };
            log::info!("操作 #{} 判定结果: {:?}", op.id(), veredict);

            let status = match veredict {
                Veredict::AutoRetry => {
                    op.push_line("包管理器要求自动重试", OutputKind::Info);
                    op.set_status(OperationStatus::InQueue);
                    self.emit(SchedulerEvent::StatusChanged {
                        id: op.id(),
                        status: OperationStatus::InQueue,
                    });
                    self.queue.enqueue_front(Arc::clone(&op));
                    continue;
                }
                Veredict::Success | Veredict::RestartRequired => OperationStatus::Succeeded,
                Veredict::Failure => OperationStatus::Failed,
                Veredict::Canceled => OperationStatus::Canceled,
            };
            if veredict == Veredict::RestartRequired {
                op.push_line("需要重启系统才能完成此操作", OutputKind::Info);
            }
            // 先释放凭证再公布终态，等待者看到终态时队列的凭证已经清理
            self.release_elevation_if_idle().await;
            self.finish_operation(&op, status);
            if status == OperationStatus::Succeeded {
                self.schedule_close(&op);
            }
            return;
        }
    }

    /// 等到操作获准运行；操作在排队期间被取消时返回 false
    ///
    /// 取消请求可能在重新排队之前到达（此时 `cancel` 无法从队列中移除它），
    /// 这里负责把仍留在队列中的操作结束掉。谁先从队列中移除谁负责结束。
    async fn wait_for_admission(&self, op: &OperationRef) -> bool {
        let mut changes = self.queue.subscribe();
        let parallel = self.config.parallel_allowed_for(op.subject().manager());
        loop {
            if op.is_cancel_requested() {
                if self.queue.remove(op.id()) {
                    self.release_elevation_if_idle().await;
                    self.finish_operation(op, OperationStatus::Canceled);
                }
                return false;
            }
            if op.status() != OperationStatus::InQueue {
                return false;
            }
            let bypass = parallel || op.run_now();
            if self.queue.try_admit(op, bypass, !parallel) {
                log::debug!("操作 #{} 获准运行 (bypass={})", op.id(), bypass);
                return true;
            }
            if !self.queue.contains(op.id()) {
                return false;
            }
            self.refresh_position(op);
            tokio::select! {
                _ = changes.changed() => {}
                _ = tokio::time::sleep(self.config.queue_poll_interval()) => {}
            }
        }
    }

    /// 执行一次子进程，返回包管理器的判定结果
    async fn run_once(&self, op: &OperationRef) -> Veredict {
        let id = op.id();
        op.set_status(OperationStatus::Running);
        op.subject().on_started();
        self.emit(SchedulerEvent::StatusChanged {
            id,
            status: OperationStatus::Running,
        });

        let adapter = Arc::clone(op.adapter());
        let options = op.options();
        let mut command = adapter
            .executable()
            .args(op.subject().arguments(adapter.as_ref(), &options));

        let always_elevate = self.config.always_elevate_for(adapter.name());
        if op
            .subject()
            .needs_elevation(adapter.as_ref(), &options, always_elevate)
        {
            if let Err(e) = self.elevation.ensure_cached().await {
                log::warn!("操作 #{} 提权失败: {:#}", id, e);
                op.push_line(format!("提权失败: {:#}", e), OutputKind::Info);
                return Veredict::Failure;
            }
            command = command.elevated_with(self.elevation.elevator());
        }

        let run = op.count_execution();
        op.push_line(format!("执行次数         : {}", run), OutputKind::Info);
        op.push_line(format!("可执行文件       : {}", command.program), OutputKind::Info);
        op.push_line(format!("参数             : {}", command.args.join(" ")), OutputKind::Info);
        op.push_line(
            format!("开始时间         : {}", Local::now().format("%Y-%m-%d %H:%M:%S")),
            OutputKind::Info,
        );
        self.emit(SchedulerEvent::OutputChanged { id });

        let result = run_process(
            command,
            Arc::clone(op.cancel_handle()),
            adapter.stdin_unblock_patterns(),
            |line| {
                match line {
                    StreamLine::Stdout(text) => op.push_line(text, OutputKind::Stdout),
                    StreamLine::Stderr(text) => op.push_line(text, OutputKind::Stderr),
                    StreamLine::Progress(text) => op.set_progress(text),
                }
                self.emit(SchedulerEvent::OutputChanged { id });
            },
        )
        .await;

        match result {
            Ok(outcome) => {
                op.push_line(format!("退出码           : {}", outcome.exit_code), OutputKind::Info);
                op.push_line(
                    format!("结束时间         : {}", Local::now().format("%Y-%m-%d %H:%M:%S")),
                    OutputKind::Info,
                );
                self.emit(SchedulerEvent::OutputChanged { id });
                op.subject()
                    .veredict(adapter.as_ref(), outcome.exit_code, &outcome.lines)
            }
            Err(e) => {
                log::error!("操作 #{} 无法启动子进程: {:#}", id, e);
                op.push_line(format!("无法启动子进程: {:#}", e), OutputKind::Info);
                Veredict::Failure
            }
        }
    }

    /// 进入终态：联动集合、写入历史、发出通知
    fn finish_operation(&self, op: &OperationRef, status: OperationStatus) {
        match status {
            OperationStatus::Succeeded => op.subject().on_success(&self.catalog),
            OperationStatus::Failed => op.subject().on_failure(),
            OperationStatus::Canceled => {
                op.subject().on_canceled();
                op.push_line("操作已被用户取消", OutputKind::Info);
            }
            OperationStatus::InQueue | OperationStatus::Running => {}
        }
        op.set_status(status);
        log::info!("操作 #{} 结束: {}", op.id(), status);

        let title = format!("{} [{}]", op.metadata().title, status);
        let mut lines = vec![op.information()];
        lines.extend(op.output_text());
        if let Err(e) = self.history.append(&title, &lines) {
            log::warn!("写入操作历史失败: {:#}", e);
        }

        self.emit(SchedulerEvent::StatusChanged { id: op.id(), status });
    }

    async fn release_elevation_if_idle(&self) {
        if self.queue.is_idle() {
            self.elevation.release().await;
        }
    }

    /// 成功的操作在延迟后自动从列表中移除
    fn schedule_close(self: &Arc<Self>, op: &OperationRef) {
        if self.config.maintain_successful_operations {
            return;
        }
        let this = Arc::clone(self);
        let id = op.id();
        let delay = self.config.close_delay();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let still_succeeded = this
                .get(id)
                .map(|op| op.status() == OperationStatus::Succeeded)
                .unwrap_or(false);
            if still_succeeded {
                let _ = this.close(id);
            }
        });
    }

    fn reorder(
        &self,
        id: u64,
        action: &'static str,
        apply: impl FnOnce(&OperationQueue, u64) -> bool,
    ) -> Result<(), EngineError> {
        let op = self.get(id)?;
        if !apply(&self.queue, id) {
            return Err(EngineError::InvalidTransition {
                id,
                status: op.status(),
                action,
            });
        }
        Ok(())
    }

    fn bypasses_queue(&self, op: &Operation) -> bool {
        self.config.parallel_allowed_for(op.subject().manager()) || op.run_now()
    }

    fn refresh_position(&self, op: &OperationRef) {
        if let Some(position) = self.queue.position(op.id()) {
            if op.set_queue_position(position) {
                self.emit(SchedulerEvent::QueuePositionChanged {
                    id: op.id(),
                    position,
                });
            }
        }
    }

    fn emit(&self, event: SchedulerEvent) {
        let _ = self.events.send(event);
    }

    fn ops(&self) -> MutexGuard<'_, Vec<OperationRef>> {
        self.operations.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("operations", &self.ops().len())
            .field("queued", &self.queue.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::fake::FakeAdapter;
    use crate::manager::Capabilities;
    use crate::package::{IgnoredUpdates, PackageTag};
    use std::collections::HashSet;
    use std::time::{Duration, Instant};

    struct Harness {
        scheduler: Arc<Scheduler>,
        fake: Arc<FakeAdapter>,
        catalog: Arc<Catalog>,
    }

    fn test_config() -> Config {
        Config {
            maintain_successful_operations: true,
            elevator: "env".into(),
            elevation_cache_args: vec!["true".into()],
            elevation_release_args: vec!["true".into()],
            ..Default::default()
        }
    }

    fn harness_with(config: Config, caps: Capabilities) -> Harness {
        let mut fake = FakeAdapter::new("fake");
        fake.caps = caps;
        harness_from(config, fake)
    }

    fn harness_from(config: Config, fake: FakeAdapter) -> Harness {
        let fake = Arc::new(fake);
        let registry = ManagerRegistry::new(vec![Arc::clone(&fake) as Arc<dyn ManagerAdapter>]);
        let catalog = Arc::new(Catalog::new(
            registry.clone(),
            Arc::new(IgnoredUpdates::in_memory()),
            None,
        ));
        let scheduler = Scheduler::new(
            Arc::new(config),
            registry,
            Arc::clone(&catalog),
            OperationHistory::in_memory(500),
        );
        Harness {
            scheduler,
            fake,
            catalog,
        }
    }

    fn harness() -> Harness {
        harness_with(test_config(), Capabilities::default())
    }

    impl Harness {
        fn install(&self, id: &str) -> OperationRef {
            self.scheduler
                .install(self.fake.package(id, "1.0").into_ref(), InstallOptions::default())
                .unwrap()
        }
    }

    /// 从事件流中统计启动顺序和同时运行的最大数量
    fn running_trace(events: &mut broadcast::Receiver<SchedulerEvent>) -> (Vec<u64>, usize) {
        let mut running = HashSet::new();
        let mut started = Vec::new();
        let mut max = 0;
        while let Ok(event) = events.try_recv() {
            if let SchedulerEvent::StatusChanged { id, status } = event {
                if status == OperationStatus::Running {
                    running.insert(id);
                    started.push(id);
                    max = max.max(running.len());
                } else if status.is_terminal() {
                    running.remove(&id);
                }
            }
        }
        (started, max)
    }

    #[tokio::test]
    async fn serial_operations_never_overlap() {
        let h = harness();
        h.fake.push_script("sleep 0.2");
        let mut events = h.scheduler.subscribe();

        let ops: Vec<_> = ["a", "b", "c"].iter().map(|id| h.install(id)).collect();
        h.scheduler.wait_all().await;

        let (started, max) = running_trace(&mut events);
        assert_eq!(max, 1);
        assert_eq!(started, ops.iter().map(|op| op.id()).collect::<Vec<_>>());
        assert!(ops.iter().all(|op| op.status() == OperationStatus::Succeeded));
    }

    #[tokio::test]
    async fn queue_positions_and_cancel_while_queued() {
        let h = harness();
        let a = h.install("a");
        let b = h.install("b");
        let c = h.install("c");

        assert_eq!(a.status_text(), "排队中（位置 0）");
        assert_eq!(b.status_text(), "排队中（位置 1）");
        assert_eq!(c.status_text(), "排队中（位置 2）");

        h.scheduler.cancel(b.id()).unwrap();
        assert_eq!(b.status(), OperationStatus::Canceled);
        let queued: Vec<_> = h.scheduler.queue().queued().iter().map(|op| op.id()).collect();
        assert_eq!(queued, vec![a.id(), c.id()]);

        h.scheduler.wait_all().await;
        assert_eq!(a.status(), OperationStatus::Succeeded);
        assert_eq!(c.status(), OperationStatus::Succeeded);
        assert_eq!(b.executions(), 0);
        assert_eq!(h.fake.runs(), 2);
        assert_eq!(b.subject().package().unwrap().tag(), PackageTag::Default);
    }

    #[tokio::test]
    async fn auto_retry_runs_twice_then_succeeds() {
        let h = harness();
        h.fake.push_script("exit 75");
        h.fake.push_script("exit 0");

        let op = h.install("a");
        let status = h.scheduler.wait(op.id()).await.unwrap();

        assert_eq!(status, OperationStatus::Succeeded);
        assert_eq!(op.executions(), 2);
        assert_eq!(h.fake.runs(), 2);
    }

    #[tokio::test]
    async fn failed_operation_can_be_retried_as_admin() {
        let h = harness_with(
            test_config(),
            Capabilities {
                can_run_as_admin: true,
                ..Default::default()
            },
        );
        h.fake.push_script("echo boom >&2; exit 1");
        h.fake.push_script("echo ok");

        let op = h.install("a");
        assert_eq!(h.scheduler.wait(op.id()).await.unwrap(), OperationStatus::Failed);
        assert_eq!(op.subject().package().unwrap().tag(), PackageTag::Failed);
        assert!(op.output_text().contains(&"boom".to_string()));
        assert_eq!(op.retry_modes(), vec![RetryMode::Retry, RetryMode::RetryAsAdmin]);

        h.scheduler.retry(op.id(), RetryMode::RetryAsAdmin).unwrap();
        assert_eq!(op.status(), OperationStatus::InQueue);
        assert!(op.output().is_empty());
        assert!(op.options().run_as_admin);

        assert_eq!(h.scheduler.wait(op.id()).await.unwrap(), OperationStatus::Succeeded);
        let output = op.output_text();
        assert!(output.contains(&"ok".to_string()));
        assert!(output.iter().any(|l| l.starts_with("可执行文件") && l.ends_with("env")));

        let err = h.scheduler.retry(op.id(), RetryMode::Retry).unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { action: "retry", .. }));
    }

    #[tokio::test]
    async fn plain_retry_keeps_subject_and_options() {
        let h = harness();
        h.fake.push_script("exit 3");
        let options = InstallOptions {
            custom_parameters: vec!["--needed".into()],
            ..Default::default()
        };
        let op = h
            .scheduler
            .update(h.fake.update("a", "1.0", "1.1").into_ref(), options.clone())
            .unwrap();
        h.scheduler.wait(op.id()).await.unwrap();
        let subject_before = op.subject().package().unwrap().clone();

        h.scheduler.retry(op.id(), RetryMode::Retry).unwrap();

        assert_eq!(op.status(), OperationStatus::InQueue);
        assert!(op.output().is_empty());
        assert_eq!(op.options(), options);
        assert!(Arc::ptr_eq(&subject_before, op.subject().package().unwrap()));
        assert_eq!(h.scheduler.wait(op.id()).await.unwrap(), OperationStatus::Failed);
    }

    #[tokio::test]
    async fn cancel_while_running_forces_canceled() {
        let h = harness();
        h.fake.push_script("echo started; sleep 30");
        let op = h.install("a");

        let started = Instant::now();
        while !op.output_text().contains(&"started".to_string()) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        h.scheduler.cancel(op.id()).unwrap();

        assert_eq!(h.scheduler.wait(op.id()).await.unwrap(), OperationStatus::Canceled);
        assert!(started.elapsed() < Duration::from_secs(20));
        assert_eq!(op.subject().package().unwrap().tag(), PackageTag::Default);
        assert!(h.scheduler.cancel(op.id()).is_err());
    }

    #[tokio::test]
    async fn cancel_before_requeue_does_not_block_queue() {
        let h = harness();
        h.fake.push_script("exit 1");
        h.fake.push_script("exit 0");

        let a = h.install("a");
        assert_eq!(h.scheduler.wait(a.id()).await.unwrap(), OperationStatus::Failed);

        // 取消落在“已回到 InQueue、尚未重新入队”的窗口内
        a.prepare_retry(RetryMode::Retry);
        h.scheduler.cancel(a.id()).unwrap();
        h.scheduler.start(Arc::clone(&a));
        let b = h.install("b");

        let finished = tokio::time::timeout(Duration::from_secs(5), h.scheduler.wait_all()).await;
        assert!(finished.is_ok());
        assert_eq!(a.status(), OperationStatus::Canceled);
        assert_eq!(a.subject().package().unwrap().tag(), PackageTag::Default);
        assert_eq!(b.status(), OperationStatus::Succeeded);
        assert!(h.scheduler.queue().is_idle());
    }

    #[tokio::test]
    async fn cancel_flag_on_queued_operation_is_finalized() {
        let h = harness();
        let a = h.install("a");
        // 只设置标志、不经过 cancel()：等待准入的流程必须自己把它移出队列
        a.cancel_handle().cancel();
        let b = h.install("b");

        let finished = tokio::time::timeout(Duration::from_secs(5), h.scheduler.wait_all()).await;
        assert!(finished.is_ok());
        assert_eq!(a.status(), OperationStatus::Canceled);
        assert_eq!(a.executions(), 0);
        assert_eq!(b.status(), OperationStatus::Succeeded);
        assert!(h.scheduler.history().read().contains("安装 a [已取消]"));
    }

    #[tokio::test]
    async fn elevated_batch_prompts_once_and_releases() {
        let dir = tempfile::tempdir().unwrap();
        let prompts = dir.path().join("prompts");
        let config = Config {
            elevator: "env".into(),
            elevation_cache_args: vec![
                "sh".into(),
                "-c".into(),
                format!("echo x >> '{}'", prompts.display()),
            ],
            elevation_release_args: vec!["true".into()],
            ..test_config()
        };
        let mut fake = FakeAdapter::new("fake");
        fake.elevates = true;
        let h = harness_from(config, fake);

        let ops: Vec<_> = ["a", "b", "c"].iter().map(|id| h.install(id)).collect();
        h.scheduler.wait_all().await;

        for op in &ops {
            assert_eq!(op.status(), OperationStatus::Succeeded);
            assert!(op
                .output_text()
                .iter()
                .any(|l| l.starts_with("可执行文件") && l.ends_with("env")));
        }
        let prompted = std::fs::read_to_string(&prompts).unwrap();
        assert_eq!(prompted.lines().count(), 1);
        assert!(!h.scheduler.elevation().is_cached().await);
    }

    #[tokio::test]
    async fn parallel_manager_bypasses_queue() {
        let config = Config {
            parallel_managers: vec!["fake".into()],
            ..test_config()
        };
        let h = harness_with(config, Capabilities::default());
        h.fake.push_script("sleep 0.3");
        let mut events = h.scheduler.subscribe();

        h.install("a");
        h.install("b");
        h.scheduler.wait_all().await;

        let (_, max) = running_trace(&mut events);
        assert_eq!(max, 2);
    }

    #[tokio::test]
    async fn run_now_skips_admission() {
        let h = harness();
        h.fake.push_script("sleep 0.3");
        let mut events = h.scheduler.subscribe();

        let a = h.install("a");
        let b = h.install("b");
        let c = h.install("c");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(a.status(), OperationStatus::Running);

        h.scheduler.run_now(c.id()).unwrap();
        h.scheduler.wait_all().await;

        let (started, max) = running_trace(&mut events);
        assert_eq!(started, vec![a.id(), c.id(), b.id()]);
        assert_eq!(max, 2);
    }

    #[tokio::test]
    async fn reordering_requires_queued_operation() {
        let h = harness();
        let a = h.install("a");
        let b = h.install("b");
        let c = h.install("c");

        h.scheduler.run_next(c.id()).unwrap();
        let queued: Vec<_> = h.scheduler.queue().queued().iter().map(|op| op.id()).collect();
        assert_eq!(queued, vec![a.id(), c.id(), b.id()]);

        h.scheduler.wait_all().await;
        assert!(matches!(
            h.scheduler.run_last(a.id()),
            Err(EngineError::InvalidTransition { .. })
        ));
        assert!(matches!(
            h.scheduler.skip_queue(999),
            Err(EngineError::UnknownOperation(999))
        ));
    }

    #[tokio::test]
    async fn success_moves_packages_between_collections() {
        let h = harness();
        let wget = h.fake.package("wget", "1.0").into_ref();
        let update = h.fake.update("wget", "1.0", "1.1").into_ref();
        h.catalog.installed.add_foreign(Arc::clone(&wget));
        h.catalog.upgradable.add_foreign(Arc::clone(&update));
        wget.set_tag(PackageTag::IsUpgradable);

        let op = h.scheduler.update(update, InstallOptions::default()).unwrap();
        h.scheduler.wait(op.id()).await.unwrap();
        assert!(!h.catalog.upgradable.any());
        assert_eq!(wget.tag(), PackageTag::Default);

        let op = h.scheduler.uninstall(Arc::clone(&wget), InstallOptions::default()).unwrap();
        h.scheduler.wait(op.id()).await.unwrap();
        assert!(!h.catalog.installed.contains(&wget));

        let curl = h.fake.package("curl", "8.0").into_ref();
        let op = h.scheduler.install(Arc::clone(&curl), InstallOptions::default()).unwrap();
        h.scheduler.wait(op.id()).await.unwrap();
        assert_eq!(curl.tag(), PackageTag::AlreadyInstalled);
        assert!(h.catalog.installed.contains(&curl));
    }

    #[tokio::test]
    async fn finished_operations_are_recorded_and_closed() {
        let config = Config {
            maintain_successful_operations: false,
            close_delay_secs: 0,
            ..test_config()
        };
        let h = harness_with(config, Capabilities::default());
        h.fake.push_script("echo hello");

        let op = h.install("a");
        h.scheduler.wait(op.id()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(h.scheduler.operations().is_empty());
        let history = h.scheduler.history().read();
        assert!(history.starts_with("安装 a [成功]"));
        assert!(history.contains("hello"));
    }

    #[tokio::test]
    async fn source_operations_run_through_the_queue() {
        let h = harness();
        let op = h
            .scheduler
            .submit_source(SourceRef::new("fake", "extra"), SourceOperationKind::Add)
            .unwrap();
        assert_eq!(h.scheduler.wait(op.id()).await.unwrap(), OperationStatus::Succeeded);
        assert!(op.output_text().contains(&"add extra".to_string()));
    }

    #[tokio::test]
    async fn unknown_manager_is_rejected() {
        let h = harness();
        let package = crate::package::Package::new("x", "x", "1", SourceRef::new("nope", "main"));
        let err = h
            .scheduler
            .install(package.into_ref(), InstallOptions::default())
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::UnknownManager(m)) if m == "nope"
        ));
    }
}
