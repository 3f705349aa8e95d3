//! 全局操作队列与准入控制
//!
//! 排队中的操作按顺序保存在 `order` 中，开始运行时移出。默认同一时间只允许
//! 一个串行操作运行；允许并行的操作以及 `run_now` 的操作不受队首限制。
//! 每次修改都会递增 `generation`，等待中的操作据此醒来检查自己的位置。

use super::OperationRef;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

#[derive(Debug, Default)]
struct QueueState {
    order: VecDeque<OperationRef>,
    /// 正在运行的操作及其是否占用串行名额
    running: Vec<(OperationRef, bool)>,
}

impl QueueState {
    fn index_of(&self, id: u64) -> Option<usize> {
        self.order.iter().position(|op| op.id() == id)
    }

    fn serial_running(&self) -> bool {
        self.running.iter().any(|(_, serial)| *serial)
    }
}

#[derive(Debug)]
pub struct OperationQueue {
    state: Mutex<QueueState>,
    generation: watch::Sender<u64>,
}

impl Default for OperationQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationQueue {
    pub fn new() -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            state: Mutex::new(QueueState::default()),
            generation,
        }
    }

    /// 队列每次变化都会通知的接收端
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }

    pub fn enqueue(&self, op: OperationRef) {
        {
            let mut state = self.lock();
            if state.index_of(op.id()).is_none() {
                state.order.push_back(op);
            }
        }
        self.bump();
    }

    /// 插到队首（AutoRetry 重新排队时使用）
    pub fn enqueue_front(&self, op: OperationRef) {
        {
            let mut state = self.lock();
            if let Some(index) = state.index_of(op.id()) {
                state.order.remove(index);
            }
            state.order.push_front(op);
        }
        self.bump();
    }

    pub fn remove(&self, id: u64) -> bool {
        let removed = {
            let mut state = self.lock();
            match state.index_of(id) {
                Some(index) => state.order.remove(index).is_some(),
                None => false,
            }
        };
        if removed {
            self.bump();
        }
        removed
    }

    pub fn position(&self, id: u64) -> Option<usize> {
        self.lock().index_of(id)
    }

    pub fn contains(&self, id: u64) -> bool {
        self.position(id).is_some()
    }

    /// 移到队首
    pub fn skip_queue(&self, id: u64) -> bool {
        self.move_to(id, |_| 0)
    }

    /// 移到第二位，当前队首之后立即执行
    pub fn run_next(&self, id: u64) -> bool {
        self.move_to(id, |len| len.min(1))
    }

    /// 移到队尾
    pub fn run_last(&self, id: u64) -> bool {
        self.move_to(id, |len| len)
    }

    /// 尝试让操作开始运行；成功时把它移出排队序列
    ///
    /// `bypass` 为 true（允许并行或立即执行）时不检查队首与串行名额。
    pub fn try_admit(&self, op: &OperationRef, bypass: bool, serial: bool) -> bool {
        let admitted = {
            let mut state = self.lock();
            let Some(index) = state.index_of(op.id()) else {
                return false;
            };
            if bypass || (index == 0 && !state.serial_running()) {
                state.order.remove(index);
                state.running.push((Arc::clone(op), serial));
                true
            } else {
                false
            }
        };
        if admitted {
            self.bump();
        }
        admitted
    }

    /// 操作结束运行
    pub fn finish(&self, id: u64) {
        self.lock().running.retain(|(op, _)| op.id() != id);
        self.bump();
    }

    /// 没有排队也没有运行中的操作
    pub fn is_idle(&self) -> bool {
        let state = self.lock();
        state.order.is_empty() && state.running.is_empty()
    }

    pub fn queued(&self) -> Vec<OperationRef> {
        self.lock().order.iter().cloned().collect()
    }

    pub fn running(&self) -> Vec<OperationRef> {
        self.lock().running.iter().map(|(op, _)| Arc::clone(op)).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().order.is_empty()
    }

    fn move_to(&self, id: u64, target: impl FnOnce(usize) -> usize) -> bool {
        {
            let mut state = self.lock();
            let Some(index) = state.index_of(id) else {
                return false;
            };
            let Some(op) = state.order.remove(index) else {
                return false;
            };
            let to = target(state.order.len());
            state.order.insert(to, op);
        }
        self.bump();
        true
    }

    fn bump(&self) {
        self.generation.send_modify(|g| *g = g.wrapping_add(1));
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
