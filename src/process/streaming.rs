//! 流式命令执行
//!
//! 子进程在独立进程组中运行，stdout / stderr 各由一个线程逐行读取，
//! 按到达顺序发送到同一个 channel。取消时对整个进程组执行信号阶梯。

use super::{clean_terminal_output, CommandLine};
use anyhow::Result;
use std::io::{Read, Write};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// 子进程输出的一行
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamLine {
    Stdout(String),
    Stderr(String),
    /// 以 `\r` 就地刷新的进度行，只用于状态栏
    Progress(String),
}

impl StreamLine {
    pub fn text(&self) -> &str {
        match self {
            StreamLine::Stdout(s) | StreamLine::Stderr(s) | StreamLine::Progress(s) => s,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub exit_code: i32,
    /// 按到达顺序排列的 stdout / stderr 行（不含进度行）
    pub lines: Vec<String>,
}

/// 单次执行的取消句柄，替代进程级的全局 PID / 取消标志
#[derive(Debug, Default)]
pub struct CancelHandle {
    cancelled: AtomicBool,
    pid: AtomicU32,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// 重新排队执行前清除取消标志
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
        self.pid.store(0, Ordering::SeqCst);
    }

    /// 请求取消当前运行的子进程。
    ///
    /// 信号阶梯（均针对整个进程组 -pgid）：
    ///   1. SIGINT：让包管理器走正常的中断清理流程
    ///   2. SIGTERM：5 秒内仍未退出
    ///   3. SIGKILL：再等 1 秒仍未退出
    ///
    /// 进程尚未启动（PID 为 0）时只设置标志，由启动方补发信号。
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);

        let pid = self.pid.load(Ordering::SeqCst);
        if pid == 0 {
            return;
        }
        signal_group(pid, libc::SIGINT);

        // 在后台线程中等待并逐步升级信号，避免阻塞调用方
        std::thread::spawn(move || {
            let sigterm_deadline = Instant::now() + Duration::from_secs(5);
            loop {
                std::thread::sleep(Duration::from_millis(100));
                if !group_alive(pid) {
                    break;
                }
                if Instant::now() >= sigterm_deadline {
                    signal_group(pid, libc::SIGTERM);
                    std::thread::sleep(Duration::from_millis(1000));
                    if group_alive(pid) {
                        signal_group(pid, libc::SIGKILL);
                    }
                    break;
                }
            }
        });
    }

    fn attach(&self, pid: u32) {
        self.pid.store(pid, Ordering::SeqCst);
    }

    fn detach(&self) {
        self.pid.store(0, Ordering::SeqCst);
    }
}

fn signal_group(pid: u32, signal: libc::c_int) {
    unsafe {
        libc::kill(-(pid as i32), signal);
    }
}

fn group_alive(pid: u32) -> bool {
    unsafe { libc::kill(-(pid as i32), 0) == 0 }
}

/// 从流中读取行并发送到 channel
///
/// `\n` 结尾的行作为普通输出；`\r` 结尾的行（下载进度条等）作为进度行发送。
/// 命中交互确认提示时向 stdin 写入空行解除阻塞。
fn read_stream_lines(
    stream: Option<impl Read>,
    tx: &mpsc::UnboundedSender<StreamLine>,
    is_stderr: bool,
    cancel: &CancelHandle,
    stdin: Option<&Mutex<ChildStdin>>,
    unblock_patterns: &[String],
) {
    let Some(mut reader) = stream else {
        return;
    };
    let mut buffer = [0u8; 1024];
    // 按字节切行再解码：多字节字符可能跨越两次 read
    let mut line_buffer: Vec<u8> = Vec::new();

    let emit = |raw: &[u8], progress: bool| {
        let decoded = String::from_utf8_lossy(raw);
        let cleaned = clean_terminal_output(&decoded);
        let cleaned = cleaned.trim_end();
        if cleaned.trim().is_empty() {
            return;
        }
        if let Some(stdin) = stdin {
            if unblock_patterns.iter().any(|p| cleaned.contains(p.as_str())) {
                let mut stdin = stdin.lock().unwrap_or_else(|e| e.into_inner());
                if let Err(e) = stdin.write_all(b"\n").and_then(|_| stdin.flush()) {
                    log::warn!("向子进程写入确认换行失败: {}", e);
                }
            }
        }
        let line = if progress {
            StreamLine::Progress(cleaned.to_string())
        } else if is_stderr {
            StreamLine::Stderr(cleaned.to_string())
        } else {
            StreamLine::Stdout(cleaned.to_string())
        };
        let _ = tx.send(line);
    };

    while let Ok(n) = reader.read(&mut buffer) {
        if n == 0 || cancel.is_cancelled() {
            break;
        }

        for &byte in &buffer[..n] {
            match byte {
                b'\n' => {
                    emit(&line_buffer, false);
                    line_buffer.clear();
                }
                b'\r' => {
                    emit(&line_buffer, true);
                    line_buffer.clear();
                }
                _ => line_buffer.push(byte),
            }
        }
    }
    if !line_buffer.is_empty() {
        emit(&line_buffer, false);
    }
}

/// 阻塞执行命令直到退出，返回退出码
///
/// 被信号终止的进程返回 `128 + signal`。
pub fn run_streaming_command(
    command: &CommandLine,
    cancel: &Arc<CancelHandle>,
    unblock_patterns: &[String],
    output_tx: mpsc::UnboundedSender<StreamLine>,
) -> Result<i32> {
    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args);
    cmd.stdin(Stdio::piped());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    unsafe {
        cmd.pre_exec(|| {
            // 独立进程组，方便统一终止 sudo + 包管理器整棵进程树
            libc::setpgid(0, 0);
            libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM);
            Ok(())
        });
    }
    let mut child = cmd.spawn()?;

    let child_pid = child.id();
    cancel.attach(child_pid);

    // 启动窗口期内已经请求了取消：补发 SIGINT
    if cancel.is_cancelled() {
        signal_group(child_pid, libc::SIGINT);
    }

    let stdin = child.stdin.take().map(|s| Arc::new(Mutex::new(s)));
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let stdout_handle = {
        let tx = output_tx.clone();
        let cancel = Arc::clone(cancel);
        let stdin = stdin.clone();
        let patterns = unblock_patterns.to_vec();
        std::thread::spawn(move || {
            read_stream_lines(stdout, &tx, false, &cancel, stdin.as_deref(), &patterns)
        })
    };
    let stderr_handle = {
        let cancel = Arc::clone(cancel);
        let stdin = stdin.clone();
        let patterns = unblock_patterns.to_vec();
        std::thread::spawn(move || {
            read_stream_lines(stderr, &output_tx, true, &cancel, stdin.as_deref(), &patterns)
        })
    };
    drop(stdin);

    let _ = stdout_handle.join();
    let _ = stderr_handle.join();

    if cancel.is_cancelled() {
        // SIGINT/SIGTERM 已在 cancel() 中发出；超时才升级为 SIGKILL
        let deadline = Instant::now() + Duration::from_secs(6);
        loop {
            if let Ok(Some(status)) = child.try_wait() {
                cancel.detach();
                return Ok(exit_code_of(status));
            }
            if Instant::now() >= deadline {
                signal_group(child_pid, libc::SIGKILL);
                let status = child.wait()?;
                cancel.detach();
                return Ok(exit_code_of(status));
            }
            std::thread::sleep(Duration::from_millis(100));
        }
    }

    let status = child.wait()?;
    cancel.detach();
    Ok(exit_code_of(status))
}

fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|s| 128 + s))
        .unwrap_or(-1)
}

/// 异步执行命令：阻塞部分放到 blocking 线程池，逐行回调 `on_line`
pub async fn run_process<F>(
    command: CommandLine,
    cancel: Arc<CancelHandle>,
    unblock_patterns: Vec<String>,
    mut on_line: F,
) -> Result<ProcessOutcome>
where
    F: FnMut(StreamLine),
{
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = tokio::task::spawn_blocking(move || {
        run_streaming_command(&command, &cancel, &unblock_patterns, tx)
    });

    let mut lines = Vec::new();
    while let Some(line) = rx.recv().await {
        if !matches!(line, StreamLine::Progress(_)) {
            lines.push(line.text().to_string());
        }
        on_line(line);
    }

    let exit_code = handle.await??;
    Ok(ProcessOutcome { exit_code, lines })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandLine {
        CommandLine::new("sh").args(["-c", script])
    }

    #[tokio::test]
    async fn collects_lines_and_exit_code() {
        let mut seen = Vec::new();
        let outcome = run_process(
            sh("echo one; echo two >&2; exit 3"),
            Arc::new(CancelHandle::new()),
            Vec::new(),
            |line| seen.push(line),
        )
        .await
        .unwrap();

        assert_eq!(outcome.exit_code, 3);
        assert!(outcome.lines.contains(&"one".to_string()));
        assert!(seen.contains(&StreamLine::Stderr("two".into())));
    }

    #[tokio::test]
    async fn carriage_return_lines_are_progress_only() {
        let outcome = run_process(
            sh("printf '10%%\\r50%%\\rdone\\n'"),
            Arc::new(CancelHandle::new()),
            Vec::new(),
            |_| {},
        )
        .await
        .unwrap();
        assert_eq!(outcome.lines, vec!["done".to_string()]);
    }

    #[tokio::test]
    async fn multibyte_text_across_read_boundary() {
        // 前 1023 字节是 '0'，"中" 的三个字节跨越第一次 read 的边界
        let outcome = run_process(
            sh("printf '%01023d中文\\n' 0"),
            Arc::new(CancelHandle::new()),
            Vec::new(),
            |_| {},
        )
        .await
        .unwrap();

        assert_eq!(outcome.lines.len(), 1);
        assert!(outcome.lines[0].ends_with("中文"));
        assert!(!outcome.lines[0].contains('\u{FFFD}'));
    }

    #[tokio::test]
    async fn answers_confirmation_prompt() {
        let outcome = run_process(
            sh("echo 'Proceed? [Y/n]'; read answer; echo \"got:$answer.\""),
            Arc::new(CancelHandle::new()),
            vec!["[Y/n]".to_string()],
            |_| {},
        )
        .await
        .unwrap();
        assert_eq!(outcome.exit_code, 0);
        assert!(outcome.lines.contains(&"got:.".to_string()));
    }

    #[tokio::test]
    async fn cancel_stops_long_running_process() {
        let cancel = Arc::new(CancelHandle::new());
        let trigger = Arc::clone(&cancel);
        let started = Instant::now();
        let outcome = run_process(sh("echo start; sleep 30"), cancel.clone(), Vec::new(), move |_| {
            trigger.cancel();
        })
        .await
        .unwrap();

        assert!(cancel.is_cancelled());
        assert_ne!(outcome.exit_code, 0);
        assert!(started.elapsed() < Duration::from_secs(20));
    }
}
