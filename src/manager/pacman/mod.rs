//! pacman / paru / yay 适配器

pub mod parser;

use super::{Capabilities, ManagerAdapter, Veredict};
use crate::package::{InstallOptions, OperationKind, Package, SourceOperationKind, SourceRef};
use crate::process::CommandLine;
use anyhow::{anyhow, bail, Result};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct PacmanAdapter {
    /// paru / yay / pacman
    command: String,
    executable: Option<PathBuf>,
    enabled: bool,
}

impl PacmanAdapter {
    /// 按 paru > yay > pacman 的优先级探测可用的前端
    pub fn detect() -> Result<Self> {
        for pm in ["paru", "yay", "pacman"] {
            if let Ok(path) = which::which(pm) {
                return Ok(Self {
                    command: pm.to_string(),
                    executable: Some(path),
                    enabled: true,
                });
            }
        }
        Err(anyhow!("未找到包管理器 (paru/yay/pacman)"))
    }

    pub fn with_command(command: impl Into<String>) -> Self {
        let command = command.into();
        let executable = which::which(&command).ok();
        Self {
            command,
            executable,
            enabled: true,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// 运行只读查询命令并返回 stdout
    fn query(&self, program: &str, args: &[&str]) -> Result<String> {
        let output = duct::cmd(program, args.iter().copied())
            .stdout_capture()
            .stderr_capture()
            .unchecked()
            .run()?;
        if !output.status.success() {
            bail!(
                "{} {} 执行失败: {}",
                program,
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl ManagerAdapter for PacmanAdapter {
    fn name(&self) -> &str {
        &self.command
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            can_run_as_admin: true,
            can_run_interactively: true,
            can_skip_integrity_checks: false,
            supports_custom_sources: false,
            sources_require_admin: true,
        }
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn is_ready(&self) -> bool {
        self.executable.is_some()
    }

    fn always_elevates(&self) -> bool {
        // paru / yay 会自行调用 sudo，以 root 运行反而会被拒绝
        self.command == "pacman"
    }

    fn executable(&self) -> CommandLine {
        let program = self
            .executable
            .as_ref()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|| self.command.clone());
        CommandLine::new(program)
    }

    fn find_packages(&self, query: &str) -> Result<Vec<Package>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let raw = self.query(&self.command, &["-Ss", query])?;
        Ok(parser::parse_search_output(&raw, self.name()))
    }

    fn installed_packages(&self) -> Result<Vec<Package>> {
        let raw = self.query("pacman", &["-Q"])?;
        Ok(parser::parse_installed(&raw, self.name()))
    }

    fn available_updates(&self) -> Result<Vec<Package>> {
        // checkupdates 不需要 root 且不会修改同步数据库；没有安装时退回 -Qu
        let raw = match self.query("checkupdates", &[]) {
            Ok(raw) => raw,
            Err(e) => {
                log::debug!("checkupdates 不可用，改用 {} -Qu: {}", self.command, e);
                self.query(&self.command, &["-Qu"])?
            }
        };
        Ok(parser::parse_updates(&raw, self.name()))
    }

    fn operation_arguments(
        &self,
        package: &Package,
        options: &InstallOptions,
        kind: OperationKind,
    ) -> Vec<String> {
        let mut args: Vec<String> = match kind {
            OperationKind::Install | OperationKind::Update => vec!["-S".into()],
            OperationKind::Uninstall => vec!["-Rns".into()],
        };
        if !options.interactive {
            args.push("--noconfirm".into());
        }
        args.extend(options.custom_parameters.iter().cloned());
        args.push(package.id.clone());
        args
    }

    fn source_arguments(&self, _source: &SourceRef, _kind: SourceOperationKind) -> Vec<String> {
        // 仓库由 /etc/pacman.conf 管理，命令行不支持增删
        Vec::new()
    }

    fn interpret_result(
        &self,
        _package: &Package,
        _kind: OperationKind,
        exit_code: i32,
        output: &[String],
    ) -> Veredict {
        if exit_code == 0 {
            return Veredict::Success;
        }
        // 130 = 被 SIGINT 中断
        if exit_code == 130 || output.iter().any(|l| l.contains("Interrupt signal received")) {
            return Veredict::Canceled;
        }
        Veredict::Failure
    }

    fn interpret_source_result(
        &self,
        _source: &SourceRef,
        _kind: SourceOperationKind,
        _exit_code: i32,
        _output: &[String],
    ) -> Veredict {
        Veredict::Failure
    }

    fn stdin_unblock_patterns(&self) -> Vec<String> {
        vec![":: Proceed with installation?".into(), "[Y/n]".into()]
    }
}
