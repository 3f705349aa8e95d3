//! 提权凭证缓存
//!
//! 一批需要提权的操作开始前执行一次 `sudo -v`，之后的命令复用缓存的凭证；
//! 队列清空时执行 `sudo -k` 主动释放。

use crate::config::Config;
use crate::process::CommandLine;
use anyhow::{bail, Result};
use tokio::sync::Mutex;

#[derive(Debug)]
pub struct ElevationCache {
    elevator: String,
    cache_args: Vec<String>,
    release_args: Vec<String>,
    enabled: bool,
    cached: Mutex<bool>,
}

impl ElevationCache {
    pub fn from_config(config: &Config) -> Self {
        Self {
            elevator: config.elevator.clone(),
            cache_args: config.elevation_cache_args.clone(),
            release_args: config.elevation_release_args.clone(),
            enabled: config.caches_admin_rights(),
            cached: Mutex::new(false),
        }
    }

    pub fn elevator(&self) -> &str {
        &self.elevator
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub async fn is_cached(&self) -> bool {
        *self.cached.lock().await
    }

    /// 确保凭证已缓存；并发调用只会触发一次提权提示
    pub async fn ensure_cached(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let mut cached = self.cached.lock().await;
        if *cached {
            return Ok(());
        }
        log::info!("缓存提权凭证: {} {}", self.elevator, self.cache_args.join(" "));
        self.run(&self.cache_args).await?;
        *cached = true;
        Ok(())
    }

    /// 释放缓存的凭证；未缓存时什么也不做
    pub async fn release(&self) {
        let mut cached = self.cached.lock().await;
        if !*cached {
            return;
        }
        log::info!("释放提权凭证");
        if let Err(e) = self.run(&self.release_args).await {
            log::warn!("释放提权凭证失败: {:#}", e);
        }
        *cached = false;
    }

    async fn run(&self, args: &[String]) -> Result<()> {
        let command = CommandLine::new(&self.elevator).args(args.iter().cloned());
        let display = command.to_string();
        // 继承终端的 stdin/stdout，让 sudo 能够提示输入密码
        let output = tokio::task::spawn_blocking(move || {
            duct::cmd(command.program, command.args).unchecked().run()
        })
        .await??;
        if !output.status.success() {
            bail!("{} 执行失败 ({})", display, output.status);
        }
        Ok(())
    }
}
