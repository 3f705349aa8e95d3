use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 允许所有操作并行执行（跳过队列）
    pub allow_parallel_installs: bool,
    /// 单独允许并行执行的包管理器
    pub parallel_managers: Vec<String>,
    /// 所有操作都需要提权的包管理器
    pub always_elevate: Vec<String>,
    pub cache_admin_rights: bool,
    /// 一批操作只弹一次提权，队列清空后主动释放凭证
    pub cache_admin_rights_for_batches: bool,
    pub elevator: String,
    pub elevation_cache_args: Vec<String>,
    pub elevation_release_args: Vec<String>,
    pub disable_auto_check_updates: bool,
    pub updates_check_interval_secs: u64,
    pub maintain_successful_operations: bool,
    pub close_delay_secs: u64,
    pub history_max_lines: usize,
    pub queue_poll_interval_ms: u64,
    pub disabled_managers: Vec<String>,
    pub data_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pkgdeck");
        Self {
            allow_parallel_installs: false,
            parallel_managers: Vec::new(),
            always_elevate: Vec::new(),
            cache_admin_rights: false,
            cache_admin_rights_for_batches: true,
            elevator: "sudo".to_string(),
            elevation_cache_args: vec!["-v".to_string()],
            elevation_release_args: vec!["-k".to_string()],
            disable_auto_check_updates: false,
            updates_check_interval_secs: 3600,
            maintain_successful_operations: false,
            close_delay_secs: 5,
            history_max_lines: 1000,
            queue_poll_interval_ms: 100,
            disabled_managers: Vec::new(),
            data_dir,
        }
    }
}

impl Config {
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pkgdeck/config.toml")
    }

    pub fn load_or_default() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    pub fn ensure_data_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }

    pub fn history_path(&self) -> PathBuf {
        self.data_dir.join("operation_history.log")
    }

    pub fn ignored_updates_path(&self) -> PathBuf {
        self.data_dir.join("ignored_updates.json")
    }

    /// 该包管理器的操作是否可以绕过串行队列
    pub fn parallel_allowed_for(&self, manager: &str) -> bool {
        self.allow_parallel_installs || self.parallel_managers.iter().any(|m| m == manager)
    }

    pub fn always_elevate_for(&self, manager: &str) -> bool {
        self.always_elevate.iter().any(|m| m == manager)
    }

    pub fn caches_admin_rights(&self) -> bool {
        self.cache_admin_rights || self.cache_admin_rights_for_batches
    }

    pub fn is_manager_disabled(&self, manager: &str) -> bool {
        self.disabled_managers.iter().any(|m| m == manager)
    }

    /// 自动检查更新的间隔；被禁用时返回 None
    pub fn updates_check_interval(&self) -> Option<Duration> {
        if self.disable_auto_check_updates {
            None
        } else {
            Some(Duration::from_secs(self.updates_check_interval_secs.max(1)))
        }
    }

    pub fn close_delay(&self) -> Duration {
        Duration::from_secs(self.close_delay_secs)
    }

    pub fn queue_poll_interval(&self) -> Duration {
        Duration::from_millis(self.queue_poll_interval_ms.max(10))
    }
}
