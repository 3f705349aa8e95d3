//! 通过公开 API 走完 加载 → 更新 → 忽略 的完整流程

use anyhow::Result;
use pkgdeck::package::{ignored::ALL_VERSIONS, SourceOperationKind};
use pkgdeck::process::CommandLine;
use pkgdeck::{
    Config, Engine, InstallOptions, ManagerAdapter, OperationKind, OperationStatus, Package,
    PackageTag, SourceRef, Veredict,
};
use std::sync::Arc;

/// 固定包列表的包管理器，操作用 `sh -c` 模拟
struct ShellAdapter {
    installed: Vec<(&'static str, &'static str)>,
    updates: Vec<(&'static str, &'static str, &'static str)>,
}

impl ShellAdapter {
    fn package(id: &str, version: &str) -> Package {
        Package::new(id, id, version, SourceRef::new("shell", "core"))
    }
}

impl ManagerAdapter for ShellAdapter {
    fn name(&self) -> &str {
        "shell"
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn executable(&self) -> CommandLine {
        CommandLine::new("sh")
    }

    fn find_packages(&self, query: &str) -> Result<Vec<Package>> {
        Ok(self
            .installed
            .iter()
            .filter(|(id, _)| id.contains(query))
            .map(|(id, v)| Self::package(id, v))
            .collect())
    }

    fn installed_packages(&self) -> Result<Vec<Package>> {
        Ok(self.installed.iter().map(|(id, v)| Self::package(id, v)).collect())
    }

    fn available_updates(&self) -> Result<Vec<Package>> {
        Ok(self
            .updates
            .iter()
            .map(|(id, v, new)| Self::package(id, v).with_new_version(*new))
            .collect())
    }

    fn operation_arguments(
        &self,
        package: &Package,
        _options: &InstallOptions,
        kind: OperationKind,
    ) -> Vec<String> {
        vec!["-c".into(), format!("echo {} {}", kind.label(), package.id)]
    }

    fn source_arguments(&self, source: &SourceRef, _kind: SourceOperationKind) -> Vec<String> {
        vec!["-c".into(), format!("echo {}", source.name)]
    }

    fn interpret_result(
        &self,
        _package: &Package,
        _kind: OperationKind,
        exit_code: i32,
        _output: &[String],
    ) -> Veredict {
        if exit_code == 0 {
            Veredict::Success
        } else {
            Veredict::Failure
        }
    }
}

fn engine(dir: &std::path::Path) -> Engine {
    let config = Config {
        data_dir: dir.to_path_buf(),
        disable_auto_check_updates: true,
        maintain_successful_operations: true,
        ..Default::default()
    };
    let adapter = ShellAdapter {
        installed: vec![("wget", "1.0"), ("curl", "8.0"), ("vim", "9.0")],
        updates: vec![("wget", "1.0", "1.1"), ("curl", "8.0", "8.1")],
    };
    Engine::new(config, vec![Arc::new(adapter) as Arc<dyn ManagerAdapter>]).unwrap()
}

#[tokio::test]
async fn update_moves_package_out_of_upgradable() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());
    let catalog = engine.catalog();

    catalog.reload_all().await;
    assert_eq!(catalog.installed.count(), 3);
    assert_eq!(catalog.upgradable.count(), 2);

    let installed_wget = catalog.installed.get_package_for_id("wget", None).unwrap();
    assert_eq!(installed_wget.tag(), PackageTag::IsUpgradable);

    let update = catalog.upgradable.get_package_for_id("wget", None).unwrap();
    let op = engine
        .scheduler()
        .update(update, InstallOptions::default())
        .unwrap();
    assert_eq!(engine.scheduler().wait(op.id()).await.unwrap(), OperationStatus::Succeeded);

    assert!(op.output_text().contains(&"update wget".to_string()));
    assert_eq!(catalog.upgradable.count(), 1);
    assert_eq!(installed_wget.tag(), PackageTag::Default);
}

#[tokio::test]
async fn ignored_updates_survive_reload() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());
    let catalog = engine.catalog();
    catalog.reload_all().await;

    let curl = catalog.installed.get_package_for_id("curl", None).unwrap();
    catalog.ignore_update(&curl, ALL_VERSIONS).unwrap();
    assert_eq!(curl.tag(), PackageTag::Pinned);

    catalog.reload_all().await;
    assert!(catalog.upgradable.get_package_for_id("curl", None).is_none());
    assert!(catalog.skipped_updates().iter().any(|p| p.id == "curl"));
    let curl = catalog.installed.get_package_for_id("curl", None).unwrap();
    assert_eq!(curl.tag(), PackageTag::Pinned);

    // 忽略库写在数据目录中，新引擎实例也能读到
    let reopened = self::engine(dir.path());
    reopened.catalog().reload_all().await;
    assert!(reopened.catalog().upgradable.get_package_for_id("curl", None).is_none());
}

#[tokio::test]
async fn search_marks_installed_results() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());
    let catalog = engine.catalog();
    catalog.reload_all().await;

    catalog.search("vi").await;
    let vim = catalog.discover.get_package_for_id("vim", None).unwrap();
    assert_eq!(vim.tag(), PackageTag::AlreadyInstalled);

    catalog.search("").await;
    assert!(!catalog.discover.any());
}
