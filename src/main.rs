use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use pkgdeck::loader::bundle;
use pkgdeck::manager::pacman::PacmanAdapter;
use pkgdeck::{
    Config, Engine, InstallOptions, ManagerAdapter, OperationKind, OperationRef, OperationStatus,
    PackageLoader, PackageRef, SchedulerEvent,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "pkgdeck", version, about = "多包管理器前端")]
struct Cli {
    /// 配置文件路径（默认 ~/.config/pkgdeck/config.toml）
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// 以管理员身份执行操作
    #[arg(long, global = true)]
    admin: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 列出已安装的包
    Installed,
    /// 列出可用更新
    Updates,
    /// 搜索可安装的包
    Search { query: String },
    /// 安装包
    Install { ids: Vec<String> },
    /// 更新指定的包
    Update { ids: Vec<String> },
    /// 更新所有可升级的包
    UpdateAll,
    /// 卸载包
    Uninstall { ids: Vec<String> },
    /// 忽略某个包的更新（不指定版本则忽略所有版本）
    Ignore {
        id: String,
        #[arg(long)]
        version: Option<String>,
    },
    /// 取消忽略某个包的更新
    Unignore { id: String },
    /// 把已安装的包导出为包组文件
    Export { file: PathBuf },
    /// 从包组文件安装
    Import { file: PathBuf },
    /// 显示操作历史
    History,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load_or_default()?,
    };

    let adapter = PacmanAdapter::detect()?;
    let engine = Engine::new(config, vec![Arc::new(adapter) as Arc<dyn ManagerAdapter>])?;
    let options = InstallOptions {
        run_as_admin: cli.admin,
        ..Default::default()
    };

    let ok = tokio::select! {
        result = run(&engine, cli.command, options) => result?,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\n收到中断信号，正在取消操作...");
            engine.shutdown().await;
            false
        }
    };
    engine.shutdown().await;

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

/// 执行子命令；有操作失败时返回 false
async fn run(engine: &Engine, command: Command, options: InstallOptions) -> Result<bool> {
    let catalog = engine.catalog();
    match command {
        Command::Installed => {
            catalog.installed.reload().await;
            print_packages(&catalog.installed);
        }
        Command::Updates => {
            catalog.reload_all().await;
            print_packages(&catalog.upgradable);
            let skipped = catalog.skipped_updates();
            if !skipped.is_empty() {
                println!("\n已忽略 {} 个更新:", skipped.len());
                for p in skipped {
                    println!("  {} {}", p.id, p.new_version.as_deref().unwrap_or("?"));
                }
            }
        }
        Command::Search { query } => {
            catalog.search(&query).await;
            print_packages(&catalog.discover);
        }
        Command::Install { ids } => {
            let mut packages = Vec::new();
            for id in &ids {
                catalog.search(id).await;
                packages.push(find(&catalog.discover, id)?);
            }
            return submit(engine, packages, OperationKind::Install, &options).await;
        }
        Command::Update { ids } => {
            catalog.reload_all().await;
            let packages = ids
                .iter()
                .map(|id| find(&catalog.upgradable, id))
                .collect::<Result<Vec<_>>>()?;
            return submit(engine, packages, OperationKind::Update, &options).await;
        }
        Command::UpdateAll => {
            catalog.reload_all().await;
            let packages = catalog.upgradable.packages();
            if packages.is_empty() {
                println!("所有包都是最新的");
                return Ok(true);
            }
            return submit(engine, packages, OperationKind::Update, &options).await;
        }
        Command::Uninstall { ids } => {
            catalog.installed.reload().await;
            let packages = ids
                .iter()
                .map(|id| find(&catalog.installed, id))
                .collect::<Result<Vec<_>>>()?;
            return submit(engine, packages, OperationKind::Uninstall, &options).await;
        }
        Command::Ignore { id, version } => {
            catalog.installed.reload().await;
            let package = find(&catalog.installed, &id)?;
            let version = version.as_deref().unwrap_or(pkgdeck::package::ignored::ALL_VERSIONS);
            catalog.ignore_update(&package, version)?;
            println!("已忽略 {} 的更新 ({})", package.id, version);
        }
        Command::Unignore { id } => {
            catalog.installed.reload().await;
            let package = find(&catalog.installed, &id)?;
            catalog.unignore_update(&package)?;
            println!("已取消忽略 {}", package.id);
        }
        Command::Export { file } => {
            catalog.installed.reload().await;
            let raw = bundle::create_bundle(&catalog.installed.packages(), engine.registry())?;
            std::fs::write(&file, raw).with_context(|| format!("无法写入 {}", file.display()))?;
            println!("已导出 {} 个包到 {}", catalog.installed.count(), file.display());
        }
        Command::Import { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("无法读取 {}", file.display()))?;
            let imported = bundle::import_bundle(&raw, engine.registry(), &catalog.bundle)?;
            for entry in &imported.incompatible {
                println!("跳过不兼容的条目: {} ({})", entry.id, entry.source);
            }
            return submit(engine, imported.added, OperationKind::Install, &options).await;
        }
        Command::History => {
            println!("{}", engine.scheduler().history().read());
        }
    }
    Ok(true)
}

fn find(loader: &PackageLoader, id: &str) -> Result<PackageRef> {
    match loader.get_package_for_id(id, None) {
        Some(package) => Ok(package),
        None => bail!("在 {} 中找不到包 {}", loader.name(), id),
    }
}

fn print_packages(loader: &PackageLoader) {
    let mut packages = loader.packages();
    packages.sort_by(|a, b| a.id.cmp(&b.id));
    for p in &packages {
        match &p.new_version {
            Some(new_version) => println!("{} {} -> {} [{}]", p.id, p.version, new_version, p.source.name),
            None => println!("{} {} [{}]", p.id, p.version, p.source.name),
        }
    }
    println!("共 {} 个包", packages.len());
}

/// 提交一批操作并把输出实时打印到终端，直到全部结束
async fn submit(
    engine: &Engine,
    packages: Vec<PackageRef>,
    kind: OperationKind,
    options: &InstallOptions,
) -> Result<bool> {
    let scheduler = engine.scheduler();
    let mut events = scheduler.subscribe();
    let ops = packages
        .into_iter()
        .map(|p| scheduler.submit(p, kind, options.clone()))
        .collect::<Result<Vec<OperationRef>>>()?;

    let mut printed: HashMap<u64, usize> = HashMap::new();
    let mut remaining = ops.len();
    while remaining > 0 {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                log::debug!("跳过了 {} 条事件", n);
                remaining = ops.iter().filter(|op| !op.status().is_terminal()).count();
                continue;
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        };
        match event {
            SchedulerEvent::OutputChanged { id } => {
                if let Some(op) = ops.iter().find(|op| op.id() == id) {
                    let lines = op.output_text();
                    let seen = printed.entry(id).or_insert(0);
                    // 重试会清空输出
                    if lines.len() < *seen {
                        *seen = 0;
                    }
                    for line in &lines[*seen..] {
                        println!("[{}] {}", op.metadata().title, line);
                    }
                    *seen = lines.len();
                }
            }
            SchedulerEvent::StatusChanged { id, status } if status.is_terminal() => {
                if let Some(op) = ops.iter().find(|op| op.id() == id) {
                    println!("==> {}", op.status_text());
                    remaining = remaining.saturating_sub(1);
                }
            }
            _ => {}
        }
    }

    Ok(ops.iter().all(|op| op.status() == OperationStatus::Succeeded))
}
