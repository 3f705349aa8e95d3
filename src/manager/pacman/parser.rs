//! pacman / paru / yay 输出解析函数

use crate::package::{Package, SourceRef};
use crate::process::clean_terminal_output;

/// pacman 系列的包名在所有仓库间唯一，统一挂到同一个源下，
/// 这样已安装列表（没有仓库信息）和搜索结果可以互相匹配
pub const SYNC_SOURCE: &str = "sync";

fn sync_source(manager: &str) -> SourceRef {
    SourceRef::new(manager, SYNC_SOURCE)
}

/// 解析 `pacman -Q` 输出：每行 `name version`
pub fn parse_installed(output: &str, manager: &str) -> Vec<Package> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let name = parts.next()?;
            let version = parts.next()?;
            Some(Package::new(name, name, version, sync_source(manager)))
        })
        .collect()
}

/// 解析 `checkupdates` / `pacman -Qu` 输出：`name old -> new [ignored]`
pub fn parse_updates(output: &str, manager: &str) -> Vec<Package> {
    output
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 4 || parts[2] != "->" {
                return None;
            }
            if parts.get(4).is_some_and(|p| p.contains("ignored")) {
                return None;
            }
            Some(
                Package::new(parts[0], parts[0], parts[1], sync_source(manager))
                    .with_new_version(parts[3]),
            )
        })
        .collect()
}

/// 解析 pacman -Ss 的搜索输出
///
/// ```text
/// extra/wget 1.24.5-1 [installed]
///     Network utility to retrieve files from the web
/// ```
pub fn parse_search_output(output: &str, manager: &str) -> Vec<Package> {
    let mut results = Vec::new();

    for line in output.lines() {
        if line.starts_with(' ') || line.starts_with('\t') {
            continue;
        }
        let cleaned = clean_terminal_output(line);
        let trimmed = cleaned.trim();

        if let Some(slash_pos) = trimmed.find('/') {
            let rest = &trimmed[slash_pos + 1..];
            let parts: Vec<&str> = rest.split_whitespace().collect();

            if let Some(&name) = parts.first() {
                let version = parts.get(1).unwrap_or(&"").to_string();
                results.push(Package::new(name, name, version, sync_source(manager)));
            }
        }
    }

    results
}
