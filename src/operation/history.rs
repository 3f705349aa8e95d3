//! 操作历史：新记录在前的纯文本日志，超过行数上限时丢弃最旧的行

use anyhow::Result;
use chrono::Local;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

const SEPARATOR: &str = "--------------------------------------------------";

#[derive(Debug)]
pub struct OperationHistory {
    path: Option<PathBuf>,
    max_lines: usize,
    /// 文件不存在（或仅在内存中）时的内容
    memory: Mutex<String>,
}

impl OperationHistory {
    pub fn new(path: PathBuf, max_lines: usize) -> Self {
        Self {
            path: Some(path),
            max_lines,
            memory: Mutex::new(String::new()),
        }
    }

    pub fn in_memory(max_lines: usize) -> Self {
        Self {
            path: None,
            max_lines,
            memory: Mutex::new(String::new()),
        }
    }

    /// 把一次操作的完整输出插入到历史开头
    pub fn append(&self, title: &str, lines: &[String]) -> Result<()> {
        let mut memory = self.memory.lock().unwrap_or_else(|e| e.into_inner());
        let existing = match &self.path {
            Some(path) => fs::read_to_string(path).unwrap_or_default(),
            None => memory.clone(),
        };

        let mut entry = vec![
            format!("{} [{}]", title, Local::now().format("%Y-%m-%d %H:%M:%S")),
        ];
        entry.extend(lines.iter().cloned());
        entry.push(SEPARATOR.to_string());

        let combined: Vec<&str> = entry
            .iter()
            .map(String::as_str)
            .chain(existing.lines())
            .take(self.max_lines)
            .collect();
        let content = combined.join("\n");

        if let Some(path) = &self.path {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, &content)?;
        }
        *memory = content;
        Ok(())
    }

    pub fn read(&self) -> String {
        match &self.path {
            Some(path) => fs::read_to_string(path).unwrap_or_default(),
            None => self.memory.lock().unwrap_or_else(|e| e.into_inner()).clone(),
        }
    }
}
