//! 子进程执行：命令行构造、流式输出与取消

pub mod streaming;

pub use streaming::{run_process, CancelHandle, ProcessOutcome, StreamLine};

use std::fmt;

/// 可执行文件 + 参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// 通过提权程序（sudo 等）调用当前命令
    pub fn elevated_with(self, elevator: &str) -> Self {
        let mut args = Vec::with_capacity(self.args.len() + 1);
        args.push(self.program);
        args.extend(self.args);
        Self {
            program: elevator.to_string(),
            args,
        }
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.contains(' ') {
                write!(f, " \"{}\"", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// 清理终端输出中的 ANSI 转义序列和特殊字符
pub fn clean_terminal_output(input: &str) -> String {
    let mut result = String::new();
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\x1b' => {
                if chars.peek() == Some(&'[') {
                    chars.next();
                    while let Some(&next) = chars.peek() {
                        chars.next();
                        if next.is_ascii_alphabetic() {
                            break;
                        }
                    }
                }
            }
            c if c.is_control() && c != '\t' => {}
            _ => result.push(c),
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elevation_prefixes_program() {
        let cmd = CommandLine::new("/usr/bin/pacman")
            .args(["-S", "wget"])
            .elevated_with("sudo");
        assert_eq!(cmd.program, "sudo");
        assert_eq!(cmd.args, vec!["/usr/bin/pacman", "-S", "wget"]);
        assert_eq!(cmd.to_string(), "sudo /usr/bin/pacman -S wget");
    }

    #[test]
    fn strips_ansi_sequences() {
        assert_eq!(clean_terminal_output("\x1b[1;32m::\x1b[0m Synchronizing"), ":: Synchronizing");
        assert_eq!(clean_terminal_output("a\x07b"), "ab");
    }
}
