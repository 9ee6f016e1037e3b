use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// A fully resolved external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl Invocation {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            cwd: None,
        }
    }

    pub fn in_dir(mut self, cwd: Option<PathBuf>) -> Self {
        self.cwd = cwd;
        self
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Launches external processes. Blocks until the child exits.
pub trait ProcessRunner: Send + Sync {
    fn run(&self, invocation: &Invocation) -> io::Result<ProcessOutput>;
}

/// Runs commands with `std::process::Command`, capturing both streams.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> io::Result<ProcessOutput> {
        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &invocation.cwd {
            command.current_dir(cwd);
        }

        let output = command.output()?;
        Ok(ProcessOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_joins_program_and_args() {
        let inv = Invocation::new("dotnet", vec!["ildasm".into(), "A.dll".into()]);
        assert_eq!(inv.to_string(), "dotnet ildasm A.dll");
    }

    #[test]
    fn missing_program_is_a_launch_error() {
        let inv = Invocation::new("ildiff-no-such-tool-xyz", vec![]);
        assert!(SystemRunner.run(&inv).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn captures_stdout_and_exit_code() {
        let inv = Invocation::new("sh", vec!["-c".into(), "echo hi; exit 3".into()]);
        let out = SystemRunner.run(&inv).unwrap();
        assert_eq!(out.stdout.trim(), "hi");
        assert_eq!(out.code, Some(3));
        assert!(!out.success());
    }
}
