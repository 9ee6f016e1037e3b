// Error types for the IL comparison core.
//
// Only `DisassembleError::NoDisassembler` is meant to escape the core; every
// other variant is either logged and absorbed or carried as the cause of it.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Installation hint attached to the terminal disassembly failure.
pub const INSTALL_GUIDANCE: &str = "Install it with `dotnet tool install --global dotnet-ildasm` \
(or `dotnet tool install --global ilspycmd` as a fallback) and make sure \
~/.dotnet/tools is on PATH.";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("worker count must be positive, got {0}")]
    InvalidWorkerCount(usize),

    #[error("failed to build worker pool: {0}")]
    Pool(String),
}

#[derive(Debug, Error)]
pub enum DisassembleError {
    #[error("failed to launch `{command}`: {source}")]
    Launch {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("`{command}` exited with code {code:?}: {stderr}")]
    NonZeroExit {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("`{command}` succeeded but wrote no .il file")]
    MissingOutput { command: String },

    #[error("I/O error while preparing disassembly of {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no disassembler could process {path:?}; `{tool}` is required. {guidance}")]
    NoDisassembler {
        path: PathBuf,
        tool: String,
        guidance: &'static str,
        #[source]
        source: Option<Box<DisassembleError>>,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn no_disassembler_names_tool_and_wraps_cause() {
        let cause = DisassembleError::NonZeroExit {
            command: "dotnet-ildasm A.dll".into(),
            code: Some(1),
            stderr: "boom".into(),
        };
        let err = DisassembleError::NoDisassembler {
            path: PathBuf::from("A.dll"),
            tool: "dotnet-ildasm".into(),
            guidance: INSTALL_GUIDANCE,
            source: Some(Box::new(cause)),
        };

        let msg = err.to_string();
        assert!(msg.contains("dotnet-ildasm"));
        assert!(msg.contains("dotnet tool install"));
        let source = err.source().expect("cause is kept");
        assert!(source.to_string().contains("boom"));
    }
}
