// Disassembler orchestration.
//
// `Disassembler::disassemble` walks the candidate tools in priority order
// and, per tool, the attempt descriptors from `tools::attempt_descriptors`.
// Each attempt first consults the IL cache under its version-qualified label
// and only launches a process on a miss. Tools that keep failing are skipped
// for a cool-down period via the shared `ToolContext`.

pub mod failures;
pub mod prefetch;
pub mod runner;
pub mod tools;
pub mod version;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::cache::IlCache;
use crate::config::Config;
use crate::error::{DisassembleError, INSTALL_GUIDANCE};

pub use failures::FailureTracker;
pub use prefetch::Prefetcher;
pub use runner::{Invocation, ProcessOutput, ProcessRunner, SystemRunner};
pub use tools::{
    attempt_descriptors, default_candidates, AttemptDescriptor, TargetForm, ToolCandidate,
    ToolFamily, PRIMARY_TOOL,
};
pub use version::VersionResolver;

/// Failure and version state shared by the orchestrator and the prefetcher.
#[derive(Debug)]
pub struct ToolContext {
    pub failures: FailureTracker,
    pub versions: VersionResolver,
}

impl ToolContext {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failures: FailureTracker::new(failure_threshold, cooldown),
            versions: VersionResolver::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.disassembler_failure_threshold, config.cooldown())
    }
}

/// IL text of one file and the label of the tool invocation that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disassembly {
    pub il_text: String,
    pub tool_label: String,
}

pub struct Disassembler {
    candidates: Vec<ToolCandidate>,
    cache: Option<Arc<IlCache>>,
    context: Arc<ToolContext>,
    runner: Arc<dyn ProcessRunner>,
}

impl Disassembler {
    pub fn new(
        candidates: Vec<ToolCandidate>,
        cache: Option<Arc<IlCache>>,
        context: Arc<ToolContext>,
        runner: Arc<dyn ProcessRunner>,
    ) -> Self {
        Self {
            candidates,
            cache,
            context,
            runner,
        }
    }

    pub fn context(&self) -> &Arc<ToolContext> {
        &self.context
    }

    fn primary_tool(&self) -> String {
        self.candidates
            .first()
            .map_or_else(|| PRIMARY_TOOL.to_string(), ToolCandidate::tool_key)
    }

    /// Disassemble `path`, trying every candidate until one succeeds.
    pub fn disassemble(&self, path: &Path) -> Result<Disassembly, DisassembleError> {
        let target = std::path::absolute(path).map_err(|source| DisassembleError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut last_error: Option<DisassembleError> = None;

        let ascii_copy = if target.to_string_lossy().is_ascii() {
            None
        } else {
            match AsciiCopy::create(&target) {
                Ok(copy) => Some(copy),
                Err(err) => {
                    warn!(path = %target.display(), error = %err, "cannot create ASCII copy");
                    last_error = Some(err);
                    None
                }
            }
        };

        for candidate in &self.candidates {
            let tool = candidate.tool_key();
            if self.context.failures.is_blacklisted(&tool) {
                debug!(tool = %tool, "skipping blacklisted disassembler");
                continue;
            }
            let version = self.context.versions.resolve(candidate, self.runner.as_ref());

            for attempt in attempt_descriptors(ascii_copy.is_some()) {
                let subject = match (&ascii_copy, attempt.ascii_copy) {
                    (Some(copy), true) => copy.path(),
                    _ => target.as_path(),
                };

                match self.try_attempt(candidate, attempt, &target, subject, version.as_deref()) {
                    Ok(done) => return Ok(done),
                    Err(err) => {
                        debug!(tool = %tool, error = %err, "disassembly attempt failed");
                        last_error = Some(err);
                    }
                }
            }
        }

        Err(DisassembleError::NoDisassembler {
            path: target,
            tool: self.primary_tool(),
            guidance: INSTALL_GUIDANCE,
            source: last_error.map(Box::new),
        })
    }

    fn try_attempt(
        &self,
        candidate: &ToolCandidate,
        attempt: AttemptDescriptor,
        original: &Path,
        subject: &Path,
        version: Option<&str>,
    ) -> Result<Disassembly, DisassembleError> {
        let label = candidate.label(attempt, subject, version);

        if let Some(cache) = &self.cache {
            if let Some(il_text) = cache.try_get(original, &label) {
                debug!(path = %original.display(), label = %label, "IL cache hit");
                return Ok(Disassembly {
                    il_text,
                    tool_label: label,
                });
            }
        }

        let tool = candidate.tool_key();
        match self.launch(candidate, attempt, subject) {
            Ok(il_text) => {
                self.context.failures.record_success(&tool);
                if let Some(cache) = &self.cache {
                    cache.set(original, &label, &il_text);
                }
                info!(path = %original.display(), label = %label, "disassembled");
                Ok(Disassembly {
                    il_text,
                    tool_label: label,
                })
            }
            Err(err) => {
                self.context.failures.record_failure(&tool);
                Err(err)
            }
        }
    }

    fn launch(
        &self,
        candidate: &ToolCandidate,
        attempt: AttemptDescriptor,
        subject: &Path,
    ) -> Result<String, DisassembleError> {
        let output_dir = if candidate.family.writes_output_file() {
            Some(scratch_dir("ildiff-out-", subject)?)
        } else {
            None
        };

        let invocation =
            candidate.invocation(attempt, subject, output_dir.as_ref().map(TempDir::path));
        let command = invocation.to_string();
        debug!(command = %command, "launching disassembler");

        let output = self
            .runner
            .run(&invocation)
            .map_err(|source| DisassembleError::Launch {
                command: command.clone(),
                source,
            })?;
        if !output.success() {
            return Err(DisassembleError::NonZeroExit {
                command,
                code: output.code,
                stderr: output.stderr.trim().to_string(),
            });
        }

        let Some(dir) = &output_dir else {
            return Ok(output.stdout);
        };
        read_il_output(dir.path())
            .map_err(|source| DisassembleError::Io {
                path: dir.path().to_path_buf(),
                source,
            })?
            .ok_or(DisassembleError::MissingOutput { command })
    }
}

/// First `.il` file written into `dir`, if any.
fn read_il_output(dir: &Path) -> std::io::Result<Option<String>> {
    let mut produced: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("il"))
        .collect();
    produced.sort();
    match produced.first() {
        Some(path) => fs::read_to_string(path).map(Some),
        None => Ok(None),
    }
}

fn scratch_dir(prefix: &str, subject: &Path) -> Result<TempDir, DisassembleError> {
    tempfile::Builder::new()
        .prefix(prefix)
        .tempdir()
        .map_err(|source| DisassembleError::Io {
            path: subject.to_path_buf(),
            source,
        })
}

/// ASCII-named copy of a file in its own temporary directory; removed on drop.
struct AsciiCopy {
    _dir: TempDir,
    path: PathBuf,
}

impl AsciiCopy {
    fn create(original: &Path) -> Result<Self, DisassembleError> {
        let dir = scratch_dir("ildiff-src-", original)?;
        let name = match original.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.is_ascii() => format!("{}.{ext}", tools::ASCII_COPY_STEM),
            _ => tools::ASCII_COPY_STEM.to_string(),
        };
        let path = dir.path().join(name);
        fs::copy(original, &path).map_err(|source| DisassembleError::Io {
            path: original.to_path_buf(),
            source,
        })?;
        Ok(Self { _dir: dir, path })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;
    use std::io;

    type Behaviour = dyn Fn(&Invocation) -> io::Result<ProcessOutput> + Send + Sync;

    /// Records every invocation; version queries answer "1.0".
    pub struct FakeRunner {
        pub calls: Mutex<Vec<Invocation>>,
        behaviour: Box<Behaviour>,
    }

    impl FakeRunner {
        pub fn new(
            behaviour: impl Fn(&Invocation) -> io::Result<ProcessOutput> + Send + Sync + 'static,
        ) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                behaviour: Box::new(behaviour),
            }
        }

        pub fn disassembly_calls(&self) -> Vec<Invocation> {
            self.calls
                .lock()
                .iter()
                .filter(|c| !is_version_query(c))
                .cloned()
                .collect()
        }
    }

    pub fn is_version_query(inv: &Invocation) -> bool {
        inv.args
            .last()
            .is_some_and(|a| a == "--version" || a == "-v")
    }

    pub fn ok(stdout: &str) -> io::Result<ProcessOutput> {
        Ok(ProcessOutput {
            code: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
        })
    }

    pub fn exit(code: i32) -> io::Result<ProcessOutput> {
        Ok(ProcessOutput {
            code: Some(code),
            stdout: String::new(),
            stderr: "failed".to_string(),
        })
    }

    impl ProcessRunner for FakeRunner {
        fn run(&self, invocation: &Invocation) -> io::Result<ProcessOutput> {
            self.calls.lock().push(invocation.clone());
            if is_version_query(invocation) {
                return ok("1.0\n");
            }
            (self.behaviour)(invocation)
        }
    }
}
