use dashmap::DashMap;
use tracing::debug;

use super::runner::{Invocation, ProcessRunner};
use super::tools::ToolCandidate;

/// Version strings per tool, queried once per run.
///
/// A tool that answers none of its version queries is memoized as
/// unversioned so the queries are not repeated for every file.
#[derive(Debug, Default)]
pub struct VersionResolver {
    memo: DashMap<String, Option<String>>,
}

impl VersionResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(&self, candidate: &ToolCandidate, runner: &dyn ProcessRunner) -> Option<String> {
        let key = candidate.tool_key();
        if let Some(known) = self.memo.get(&key) {
            return known.clone();
        }

        let version = query(candidate, runner);
        if version.is_none() {
            debug!(tool = %key, "no version reported, labelling as unversioned");
        }
        self.memo.insert(key, version.clone());
        version
    }
}

fn query(candidate: &ToolCandidate, runner: &dyn ProcessRunner) -> Option<String> {
    for switches in candidate.family.version_switches() {
        let mut args = candidate.launcher_args.clone();
        args.extend(switches.iter().map(|s| s.to_string()));
        let invocation = Invocation::new(candidate.program.clone(), args);

        match runner.run(&invocation) {
            Ok(output) => {
                let version = normalize(&output.stdout);
                if !version.is_empty() {
                    debug!(command = %invocation, version = %version, "resolved tool version");
                    return Some(version);
                }
            }
            Err(err) => debug!(command = %invocation, error = %err, "version query failed"),
        }
    }
    None
}

fn normalize(raw: &str) -> String {
    raw.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::super::runner::ProcessOutput;
    use super::super::tools::ToolFamily;
    use super::*;
    use parking_lot::Mutex;
    use std::io;

    struct Scripted {
        calls: Mutex<Vec<String>>,
        answer: fn(&Invocation) -> io::Result<ProcessOutput>,
    }

    impl ProcessRunner for Scripted {
        fn run(&self, invocation: &Invocation) -> io::Result<ProcessOutput> {
            self.calls.lock().push(invocation.to_string());
            (self.answer)(invocation)
        }
    }

    #[test]
    fn first_non_empty_answer_wins_and_is_memoized() {
        let runner = Scripted {
            calls: Mutex::new(Vec::new()),
            answer: |inv| {
                let stdout = if inv.args.last().map(String::as_str) == Some("-v") {
                    "dotnet-ildasm\n  0.12.2 \n".to_string()
                } else {
                    String::new()
                };
                Ok(ProcessOutput {
                    code: Some(0),
                    stdout,
                    stderr: String::new(),
                })
            },
        };
        let candidate = ToolCandidate::new(ToolFamily::DotnetIldasm, "dotnet-ildasm");
        let resolver = VersionResolver::new();

        assert_eq!(
            resolver.resolve(&candidate, &runner).as_deref(),
            Some("dotnet-ildasm 0.12.2")
        );
        assert_eq!(
            resolver.resolve(&candidate, &runner).as_deref(),
            Some("dotnet-ildasm 0.12.2")
        );
        assert_eq!(
            *runner.calls.lock(),
            vec!["dotnet-ildasm --version", "dotnet-ildasm -v"]
        );
    }

    #[test]
    fn unresolvable_tool_is_memoized_as_unversioned() {
        let runner = Scripted {
            calls: Mutex::new(Vec::new()),
            answer: |_| Err(io::Error::new(io::ErrorKind::NotFound, "missing")),
        };
        let candidate = ToolCandidate::via_launcher(ToolFamily::DotnetIldasm, "dotnet", "ildasm");
        let resolver = VersionResolver::new();

        assert_eq!(resolver.resolve(&candidate, &runner), None);
        assert_eq!(resolver.resolve(&candidate, &runner), None);
        assert_eq!(runner.calls.lock().len(), 2);
        assert_eq!(runner.calls.lock()[0], "dotnet ildasm --version");
    }
}
