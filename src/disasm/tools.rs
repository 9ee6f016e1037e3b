// Disassembler candidates and the argument shapes tried against each.
//
// Every attempt is an `AttemptDescriptor`; a tool family turns one into a
// concrete `Invocation` plus the label that identifies its output in the
// IL cache. New families only need an argument template and a version query.

use std::path::{Path, PathBuf};

use super::runner::Invocation;

pub const PRIMARY_TOOL: &str = "dotnet-ildasm";
pub const ILSPY_TOOL: &str = "ilspycmd";
const DOTNET_LAUNCHER: &str = "dotnet";
const LAUNCHER_SUBCOMMAND: &str = "ildasm";

/// File name given to the ASCII scratch copy (extension is kept).
pub const ASCII_COPY_STEM: &str = "ildiff_input";

const COPY_PLACEHOLDER: &str = "<ascii-copy>";
const OUTPUT_PLACEHOLDER: &str = "<output-dir>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolFamily {
    /// `dotnet-ildasm <file>`, IL on stdout.
    DotnetIldasm,
    /// `ilspycmd -il -o <dir> <file>`, IL written to `<dir>/*.il`.
    IlSpy,
}

#[derive(Debug, Clone, Copy)]
enum ArgTemplate {
    Lit(&'static str),
    Target,
    OutputDir,
}

const ILDASM_ARGS: &[ArgTemplate] = &[ArgTemplate::Target];
const ILSPY_ARGS: &[ArgTemplate] = &[
    ArgTemplate::Lit("-il"),
    ArgTemplate::Lit("-o"),
    ArgTemplate::OutputDir,
    ArgTemplate::Target,
];

impl ToolFamily {
    fn template(self) -> &'static [ArgTemplate] {
        match self {
            ToolFamily::DotnetIldasm => ILDASM_ARGS,
            ToolFamily::IlSpy => ILSPY_ARGS,
        }
    }

    pub fn writes_output_file(self) -> bool {
        self.template()
            .iter()
            .any(|a| matches!(a, ArgTemplate::OutputDir))
    }

    pub fn version_switches(self) -> &'static [&'static [&'static str]] {
        match self {
            ToolFamily::DotnetIldasm => &[&["--version"], &["-v"]],
            ToolFamily::IlSpy => &[&["--version"]],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCandidate {
    pub family: ToolFamily,
    pub program: String,
    /// Subcommand prefix when the tool runs through a launcher (`dotnet ildasm`).
    pub launcher_args: Vec<String>,
}

impl ToolCandidate {
    pub fn new(family: ToolFamily, program: impl Into<String>) -> Self {
        Self {
            family,
            program: program.into(),
            launcher_args: Vec::new(),
        }
    }

    pub fn via_launcher(family: ToolFamily, launcher: &str, subcommand: &str) -> Self {
        Self {
            family,
            program: launcher.to_string(),
            launcher_args: vec![subcommand.to_string()],
        }
    }

    /// Identity used for failure tracking and version memoization.
    pub fn tool_key(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.launcher_args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn file_name(target: &Path) -> String {
        target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Concrete command for one attempt.
    pub fn invocation(
        &self,
        attempt: AttemptDescriptor,
        target: &Path,
        output_dir: Option<&Path>,
    ) -> Invocation {
        let mut args = self.launcher_args.clone();
        for arg in self.family.template() {
            args.push(match arg {
                ArgTemplate::Lit(s) => s.to_string(),
                ArgTemplate::Target => match attempt.form {
                    TargetForm::FileName => Self::file_name(target),
                    TargetForm::AbsolutePath => target.display().to_string(),
                },
                ArgTemplate::OutputDir => output_dir
                    .map(|d| d.display().to_string())
                    .unwrap_or_default(),
            });
        }

        let cwd = match attempt.form {
            TargetForm::FileName => target.parent().map(Path::to_path_buf),
            TargetForm::AbsolutePath => None,
        };
        Invocation::new(self.program.clone(), args).in_dir(cwd)
    }

    /// Cache label for one attempt; scratch locations become placeholders.
    pub fn label(&self, attempt: AttemptDescriptor, target: &Path, version: Option<&str>) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.launcher_args.iter().cloned());
        for arg in self.family.template() {
            parts.push(match arg {
                ArgTemplate::Lit(s) => s.to_string(),
                ArgTemplate::Target => match (attempt.form, attempt.ascii_copy) {
                    (TargetForm::FileName, _) => Self::file_name(target),
                    (TargetForm::AbsolutePath, true) => {
                        format!("{COPY_PLACEHOLDER}/{}", Self::file_name(target))
                    }
                    (TargetForm::AbsolutePath, false) => target.display().to_string(),
                },
                ArgTemplate::OutputDir => OUTPUT_PLACEHOLDER.to_string(),
            });
        }
        versioned_label(&parts.join(" "), version)
    }
}

pub fn versioned_label(base: &str, version: Option<&str>) -> String {
    match version {
        Some(v) => format!("{base} (version: {v})"),
        None => base.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetForm {
    FileName,
    AbsolutePath,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptDescriptor {
    pub form: TargetForm,
    /// Run against the ASCII-named scratch copy instead of the original.
    pub ascii_copy: bool,
}

impl AttemptDescriptor {
    pub const fn direct(form: TargetForm) -> Self {
        Self {
            form,
            ascii_copy: false,
        }
    }
}

/// Ordered attempts for one candidate.
pub fn attempt_descriptors(with_ascii_copy: bool) -> Vec<AttemptDescriptor> {
    let mut attempts = vec![
        AttemptDescriptor::direct(TargetForm::FileName),
        AttemptDescriptor::direct(TargetForm::AbsolutePath),
    ];
    if with_ascii_copy {
        for form in [TargetForm::FileName, TargetForm::AbsolutePath] {
            attempts.push(AttemptDescriptor {
                form,
                ascii_copy: true,
            });
        }
    }
    attempts
}

/// The usual candidate order: primary tool, primary tool through the
/// `dotnet` launcher, then ILSpy, each followed by its per-user install.
pub fn default_candidates(home: Option<&Path>) -> Vec<ToolCandidate> {
    let user_tool = |name: &str| -> Option<PathBuf> {
        let path = home?.join(".dotnet").join("tools").join(exe_name(name));
        path.is_file().then_some(path)
    };

    let mut candidates = vec![
        ToolCandidate::new(ToolFamily::DotnetIldasm, PRIMARY_TOOL),
        ToolCandidate::via_launcher(ToolFamily::DotnetIldasm, DOTNET_LAUNCHER, LAUNCHER_SUBCOMMAND),
    ];
    if let Some(path) = user_tool(PRIMARY_TOOL) {
        candidates.push(ToolCandidate::new(
            ToolFamily::DotnetIldasm,
            path.display().to_string(),
        ));
    }
    candidates.push(ToolCandidate::new(ToolFamily::IlSpy, ILSPY_TOOL));
    if let Some(path) = user_tool(ILSPY_TOOL) {
        candidates.push(ToolCandidate::new(ToolFamily::IlSpy, path.display().to_string()));
    }
    candidates
}

pub fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}

fn exe_name(name: &str) -> String {
    if cfg!(windows) {
        format!("{name}.exe")
    } else {
        name.to_string()
    }
}
