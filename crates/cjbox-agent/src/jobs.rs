//! One-shot jobs: format and run.
//!
//! Tool failures are data: every stage's output and exit code end up in the
//! result, and a stage runs only when the stage before it succeeded.

use crate::error::{Result, SpawnError};
use crate::exec::{Invocation, Invoke};
use crate::toolchain::{arg, ToolchainConfig};
use cjbox_protocol::{FormatResult, RunResult};
use serde::Deserialize;
use std::fmt;
use tracing::{debug, info, warn};

/// Exit code reported when a tool could not be run at all.
const SPAWN_FAILED_CODE: i32 = -1;

/// Dependency scan report printed by `cjc --scan-dependency`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyReport {
    /// Scanned package.
    #[serde(default)]
    pub package: String,
    /// Whether the package defines macros.
    #[serde(default)]
    pub is_macro: bool,
    /// Access level of the package.
    #[serde(default)]
    pub access_level: String,
    /// Imported packages.
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
}

/// One imported package.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
    /// Package name, e.g. `stdx.encoding.json`.
    pub package: String,
    /// Whether the package ships with the standard library.
    #[serde(default)]
    pub is_std: bool,
    /// Import sites.
    #[serde(default)]
    pub imports: Vec<Import>,
}

/// Where a package is imported.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Import {
    /// Importing file.
    #[serde(default)]
    pub file: String,
    /// Start of the import declaration.
    #[serde(default)]
    pub begin: SourcePosition,
    /// End of the import declaration.
    #[serde(default)]
    pub end: SourcePosition,
}

/// Line and column in a scan report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct SourcePosition {
    /// Line number.
    #[serde(default)]
    pub line: u32,
    /// Column number.
    #[serde(default)]
    pub column: u32,
}

impl fmt::Display for Import {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}-{}:{}",
            self.file, self.begin.line, self.begin.column, self.end.line, self.end.column
        )
    }
}

impl DependencyReport {
    /// `-l` flags for every package outside the standard library, in report order.
    pub fn link_flags(&self) -> Vec<String> {
        self.dependencies
            .iter()
            .filter(|dep| !dep.is_std)
            .map(|dep| format!("-l{}", dep.package))
            .collect()
    }
}

/// Format `source` with the formatter, in place on a scratch file.
///
/// The file is read back whatever the formatter's exit code.
pub async fn format(tools: &ToolchainConfig, source: &str) -> Result<FormatResult> {
    let scratch = tempfile::Builder::new()
        .prefix("playground.")
        .suffix(".cj")
        .tempfile()?;
    let path = scratch.path().to_path_buf();
    tokio::fs::write(&path, source).await?;

    let formatter =
        Invoke::new(&tools.cjfmt).args(["-f".to_string(), arg(&path), "-o".to_string(), arg(&path)]);
    let (formatter_output, formatter_code) = match formatter.run().await {
        Ok(Invocation { outcome, output }) => (output, outcome.code()),
        Err(e) => {
            warn!(error = %e, "formatter did not run");
            (e.to_string(), SPAWN_FAILED_CODE)
        }
    };

    let formatted = String::from_utf8_lossy(&tokio::fs::read(&path).await?).into_owned();
    info!(code = formatter_code, changed = formatted != source, "format finished");
    Ok(FormatResult {
        formatted,
        formatter_output,
        formatter_code,
    })
}

/// Compile `source` and run the program when compilation succeeds.
pub async fn run(tools: &ToolchainConfig, source: &str) -> Result<RunResult> {
    let src = tools.src_dir();
    tokio::fs::create_dir_all(&src).await?;
    tokio::fs::write(tools.main_source(), source).await?;

    let mut link_flags = Vec::new();
    if source.contains("stdx") {
        let scan = Invoke::new(&tools.cjc)
            .args(["--scan-dependency".to_string(), "--package".to_string(), arg(&src)])
            .current_dir(&tools.project_dir);
        let scanned = match scan.run().await {
            Ok(inv) => inv,
            Err(e) => return Ok(spawn_failed(&scan, &e)),
        };
        if !scanned.outcome.success() {
            return Ok(stage_failed(&scan, &scanned));
        }
        let report = match serde_json::from_str::<DependencyReport>(&scanned.output) {
            Ok(report) => report,
            Err(e) => {
                return Ok(failed_stage(
                    &scan,
                    &e.to_string(),
                    &scanned.output,
                    scanned.outcome.code(),
                ))
            }
        };
        debug!(
            package = %report.package,
            is_macro = report.is_macro,
            access_level = %report.access_level,
            "dependency scan finished"
        );
        for dep in report.dependencies.iter().filter(|dep| !dep.is_std) {
            for site in &dep.imports {
                debug!(package = %dep.package, site = %site, "extra library imported");
            }
        }
        link_flags = report.link_flags();
    }

    let compile = Invoke::new(&tools.cjc)
        .args(compile_args(tools, &link_flags))
        .current_dir(&tools.project_dir);
    let compiled = match compile.run().await {
        Ok(inv) if inv.outcome.success() => inv,
        Ok(inv) => {
            info!(code = inv.outcome.code(), "compilation failed");
            return Ok(stage_failed(&compile, &inv));
        }
        Err(e) => return Ok(spawn_failed(&compile, &e)),
    };

    let program = Invoke::new(tools.binary())
        .current_dir(&tools.project_dir)
        .timeout(tools.run_timeout);
    let (bin_output, bin_code) = match program.run().await {
        Ok(Invocation { outcome, output }) => {
            let output = if output.is_empty() && !outcome.success() {
                outcome.to_string()
            } else {
                output
            };
            (output, outcome.code())
        }
        Err(e) => (e.to_string(), SPAWN_FAILED_CODE),
    };
    info!(code = bin_code, output_len = bin_output.len(), "program finished");

    Ok(RunResult {
        compiler_output: compiled.output,
        compiler_code: compiled.outcome.code(),
        bin_output: Some(bin_output),
        bin_code: Some(bin_code),
    })
}

/// Compiler arguments for an executable built from the project sources.
pub fn compile_args(tools: &ToolchainConfig, link_flags: &[String]) -> Vec<String> {
    let src = arg(&tools.src_dir());
    let mut args = vec![
        format!("--import-path={}", arg(&tools.import_path)),
        "--no-sub-pkg".to_string(),
        format!("--output-dir={src}"),
        "-L".to_string(),
        arg(&tools.stdx_dir),
    ];
    args.extend(link_flags.iter().cloned());
    args.extend([
        "-ldl".to_string(),
        "-V".to_string(),
        "-j1".to_string(),
        "-p".to_string(),
        src,
        "--output-type=exe".to_string(),
        "-o=main".to_string(),
    ]);
    args
}

/// Result for a compile-side stage that ran and failed.
fn failed_stage(stage: &Invoke, reason: &str, output: &str, code: i32) -> RunResult {
    RunResult {
        compiler_output: format!("{}\n{reason}\n{output}", stage.command_line()),
        compiler_code: code,
        bin_output: None,
        bin_code: None,
    }
}

/// Result for a compile-side stage that exited unsuccessfully.
fn stage_failed(stage: &Invoke, inv: &Invocation) -> RunResult {
    failed_stage(stage, &inv.outcome.to_string(), &inv.output, inv.outcome.code())
}

/// Result for a compile-side stage that could not be started.
fn spawn_failed(stage: &Invoke, error: &SpawnError) -> RunResult {
    warn!(cmd = %stage.command_line(), error = %error, "stage did not run");
    failed_stage(stage, &error.to_string(), "", SPAWN_FAILED_CODE)
}
