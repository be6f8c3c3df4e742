//! Toolchain locations inside the sandbox image.
//!
//! Configuration is loaded from environment variables with defaults matching
//! the `cangjie` image layout.

use crate::error::{AgentError, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where the compiler, formatter and language server live, and where jobs work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolchainConfig {
    /// Project directory; sources go to `src/` below it.
    pub project_dir: PathBuf,

    /// Compiler binary.
    pub cjc: PathBuf,

    /// Formatter binary.
    pub cjfmt: PathBuf,

    /// Language server binary.
    pub lsp_server: PathBuf,

    /// Import path for the dynamic standard library.
    pub import_path: PathBuf,

    /// Directory holding the `stdx` extension libraries.
    pub stdx_dir: PathBuf,

    /// Wall-clock bound for the compiled program (default: 10s).
    pub run_timeout: Duration,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            project_dir: PathBuf::from("/playground"),
            cjc: PathBuf::from("cjc"),
            cjfmt: PathBuf::from("cjfmt"),
            lsp_server: PathBuf::from("/cangjie/tools/bin/LSPServer"),
            import_path: PathBuf::from("/linux_x86_64_llvm/dynamic"),
            stdx_dir: PathBuf::from("/linux_x86_64_llvm/dynamic/stdx"),
            run_timeout: Duration::from_secs(10),
        }
    }
}

impl ToolchainConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `CJBOX_PROJECT_DIR` | `/playground` |
    /// | `CJBOX_CJC` | `cjc` |
    /// | `CJBOX_CJFMT` | `cjfmt` |
    /// | `CJBOX_LSP_SERVER` | `/cangjie/tools/bin/LSPServer` |
    /// | `CJBOX_IMPORT_PATH` | `/linux_x86_64_llvm/dynamic` |
    /// | `CJBOX_STDX_DIR` | `/linux_x86_64_llvm/dynamic/stdx` |
    /// | `CJBOX_RUN_TIMEOUT_SECS` | `10` |
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let default = Self::default();
        let path = |name: &str, fallback: PathBuf| var(name).map(PathBuf::from).unwrap_or(fallback);

        Self {
            project_dir: path("CJBOX_PROJECT_DIR", default.project_dir),
            cjc: path("CJBOX_CJC", default.cjc),
            cjfmt: path("CJBOX_CJFMT", default.cjfmt),
            lsp_server: path("CJBOX_LSP_SERVER", default.lsp_server),
            import_path: path("CJBOX_IMPORT_PATH", default.import_path),
            stdx_dir: path("CJBOX_STDX_DIR", default.stdx_dir),
            run_timeout: var("CJBOX_RUN_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default.run_timeout),
        }
    }

    /// Reject configurations no job could run under.
    pub fn validate(&self) -> Result<()> {
        if !self.project_dir.is_absolute() {
            return Err(AgentError::Config(format!(
                "project dir must be absolute: {}",
                self.project_dir.display()
            )));
        }
        if self.run_timeout.is_zero() {
            return Err(AgentError::Config("run timeout must be > 0".into()));
        }
        Ok(())
    }

    /// Source directory of the project.
    pub fn src_dir(&self) -> PathBuf {
        self.project_dir.join("src")
    }

    /// The single source file jobs compile.
    pub fn main_source(&self) -> PathBuf {
        self.src_dir().join("main.cj")
    }

    /// Executable produced by a successful compile.
    pub fn binary(&self) -> PathBuf {
        self.src_dir().join("main")
    }

    /// Project manifest read by the language server.
    pub fn manifest(&self) -> PathBuf {
        self.project_dir.join("cjpm.toml")
    }
}

/// Render a path argument.
pub fn arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
