//! Host shell used to interpret command text.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
};

use tokio::process::Command;

/// Shell resolution error.
#[derive(Debug, thiserror::Error)]
pub enum ShellError {
    #[error("Shell not found: {0}")]
    NotFound(String),
}

/// Shell program plus the flag that makes it run one command string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shell {
    program: PathBuf,
    arg: &'static str,
}

impl Default for Shell {
    fn default() -> Self {
        Self::platform_default()
    }
}

impl Shell {
    /// `cmd /C` on Windows, `/bin/sh -c` elsewhere.
    #[must_use]
    pub fn platform_default() -> Self {
        if cfg!(windows) {
            Self {
                program: PathBuf::from("cmd"),
                arg: "/C",
            }
        } else {
            Self {
                program: PathBuf::from("/bin/sh"),
                arg: "-c",
            }
        }
    }

    /// Resolve a user supplied shell by path or through `PATH`.
    ///
    /// # Errors
    /// Returns error if no such executable exists.
    pub async fn resolve(name: &str) -> Result<Self, ShellError> {
        let program = resolve_executable_path(name)
            .await
            .ok_or_else(|| ShellError::NotFound(name.to_string()))?;
        Ok(Self::from_program(program))
    }

    /// Use `program` with the platform's command flag.
    #[must_use]
    pub fn from_program(program: impl Into<PathBuf>) -> Self {
        let program = program.into();
        let is_cmd = program
            .file_stem()
            .is_some_and(|stem| stem.eq_ignore_ascii_case("cmd"));
        Self {
            program,
            arg: if is_cmd { "/C" } else { "-c" },
        }
    }

    /// Shell executable.
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Build a process that runs `command` verbatim through this shell.
    ///
    /// The command text is not sanitized; whoever can send commands can run
    /// anything the agent's user can.
    #[must_use]
    pub fn command(&self, command: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg(self.arg)
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }
}

/// Resolve an executable by explicit path or `PATH` lookup.
pub async fn resolve_executable_path(executable: &str) -> Option<PathBuf> {
    if executable.trim().is_empty() {
        return None;
    }

    let path = Path::new(executable);
    if path.is_absolute() {
        return path.is_file().then(|| path.to_path_buf());
    }

    which_async(executable).await
}

async fn which_async(executable: &str) -> Option<PathBuf> {
    let executable = executable.to_string();
    tokio::task::spawn_blocking(move || which::which(executable))
        .await
        .ok()
        .and_then(Result::ok)
}
