//! Subprocess management and JSON IPC for the bridge process.

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Mutex};
use std::time::{Duration, Instant};

use excel_com_protocol::{Command as BridgeCommand, Request, Response, ResponseData, ResponseResult};

use crate::workbook::Workbook;

/// Errors from the Excel COM bridge.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Failed to spawn bridge process: {0}")]
    SpawnFailed(#[from] std::io::Error),

    #[error("Bridge process not running")]
    NotRunning,

    #[error("Failed to send command to bridge: {0}")]
    SendFailed(String),

    #[error("Failed to read response from bridge: {0}")]
    ReadFailed(String),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Bridge returned error: {0}")]
    BridgeError(String),

    #[error("Unexpected response data")]
    UnexpectedResponse,

    #[error("WINE not found. Install WINE and ensure 'wine' is in PATH.")]
    WineNotFound,

    #[error("Bridge executable not found at: {0}")]
    BridgeExeNotFound(String),

    #[error("Cannot resolve path {0}: {1}")]
    InvalidPath(PathBuf, std::io::Error),

    #[error("Bridge pipe lock poisoned")]
    Poisoned,
}

/// How the bridge executable is launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Launcher {
    /// Run the executable directly (Windows).
    Direct,
    /// Run the executable through WINE. Paths are mapped to `Z:\...`.
    Wine {
        /// Path to the WINE executable.
        wine_path: PathBuf,
        /// Optional WINEPREFIX to use (for isolating the WINE environment).
        wine_prefix: Option<PathBuf>,
    },
}

impl Default for Launcher {
    fn default() -> Self {
        if cfg!(windows) {
            Launcher::Direct
        } else {
            Launcher::Wine {
                wine_path: PathBuf::from("wine"),
                wine_prefix: None,
            }
        }
    }
}

/// Configuration for the Excel COM bridge.
#[derive(Debug, Clone)]
pub struct ExcelBridgeConfig {
    /// Path to the `excel-com-bridge.exe` Windows executable.
    /// If None, will search in common locations relative to the current binary.
    pub bridge_exe_path: Option<PathBuf>,

    /// How to launch the executable.
    pub launcher: Launcher,

    /// Upper bound on shutdown: the `Shutdown` reply and the process exit must
    /// both arrive within this time, otherwise the process is killed.
    pub shutdown_grace: Duration,
}

impl Default for ExcelBridgeConfig {
    fn default() -> Self {
        Self {
            bridge_exe_path: None,
            launcher: Launcher::default(),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

/// The main handle for communicating with the Excel COM bridge.
///
/// Owns the bridge process for its whole lifetime: dropping the handle without
/// calling [`ExcelBridge::shutdown`] still shuts Excel down and reaps the
/// process, killing it if it does not exit within the configured grace period.
pub struct ExcelBridge {
    child: Mutex<Child>,
    stdin: Mutex<Option<ChildStdin>>,
    stdout: Mutex<Option<BufReader<ChildStdout>>>,
    next_id: AtomicU64,
    wine_paths: bool,
    shutdown_grace: Duration,
    finished: bool,
}

impl ExcelBridge {
    /// Start the bridge process and initialize Excel.
    pub fn start(config: ExcelBridgeConfig) -> Result<Self, BridgeError> {
        let exe_path = config.bridge_exe_path.unwrap_or_else(find_bridge_exe);

        if !exe_path.exists() {
            return Err(BridgeError::BridgeExeNotFound(
                exe_path.display().to_string(),
            ));
        }

        let mut cmd = match &config.launcher {
            Launcher::Direct => std::process::Command::new(&exe_path),
            Launcher::Wine {
                wine_path,
                wine_prefix,
            } => {
                let mut cmd = std::process::Command::new(wine_path);
                if let Some(prefix) = wine_prefix {
                    cmd.env("WINEPREFIX", prefix);
                }
                cmd.arg(&exe_path);
                cmd
            }
        };
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::inherit()); // Bridge diagnostics go to our stderr

        tracing::info!("Starting Excel bridge: {:?}", cmd);
        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound
                && matches!(config.launcher, Launcher::Wine { .. })
            {
                BridgeError::WineNotFound
            } else {
                BridgeError::SpawnFailed(e)
            }
        })?;

        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(BridgeError::NotRunning);
            }
        };

        let bridge = Self {
            child: Mutex::new(child),
            stdin: Mutex::new(Some(stdin)),
            stdout: Mutex::new(Some(BufReader::new(stdout))),
            next_id: AtomicU64::new(1),
            wine_paths: matches!(config.launcher, Launcher::Wine { .. }),
            shutdown_grace: config.shutdown_grace,
            finished: false,
        };

        // A failed Init drops `bridge`, which terminates the child
        bridge.send_command(BridgeCommand::Init)?;
        tracing::debug!("Excel bridge initialized");

        Ok(bridge)
    }

    /// Send a command to the bridge and wait for the response.
    pub(crate) fn send_command(
        &self,
        command: BridgeCommand,
    ) -> Result<Option<ResponseData>, BridgeError> {
        let id = self.write_request(command)?;

        let line = {
            let mut guard = self.stdout.lock().map_err(|_| BridgeError::Poisoned)?;
            let stdout = guard.as_mut().ok_or(BridgeError::NotRunning)?;
            read_reply(stdout)?
        };

        parse_reply(&line, id)
    }

    /// Write one request line; returns the request id.
    fn write_request(&self, command: BridgeCommand) -> Result<u64, BridgeError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let request = Request { id, command };
        let json = serde_json::to_string(&request)?;
        tracing::trace!("-> {json}");

        let mut guard = self.stdin.lock().map_err(|_| BridgeError::Poisoned)?;
        let stdin = guard.as_mut().ok_or(BridgeError::NotRunning)?;
        writeln!(stdin, "{json}").map_err(|e| BridgeError::SendFailed(e.to_string()))?;
        stdin
            .flush()
            .map_err(|e| BridgeError::SendFailed(e.to_string()))?;
        Ok(id)
    }

    /// Open an existing workbook from a file path.
    ///
    /// The path is made absolute and, under WINE, mapped to a `Z:` path.
    pub fn open_workbook(&self, path: &Path) -> Result<Workbook<'_>, BridgeError> {
        let data = self.send_command(BridgeCommand::OpenWorkbook {
            path: self.bridge_path(path)?,
        })?;
        match data {
            Some(ResponseData::WorkbookHandle { workbook }) => {
                tracing::debug!("Opened {} as workbook {workbook}", path.display());
                Ok(Workbook::new(self, workbook))
            }
            _ => Err(BridgeError::UnexpectedResponse),
        }
    }

    /// A handle for a workbook that is already open in the bridge.
    pub fn workbook(&self, handle: u64) -> Workbook<'_> {
        Workbook::new(self, handle)
    }

    /// Shut down the bridge: close all workbooks, quit Excel, and reap the process.
    pub fn shutdown(mut self) -> Result<(), BridgeError> {
        self.terminate()
    }

    /// Convert a local path into the form the bridge process expects.
    pub(crate) fn bridge_path(&self, path: &Path) -> Result<String, BridgeError> {
        let abs = absolute_path(path)?;
        if self.wine_paths {
            Ok(linux_to_wine_path(&abs))
        } else {
            Ok(abs.display().to_string())
        }
    }

    /// Send `Shutdown` and reap the process, all within `shutdown_grace`.
    ///
    /// The reply is read on a helper thread so a bridge stuck in `Quit` cannot
    /// hold us past the deadline; killing the child ends that read with EOF.
    fn terminate(&mut self) -> Result<(), BridgeError> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        let deadline = Instant::now() + self.shutdown_grace;

        let sent = self.write_request(BridgeCommand::Shutdown);

        // Closing stdin lets a bridge that missed the command exit on EOF
        if let Ok(stdin) = self.stdin.get_mut() {
            stdin.take();
        }

        let reply = match (sent, self.stdout.get_mut()) {
            (Ok(id), Ok(stdout)) => match stdout.take() {
                Some(reader) => await_reply(reader, id, deadline),
                None => Err(BridgeError::NotRunning),
            },
            (Ok(_), Err(_)) => Err(BridgeError::Poisoned),
            (Err(e), _) => Err(e),
        };
        if let Err(e) = &reply {
            tracing::warn!("Shutdown command failed: {e}");
        }

        let child = self.child.get_mut().map_err(|_| BridgeError::Poisoned)?;
        wait_or_kill(child, deadline)?;

        reply.map(|_| ())
    }
}

impl Drop for ExcelBridge {
    fn drop(&mut self) {
        if let Err(e) = self.terminate() {
            tracing::warn!("Excel bridge did not shut down cleanly: {e}");
        }
    }
}

fn read_reply(stdout: &mut BufReader<ChildStdout>) -> Result<String, BridgeError> {
    let mut line = String::new();
    stdout
        .read_line(&mut line)
        .map_err(|e| BridgeError::ReadFailed(e.to_string()))?;

    if line.is_empty() {
        return Err(BridgeError::NotRunning);
    }
    tracing::trace!("<- {}", line.trim_end());
    Ok(line)
}

fn parse_reply(line: &str, id: u64) -> Result<Option<ResponseData>, BridgeError> {
    let response: Response = serde_json::from_str(line)?;
    if response.id != id {
        return Err(BridgeError::UnexpectedResponse);
    }

    match response.result {
        ResponseResult::Ok { data } => Ok(data),
        ResponseResult::Error { message } => Err(BridgeError::BridgeError(message)),
    }
}

/// Wait for the reply to request `id` until `deadline`.
fn await_reply(
    mut stdout: BufReader<ChildStdout>,
    id: u64,
    deadline: Instant,
) -> Result<Option<ResponseData>, BridgeError> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let _ = tx.send(read_reply(&mut stdout));
    });

    match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        Ok(line) => parse_reply(&line?, id),
        Err(mpsc::RecvTimeoutError::Timeout) => Err(BridgeError::ReadFailed(
            "no reply before the shutdown deadline".into(),
        )),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(BridgeError::NotRunning),
    }
}

/// Wait until `deadline` for the child to exit, then kill it.
fn wait_or_kill(child: &mut Child, deadline: Instant) -> Result<(), BridgeError> {
    loop {
        if let Some(status) = child.try_wait()? {
            tracing::debug!("Excel bridge exited with {status}");
            return Ok(());
        }
        if Instant::now() >= deadline {
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    tracing::warn!("Excel bridge still running after the shutdown deadline; killing it");
    child.kill()?;
    child.wait()?;
    Ok(())
}

fn absolute_path(path: &Path) -> Result<PathBuf, BridgeError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .map_err(|e| BridgeError::InvalidPath(path.to_path_buf(), e))
}

/// Convert a Linux filesystem path to a WINE (Windows) path.
///
/// WINE maps `/` to `Z:\`, so `/home/user/file.xlsx` becomes `Z:\home\user\file.xlsx`.
/// The path must already be absolute.
pub fn linux_to_wine_path(linux_path: &Path) -> String {
    format!("Z:{}", linux_path.display()).replace('/', "\\")
}

/// Attempt to locate the bridge exe relative to the current executable or in common paths.
fn find_bridge_exe() -> PathBuf {
    // Check next to the current executable
    if let Ok(mut exe) = std::env::current_exe() {
        exe.pop();
        let candidate = exe.join("excel-com-bridge.exe");
        if candidate.exists() {
            return candidate;
        }
    }

    // Check in the target directory (for development)
    ["release", "debug"]
        .iter()
        .map(|profile| {
            PathBuf::from(format!(
                "target/x86_64-pc-windows-gnu/{profile}/excel-com-bridge.exe"
            ))
        })
        .find(|candidate| candidate.exists())
        .unwrap_or_else(|| PathBuf::from("excel-com-bridge.exe"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linux_to_wine_path() {
        assert_eq!(
            linux_to_wine_path(Path::new("/home/user/result/basic-1.xlsx")),
            r"Z:\home\user\result\basic-1.xlsx"
        );
    }

    #[test]
    fn test_absolute_path_joins_cwd() {
        let abs = absolute_path(Path::new("result/out.xlsx")).unwrap();
        assert!(abs.is_absolute());
        assert!(abs.ends_with("result/out.xlsx"));
    }

    #[test]
    fn test_default_launcher_matches_platform() {
        let config = ExcelBridgeConfig::default();
        assert_eq!(config.shutdown_grace, Duration::from_secs(10));
        if cfg!(windows) {
            assert_eq!(config.launcher, Launcher::Direct);
        } else {
            assert!(matches!(config.launcher, Launcher::Wine { .. }));
        }
    }

    #[test]
    fn test_missing_bridge_exe() {
        let config = ExcelBridgeConfig {
            bridge_exe_path: Some(PathBuf::from("/nonexistent/excel-com-bridge.exe")),
            ..Default::default()
        };
        assert!(matches!(
            ExcelBridge::start(config),
            Err(BridgeError::BridgeExeNotFound(_))
        ));
    }
}
