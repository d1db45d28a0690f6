//! Drive the client against a scripted stand-in for the bridge process.
//!
//! The stand-in is a POSIX shell script launched through the WINE launcher
//! slot (`sh script`), so these tests only run on Unix.

#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use sheet_merge_excel::{BridgeError, ExcelBridge, ExcelBridgeConfig, Launcher};

/// Answers each request line in order. Request ids start at 1 and increase by
/// one, so a line counter is enough to echo them back. Every request is
/// appended to `log` and `Shutdown` leaves a `shutdown` marker.
fn write_script(dir: &Path, init_reply: &str) -> PathBuf {
    let log = dir.join("log");
    let marker = dir.join("shutdown");
    let script = format!(
        r#"n=0
while IFS= read -r line; do
  n=$((n+1))
  printf '%s\n' "$line" >> '{log}'
  case "$line" in
    *'"cmd":"Init"'*) printf '{{"id":%d,{init_reply}}}\n' "$n" ;;
    *'"cmd":"OpenWorkbook"'*) printf '{{"id":%d,"status":"ok","data":{{"workbook":%d}}}}\n' "$n" "$n" ;;
    *'"cmd":"SheetNames"'*) printf '{{"id":%d,"status":"ok","data":{{"sheets":["S1","S2","S3"]}}}}\n' "$n" ;;
    *'"name":"Bad"'*) printf '{{"id":%d,"status":"error","message":"name rejected"}}\n' "$n" ;;
    *'"cmd":"Shutdown"'*) printf '{{"id":%d,"status":"ok"}}\n' "$n"; : > '{marker}'; exit 0 ;;
    *) printf '{{"id":%d,"status":"ok"}}\n' "$n" ;;
  esac
done
"#,
        log = log.display(),
        marker = marker.display(),
    );
    let path = dir.join("fake-bridge.sh");
    std::fs::write(&path, script).unwrap();
    path
}

/// Answers `Init`, then never replies to anything again.
fn write_hung_script(dir: &Path) -> PathBuf {
    let path = dir.join("hung-bridge.sh");
    std::fs::write(
        &path,
        "IFS= read -r line\nprintf '{\"id\":1,\"status\":\"ok\"}\\n'\nexec sleep 30\n",
    )
    .unwrap();
    path
}

fn config(script: PathBuf) -> ExcelBridgeConfig {
    ExcelBridgeConfig {
        bridge_exe_path: Some(script),
        launcher: Launcher::Wine {
            wine_path: PathBuf::from("sh"),
            wine_prefix: None,
        },
        shutdown_grace: Duration::from_secs(5),
    }
}

fn logged_commands(dir: &Path) -> Vec<String> {
    std::fs::read_to_string(dir.join("log"))
        .unwrap()
        .lines()
        .map(|line| {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            value["cmd"].as_str().unwrap().to_string()
        })
        .collect()
}

#[test]
fn test_merge_commands_reach_the_bridge() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), r#""status":"ok""#);

    let bridge = ExcelBridge::start(config(script)).unwrap();
    let a = bridge.open_workbook(&dir.path().join("a.xlsx")).unwrap();
    let b = bridge.open_workbook(&dir.path().join("b.xlsx")).unwrap();
    assert_eq!(a.handle(), 2);
    assert_eq!(b.handle(), 3);

    assert_eq!(a.sheet_names().unwrap(), vec!["S1", "S2", "S3"]);
    b.copy_sheet_after(0u32, &a, 2u32).unwrap();
    a.rename_sheet(3u32, "Sheet4").unwrap();
    a.save(&dir.path().join("out.xlsx")).unwrap();
    bridge.workbook(b.handle()).close().unwrap();
    bridge.shutdown().unwrap();

    assert!(dir.path().join("shutdown").exists());
    assert_eq!(
        logged_commands(dir.path()),
        vec![
            "Init",
            "OpenWorkbook",
            "OpenWorkbook",
            "SheetNames",
            "CopySheet",
            "RenameSheet",
            "SaveWorkbook",
            "CloseWorkbook",
            "Shutdown",
        ]
    );

    // Paths cross the launcher boundary as WINE paths
    let log = std::fs::read_to_string(dir.path().join("log")).unwrap();
    assert!(log.contains(r#""path":"Z:\\"#));
}

#[test]
fn test_bridge_error_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), r#""status":"ok""#);

    let bridge = ExcelBridge::start(config(script)).unwrap();
    let a = bridge.workbook(1);
    match a.rename_sheet(0u32, "Bad") {
        Err(BridgeError::BridgeError(message)) => assert_eq!(message, "name rejected"),
        other => panic!("expected bridge error, got {other:?}"),
    }
    bridge.shutdown().unwrap();
}

#[test]
fn test_drop_shuts_the_bridge_down() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), r#""status":"ok""#);

    {
        let bridge = ExcelBridge::start(config(script)).unwrap();
        bridge.open_workbook(&dir.path().join("a.xlsx")).unwrap();
    }

    assert!(dir.path().join("shutdown").exists());
    assert_eq!(
        logged_commands(dir.path()).last().map(String::as_str),
        Some("Shutdown")
    );
}

#[test]
fn test_failed_init_still_terminates_the_process() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        r#""status":"error","message":"Excel is not installed""#,
    );

    match ExcelBridge::start(config(script)) {
        Err(BridgeError::BridgeError(message)) => assert_eq!(message, "Excel is not installed"),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("start should fail when Init fails"),
    }
    assert!(dir.path().join("shutdown").exists());
}

#[test]
fn test_hung_shutdown_is_killed_after_grace() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_hung_script(dir.path());

    let mut config = config(script);
    config.shutdown_grace = Duration::from_secs(1);
    let bridge = ExcelBridge::start(config).unwrap();

    let started = Instant::now();
    assert!(bridge.shutdown().is_err());
    assert!(
        started.elapsed() < Duration::from_secs(10),
        "shutdown took {:?}",
        started.elapsed()
    );
}

#[test]
fn test_hung_bridge_is_killed_on_drop() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_hung_script(dir.path());

    let mut config = config(script);
    config.shutdown_grace = Duration::from_millis(500);
    let started = Instant::now();
    drop(ExcelBridge::start(config).unwrap());
    assert!(started.elapsed() < Duration::from_secs(10));
}
