//! Excel COM Bridge: a Windows process that automates Excel via COM,
//! controlled by JSON commands over stdin/stdout.
//!
//! Runs natively on Windows or, cross-compiled from Linux, under WINE.
//!
//! Protocol: one JSON object per line (newline-delimited JSON).
//! - Reads `Request` objects from stdin
//! - Writes `Response` objects to stdout
//! - Diagnostic/log messages go to stderr (never stdout)

#[cfg(windows)]
mod dispatch;
#[cfg(windows)]
mod excel;

#[cfg(not(windows))]
fn main() {
    eprintln!("excel-com-bridge must be compiled for Windows (--target x86_64-pc-windows-gnu)");
    eprintln!("and run natively or under WINE.");
    std::process::exit(1);
}

#[cfg(windows)]
fn main() {
    use std::io::{self, BufRead};

    use excel_com_protocol::*;

    // Use stderr for all diagnostic output so stdout stays clean for protocol
    eprintln!("[excel-com-bridge] Starting up...");

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    let mut excel: Option<excel::ExcelApp> = None;

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                eprintln!("[excel-com-bridge] stdin read error: {e}");
                break;
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let request: Request = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => {
                eprintln!("[excel-com-bridge] JSON parse error: {e}");
                eprintln!("[excel-com-bridge] Line was: {line}");
                // id=0 since we couldn't parse the request
                reply(&mut out, &Response::error(0, format!("JSON parse error: {e}")));
                continue;
            }
        };

        let response = handle_command(&mut excel, &request);
        reply(&mut out, &response);

        // If it was a shutdown command and it succeeded, exit
        if matches!(request.command, Command::Shutdown)
            && matches!(response.result, ResponseResult::Ok { .. })
        {
            eprintln!("[excel-com-bridge] Shutdown complete, exiting.");
            break;
        }
    }

    // If Excel is still running when stdin closes, try to clean up
    if let Some(app) = excel {
        eprintln!("[excel-com-bridge] stdin closed, shutting down Excel...");
        if let Err(e) = app.shutdown() {
            eprintln!("[excel-com-bridge] Excel shutdown failed: {e}");
        }
        uninit_com();
    }

    eprintln!("[excel-com-bridge] Process exiting.");
}

#[cfg(windows)]
fn reply(out: &mut impl std::io::Write, response: &excel_com_protocol::Response) {
    match serde_json::to_string(response) {
        Ok(json) => {
            if let Err(e) = writeln!(out, "{json}").and_then(|_| out.flush()) {
                eprintln!("[excel-com-bridge] stdout write error: {e}");
            }
        }
        Err(e) => eprintln!("[excel-com-bridge] cannot encode response: {e}"),
    }
}

#[cfg(windows)]
fn handle_command(
    excel: &mut Option<excel::ExcelApp>,
    request: &excel_com_protocol::Request,
) -> excel_com_protocol::Response {
    use excel_com_protocol::*;

    let id = request.id;

    let result = match &request.command {
        Command::Init => init_com_and_excel(excel),
        Command::OpenWorkbook { path } => with_excel(excel, |app| {
            let handle = app.open_workbook(path)?;
            Ok(Some(ResponseData::WorkbookHandle { workbook: handle }))
        }),
        Command::SheetNames { workbook } => with_excel(excel, |app| {
            let sheets = app.sheet_names(*workbook)?;
            Ok(Some(ResponseData::SheetNames { sheets }))
        }),
        Command::CopySheet {
            source_workbook,
            sheet,
            target_workbook,
            after,
        } => with_excel(excel, |app| {
            app.copy_sheet(*source_workbook, sheet, *target_workbook, after)?;
            Ok(None)
        }),
        Command::RenameSheet {
            workbook,
            sheet,
            name,
        } => with_excel(excel, |app| {
            app.rename_sheet(*workbook, sheet, name)?;
            Ok(None)
        }),
        Command::SaveWorkbook { workbook, path } => with_excel(excel, |app| {
            app.save_workbook(*workbook, path)?;
            Ok(None)
        }),
        Command::CloseWorkbook { workbook } => with_excel(excel, |app| {
            app.close_workbook(*workbook)?;
            Ok(None)
        }),
        Command::Shutdown => match excel.take() {
            Some(app) => match app.shutdown() {
                Ok(()) => {
                    uninit_com();
                    ResponseResult::Ok { data: None }
                }
                Err(e) => ResponseResult::Error {
                    message: format!("Shutdown failed: {e}"),
                },
            },
            None => ResponseResult::Ok { data: None },
        },
    };

    Response { id, result }
}

#[cfg(windows)]
fn init_com_and_excel(excel: &mut Option<excel::ExcelApp>) -> excel_com_protocol::ResponseResult {
    use excel_com_protocol::ResponseResult;
    use windows::Win32::System::Com::{CoInitializeEx, COINIT_APARTMENTTHREADED};

    if excel.is_some() {
        return ResponseResult::Ok { data: None }; // Already initialized
    }

    // Initialize COM in Single-Threaded Apartment mode (required by Excel)
    unsafe {
        let hr = CoInitializeEx(None, COINIT_APARTMENTTHREADED);
        if let Err(e) = hr.ok() {
            return ResponseResult::Error {
                message: format!("CoInitializeEx failed: {e}"),
            };
        }
    }

    eprintln!("[excel-com-bridge] COM initialized (STA)");

    match excel::ExcelApp::new() {
        Ok(app) => {
            eprintln!("[excel-com-bridge] Excel.Application created successfully");
            *excel = Some(app);
            ResponseResult::Ok { data: None }
        }
        Err(e) => ResponseResult::Error {
            message: format!("Failed to create Excel.Application: {e}"),
        },
    }
}

#[cfg(windows)]
fn uninit_com() {
    unsafe {
        windows::Win32::System::Com::CoUninitialize();
    }
    eprintln!("[excel-com-bridge] COM uninitialized");
}

#[cfg(windows)]
fn with_excel(
    excel: &mut Option<excel::ExcelApp>,
    f: impl FnOnce(
        &mut excel::ExcelApp,
    ) -> Result<Option<excel_com_protocol::ResponseData>, String>,
) -> excel_com_protocol::ResponseResult {
    use excel_com_protocol::ResponseResult;

    match excel.as_mut() {
        Some(app) => match f(app) {
            Ok(data) => ResponseResult::Ok { data },
            Err(message) => ResponseResult::Error { message },
        },
        None => ResponseResult::Error {
            message: "Excel not initialized. Send 'Init' command first.".to_string(),
        },
    }
}
