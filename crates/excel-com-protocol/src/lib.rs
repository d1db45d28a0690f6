//! Shared protocol types for communication between the native client and the
//! Windows COM bridge process (run directly on Windows or under WINE).
//!
//! The protocol is JSON-over-stdio: one JSON object per line in each direction.

use serde::{Deserialize, Serialize};

/// A command sent from the client to the bridge process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Monotonically increasing request ID for correlating responses.
    pub id: u64,
    /// The command to execute.
    #[serde(flatten)]
    pub command: Command,
}

/// Commands the client can send to the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", content = "params")]
pub enum Command {
    /// Initialize COM and create a hidden Excel.Application instance.
    Init,

    /// Open an existing workbook from a file path (Windows path).
    /// Returns a workbook handle.
    OpenWorkbook { path: String },

    /// List the worksheet names of a workbook in tab order.
    SheetNames { workbook: u64 },

    /// Copy a sheet of `source_workbook` so that it lands immediately after
    /// sheet `after` of `target_workbook`.
    CopySheet {
        source_workbook: u64,
        sheet: SheetRef,
        target_workbook: u64,
        after: SheetRef,
    },

    /// Rename a worksheet.
    RenameSheet {
        workbook: u64,
        sheet: SheetRef,
        name: String,
    },

    /// Save the workbook to a file path (Windows path).
    /// Format is inferred from extension (.xlsx, .xlsm, .xls, .csv).
    SaveWorkbook { workbook: u64, path: String },

    /// Close a workbook without saving.
    CloseWorkbook { workbook: u64 },

    /// Shut down the bridge: close all workbooks, quit Excel, uninitialize COM.
    Shutdown,
}

/// Reference to a worksheet: by 0-based index or by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SheetRef {
    Index(u32),
    Name(String),
}

impl From<u32> for SheetRef {
    fn from(index: u32) -> Self {
        SheetRef::Index(index)
    }
}

impl From<&str> for SheetRef {
    fn from(name: &str) -> Self {
        SheetRef::Name(name.to_string())
    }
}

/// A response sent from the bridge back to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// The request ID this response corresponds to.
    pub id: u64,
    /// The result of the command.
    #[serde(flatten)]
    pub result: ResponseResult,
}

impl Response {
    pub fn ok(id: u64, data: Option<ResponseData>) -> Self {
        Self {
            id,
            result: ResponseResult::Ok { data },
        }
    }

    pub fn error(id: u64, message: impl Into<String>) -> Self {
        Self {
            id,
            result: ResponseResult::Error {
                message: message.into(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum ResponseResult {
    #[serde(rename = "ok")]
    Ok {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<ResponseData>,
    },
    #[serde(rename = "error")]
    Error { message: String },
}

/// Data returned in successful responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseData {
    /// Handle to a newly opened workbook.
    WorkbookHandle { workbook: u64 },
    /// Worksheet names in tab order.
    SheetNames { sheets: Vec<String> },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_shape() {
        let req = Request {
            id: 7,
            command: Command::CopySheet {
                source_workbook: 2,
                sheet: SheetRef::Index(0),
                target_workbook: 1,
                after: SheetRef::Name("Summary".into()),
            },
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(
            value,
            json!({
                "id": 7,
                "cmd": "CopySheet",
                "params": {
                    "source_workbook": 2,
                    "sheet": 0,
                    "target_workbook": 1,
                    "after": "Summary"
                }
            })
        );

        let back: Request = serde_json::from_value(value).unwrap();
        assert_eq!(back, req);
    }

    #[test]
    fn test_unit_command_has_no_params() {
        let line = serde_json::to_string(&Request {
            id: 1,
            command: Command::Shutdown,
        })
        .unwrap();
        assert_eq!(line, r#"{"id":1,"cmd":"Shutdown"}"#);

        let parsed: Request = serde_json::from_str(r#"{"id":3,"cmd":"Init"}"#).unwrap();
        assert_eq!(parsed.command, Command::Init);
    }

    #[test]
    fn test_response_shapes() {
        let ok: Response = serde_json::from_str(r#"{"id":4,"status":"ok"}"#).unwrap();
        assert_eq!(ok, Response::ok(4, None));

        let handle: Response =
            serde_json::from_str(r#"{"id":5,"status":"ok","data":{"workbook":9}}"#).unwrap();
        assert_eq!(
            handle.result,
            ResponseResult::Ok {
                data: Some(ResponseData::WorkbookHandle { workbook: 9 })
            }
        );

        let names: Response = serde_json::from_str(
            r#"{"id":6,"status":"ok","data":{"sheets":["Sheet1","Data"]}}"#,
        )
        .unwrap();
        assert_eq!(
            names.result,
            ResponseResult::Ok {
                data: Some(ResponseData::SheetNames {
                    sheets: vec!["Sheet1".into(), "Data".into()]
                })
            }
        );

        let err = serde_json::to_value(Response::error(8, "no such sheet")).unwrap();
        assert_eq!(
            err,
            json!({"id": 8, "status": "error", "message": "no such sheet"})
        );
    }
}
