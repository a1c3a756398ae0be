// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The wire entity of the JSON channel.
//!
//! Every message on the device channel and the operator control sub-channels
//! is a `{code, act, msg, event, data}` object. Command tags are typed through
//! [`Act`] with an `Unknown` tail for forward compatibility; `data` stays a
//! JSON map on the wire and is read/written through typed payload structs at
//! each seam. Device replies carry no `act` and their `data` is forwarded to
//! operators verbatim.

use std::fmt;

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Command/notification tag carried in `act`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Act {
    DeviceUp,
    DeviceUpdate,
    Offline,
    Lock,
    Logoff,
    Hibernate,
    Suspend,
    Restart,
    Shutdown,
    Screenshot,
    TerminalInit,
    TerminalInput,
    TerminalResize,
    TerminalOutput,
    TerminalKill,
    TerminalPing,
    TerminalQuit,
    DesktopInit,
    DesktopPing,
    DesktopKill,
    DesktopShot,
    DesktopQuit,
    FilesList,
    FilesFetch,
    FilesRemove,
    FilesUpload,
    FileUploadText,
    ProcessesList,
    ProcessKill,
    CommandExec,
    Ping,
    RawDataArrive,
    Quit,
    Warn,
    Unknown(String),
}

impl Act {
    pub fn as_str(&self) -> &str {
        match self {
            Self::DeviceUp => "DEVICE_UP",
            Self::DeviceUpdate => "DEVICE_UPDATE",
            Self::Offline => "OFFLINE",
            Self::Lock => "LOCK",
            Self::Logoff => "LOGOFF",
            Self::Hibernate => "HIBERNATE",
            Self::Suspend => "SUSPEND",
            Self::Restart => "RESTART",
            Self::Shutdown => "SHUTDOWN",
            Self::Screenshot => "SCREENSHOT",
            Self::TerminalInit => "TERMINAL_INIT",
            Self::TerminalInput => "TERMINAL_INPUT",
            Self::TerminalResize => "TERMINAL_RESIZE",
            Self::TerminalOutput => "TERMINAL_OUTPUT",
            Self::TerminalKill => "TERMINAL_KILL",
            Self::TerminalPing => "TERMINAL_PING",
            Self::TerminalQuit => "TERMINAL_QUIT",
            Self::DesktopInit => "DESKTOP_INIT",
            Self::DesktopPing => "DESKTOP_PING",
            Self::DesktopKill => "DESKTOP_KILL",
            Self::DesktopShot => "DESKTOP_SHOT",
            Self::DesktopQuit => "DESKTOP_QUIT",
            Self::FilesList => "FILES_LIST",
            Self::FilesFetch => "FILES_FETCH",
            Self::FilesRemove => "FILES_REMOVE",
            Self::FilesUpload => "FILES_UPLOAD",
            Self::FileUploadText => "FILE_UPLOAD_TEXT",
            Self::ProcessesList => "PROCESSES_LIST",
            Self::ProcessKill => "PROCESS_KILL",
            Self::CommandExec => "COMMAND_EXEC",
            Self::Ping => "PING",
            Self::RawDataArrive => "RAW_DATA_ARRIVE",
            Self::Quit => "QUIT",
            Self::Warn => "WARN",
            Self::Unknown(s) => s,
        }
    }
}

impl From<&str> for Act {
    fn from(s: &str) -> Self {
        match s {
            "DEVICE_UP" => Self::DeviceUp,
            "DEVICE_UPDATE" => Self::DeviceUpdate,
            "OFFLINE" => Self::Offline,
            "LOCK" => Self::Lock,
            "LOGOFF" => Self::Logoff,
            "HIBERNATE" => Self::Hibernate,
            "SUSPEND" => Self::Suspend,
            "RESTART" => Self::Restart,
            "SHUTDOWN" => Self::Shutdown,
            "SCREENSHOT" => Self::Screenshot,
            "TERMINAL_INIT" => Self::TerminalInit,
            "TERMINAL_INPUT" => Self::TerminalInput,
            "TERMINAL_RESIZE" => Self::TerminalResize,
            "TERMINAL_OUTPUT" => Self::TerminalOutput,
            "TERMINAL_KILL" => Self::TerminalKill,
            "TERMINAL_PING" => Self::TerminalPing,
            "TERMINAL_QUIT" => Self::TerminalQuit,
            "DESKTOP_INIT" => Self::DesktopInit,
            "DESKTOP_PING" => Self::DesktopPing,
            "DESKTOP_KILL" => Self::DesktopKill,
            "DESKTOP_SHOT" => Self::DesktopShot,
            "DESKTOP_QUIT" => Self::DesktopQuit,
            "FILES_LIST" => Self::FilesList,
            "FILES_FETCH" => Self::FilesFetch,
            "FILES_REMOVE" => Self::FilesRemove,
            "FILES_UPLOAD" => Self::FilesUpload,
            "FILE_UPLOAD_TEXT" => Self::FileUploadText,
            "PROCESSES_LIST" => Self::ProcessesList,
            "PROCESS_KILL" => Self::ProcessKill,
            "COMMAND_EXEC" => Self::CommandExec,
            "PING" => Self::Ping,
            "RAW_DATA_ARRIVE" => Self::RawDataArrive,
            "QUIT" => Self::Quit,
            "WARN" => Self::Warn,
            other => Self::Unknown(other.to_owned()),
        }
    }
}

impl fmt::Display for Act {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Act {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Act {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Act::from(s.as_str()))
    }
}

/// `{code, act, msg, event, data}`. `code` 0 means ok, non-zero an error.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Packet {
    #[serde(default)]
    pub code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub act: Option<Act>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
}

impl Packet {
    /// A bare success reply.
    pub fn ok() -> Self {
        Self::default()
    }

    /// An error reply with the given code and message.
    pub fn fail(code: i32, msg: impl Into<String>) -> Self {
        Self { code, msg: Some(msg.into()), ..Self::default() }
    }

    pub fn act(act: Act) -> Self {
        Self { act: Some(act), ..Self::default() }
    }

    pub fn with_event(mut self, trigger: &str) -> Self {
        self.event = Some(trigger.to_owned());
        self
    }

    pub fn with_msg(mut self, msg: &str) -> Self {
        self.msg = Some(msg.to_owned());
        self
    }

    /// Attach a typed payload as the `data` map. Non-object payloads are
    /// silently dropped; every payload struct in this crate is an object.
    pub fn with_data<T: Serialize>(mut self, payload: &T) -> Self {
        if let Ok(Value::Object(map)) = serde_json::to_value(payload) {
            self.data = Some(map);
        }
        self
    }

    /// Read the `data` map back into a typed payload.
    pub fn parse_data<T: for<'de> Deserialize<'de>>(&self) -> Option<T> {
        let map = self.data.clone()?;
        serde_json::from_value(Value::Object(map)).ok()
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_json(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}

// -- Typed payloads -----------------------------------------------------------

/// References a terminal sub-session on the device side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalRef {
    pub terminal: String,
}

/// References a desktop sub-session on the device side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesktopRef {
    pub desktop: String,
}

/// Hex-encoded keystrokes toward a terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalInputPayload {
    pub input: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalResizePayload {
    pub cols: u32,
    pub rows: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal: Option<String>,
}

/// Terminal output forwarded to the operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalOutputPayload {
    pub output: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandExecPayload {
    pub cmd: String,
    #[serde(default)]
    pub args: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessKillPayload {
    pub pid: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesListPayload {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesRemovePayload {
    pub files: Vec<String>,
}

/// Ask the device to upload files through a bridge; `start`/`end` carry an
/// operator byte range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesUploadPayload {
    pub files: Vec<String>,
    pub bridge: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<i64>,
}

/// Ask the device to upload a single text file through a bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileTextPayload {
    pub file: String,
    pub bridge: String,
}

/// Ask the device to fetch the operator's upload through a bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesFetchPayload {
    pub path: String,
    pub file: String,
    pub bridge: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeRef {
    pub bridge: String,
}

#[cfg(test)]
#[path = "packet_tests.rs"]
mod tests;
