//! Wire format of the monitor socket: one JSON object per line.
//!
//! Clients send `{"method": "<Op>", ...}`; the daemon answers each request
//! with exactly one `reply` or `error` and may interleave `signal` messages
//! at any point.

use std::fmt::Display;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;
use crate::monitor::Notification;

pub const SERVICE_NAME: &str = "org.mxlinux.UpdaterSystemMonitor";
pub const OBJECT_PATH: &str = "/org/mxlinux/UpdaterSystemMonitor";
pub const INTERFACE: &str = "org.mxlinux.UpdaterSystemMonitor";

/// Longest request accepted, line terminator excluded
pub const MAX_REQUEST_LINE: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum Request {
    GetState,
    GetStateSummary,
    Refresh,
    DelayRefresh { seconds: u64 },
    SetCheckInterval { seconds: u64 },
    SetIdleTimeout { seconds: u64 },
    SetRefreshPaused { paused: bool },
    UpdateAurSetting { key: String, value: String },
    Quit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// First message on every connection
    Hello {
        service: String,
        object_path: String,
        interface: String,
        version: String,
    },
    Reply {
        value: Value,
    },
    Error {
        message: String,
    },
    Signal {
        name: String,
        payload: String,
    },
}

impl ServerMessage {
    pub fn hello() -> Self {
        ServerMessage::Hello {
            service: SERVICE_NAME.to_string(),
            object_path: OBJECT_PATH.to_string(),
            interface: INTERFACE.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn reply(value: impl Into<Value>) -> Self {
        ServerMessage::Reply {
            value: value.into(),
        }
    }

    pub fn error(message: impl Display) -> Self {
        ServerMessage::Error {
            message: message.to_string(),
        }
    }

    pub fn signal(notification: &Notification) -> Self {
        ServerMessage::Signal {
            name: notification.name().to_string(),
            payload: notification.payload().to_string(),
        }
    }
}

/// Parse one request line
pub fn decode_request(line: &str) -> Result<Request, Error> {
    let payload = line.trim_end_matches(['\r', '\n']);
    if payload.len() > MAX_REQUEST_LINE {
        return Err(Error::Protocol(format!(
            "request of {} bytes exceeds the {} byte limit",
            payload.len(),
            MAX_REQUEST_LINE
        )));
    }
    serde_json::from_str(payload.trim())
        .map_err(|e| Error::Protocol(format!("malformed request: {}", e)))
}

/// Serialize a message as a newline-terminated JSON line
pub fn encode(message: &ServerMessage) -> Result<Vec<u8>, Error> {
    let mut bytes = serde_json::to_vec(message)?;
    bytes.push(b'\n');
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_requests() {
        assert_eq!(
            decode_request("{\"method\":\"GetState\"}\n").unwrap(),
            Request::GetState
        );
        assert_eq!(
            decode_request(r#"{"method":"DelayRefresh","seconds":120}"#).unwrap(),
            Request::DelayRefresh { seconds: 120 }
        );
        assert_eq!(
            decode_request(r#"{"method":"UpdateAurSetting","key":"aur_enabled","value":"true"}"#)
                .unwrap(),
            Request::UpdateAurSetting {
                key: "aur_enabled".to_string(),
                value: "true".to_string()
            }
        );
    }

    #[test]
    fn test_decode_rejects_bad_input() {
        assert!(decode_request("GetState").is_err());
        assert!(decode_request(r#"{"method":"Upgrade"}"#).is_err());
        assert!(decode_request(r#"{"method":"DelayRefresh"}"#).is_err());
        assert!(decode_request(r#"{"method":"SetRefreshPaused","paused":"yes"}"#).is_err());

        let oversized = format!(
            r#"{{"method":"GetState","pad":"{}"}}"#,
            "x".repeat(MAX_REQUEST_LINE)
        );
        let padded = {
            let body = r#"{"method":"GetState"}"#;
            format!("{}{}\n", body, " ".repeat(MAX_REQUEST_LINE - body.len()))
        };
        assert_eq!(decode_request(&padded).unwrap(), Request::GetState);

        match decode_request(&oversized) {
            Err(Error::Protocol(msg)) => assert!(msg.contains("exceeds")),
            other => panic!("expected size error, got {:?}", other),
        }
    }

    #[test]
    fn test_message_wire_format() {
        let bytes = encode(&ServerMessage::signal(&Notification::SummaryChanged(
            "{\"status\":\"ok\"}".to_string(),
        )))
        .unwrap();
        assert_eq!(bytes.last(), Some(&b'\n'));

        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["type"], "signal");
        assert_eq!(value["name"], "summaryChanged");
        assert_eq!(value["payload"], "{\"status\":\"ok\"}");

        let hello: Value = serde_json::from_slice(&encode(&ServerMessage::hello()).unwrap()).unwrap();
        assert_eq!(hello["type"], "hello");
        assert_eq!(hello["service"], SERVICE_NAME);
        assert_eq!(hello["object_path"], OBJECT_PATH);
    }
}
