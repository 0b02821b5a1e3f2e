pub mod ua_parser;

use serde::Serialize;

pub use ua_parser::{describe_user_agent, parse_user_agent};

/// Label stored when a User-Agent says nothing useful
pub const UNKNOWN_DEVICE: &str = "Unknown device";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Bot,
    Desktop,
    Mobile,
    Tablet,
    #[default]
    Unknown,
}

/// What a User-Agent header reveals about the client
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub browser: Option<String>,
    pub browser_version: Option<String>,
    pub kind: DeviceKind,
    pub os: Option<String>,
    pub os_version: Option<String>,
}

impl DeviceInfo {
    /// Short human label, e.g. "Chrome on Windows 10"
    pub fn label(&self) -> String {
        match (self.browser.as_deref(), self.os.as_deref()) {
            (Some(browser), Some(os)) => format!("{browser} on {os}"),
            (Some(name), None) | (None, Some(name)) => name.to_string(),
            (None, None) => UNKNOWN_DEVICE.to_string(),
        }
    }
}
