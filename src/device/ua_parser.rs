use woothee::parser::Parser;

use super::{DeviceInfo, DeviceKind};

/// Parse a User-Agent string into device information
pub fn parse_user_agent(user_agent: &str) -> DeviceInfo {
    let Some(result) = Parser::new().parse(user_agent) else {
        return DeviceInfo::default();
    };

    let kind = match result.category {
        "pc" => DeviceKind::Desktop,
        "smartphone" | "mobilephone" => DeviceKind::Mobile,
        "tablet" => DeviceKind::Tablet,
        "crawler" => DeviceKind::Bot,
        _ => DeviceKind::Unknown,
    };

    DeviceInfo {
        browser: known(result.name),
        browser_version: known(result.version),
        kind,
        os: known(result.os),
        os_version: known(&result.os_version),
    }
}

/// The device label stored with a session opened by `user_agent`
pub fn describe_user_agent(user_agent: &str) -> String {
    parse_user_agent(user_agent).label()
}

/// `None` for woothee's empty and "UNKNOWN" placeholders
fn known(value: &str) -> Option<String> {
    if value.is_empty() || value == "UNKNOWN" {
        None
    } else {
        Some(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::UNKNOWN_DEVICE;

    const CHROME_WINDOWS: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

    #[test]
    fn test_parse_chrome_windows() {
        let info = parse_user_agent(CHROME_WINDOWS);

        assert_eq!(info.kind, DeviceKind::Desktop);
        assert_eq!(info.browser.as_deref(), Some("Chrome"));
        assert!(info.browser_version.is_some());
        assert_eq!(info.os.as_deref(), Some("Windows 10"));
        assert_eq!(describe_user_agent(CHROME_WINDOWS), "Chrome on Windows 10");
    }

    #[test]
    fn test_parse_safari_ios() {
        let ua = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1";
        let info = parse_user_agent(ua);

        assert_eq!(info.kind, DeviceKind::Mobile);
        assert!(describe_user_agent(ua).starts_with("Safari"));
    }

    #[test]
    fn test_parse_bot() {
        let info = parse_user_agent("Googlebot/2.1 (+http://www.google.com/bot.html)");
        assert_eq!(info.kind, DeviceKind::Bot);
    }

    #[test]
    fn test_unknown_agents_get_placeholder_label() {
        assert_eq!(describe_user_agent(""), UNKNOWN_DEVICE);
        assert_eq!(describe_user_agent("SomeUnknownClient/1.0"), UNKNOWN_DEVICE);
        assert_eq!(parse_user_agent("").kind, DeviceKind::Unknown);
    }
}
