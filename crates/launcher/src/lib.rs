//! Launcher wire protocol
//!
//! The harness spawns `placidtest-launcher` detached, writes one
//! [`LaunchRequest`] line to its stdin and reads one [`LaunchReply`] line
//! from its stdout. The launcher then keeps running on its own until the
//! browser it started disconnects.

use placidtest_common::BrowserKind;
use serde::{Deserialize, Serialize};

/// Request sent to the launcher process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchRequest {
    pub browser: BrowserKind,
    pub headless: bool,
}

/// Reply from the launcher process: an endpoint or a launch error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchReply {
    // The established wire key capitalizes WS, which camelCase cannot
    // produce from the field name.
    #[serde(rename = "browserWSEndpoint", skip_serializing_if = "Option::is_none")]
    pub browser_ws_endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LaunchReply {
    pub fn endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            browser_ws_endpoint: Some(endpoint.into()),
            error: None,
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self {
            browser_ws_endpoint: None,
            error: Some(reason.into()),
        }
    }

    /// Collapse the reply into the endpoint or the launch failure reason.
    pub fn into_result(self) -> Result<String, String> {
        match (self.browser_ws_endpoint, self.error) {
            (Some(endpoint), _) => Ok(endpoint),
            (None, Some(reason)) => Err(reason),
            (None, None) => Err("launcher reply carried neither endpoint nor error".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_wire_format_is_camel_case() {
        let req = LaunchRequest {
            browser: BrowserKind::Chromium,
            headless: true,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["browser"], "chromium");
        assert_eq!(json["headless"], true);

        let parsed: LaunchRequest =
            serde_json::from_str(r#"{"browser":"chromium","headless":false}"#).unwrap();
        assert_eq!(parsed.browser, BrowserKind::Chromium);
        assert!(!parsed.headless);
    }

    #[test]
    fn endpoint_reply_omits_error_key() {
        let json = serde_json::to_value(LaunchReply::endpoint("ws://127.0.0.1:9222/abc")).unwrap();
        assert_eq!(json["browserWSEndpoint"], "ws://127.0.0.1:9222/abc");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn endpoint_reply_parses_the_capitalized_ws_key() {
        let reply: LaunchReply =
            serde_json::from_str(r#"{"browserWSEndpoint":"ws://127.0.0.1:9222/abc"}"#).unwrap();
        assert_eq!(
            reply.browser_ws_endpoint.as_deref(),
            Some("ws://127.0.0.1:9222/abc")
        );
    }

    #[test]
    fn error_reply_omits_endpoint_key() {
        let json = serde_json::to_value(LaunchReply::error("no chrome")).unwrap();
        assert_eq!(json["error"], "no chrome");
        assert!(json.get("browserWSEndpoint").is_none());
    }

    #[test]
    fn reply_into_result() {
        assert_eq!(
            LaunchReply::endpoint("ws://x").into_result(),
            Ok("ws://x".to_string())
        );
        assert_eq!(
            LaunchReply::error("boom").into_result(),
            Err("boom".to_string())
        );
        let empty = LaunchReply {
            browser_ws_endpoint: None,
            error: None,
        };
        assert!(empty.into_result().is_err());
    }

    #[test]
    fn request_with_unknown_browser_is_rejected() {
        let res = serde_json::from_str::<LaunchRequest>(r#"{"browser":"lynx","headless":true}"#);
        assert!(res.is_err());
    }
}
