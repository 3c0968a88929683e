use crate::event::{Author, StreamingEvent, UNKNOWN_AUTHOR};
use serde_json::Value;

use super::PLATFORM;

const MAX_ERROR_DEPTH: usize = 4;

/// Which identity field becomes the author's effective name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthorMode {
    Username,
    DisplayName,
}

impl AuthorMode {
    pub fn parse(value: Option<&Value>) -> Self {
        match value.and_then(Value::as_str).map(str::trim) {
            Some("display-name") => AuthorMode::DisplayName,
            _ => AuthorMode::Username,
        }
    }
}

/// Strips leading `@` characters and lowercases a TikTok handle.
pub fn normalize_unique_id(value: Option<&Value>) -> String {
    text(value)
        .trim()
        .trim_start_matches('@')
        .to_lowercase()
}

/// Reads a scalar as text; numbers are common for TikTok user ids.
fn text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

fn field(data: &Value, key: &str) -> String {
    let direct = text(data.get(key));
    if !direct.trim().is_empty() {
        return direct.trim().to_string();
    }
    text(data.get("user").and_then(|user| user.get(key)))
        .trim()
        .to_string()
}

fn floor_number(value: Option<&Value>) -> i64 {
    let number = match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    if number.is_finite() {
        number.floor() as i64
    } else {
        0
    }
}

/// Author identity from a chat or gift payload.
///
/// Fields are read from the payload root first, then from its `user` object.
pub fn author_identity(data: &Value, mode: AuthorMode) -> Author {
    let username = field(data, "uniqueId");
    let display_name = field(data, "nickname");
    let id = field(data, "userId");

    let preference = match mode {
        AuthorMode::Username => [&username, &display_name, &id],
        AuthorMode::DisplayName => [&display_name, &username, &id],
    };
    let effective_name = preference
        .into_iter()
        .find(|candidate| !candidate.is_empty())
        .cloned()
        .unwrap_or_else(|| UNKNOWN_AUTHOR.to_string());

    let some = |s: String| Some(s).filter(|s| !s.is_empty());
    Author {
        id: some(id),
        username: some(username),
        display_name: some(display_name),
        effective_name,
    }
}

/// Renders a gift payload as a single chat-friendly line, e.g.
/// `[GIFT] 🎁 Rose x5 💎5 ✅`.
pub fn gift_text(data: &Value) -> String {
    let details = data.get("giftDetails").unwrap_or(&Value::Null);

    let gift_id = floor_number(data.get("giftId"));
    let name = text(details.get("giftName")).trim().to_string();
    let name = if !name.is_empty() {
        name
    } else if gift_id != 0 {
        format!("Gift #{}", gift_id)
    } else {
        "Gift".to_string()
    };

    let repeat_count = floor_number(data.get("repeatCount")).max(1);
    let repeat_end = floor_number(data.get("repeatEnd")) == 1;
    let diamond_each = floor_number(details.get("diamondCount"));
    let total_diamonds = if diamond_each > 0 {
        diamond_each.saturating_mul(repeat_count)
    } else {
        0
    };

    let diamonds = if total_diamonds > 0 {
        format!(" 💎{}", total_diamonds)
    } else {
        String::new()
    };
    let status = if repeat_end { " ✅" } else { " …" };

    format!("[GIFT] 🎁 {} x{}{}{}", name, repeat_count, diamonds, status)
}

/// Chat payload to event; `None` when the comment is blank.
pub fn chat_to_event(data: &Value, mode: AuthorMode) -> Option<StreamingEvent> {
    let message = text(data.get("comment")).trim().to_string();
    if message.is_empty() {
        return None;
    }
    Some(StreamingEvent::chat(PLATFORM, author_identity(data, mode), &message).with_raw(data.clone()))
}

pub fn gift_to_event(data: &Value, mode: AuthorMode) -> StreamingEvent {
    StreamingEvent::gift(PLATFORM, author_identity(data, mode), &gift_text(data))
        .with_raw(data.clone())
}

/// Best human-readable text inside an arbitrarily nested error payload.
pub fn extract_error_text(value: &Value) -> String {
    extract_at_depth(value, 0)
}

fn extract_at_depth(value: &Value, depth: usize) -> String {
    if depth > MAX_ERROR_DEPTH {
        return String::new();
    }

    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        Value::Array(items) => {
            if items.is_empty() {
                String::new()
            } else {
                value.to_string()
            }
        }
        Value::Object(row) => {
            for key in ["message", "reason", "error", "details", "statusMessage", "msg"] {
                if let Some(candidate) = row.get(key) {
                    let text = extract_at_depth(candidate, depth + 1);
                    if !text.is_empty() {
                        return text;
                    }
                }
            }

            let nested = nested_errors(value, depth + 1);
            if !nested.is_empty() {
                return nested;
            }

            if row.is_empty() {
                String::new()
            } else {
                value.to_string()
            }
        }
    }
}

fn nested_errors(value: &Value, depth: usize) -> String {
    value
        .get("errors")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .map(|entry| extract_at_depth(entry, depth))
                .filter(|text| !text.is_empty())
                .collect::<Vec<_>>()
                .join(" | ")
        })
        .unwrap_or_default()
}

/// Maps an upstream connect failure to the message surfaced in status.
pub fn format_connect_error(error: &Value) -> String {
    let message = extract_error_text(error);
    let nested = nested_errors(error, 0);
    let combined = format!("{} {}", message, nested).to_lowercase();

    if combined.contains("user_not_found") {
        return "TikTok user not found. Check the @ handle.".to_string();
    }
    if combined.contains("fetchisliveerror") {
        return "Could not confirm the live. Check that the user is live and try again."
            .to_string();
    }
    if combined.contains("euler") && combined.contains("permission") {
        return "Failed to resolve the live room without the Euler fallback; try connecting again."
            .to_string();
    }

    if !nested.is_empty() {
        return nested;
    }
    if !message.is_empty() {
        return message;
    }
    "Failed to connect to TikTok Live.".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_unique_id() {
        assert_eq!(normalize_unique_id(Some(&json!("@@Alice "))), "alice");
        assert_eq!(normalize_unique_id(Some(&json!("@"))), "");
        assert_eq!(normalize_unique_id(None), "");
    }

    #[test]
    fn test_author_identity_prefers_username_by_default() {
        let data = json!({"uniqueId": "alice", "nickname": "Alice", "userId": 123});
        let author = author_identity(&data, AuthorMode::Username);
        assert_eq!(author.effective_name, "alice");
        assert_eq!(author.id.as_deref(), Some("123"));

        let author = author_identity(&data, AuthorMode::DisplayName);
        assert_eq!(author.effective_name, "Alice");
    }

    #[test]
    fn test_author_identity_reads_nested_user() {
        let data = json!({"user": {"nickname": "Bob", "userId": "7"}});
        let author = author_identity(&data, AuthorMode::Username);
        assert_eq!(author.username, None);
        assert_eq!(author.effective_name, "Bob");

        let author = author_identity(&json!({}), AuthorMode::Username);
        assert_eq!(author.effective_name, UNKNOWN_AUTHOR);
    }

    #[test]
    fn test_gift_text_with_diamonds_and_streak_end() {
        let data = json!({
            "giftId": 5655,
            "repeatCount": 3,
            "repeatEnd": 1,
            "giftDetails": {"giftName": "Rose", "diamondCount": 1}
        });
        assert_eq!(gift_text(&data), "[GIFT] 🎁 Rose x3 💎3 ✅");
    }

    #[test]
    fn test_gift_text_fallback_name_and_pending_streak() {
        assert_eq!(gift_text(&json!({"giftId": 42})), "[GIFT] 🎁 Gift #42 x1 …");
        assert_eq!(gift_text(&json!({})), "[GIFT] 🎁 Gift x1 …");
    }

    #[test]
    fn test_gift_text_saturates_huge_diamond_totals() {
        let data = json!({
            "repeatCount": 100,
            "giftDetails": {"giftName": "Rose", "diamondCount": 1e18}
        });
        assert_eq!(
            gift_text(&data),
            format!("[GIFT] 🎁 Rose x100 💎{} …", i64::MAX)
        );
    }

    #[test]
    fn test_chat_to_event_skips_blank_comment() {
        assert!(chat_to_event(&json!({"comment": "   "}), AuthorMode::Username).is_none());

        let event = chat_to_event(&json!({"comment": " hi ", "uniqueId": "carol"}), AuthorMode::Username)
            .unwrap();
        match event {
            StreamingEvent::Chat(chat) => {
                assert_eq!(chat.message, "hi");
                assert_eq!(chat.platform, "tiktok");
                assert_eq!(chat.author.effective_name, "carol");
                assert!(chat.raw.is_some());
            }
            other => panic!("Expected chat event, got {:?}", other),
        }
    }

    #[test]
    fn test_extract_error_text_walks_nested_payloads() {
        assert_eq!(extract_error_text(&json!({"error": {"reason": "boom"}})), "boom");
        assert_eq!(
            extract_error_text(&json!({"errors": [{"message": "a"}, "b"]})),
            "a | b"
        );
        assert_eq!(extract_error_text(&json!({"code": 1})), r#"{"code":1}"#);
        assert_eq!(extract_error_text(&json!({})), "");
    }

    #[test]
    fn test_format_connect_error_known_cases() {
        assert_eq!(
            format_connect_error(&json!({"message": "USER_NOT_FOUND"})),
            "TikTok user not found. Check the @ handle."
        );
        assert!(format_connect_error(&json!({"errors": [{"name": "FetchIsLiveError"}]}))
            .starts_with("Could not confirm the live"));
        assert_eq!(
            format_connect_error(&json!({"message": "socket hang up"})),
            "socket hang up"
        );
        assert_eq!(format_connect_error(&json!(null)), "Failed to connect to TikTok Live.");
    }
}
