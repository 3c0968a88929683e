use super::clients::ClientHandle;
use super::WireProtocol;
use crate::config::WsProtocol;
use crate::event::{Author, ChatBroadcast, StreamingEvent, DEFAULT_PLATFORM};

/// Plain JSON protocol: every frame is a serialized [`StreamingEvent`].
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonProtocol;

impl WireProtocol for JsonProtocol {
    fn kind(&self) -> WsProtocol {
        WsProtocol::Json
    }

    fn render_chat(&self, chat: &ChatBroadcast) -> Option<String> {
        let message = chat.message.trim();
        if message.is_empty() {
            return None;
        }
        let platform = match chat.platform.trim() {
            "" => DEFAULT_PLATFORM,
            platform => platform,
        };
        self.render_event(&StreamingEvent::chat(
            platform,
            Author::named(&chat.author),
            message,
        ))
    }

    fn render_event(&self, event: &StreamingEvent) -> Option<String> {
        Some(serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string()))
    }

    fn on_frame(&self, _client: &ClientHandle, _frame: &str) -> Vec<String> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_render_chat_synthesizes_chat_event() {
        let frame = JsonProtocol
            .render_chat(&ChatBroadcast {
                platform: " ".to_string(),
                author: "".to_string(),
                message: " hi there ".to_string(),
            })
            .unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["type"], "chat");
        assert_eq!(value["platform"], "stream");
        assert_eq!(value["message"], "hi there");
        assert_eq!(value["author"]["effectiveName"], "unknown");
    }

    #[test]
    fn test_render_chat_skips_blank_message() {
        let chat = ChatBroadcast {
            platform: "tiktok".to_string(),
            author: "alice".to_string(),
            message: "  ".to_string(),
        };
        assert!(JsonProtocol.render_chat(&chat).is_none());
    }

    #[test]
    fn test_render_event_passes_event_through() {
        let event = StreamingEvent::error("boom", false);
        let frame = JsonProtocol.render_event(&event).unwrap();
        let decoded: StreamingEvent = serde_json::from_str(&frame).unwrap();
        assert_eq!(decoded, event);
    }
}
