//! Minimal XMPP-over-WebSocket emulation for chat overlay apps.
//!
//! Only the handshake those apps need is implemented: advertise PLAIN auth,
//! accept any `<auth>`, answer resource binding with a fixed JID, then push
//! chat as `<message>` stanzas.

use super::clients::ClientHandle;
use super::WireProtocol;
use crate::config::WsProtocol;
use crate::event::{ChatBroadcast, StreamingEvent, DEFAULT_PLATFORM, UNKNOWN_AUTHOR};

pub const SUBPROTOCOL: &str = "xmpp";
pub const BIND_JID: &str = "stream@internal/moblin";

pub const FEATURES_STANZA: &str =
    "<features><mechanisms><mechanism>PLAIN</mechanism></mechanisms></features>";
pub const SUCCESS_STANZA: &str = "<success/>";

pub fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            other => escaped.push(other),
        }
    }
    escaped
}

pub fn bind_stanza(jid: &str) -> String {
    format!("<iq><bind><jid>{}</jid></bind></iq>", escape_xml(jid))
}

pub fn message_stanza(from: &str, body: &str) -> String {
    format!(
        "<message from=\"{}\"><body>{}</body></message>",
        escape_xml(from),
        escape_xml(body)
    )
}

#[derive(Clone, Copy, Debug, Default)]
pub struct XmppProtocol;

impl WireProtocol for XmppProtocol {
    fn kind(&self) -> WsProtocol {
        WsProtocol::XmppEmulation
    }

    fn subprotocols(&self) -> &'static [&'static str] {
        &[SUBPROTOCOL]
    }

    fn serves_any_path(&self) -> bool {
        true
    }

    fn requires_handshake(&self) -> bool {
        true
    }

    fn on_open(&self, _client: &ClientHandle) -> Vec<String> {
        vec![FEATURES_STANZA.to_string()]
    }

    fn on_frame(&self, client: &ClientHandle, frame: &str) -> Vec<String> {
        let lower = frame.to_lowercase();

        if lower.contains("<auth") {
            client.mark_authenticated();
            return vec![SUCCESS_STANZA.to_string(), FEATURES_STANZA.to_string()];
        }

        if lower.contains("<iq") && lower.contains("<bind") {
            return vec![bind_stanza(BIND_JID)];
        }

        Vec::new()
    }

    fn render_chat(&self, chat: &ChatBroadcast) -> Option<String> {
        let body = chat.message.trim();
        if body.is_empty() {
            return None;
        }
        let sender = match chat.author.trim() {
            "" => UNKNOWN_AUTHOR,
            author => author,
        };
        let platform = match chat.platform.trim() {
            "" => DEFAULT_PLATFORM,
            platform => platform,
        };
        Some(message_stanza(&format!("{}/{}", platform, sender), body))
    }

    /// The emulated wire format has no raw event channel.
    fn render_event(&self, _event: &StreamingEvent) -> Option<String> {
        None
    }
}
