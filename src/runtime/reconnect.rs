/// Phrases in a disconnect reason meaning the source is simply not live.
const OFFLINE_PHRASES: &[&str] = &[
    "isn't online",
    "is not online",
    "not online",
    "isn't live",
    "not live",
    "is offline",
    "not currently live",
    "could not confirm the live",
    "não está ao vivo",
    "nao esta ao vivo",
    "não foi possível confirmar a live",
    "nao foi possivel confirmar a live",
];

/// Whether a disconnect reason says the upstream source is offline, which
/// selects the longer reconnect delay.
pub fn is_offline_reason(reason: &str) -> bool {
    let text = reason.trim().to_lowercase();
    if text.is_empty() {
        return false;
    }
    OFFLINE_PHRASES.iter().any(|phrase| text.contains(phrase))
}
