use std::time::Duration;
use tokio::time::Instant;

/// Window inside which a repeated error message is suppressed.
pub const ERROR_DEDUP_WINDOW: Duration = Duration::from_millis(2_000);

/// Drops an error when it repeats the previous one within a short window.
///
/// Messages are compared trimmed and lowercased. Blank messages always pass.
#[derive(Debug)]
pub struct ErrorThrottle {
    window: Duration,
    last: Option<(String, Instant)>,
}

impl Default for ErrorThrottle {
    fn default() -> Self {
        Self::new(ERROR_DEDUP_WINDOW)
    }
}

impl ErrorThrottle {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    /// Returns `true` when the message should be surfaced, and records it.
    pub fn admit(&mut self, message: &str) -> bool {
        let signature = message.trim().to_lowercase();
        if signature.is_empty() {
            return true;
        }

        let now = Instant::now();
        if let Some((previous, at)) = &self.last {
            if *previous == signature && now.duration_since(*at) < self.window {
                return false;
            }
        }

        self.last = Some((signature, now));
        true
    }
}
