use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Supported host platforms. `Other` covers tabs we monitor without a
/// dedicated adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Platform {
    ChatGpt,
    Claude,
    Gemini,
    Copilot,
    Other,
}

impl Platform {
    pub fn label(&self) -> &'static str {
        match self {
            Platform::ChatGpt => "chat-gpt",
            Platform::Claude => "claude",
            Platform::Gemini => "gemini",
            Platform::Copilot => "copilot",
            Platform::Other => "other",
        }
    }
}

/// One qualifying composition change. Ephemeral: lives for the duration
/// of a single classify/rewrite/commit cycle and is never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftEvent {
    pub platform: Platform,
    pub text: String,
    pub captured_at: DateTime<Utc>,
}

impl DraftEvent {
    pub fn new(platform: Platform, text: String) -> Self {
        DraftEvent {
            platform,
            text,
            captured_at: Utc::now(),
        }
    }
}

/// Raw page state reported by the in-page observer: the tab's URL plus the
/// text content of the composition fields it watches, keyed by field id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageSnapshot {
    pub url: String,
    #[serde(default)]
    pub fields: HashMap<String, String>,
}

/// Platform-specific observation capability. Everything downstream of
/// here is platform-agnostic; the coordinator never sees field ids or
/// URLs.
pub trait PlatformAdapter: Send + Sync {
    fn platform(&self) -> Platform;

    /// Whether this adapter claims the given hostname.
    fn matches(&self, host: &str) -> bool;

    /// Pull the current draft out of a page snapshot, if any.
    fn extract_draft_text(&self, page: &PageSnapshot) -> Option<String>;
}

/// Table-driven adapter: each supported platform differs only in which
/// hosts it claims and which composition fields it reads, in priority
/// order.
struct HostAdapter {
    platform: Platform,
    hosts: &'static [&'static str],
    field_keys: &'static [&'static str],
}

impl PlatformAdapter for HostAdapter {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn matches(&self, host: &str) -> bool {
        self.hosts
            .iter()
            .any(|h| host == *h || host.ends_with(&format!(".{h}")))
    }

    fn extract_draft_text(&self, page: &PageSnapshot) -> Option<String> {
        for key in self.field_keys {
            if let Some(value) = page.fields.get(*key) {
                let trimmed = value.trim();
                if !trimmed.is_empty() {
                    return Some(trimmed.to_string());
                }
            }
        }
        None
    }
}

/// Registry of all supported platforms, consulted per page snapshot.
pub struct AdapterRegistry {
    adapters: Vec<Box<dyn PlatformAdapter>>,
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        AdapterRegistry {
            adapters: vec![
                Box::new(HostAdapter {
                    platform: Platform::ChatGpt,
                    hosts: &["chatgpt.com", "chat.openai.com"],
                    field_keys: &["prompt-textarea", "composer"],
                }),
                Box::new(HostAdapter {
                    platform: Platform::Claude,
                    hosts: &["claude.ai"],
                    field_keys: &["prompt-editor", "composer"],
                }),
                Box::new(HostAdapter {
                    platform: Platform::Gemini,
                    hosts: &["gemini.google.com"],
                    field_keys: &["rich-textarea", "composer"],
                }),
                Box::new(HostAdapter {
                    platform: Platform::Copilot,
                    hosts: &["copilot.microsoft.com"],
                    field_keys: &["userInput", "searchbox", "composer"],
                }),
            ],
        }
    }
}

impl AdapterRegistry {
    /// Resolve the adapter responsible for a tab URL.
    pub fn resolve(&self, page_url: &str) -> Option<&dyn PlatformAdapter> {
        let parsed = url::Url::parse(page_url).ok()?;
        let host = parsed.host_str()?;
        self.adapters
            .iter()
            .find(|a| a.matches(host))
            .map(|a| a.as_ref())
    }

    /// Turn a page snapshot into a draft event, if the page belongs to a
    /// supported platform and currently holds a non-empty draft.
    pub fn extract(&self, page: &PageSnapshot) -> Option<DraftEvent> {
        let adapter = self.resolve(&page.url)?;
        let text = adapter.extract_draft_text(page)?;
        Some(DraftEvent::new(adapter.platform(), text))
    }
}

/// Minimum gap between classified composition events for one tab.
pub const DRAFT_DEBOUNCE_MS: u64 = 400;

/// Drops events arriving faster than the configured gap, so bursty
/// typing does not translate into a classify call per keystroke.
pub struct Debouncer {
    min_gap: Duration,
    last: Option<Instant>,
}

impl Default for Debouncer {
    fn default() -> Self {
        Debouncer::new(Duration::from_millis(DRAFT_DEBOUNCE_MS))
    }
}

impl Debouncer {
    pub fn new(min_gap: Duration) -> Self {
        Debouncer { min_gap, last: None }
    }

    pub fn allow(&mut self) -> bool {
        let now = Instant::now();
        match self.last {
            Some(prev) if now.duration_since(prev) < self.min_gap => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(url: &str, field: &str, text: &str) -> PageSnapshot {
        let mut fields = HashMap::new();
        fields.insert(field.to_string(), text.to_string());
        PageSnapshot {
            url: url.to_string(),
            fields,
        }
    }

    #[test]
    fn resolves_known_hosts() {
        let registry = AdapterRegistry::default();
        assert_eq!(
            registry.resolve("https://chatgpt.com/c/123").map(|a| a.platform()),
            Some(Platform::ChatGpt)
        );
        assert_eq!(
            registry.resolve("https://claude.ai/chat/abc").map(|a| a.platform()),
            Some(Platform::Claude)
        );
        assert_eq!(
            registry
                .resolve("https://gemini.google.com/app")
                .map(|a| a.platform()),
            Some(Platform::Gemini)
        );
        assert!(registry.resolve("https://example.com/").is_none());
        assert!(registry.resolve("not a url").is_none());
    }

    #[test]
    fn subdomains_are_claimed() {
        let registry = AdapterRegistry::default();
        assert_eq!(
            registry
                .resolve("https://chat.openai.com/c/1")
                .map(|a| a.platform()),
            Some(Platform::ChatGpt)
        );
        // A lookalike host must not match.
        assert!(registry.resolve("https://notchatgpt.com/").is_none());
    }

    #[test]
    fn extracts_draft_from_priority_field() {
        let registry = AdapterRegistry::default();
        let page = snapshot("https://chatgpt.com/", "prompt-textarea", "  draft text  ");
        let event = registry.extract(&page).unwrap();
        assert_eq!(event.platform, Platform::ChatGpt);
        assert_eq!(event.text, "draft text");
    }

    #[test]
    fn empty_fields_yield_no_event() {
        let registry = AdapterRegistry::default();
        let page = snapshot("https://claude.ai/", "prompt-editor", "   ");
        assert!(registry.extract(&page).is_none());

        let page = snapshot("https://claude.ai/", "unrelated-field", "text");
        assert!(registry.extract(&page).is_none());
    }

    #[test]
    fn debouncer_drops_bursts() {
        let mut debouncer = Debouncer::new(Duration::from_millis(50));
        assert!(debouncer.allow());
        assert!(!debouncer.allow());
        std::thread::sleep(Duration::from_millis(60));
        assert!(debouncer.allow());
    }
}
