//! Interruption-dialog detection, the pure half of the dismissal engine.
//!
//! Everything in this module operates on a [`PageSnapshot`] captured by the
//! page host and returns plain data. No host round-trips, no clocks, no
//! logging: the agent decides what to do with a sighting, the host executes
//! the resulting [`matchers::DismissalPlan`].
//!
//! Visibility is baked into the snapshot, not checked here: the host's
//! serializer only emits elements that have a layout box, so *present in the
//! snapshot* already means *visible on the page*. Detection over a snapshot
//! therefore never needs style or geometry information.
//!
//! Two-stage detection, first hit wins:
//! 1. case-sensitive scan of the visible text for the known pause phrases
//!    (exact substrings, authored casing);
//! 2. fallback heuristic: any dialog-shaped container whose text mentions
//!    continue / watching / paused, case-insensitively.

use std::sync::OnceLock;

use aho_corasick::AhoCorasick;
use scraper::{Html, Selector};

pub mod matchers;

pub use matchers::{find_dismissal, DismissalPlan, DismissalStrategy};

/// Pause-dialog phrases, exactly as the player renders them. The scan is
/// case-sensitive on purpose: these are verbatim UI strings, and loosening the
/// match is what the container heuristic below is for.
pub const PAUSE_PHRASES: &[&str] = &[
    "Video paused. Continue watching?",
    "Continue watching?",
    "Are you still watching?",
    "Still there?",
];

/// Containers the fallback heuristic inspects, in priority order.
pub(crate) const DIALOG_CONTAINER_SELECTORS: &[&str] =
    &[r#"[role="dialog"]"#, ".dialog", ".popup", ".modal"];

/// Keywords that make a dialog-shaped container count as a pause dialog
/// (matched case-insensitively against the container's text).
const CONTAINER_KEYWORDS: &[&str] = &["continue", "watching", "paused"];

static PHRASE_MATCHER: OnceLock<AhoCorasick> = OnceLock::new();

fn phrase_matcher() -> &'static AhoCorasick {
    PHRASE_MATCHER.get_or_init(|| {
        // Phrases are plain substrings; Aho-Corasick scans all four in one pass.
        AhoCorasick::new(PAUSE_PHRASES).expect("valid pause phrases")
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Snapshot
// ─────────────────────────────────────────────────────────────────────────────

/// What the host saw on the page at one instant: serialized HTML of the
/// *visible* subtree plus the rendered text. Plain owned strings, so a
/// snapshot can cross task boundaries freely; parsing happens inside the pure
/// functions that need a DOM.
#[derive(Debug, Clone)]
pub struct PageSnapshot {
    html: String,
    text: String,
}

impl PageSnapshot {
    pub fn new(html: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            html: html.into(),
            text: text.into(),
        }
    }

    /// Build a snapshot from bare HTML, deriving the text the way a renderer
    /// roughly would (block text joined with newlines). Good enough for tests
    /// and offline probing; the live host supplies real rendered text.
    pub fn from_html(html: impl Into<String>) -> Self {
        let html = html.into();
        let doc = Html::parse_document(&html);
        let text = doc
            .root_element()
            .text()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        Self { html, text }
    }

    pub fn html(&self) -> &str {
        &self.html
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Detection
// ─────────────────────────────────────────────────────────────────────────────

/// Evidence that a pause dialog is on screen. Exactly one of the two fields is
/// set, recording which stage produced the sighting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogSighting {
    /// The phrase the text scan hit, verbatim.
    pub matched_text: Option<String>,
    /// The container selector the fallback heuristic hit.
    pub matched_container: Option<String>,
}

/// Decide whether the snapshot shows a pause dialog.
///
/// Returns `None` for "nothing to dismiss"; a miss is an expected outcome,
/// not an error.
pub fn detect(snapshot: &PageSnapshot) -> Option<DialogSighting> {
    // Stage 1: exact phrases in the rendered text.
    if let Some(m) = phrase_matcher().find(snapshot.text()) {
        return Some(DialogSighting {
            matched_text: Some(PAUSE_PHRASES[m.pattern().as_usize()].to_string()),
            matched_container: None,
        });
    }

    // Stage 2: dialog-shaped containers talking about pausing.
    let doc = Html::parse_document(snapshot.html());
    for container_sel in DIALOG_CONTAINER_SELECTORS {
        if let Ok(selector) = Selector::parse(container_sel) {
            for element in doc.select(&selector) {
                let text = element.text().collect::<String>().to_lowercase();
                if CONTAINER_KEYWORDS.iter().any(|kw| text.contains(kw)) {
                    return Some(DialogSighting {
                        matched_text: None,
                        matched_container: Some(container_sel.to_string()),
                    });
                }
            }
        }
    }

    None
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_phrase_is_detected() {
        let snap = PageSnapshot::from_html(
            "<div><p>Now playing</p><span>Are you still watching?</span></div>",
        );
        let sighting = detect(&snap).expect("phrase should be spotted");
        assert_eq!(sighting.matched_text.as_deref(), Some("Are you still watching?"));
        assert_eq!(sighting.matched_container, None);
    }

    /// The phrase scan is deliberately case-sensitive: a lowercased variant in
    /// plain page copy must not trigger anything.
    #[test]
    fn test_phrase_scan_rejects_wrong_casing() {
        let snap =
            PageSnapshot::from_html("<div><p>are you still watching? (blog post title)</p></div>");
        assert_eq!(detect(&snap), None);
    }

    /// The container heuristic is the opposite: casing does not matter as long
    /// as a dialog-shaped element talks about pausing.
    #[test]
    fn test_container_heuristic_is_case_insensitive() {
        let snap = PageSnapshot::from_html(r#"<div class="popup">PAUSED - tap to resume</div>"#);
        let sighting = detect(&snap).expect("popup should be spotted");
        assert_eq!(sighting.matched_text, None);
        assert_eq!(sighting.matched_container.as_deref(), Some(".popup"));
    }

    #[test]
    fn test_phrase_wins_over_container() {
        let snap = PageSnapshot::from_html(
            r#"<div role="dialog">Continue watching?</div>"#,
        );
        let sighting = detect(&snap).unwrap();
        assert_eq!(sighting.matched_text.as_deref(), Some("Continue watching?"));
        assert_eq!(sighting.matched_container, None);
    }

    /// A dialog container about something else entirely stays untouched.
    #[test]
    fn test_unrelated_dialog_is_ignored() {
        let snap = PageSnapshot::from_html(
            r#"<div role="dialog">Rate this playlist!</div><div class="modal">Sign in</div>"#,
        );
        assert_eq!(detect(&snap), None);
    }

    #[test]
    fn test_empty_page_detects_nothing() {
        assert_eq!(detect(&PageSnapshot::from_html("<html><body></body></html>")), None);
    }
}
