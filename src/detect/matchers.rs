//! Affirmative-control matching: picks the element to click once a pause
//! dialog has been sighted.
//!
//! Pure like [`detect`](super::detect): selectors run against a snapshot and
//! the result is a [`DismissalPlan`], a *re-findable description* of the chosen
//! control rather than a node handle. The host re-runs the same selection
//! against the live page when it clicks, so a stale plan (dialog already gone)
//! degrades to a harmless no-match.
//!
//! Strategies are tried in order, first hit wins:
//! 1. attribute-based: markup that names its own purpose;
//! 2. text-based: clickable elements whose text contains "yes";
//! 3. dialog-scoped: any button-ish element inside a dialog container whose
//!    text contains "yes" or "continue".
//!
//! Button text is matched case-insensitively throughout, unlike the phrase
//! scan one stage earlier.

use scraper::{ElementRef, Html, Selector};

use super::{PageSnapshot, DIALOG_CONTAINER_SELECTORS};

/// Self-describing control markup, most specific first.
const ATTRIBUTE_STRATEGIES: &[&str] = &[
    r#"button[aria-label*="Yes"]"#,
    r#"button[data-action="continue"]"#,
    ".continue-button",
    ".yes-button",
];

/// Clickable-element selectors for the text stage. `tp-yt-paper-button` and
/// `yt-button-renderer` are the player's custom button elements.
const TEXT_STRATEGY_SELECTORS: &[&str] = &[
    "button",
    "tp-yt-paper-button",
    "yt-button-renderer",
    r#"[role="button"]"#,
];

const TEXT_STAGE_NEEDLE: &str = "yes";

/// Button-ish elements searched inside a dialog container.
const SCOPED_TARGET_SELECTORS: &[&str] = &["button", r#"[role="button"]"#];

const SCOPED_NEEDLES: &[&str] = &["yes", "continue"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DismissalStrategy {
    Attribute,
    ButtonText,
    DialogScoped,
}

impl std::fmt::Display for DismissalStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            DismissalStrategy::Attribute => "attribute",
            DismissalStrategy::ButtonText => "button-text",
            DismissalStrategy::DialogScoped => "dialog-scoped",
        })
    }
}

/// Everything the host needs to re-find and click the chosen control on the
/// live page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DismissalPlan {
    pub strategy: DismissalStrategy,
    /// Container selector to search within (dialog-scoped stage only).
    pub scope: Option<String>,
    /// Selector for the control itself (or its candidates).
    pub selector: String,
    /// Case-insensitive substring the control's text must contain, when the
    /// selector alone is not specific enough.
    pub needle: Option<String>,
    /// Trimmed text of the matched element, for logging.
    pub matched_text: String,
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

/// Choose the affirmative control in the snapshot, if any.
///
/// Run this against a snapshot taken *after* the dismissal delay; the plan
/// describes what to click now, not what was seen at detection time.
pub fn find_dismissal(snapshot: &PageSnapshot) -> Option<DismissalPlan> {
    let doc = Html::parse_document(snapshot.html());

    // Stage 1: attribute strategies. First snapshot match wins; snapshot
    // presence already implies visibility.
    for attr_sel in ATTRIBUTE_STRATEGIES {
        if let Ok(selector) = Selector::parse(attr_sel) {
            if let Some(element) = doc.select(&selector).next() {
                return Some(DismissalPlan {
                    strategy: DismissalStrategy::Attribute,
                    scope: None,
                    selector: attr_sel.to_string(),
                    needle: None,
                    matched_text: element_text(element),
                });
            }
        }
    }

    // Stage 2: clickable elements whose text says yes.
    for text_sel in TEXT_STRATEGY_SELECTORS {
        if let Ok(selector) = Selector::parse(text_sel) {
            for element in doc.select(&selector) {
                let text = element_text(element);
                if text.to_lowercase().contains(TEXT_STAGE_NEEDLE) {
                    return Some(DismissalPlan {
                        strategy: DismissalStrategy::ButtonText,
                        scope: None,
                        selector: text_sel.to_string(),
                        needle: Some(TEXT_STAGE_NEEDLE.to_string()),
                        matched_text: text,
                    });
                }
            }
        }
    }

    // Stage 3: anything button-ish inside a dialog container.
    for container_sel in DIALOG_CONTAINER_SELECTORS {
        let Ok(container_selector) = Selector::parse(container_sel) else {
            continue;
        };
        for container in doc.select(&container_selector) {
            for target_sel in SCOPED_TARGET_SELECTORS {
                if let Ok(selector) = Selector::parse(target_sel) {
                    for element in container.select(&selector) {
                        let text = element_text(element);
                        let lower = text.to_lowercase();
                        if let Some(needle) =
                            SCOPED_NEEDLES.iter().find(|n| lower.contains(*n))
                        {
                            return Some(DismissalPlan {
                                strategy: DismissalStrategy::DialogScoped,
                                scope: Some(container_sel.to_string()),
                                selector: target_sel.to_string(),
                                needle: Some(needle.to_string()),
                                matched_text: text,
                            });
                        }
                    }
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
    fn test_attribute_strategy_beats_text_strategy() {
        let snap = PageSnapshot::from_html(
            r#"<button>Yes</button><button aria-label="Yes, keep playing">OK</button>"#,
        );
        let plan = find_dismissal(&snap).unwrap();
        assert_eq!(plan.strategy, DismissalStrategy::Attribute);
        assert_eq!(plan.selector, r#"button[aria-label*="Yes"]"#);
        assert_eq!(plan.needle, None);
        assert_eq!(plan.matched_text, "OK");
    }

    /// Text stage lowercases both sides, so "YES PLEASE" still matches.
    #[test]
    fn test_text_strategy_is_case_insensitive() {
        let snap = PageSnapshot::from_html("<button>YES PLEASE</button>");
        let plan = find_dismissal(&snap).unwrap();
        assert_eq!(plan.strategy, DismissalStrategy::ButtonText);
        assert_eq!(plan.selector, "button");
        assert_eq!(plan.needle.as_deref(), Some("yes"));
        assert_eq!(plan.matched_text, "YES PLEASE");
    }

    /// The player's custom button elements are first-class candidates.
    #[test]
    fn test_custom_player_buttons_are_matched() {
        let snap = PageSnapshot::from_html("<tp-yt-paper-button>Yes</tp-yt-paper-button>");
        let plan = find_dismissal(&snap).unwrap();
        assert_eq!(plan.strategy, DismissalStrategy::ButtonText);
        assert_eq!(plan.selector, "tp-yt-paper-button");
    }

    /// A control that only says "Continue" is reachable through the
    /// dialog-scoped stage, and the plan records the needle that hit.
    #[test]
    fn test_dialog_scoped_fallback_matches_continue() {
        let snap = PageSnapshot::from_html(
            r#"<div class="modal"><div role="button">Continue</div></div>"#,
        );
        let plan = find_dismissal(&snap).unwrap();
        assert_eq!(plan.strategy, DismissalStrategy::DialogScoped);
        assert_eq!(plan.scope.as_deref(), Some(".modal"));
        assert_eq!(plan.selector, r#"[role="button"]"#);
        assert_eq!(plan.needle.as_deref(), Some("continue"));
        assert_eq!(plan.matched_text, "Continue");
    }

    /// "Continue" outside any dialog container is not a candidate: the global
    /// text stage only accepts "yes".
    #[test]
    fn test_bare_continue_button_is_not_matched() {
        let snap = PageSnapshot::from_html("<button>Continue</button>");
        assert_eq!(find_dismissal(&snap), None);
    }

    #[test]
    fn test_no_affirmative_control_yields_none() {
        let snap = PageSnapshot::from_html(
            r#"<div role="dialog"><button>Cancel</button><button>Dismiss</button></div>"#,
        );
        assert_eq!(find_dismissal(&snap), None);
    }
}
