//! Pure decision functions for the message pipeline — tested in isolation,
//! composed by `process_message`.

use wisp_core::config::QUOTE_MAX_CHARS;
use wisp_core::types::Source;

/// Prefix the user text with the quoted message it replies to.
///
/// The quote is untrusted text: it is capped at 200 characters (Unicode
/// scalar values, so a cap can never split a code point) with an ellipsis
/// marking truncation.
pub fn prefix_quote(text: &str, quote: Option<&str>) -> String {
    let Some(quote) = quote.filter(|q| !q.trim().is_empty()) else {
        return text.to_string();
    };

    let truncated: String = quote.chars().take(QUOTE_MAX_CHARS).collect();
    let suffix = if quote.chars().count() > QUOTE_MAX_CHARS {
        "…"
    } else {
        ""
    };
    format!("[replying to: {truncated}{suffix}]\n{text}")
}

/// Prepend the pending context warning to the user text.
pub fn inject_warning(warning: &str, text: &str) -> String {
    format!("{warning}\n{text}")
}

/// Should this session arm the context warning?
///
/// Only once: never when a warning is already pending, and never after a
/// compaction has already happened (the summary bought headroom; warning
/// again would nag).
pub fn should_warn_context(
    total_tokens: u64,
    context_window: u64,
    warn_threshold: f64,
    warning_pending: bool,
    compaction_count: u32,
) -> bool {
    !warning_pending
        && compaction_count == 0
        && (total_tokens as f64) > warn_threshold * context_window as f64
}

/// Is this reply a sentinel meaning "deliver nothing this turn"?
pub fn is_silent(reply: &str, silent_tokens: &[String]) -> bool {
    let trimmed = reply.trim();
    silent_tokens.iter().any(|token| token == trimmed)
}

/// Delivery policy: whether a reply goes back out through a channel.
///
/// `http` is not handled here — its response future is completed by the
/// pipeline regardless of this decision.
pub fn should_deliver(
    source: &Source,
    reply: &str,
    silent_tokens: &[String],
    no_delivery_sources: &[String],
) -> bool {
    if reply.trim().is_empty() {
        return false;
    }
    if is_silent(reply, silent_tokens) {
        return false;
    }
    if no_delivery_sources.iter().any(|s| s == source.as_str()) {
        return false;
    }
    source.delivers_via_channel()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_prefix_truncates_at_200_chars_with_ellipsis() {
        let quote = "X".repeat(300);
        let out = prefix_quote("what do you think?", Some(&quote));
        let expected_prefix = format!("[replying to: {}…]\n", "X".repeat(200));
        assert!(out.starts_with(&expected_prefix));
        assert!(out.ends_with("what do you think?"));
        // No run of 201 consecutive quote characters survives.
        assert!(!out.contains(&"X".repeat(201)));
    }

    #[test]
    fn short_quote_is_kept_verbatim_without_ellipsis() {
        let out = prefix_quote("ok", Some("see you at 5"));
        assert_eq!(out, "[replying to: see you at 5]\nok");
    }

    #[test]
    fn multibyte_quote_counts_chars_not_bytes() {
        let quote = "ä".repeat(250);
        let out = prefix_quote("hi", Some(&quote));
        assert!(out.contains(&format!("{}…", "ä".repeat(200))));
    }

    #[test]
    fn empty_quote_adds_no_prefix() {
        assert_eq!(prefix_quote("hello", None), "hello");
        assert_eq!(prefix_quote("hello", Some("  ")), "hello");
    }

    #[test]
    fn warning_arms_once_above_threshold() {
        // 900 of 1000 at 0.8 → warn.
        assert!(should_warn_context(900, 1000, 0.8, false, 0));
        // Already pending → no.
        assert!(!should_warn_context(900, 1000, 0.8, true, 0));
        // Already compacted → no.
        assert!(!should_warn_context(900, 1000, 0.8, false, 1));
        // Below threshold → no.
        assert!(!should_warn_context(700, 1000, 0.8, false, 0));
    }

    #[test]
    fn warning_injection_prepends() {
        let out = inject_warning("[context nearly full]", "original text");
        assert!(out.starts_with("[context nearly full]\n"));
        assert!(out.ends_with("original text"));
    }

    fn silent() -> Vec<String> {
        vec!["SILENT".to_string(), "NO_REPLY".to_string()]
    }

    #[test]
    fn silence_tokens_match_after_trimming() {
        assert!(is_silent("SILENT", &silent()));
        assert!(is_silent("  SILENT \n", &silent()));
        assert!(!is_silent("SILENT!", &silent()));
        assert!(!is_silent("I will stay silent", &silent()));
    }

    #[test]
    fn delivery_partition_by_source() {
        let none: Vec<String> = Vec::new();
        assert!(should_deliver(&Source::Telegram, "hi", &silent(), &none));
        assert!(should_deliver(&Source::Cli, "hi", &silent(), &none));
        assert!(!should_deliver(&Source::System, "hi", &silent(), &none));
        assert!(!should_deliver(&Source::Http, "hi", &silent(), &none));
    }

    #[test]
    fn empty_and_silent_replies_never_deliver() {
        let none: Vec<String> = Vec::new();
        assert!(!should_deliver(&Source::Telegram, "", &silent(), &none));
        assert!(!should_deliver(&Source::Telegram, "  \n", &silent(), &none));
        assert!(!should_deliver(&Source::Telegram, "SILENT", &silent(), &none));
    }

    #[test]
    fn no_delivery_set_suppresses_a_delivering_source() {
        let no_delivery = vec!["telegram".to_string()];
        assert!(!should_deliver(
            &Source::Telegram,
            "hi",
            &silent(),
            &no_delivery
        ));
    }
}
