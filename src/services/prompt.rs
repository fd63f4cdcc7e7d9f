//! Prompt assembly.
//!
//! Turns a caller's prompt, optional context and optional system prompt into
//! the exact system/user strings sent to a provider, and measures the
//! combined length that drives model routing.

pub use crate::core::config::ADVISORY_POLICY;

const PROMPT_OPEN: &str = "<prompt>";
const PROMPT_CLOSE: &str = "</prompt>";
const CONTEXT_OPEN: &str = "<context>";
const CONTEXT_CLOSE: &str = "</context>";
const OTHERS_OPEN: &str = "<others>";
const OTHERS_CLOSE: &str = "</others>";

/// The strings sent to a provider plus the routing input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledPrompt {
    pub system_text: String,
    pub user_text: String,
    pub combined_len: usize,
}

/// Treat empty strings the same as absent ones.
fn present(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/// Build the system and user text for one request.
///
/// `system_prompt` must already be `None` for endpoints that do not accept
/// caller instructions. `preamble` is the endpoint's fixed policy, placed
/// before any caller instructions.
pub fn assemble(
    prompt: &str,
    context: Option<&str>,
    system_prompt: Option<&str>,
    preamble: Option<&str>,
) -> AssembledPrompt {
    let context = present(context);
    let system_prompt = present(system_prompt);

    AssembledPrompt {
        system_text: system_text(system_prompt, preamble),
        user_text: wrap_user_text(prompt, context),
        combined_len: combined_length(context, system_prompt),
    }
}

/// `prompt` verbatim, or prompt and context in tagged blocks.
pub fn wrap_user_text(prompt: &str, context: Option<&str>) -> String {
    match present(context) {
        Some(context) => format!(
            "{PROMPT_OPEN}{prompt}{PROMPT_CLOSE}\n{CONTEXT_OPEN}{context}{CONTEXT_CLOSE}"
        ),
        None => prompt.to_string(),
    }
}

fn system_text(system_prompt: Option<&str>, preamble: Option<&str>) -> String {
    let mut text = String::new();
    if let Some(preamble) = present(preamble) {
        text.push_str(preamble);
    }
    if let Some(system_prompt) = present(system_prompt) {
        text.push_str(OTHERS_OPEN);
        text.push_str(system_prompt);
        text.push_str(OTHERS_CLOSE);
    }
    text
}

/// Characters of context plus caller system prompt, counting only those present.
pub fn combined_length(context: Option<&str>, system_prompt: Option<&str>) -> usize {
    let len = |value: Option<&str>| present(value).map_or(0, |v| v.chars().count());
    len(context) + len(system_prompt)
}

/// Recover `(prompt, context)` from text produced by [`wrap_user_text`].
///
/// Returns `None` for text that was not wrapped. Unambiguous as long as
/// neither part contains the delimiter tags.
pub fn split_user_text(user_text: &str) -> Option<(&str, &str)> {
    let rest = user_text.strip_prefix(PROMPT_OPEN)?;
    let rest = rest.strip_suffix(CONTEXT_CLOSE)?;
    let separator = format!("{PROMPT_CLOSE}\n{CONTEXT_OPEN}");
    let (prompt, context) = rest.split_once(&separator)?;
    Some((prompt, context))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_no_context_keeps_prompt_verbatim() {
        let assembled = assemble("Explain gravity", Some(""), None, None);
        assert_eq!(assembled.user_text, "Explain gravity");
        assert_eq!(assembled.system_text, "");
        assert_eq!(assembled.combined_len, 0);

        let absent = assemble("Explain gravity", None, None, None);
        assert_eq!(absent, assembled);
    }

    #[test]
    fn test_context_is_wrapped_in_tags() {
        let assembled = assemble("Summarize", Some("Long article text"), None, None);
        assert_eq!(
            assembled.user_text,
            "<prompt>Summarize</prompt>\n<context>Long article text</context>"
        );
        assert_eq!(assembled.combined_len, "Long article text".len());
    }

    #[test]
    fn test_system_prompt_wrapper() {
        let assembled = assemble("Hi", None, Some("Be brief"), None);
        assert_eq!(assembled.system_text, "<others>Be brief</others>");
        assert_eq!(assembled.combined_len, 8);
    }

    #[test]
    fn test_advisory_preamble_precedes_caller_instructions() {
        let assembled = assemble(
            "Summarize",
            Some("Long article text"),
            Some("Use French"),
            Some(ADVISORY_POLICY),
        );
        assert!(assembled.system_text.starts_with(ADVISORY_POLICY));
        assert!(assembled
            .system_text
            .ends_with("<others>Use French</others>"));
        assert!(assembled.user_text.contains("<prompt>Summarize</prompt>"));
        assert!(assembled
            .user_text
            .contains("<context>Long article text</context>"));
    }

    #[test]
    fn test_advisory_preamble_without_caller_instructions() {
        let assembled = assemble("Q", None, None, Some(ADVISORY_POLICY));
        assert_eq!(assembled.system_text, ADVISORY_POLICY);
    }

    #[test]
    fn test_advisory_policy_content() {
        for required in ["markdown", "$$...$$", "TikZ", "Rewrite all rows", "<img", "watermark"] {
            assert!(ADVISORY_POLICY.contains(required), "missing {}", required);
        }
    }

    #[test]
    fn test_combined_length_counts_characters() {
        assert_eq!(combined_length(None, None), 0);
        assert_eq!(combined_length(Some("abc"), None), 3);
        assert_eq!(combined_length(None, Some("abcd")), 4);
        assert_eq!(combined_length(Some("abc"), Some("abcd")), 7);
        assert_eq!(combined_length(Some("héllo"), Some("")), 5);
    }

    #[test]
    fn test_split_user_text() {
        let wrapped = wrap_user_text("What is this?", Some("line one\nline two"));
        assert_eq!(
            split_user_text(&wrapped),
            Some(("What is this?", "line one\nline two"))
        );
        assert_eq!(split_user_text("plain prompt"), None);
    }
}
