//! Prompts for the story model and the image model.
//!
//! Keeping every prompt here means the parser's expectations (the `TITLE:`
//! line, `Page N Text:` / `Page N Image:` labels, the page-break delimiter)
//! and the instructions that ask the model for them live side by side, and
//! unit tests can inspect the exact text without calling a model.

use crate::job::BookSpecs;
use crate::pipeline::parse::PAGE_BREAK;

/// Number of pages the story model is asked to write.
pub const REQUESTED_PAGES: usize = 5;

/// Build the system prompt for the story model.
pub fn story_system_prompt(specs: &BookSpecs) -> String {
    format!(
        r#"You are a creative children's book author. You write engaging, fact-based stories based on provided source material.
Your goal is to adapt the source text into a short story suitable for {age} year olds.
The theme is: {theme}.
Humor level: {humor}/10.

Output Format:
Start with a line "TITLE: <book title>".
You must output the story as a list of {pages} pages.
For each page, provide the 'Story Text' and an 'Illustration Description'.
Separate pages with '{brk}'.

Example:
TITLE: The Brave Little Lantern
Page 1 Text: Once upon a time...
Page 1 Image: A bright sunny day in a small town...
{brk}
Page 2 Text: ..."#,
        age = specs.age_group,
        theme = specs.theme,
        humor = specs.humor,
        pages = REQUESTED_PAGES,
        brk = PAGE_BREAK,
    )
}

/// Build the user message carrying the (already truncated) source text.
pub fn story_user_prompt(source: &str) -> String {
    format!("Source Material:\n{source}\n\nWrite the story now.")
}

/// Cut `text` to at most `limit` characters, marking the cut with `...`.
///
/// Counts `char`s, not bytes, so multi-byte text is never split mid-codepoint.
pub fn truncate_source(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((byte_idx, _)) => format!("{}...", &text[..byte_idx]),
        None => text.to_string(),
    }
}

// ── Image prompts ────────────────────────────────────────────────────────

/// Lower bound of the age group, parsed from strings like `"4-6"` or `"8+"`.
fn youngest_age(age_group: &str) -> Option<u32> {
    let digits: String = age_group
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Style qualifiers matched to the reader's age.
pub fn illustration_style(age_group: &str) -> &'static str {
    match youngest_age(age_group) {
        Some(age) if age < 6 => "simple shapes, bright pastel",
        _ => "detailed storybook",
    }
}

/// Compose the full image-model prompt for one page.
pub fn compose_image_prompt(theme: &str, age_group: &str, page_prompt: &str) -> String {
    format!(
        "children's book illustration, {}, {}, {}, vibrant colors, soft lighting, high quality",
        illustration_style(age_group),
        theme.trim(),
        page_prompt.trim()
    )
}

/// Negative prompt sent with every image request.
pub const IMAGE_NEGATIVE_PROMPT: &str =
    "text, watermark, signature, blurry, deformed, scary, violent";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_mentions_specs_and_delimiter() {
        let specs = BookSpecs::new("Kindness", 7, "6-8");
        let p = story_system_prompt(&specs);
        assert!(p.contains("6-8 year olds"));
        assert!(p.contains("The theme is: Kindness."));
        assert!(p.contains("Humor level: 7/10."));
        assert!(p.contains("TITLE:"));
        assert!(p.contains(PAGE_BREAK));
        assert!(p.contains("list of 5 pages"));
    }

    #[test]
    fn truncate_short_text_untouched() {
        assert_eq!(truncate_source("short", 2000), "short");
        assert_eq!(truncate_source("exact", 5), "exact");
    }

    #[test]
    fn truncate_long_text_adds_ellipsis() {
        let text = "a".repeat(2500);
        let out = truncate_source(&text, 2000);
        assert_eq!(out.len(), 2003);
        assert!(out.ends_with("..."));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let out = truncate_source("ééééé", 2);
        assert_eq!(out, "éé...");
    }

    #[test]
    fn style_follows_age() {
        assert_eq!(illustration_style("3-5"), "simple shapes, bright pastel");
        assert_eq!(illustration_style("6-8"), "detailed storybook");
        assert_eq!(illustration_style("teens"), "detailed storybook");
    }

    #[test]
    fn composed_prompt_layout() {
        let p = compose_image_prompt("Honesty", "6-8", " a boy at sunrise ");
        assert_eq!(
            p,
            "children's book illustration, detailed storybook, Honesty, a boy at sunrise, \
             vibrant colors, soft lighting, high quality"
        );
    }
}
