//! Story parsing: turn free-form model output into a title and pages.
//!
//! The story model is asked for a `TITLE:` line and pages separated by
//! `---PAGE BREAK---`, each with `Text:` and `Image:` labels. Small models
//! follow that format loosely at best, so parsing never fails: it walks a
//! chain of strategies from most to least structured.
//!
//! ## Rule Order
//!
//! 1. Resolve the title: explicit `TITLE:` line, then a short first line
//!    that is not model preamble, then `"The Story of {theme}"`.
//! 2. Split the remaining body on the page-break delimiter.
//! 3. Pull `Text:` / `Image:` / `Description:` fields out of each segment.
//!    Synthesised image prompts number the non-empty segments from 1.
//! 4. If that yields nothing, or a single oversized page (the model ignored
//!    the delimiter), re-split the text into 3-sentence pages instead.
//! 5. Cap the result at [`MAX_PAGES`].

use crate::job::Page;
use once_cell::sync::Lazy;
use regex::Regex;

/// Delimiter the story prompt asks the model to put between pages.
pub const PAGE_BREAK: &str = "---PAGE BREAK---";

/// Upper bound on pages in one book.
pub const MAX_PAGES: usize = 10;

/// A single page longer than this means the model ignored the page breaks.
const LONG_PAGE_CHARS: usize = 500;

/// First lines at least this long are never taken as a title.
const TITLE_MAX_CHARS: usize = 60;

const SENTENCES_PER_PAGE: usize = 3;

/// Phrases that mark a first line as chat preamble rather than a title.
const PREAMBLE_PHRASES: [&str; 4] = ["here is", "sure", "certainly", "okay"];

/// Title and pages recovered from one model completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseResult {
    pub title: String,
    pub pages: Vec<Page>,
}

/// Parse raw story-model output. Always returns at least one page.
///
/// `theme` is used for the default title and for synthesised image prompts.
pub fn parse_story(raw: &str, theme: &str) -> ParseResult {
    let raw = raw.replace("\r\n", "\n");
    let (title, body) = extract_title(&raw, theme);

    let mut pages = split_pages(&body, theme);

    let needs_fallback =
        pages.is_empty() || (pages.len() == 1 && pages[0].text.chars().count() > LONG_PAGE_CHARS);
    if needs_fallback {
        let source = match pages.first() {
            Some(page) => page.text.clone(),
            None => body.replace(PAGE_BREAK, " "),
        };
        pages = chunk_sentences(&source, theme);
    }

    if pages.is_empty() {
        pages.push(Page::new(
            format!("This is a story about {theme}."),
            format!("Illustration for page 1 about {theme}"),
        ));
    }

    pages.truncate(MAX_PAGES);
    ParseResult { title, pages }
}

// ── Rule 1: Title ────────────────────────────────────────────────────────────

static RE_TITLE_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^\s*title:(.*)$").unwrap());

static RE_BOOK_TITLE_LABEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)book\s+title:").unwrap());

/// Returns the resolved title and the body with the title line removed.
fn extract_title(raw: &str, theme: &str) -> (String, String) {
    let lines: Vec<&str> = raw.lines().collect();

    if let Some(idx) = lines.iter().position(|l| RE_TITLE_LINE.is_match(l)) {
        let title = RE_TITLE_LINE
            .captures(lines[idx])
            .map(|c| c[1].to_string())
            .unwrap_or_default();
        return (finish_title(&title, theme), join_without(&lines, idx));
    }

    if let Some(idx) = lines.iter().position(|l| !l.trim().is_empty()) {
        let first = lines[idx].trim();
        if looks_like_title(first) {
            return (finish_title(first, theme), join_without(&lines, idx));
        }
    }

    (default_title(theme), raw.to_string())
}

fn looks_like_title(line: &str) -> bool {
    if line.chars().count() >= TITLE_MAX_CHARS {
        return false;
    }
    let lower = line.to_lowercase();
    !PREAMBLE_PHRASES.iter().any(|p| lower.contains(p))
}

fn finish_title(candidate: &str, theme: &str) -> String {
    let cleaned = strip_title_marks(candidate);
    let cleaned = RE_BOOK_TITLE_LABEL.replace_all(&cleaned, "");
    let cleaned = strip_title_marks(&cleaned);
    if cleaned.is_empty() {
        default_title(theme)
    } else {
        cleaned
    }
}

fn strip_title_marks(s: &str) -> String {
    s.trim()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '\u{201C}' | '\u{201D}' | '*' | '#'))
        .trim()
        .to_string()
}

fn default_title(theme: &str) -> String {
    format!("The Story of {theme}")
}

fn join_without(lines: &[&str], skip: usize) -> String {
    lines
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != skip)
        .map(|(_, l)| *l)
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rules 2 & 3: Segments and fields ─────────────────────────────────────────

#[derive(Clone, Copy, PartialEq, Eq)]
enum Field {
    Text,
    Image,
}

fn split_pages(body: &str, theme: &str) -> Vec<Page> {
    body.split(PAGE_BREAK)
        .filter(|segment| !segment.trim().is_empty())
        .enumerate()
        .map(|(idx, segment)| parse_segment(segment, idx, theme))
        .collect()
}

fn parse_segment(segment: &str, idx: usize, theme: &str) -> Page {
    let mut text: Vec<&str> = Vec::new();
    let mut image: Vec<&str> = Vec::new();
    let mut current: Option<Field> = None;

    for line in segment.lines() {
        let (field, fragment) = if let Some(rest) = after_label(line, "Text:") {
            (Field::Text, rest)
        } else if let Some(rest) =
            after_label(line, "Image:").or_else(|| after_label(line, "Description:"))
        {
            (Field::Image, rest)
        } else {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            (current.unwrap_or(Field::Text), trimmed)
        };

        current = Some(field);
        let fragment = fragment.trim();
        if fragment.is_empty() {
            continue;
        }
        match field {
            Field::Text => text.push(fragment),
            Field::Image => image.push(fragment),
        }
    }

    let mut text = text.join(" ");
    if text.is_empty() {
        text = segment.trim().to_string();
    }
    let mut image_prompt = image.join(" ");
    if image_prompt.is_empty() {
        image_prompt = format!("Illustration for page {} about {theme}", idx + 1);
    }

    Page::new(text, image_prompt)
}

fn after_label<'a>(line: &'a str, label: &str) -> Option<&'a str> {
    line.find(label).map(|pos| &line[pos + label.len()..])
}

// ── Rule 4: Sentence-chunk fallback ──────────────────────────────────────────

fn chunk_sentences(text: &str, theme: &str) -> Vec<Page> {
    let sentences = split_sentences(text);
    sentences
        .chunks(SENTENCES_PER_PAGE)
        .map(|chunk| chunk.join(" "))
        .filter(|chunk| !chunk.trim().is_empty())
        .map(|chunk| {
            let preview: String = chunk.chars().take(50).collect();
            let prompt = format!("Illustration for: {preview}..., theme: {theme}");
            Page::new(chunk, prompt)
        })
        .collect()
}

/// Split after `.`, `!` or `?` when followed by whitespace.
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        let boundary = matches!(c, '.' | '!' | '?')
            && chars.peek().is_some_and(|next| next.is_whitespace());
        if boundary {
            push_sentence(&mut sentences, &current);
            current.clear();
        }
    }
    push_sentence(&mut sentences, &current);
    sentences
}

fn push_sentence(sentences: &mut Vec<String>, raw: &str) {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if !collapsed.is_empty() {
        sentences.push(collapsed);
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
