//! Snippet extraction from free-form model output.
//!
//! Models are asked to answer with exactly one fenced JavaScript block:
//!
//! ````text
//! ```javascript
//! const hits = await webSearch("rust async");
//! finalAnswer(hits[0].title);
//! ```
//! ````
//!
//! [`extract_code`] pulls the first such block out of the response.
//! Untagged blocks and blocks in other languages are ignored.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex_lite::Regex;

#[allow(clippy::expect_used)]
static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)```[ \t]*(?:javascript|js)[ \t]*\r?\n(.*?)```").expect("valid fence regex")
});

#[allow(clippy::expect_used)]
static BARE_TAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z_$][A-Za-z0-9_$]*(?:\.[A-Za-z_$][A-Za-z0-9_$]*)*)\s*;?$")
        .expect("valid tail regex")
});

/// Statement keywords that look like bare identifiers but cannot be returned.
const NOT_EXPRESSIONS: &[&str] = &["break", "continue", "debugger", "return", "throw"];

/// Extract the first fenced `javascript`/`js` block from model output.
///
/// Returns the trimmed block contents, or `None` when there is no complete
/// tagged block or the block is empty. Absence is not an error: it tells the
/// caller the model did not produce runnable code.
pub fn extract_code(model_output: &str) -> Option<String> {
    let captures = FENCED_BLOCK.captures(model_output)?;
    let code = captures.get(1)?.as_str().trim();
    if code.is_empty() {
        None
    } else {
        Some(code.to_string())
    }
}

/// Turn a trailing bare expression into an explicit `return`.
///
/// Only applies when the snippet never mentions `finalAnswer` and its last
/// non-empty line is a bare identifier or dotted member path, e.g. `total`
/// or `result.items;`. The line before it must end a statement (`;`, `}` or
/// `{`), so the tail of a multi-line expression is never split off. Everything
/// else is returned unchanged.
pub fn lazy_return(snippet: &str) -> Cow<'_, str> {
    if snippet.contains("finalAnswer") {
        return Cow::Borrowed(snippet);
    }

    let trimmed = snippet.trim_end();
    let (head, last_line) = match trimmed.rfind('\n') {
        Some(idx) => (&trimmed[..=idx], &trimmed[idx + 1..]),
        None => ("", trimmed),
    };

    let previous = head.lines().rev().map(str::trim_end).find(|l| !l.is_empty());
    if previous.is_some_and(|line| !line.ends_with([';', '}', '{'])) {
        return Cow::Borrowed(snippet);
    }

    let Some(captures) = BARE_TAIL.captures(last_line.trim()) else {
        return Cow::Borrowed(snippet);
    };
    let Some(expr) = captures.get(1).map(|m| m.as_str()) else {
        return Cow::Borrowed(snippet);
    };
    if NOT_EXPRESSIONS.contains(&expr) {
        return Cow::Borrowed(snippet);
    }

    Cow::Owned(format!("{head}return {expr};"))
}
