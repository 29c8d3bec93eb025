//! Pulls numbered list items out of model responses.

use regex::Regex;
use std::sync::LazyLock;

static NUMBERED_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]+\. ").expect("numbered line pattern is valid"));

/// Returns the text after the first `". "` of every line that starts with
/// `<digits>. `, in order. Numbering is not checked for sequence or start.
pub fn extract_numbered_items(text: &str) -> Vec<String> {
    text.lines()
        .filter(|line| NUMBERED_LINE.is_match(line))
        .filter_map(|line| line.split_once(". ").map(|(_, item)| item.to_string()))
        .collect()
}
