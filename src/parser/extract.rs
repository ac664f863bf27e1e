//! Candidate extraction from free-form model output.

/// Opening fences tried in order. The bare fences come last so that a
/// labelled block is preferred when both are present.
const FENCE_OPENERS: &[&str] = &[
    "```json",
    "```JSON",
    "```javascript",
    "```js",
    "~~~json",
    "```",
    "~~~",
];

/// Return the contents of every fenced block found in `text`, in fence
/// preference order and without duplicates.
///
/// A block whose closing fence is missing (the output was cut off) runs to
/// the end of the text.
pub fn fenced_blocks(text: &str) -> Vec<&str> {
    let mut blocks: Vec<&str> = Vec::new();

    for opener in FENCE_OPENERS {
        let Some(open_at) = text.find(opener) else {
            continue;
        };
        let after_opener = open_at + opener.len();
        let content_start = match text[after_opener..].find('\n') {
            Some(nl) => after_opener + nl + 1,
            None => continue,
        };

        let closer = &opener[..3];
        let content = match text[content_start..].find(closer) {
            Some(end) => &text[content_start..content_start + end],
            None => &text[content_start..],
        };

        let content = content.trim();
        if !content.is_empty() && !blocks.contains(&content) {
            blocks.push(content);
        }
    }

    blocks
}

/// Substring from the first `{` to the last `}`, if both exist in order.
pub fn outer_braces(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Everything from the first `{` onward.
pub fn from_first_brace(text: &str) -> Option<&str> {
    text.find('{').map(|start| &text[start..])
}
