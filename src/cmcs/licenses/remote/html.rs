//! Low-level HTML string helpers for the portal pages.
//!
//! These are naive: they match ASCII tag and attribute names
//! case-insensitively and never build a DOM.

/// A `<script>` element: its opening tag and its raw body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptBlock<'a> {
    pub open_tag: &'a str,
    pub body: &'a str,
}

impl ScriptBlock<'_> {
    /// True for `type="text/javascript"` blocks and for blocks without a type.
    pub fn is_javascript(&self) -> bool {
        match tag_attribute(self.open_tag, "type") {
            Some(kind) => kind.trim().eq_ignore_ascii_case("text/javascript"),
            None => true,
        }
    }
}

/// Returns the `value` attribute of the first `<input>` whose `name` is `name`.
pub fn input_value(html: &str, name: &str) -> Option<String> {
    let lc = to_lowercase_fast(html);
    let mut pos = 0usize;
    while let Some(rel) = lc.get(pos..)?.find("<input") {
        let start = pos + rel;
        let end = html[start..].find('>')? + start + 1;
        let tag = &html[start..end];
        pos = end;

        if tag_attribute(tag, "name").as_deref() == Some(name) {
            return tag_attribute(tag, "value");
        }
    }
    None
}

/// Collects every `<script>` block of the document in order.
pub fn script_blocks(html: &str) -> Vec<ScriptBlock<'_>> {
    const CLOSE: &str = "</script>";

    let lc = to_lowercase_fast(html);
    let mut blocks = Vec::new();
    let mut pos = 0usize;
    while let Some((start, end)) = next_tag_block_ci(html, &lc, "<script", CLOSE, pos) {
        let Some(open_end) = html[start..end].find('>').map(|idx| start + idx + 1) else {
            break;
        };
        blocks.push(ScriptBlock {
            open_tag: &html[start..open_end],
            body: &html[open_end..end - CLOSE.len()],
        });
        pos = end;
    }
    blocks
}

/// Reads one attribute from an opening tag such as `<input name="x" value='y'>`.
/// Quoted and unquoted values are accepted; names compare ASCII
/// case-insensitively.
pub fn tag_attribute(tag: &str, name: &str) -> Option<String> {
    let bytes = tag.as_bytes();
    let len = bytes.len();
    // Skip the tag name.
    let mut idx = tag.find(|c: char| c.is_ascii_whitespace())?;

    while idx < len {
        while idx < len && (bytes[idx].is_ascii_whitespace() || bytes[idx] == b'/') {
            idx += 1;
        }
        if idx >= len || bytes[idx] == b'>' {
            return None;
        }

        let key_start = idx;
        while idx < len
            && !bytes[idx].is_ascii_whitespace()
            && !matches!(bytes[idx], b'=' | b'>' | b'/')
        {
            idx += 1;
        }
        let key = &tag[key_start..idx];

        while idx < len && bytes[idx].is_ascii_whitespace() {
            idx += 1;
        }

        let mut value = "";
        if idx < len && bytes[idx] == b'=' {
            idx += 1;
            while idx < len && bytes[idx].is_ascii_whitespace() {
                idx += 1;
            }
            if idx < len && matches!(bytes[idx], b'"' | b'\'') {
                let quote = bytes[idx];
                idx += 1;
                let value_start = idx;
                while idx < len && bytes[idx] != quote {
                    idx += 1;
                }
                value = &tag[value_start..idx];
                idx = (idx + 1).min(len);
            } else {
                let value_start = idx;
                while idx < len && !bytes[idx].is_ascii_whitespace() && bytes[idx] != b'>' {
                    idx += 1;
                }
                value = &tag[value_start..idx];
            }
        }

        if key.eq_ignore_ascii_case(name) {
            return Some(normalize_entities(value));
        }
    }
    None
}

/// Finds the next `open ... close` block at or after `from`. `lc` must be the
/// ASCII-lowercased copy of `s`.
fn next_tag_block_ci(
    s: &str,
    lc: &str,
    open_tag: &str,
    close_tag: &str,
    from: usize,
) -> Option<(usize, usize)> {
    let start = lc.get(from..)?.find(open_tag)? + from;
    let open_end = s[start..].find('>')? + start + 1;
    let end_rel = lc[open_end..].find(close_tag)?;
    Some((start, open_end + end_rel + close_tag.len()))
}

/// Minimal HTML entity decoding for attribute values.
pub fn normalize_entities(s: &str) -> String {
    s.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// ASCII-only lowercasing; byte offsets stay valid in the original string.
fn to_lowercase_fast(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii() { c.to_ascii_lowercase() } else { c })
        .collect()
}
