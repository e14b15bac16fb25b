//! Recovers license geometry from the detail page script.
//!
//! The detail page embeds a minified script of the form
//! `...,i={Id:7,Geometry:{rings:[[[lon,lat],...]]},...},e=new f(...)`. The
//! object literal assigned to `i` is cut out, the minifier's `!0`/`!1`
//! booleans are rewritten, and the result is parsed as JSON5. Nothing beyond
//! that literal is interpreted.
//!
//! Failure modes, each reported as [`ToolError::GeometryExtraction`]:
//! - no JavaScript `<script>` block carries an `i = {` assignment;
//! - the literal is not valid JSON5 after normalization;
//! - the parsed object lacks a numeric `Id` or a non-empty
//!   `Geometry.rings[0]` of `[lon, lat]` pairs.

use serde_json::Value;

use crate::cmcs::licenses::error::{Result, ToolError};
use crate::cmcs::licenses::model::{GeometryPayload, LicenseId};
use crate::cmcs::licenses::remote::html;

/// Construction that follows the geometry literal in the minified script.
const LITERAL_TERMINATOR: &str = ",e=new f";

/// Extracts the geometry of `license_id` from a detail page.
pub fn geometry_from_page(license_id: LicenseId, page: &str) -> Result<GeometryPayload> {
    let failure = |reason: String| ToolError::GeometryExtraction { license_id, reason };

    let scripts = html::script_blocks(page);
    if scripts.is_empty() {
        return Err(failure("detail page has no script block".into()));
    }

    let literal = scripts
        .iter()
        .filter(|script| script.is_javascript())
        .find_map(|script| extract_object_literal(script.body))
        .ok_or_else(|| failure("no `i = {...}` assignment in page scripts".into()))?;

    parse_geometry(literal).map_err(failure)
}

/// Returns the object literal assigned to the variable `i`, up to but not
/// including the following `,e=new f`. When that construction is absent the
/// literal runs to the end of the script.
pub fn extract_object_literal(script: &str) -> Option<&str> {
    let bytes = script.as_bytes();
    let mut from = 0usize;

    while let Some(rel) = script[from..].find('i') {
        let at = from + rel;
        from = at + 1;

        if at > 0 && is_identifier_byte(bytes[at - 1]) {
            continue;
        }
        let Some(open) = assignment_brace(script, at + 1) else {
            continue;
        };

        let rest = &script[open..];
        if let Some(end) = rest.find(&format!("}}{LITERAL_TERMINATOR}")) {
            return Some(&rest[..=end]);
        }

        let tail = rest.trim_end();
        let tail = tail.strip_suffix(';').unwrap_or(tail).trim_end();
        let tail = tail.strip_suffix(',').unwrap_or(tail);
        if tail.len() > 1 && tail.ends_with('}') {
            return Some(tail);
        }
    }
    None
}

/// Position of the `{` in `\s*=\s*{` starting at `from`, if that is what follows.
fn assignment_brace(script: &str, from: usize) -> Option<usize> {
    let after_name = &script[from..];
    let trimmed = after_name.trim_start();
    let after_eq = trimmed.strip_prefix('=')?;
    if after_eq.starts_with('=') {
        return None;
    }
    let value = after_eq.trim_start();
    if !value.starts_with('{') {
        return None;
    }
    Some(script.len() - value.len())
}

fn is_identifier_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'_' | b'$' | b'.')
}

/// Rewrites the minified literal into JSON5: a trailing `;` is dropped and
/// `:!0` / `:!1` become `: true` / `: false`. String contents are untouched.
pub fn normalize_literal(literal: &str) -> String {
    let trimmed = literal.trim();
    let trimmed = trimmed.strip_suffix(';').unwrap_or(trimmed).trim_end();

    let chars: Vec<char> = trimmed.chars().collect();
    let mut out = String::with_capacity(trimmed.len() + 16);
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut idx = 0usize;

    while idx < chars.len() {
        let ch = chars[idx];

        if let Some(open) = quote {
            out.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == open {
                quote = None;
            }
            idx += 1;
            continue;
        }

        match ch {
            '"' | '\'' => {
                quote = Some(ch);
                out.push(ch);
                idx += 1;
            }
            ':' => match minified_boolean(&chars, idx + 1) {
                Some((value, next)) => {
                    out.push_str(": ");
                    out.push_str(if value { "true" } else { "false" });
                    idx = next;
                }
                None => {
                    out.push(ch);
                    idx += 1;
                }
            },
            _ => {
                out.push(ch);
                idx += 1;
            }
        }
    }

    out
}

/// Matches `\s*!0\b` or `\s*!1\b` at `idx`, returning the boolean and the
/// index just past the digit.
fn minified_boolean(chars: &[char], mut idx: usize) -> Option<(bool, usize)> {
    while chars.get(idx).is_some_and(|c| c.is_whitespace()) {
        idx += 1;
    }
    if chars.get(idx) != Some(&'!') {
        return None;
    }
    let value = match chars.get(idx + 1) {
        Some('0') => true,
        Some('1') => false,
        _ => return None,
    };
    let next = idx + 2;
    if chars
        .get(next)
        .is_some_and(|c| c.is_alphanumeric() || *c == '_')
    {
        return None;
    }
    Some((value, next))
}

/// Parses a normalized or raw literal into a [`GeometryPayload`].
pub fn parse_geometry(literal: &str) -> std::result::Result<GeometryPayload, String> {
    let normalized = normalize_literal(literal);
    let object: Value =
        json5::from_str(&normalized).map_err(|error| format!("invalid object literal: {error}"))?;

    let license_id = object
        .get("Id")
        .and_then(value_to_id)
        .ok_or_else(|| "object literal has no numeric `Id`".to_string())?;

    let ring = object
        .get("Geometry")
        .and_then(|geometry| geometry.get("rings"))
        .and_then(Value::as_array)
        .and_then(|rings| rings.first())
        .and_then(Value::as_array)
        .ok_or_else(|| "object literal has no `Geometry.rings[0]`".to_string())?;

    let ring = ring
        .iter()
        .enumerate()
        .map(|(index, point)| {
            let pair = point.as_array().filter(|pair| pair.len() >= 2);
            match pair.map(|pair| (pair[0].as_f64(), pair[1].as_f64())) {
                Some((Some(longitude), Some(latitude))) => Ok((longitude, latitude)),
                _ => Err(format!("ring point {} is not a [lon, lat] pair", index + 1)),
            }
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;

    if ring.is_empty() {
        return Err("`Geometry.rings[0]` is empty".into());
    }

    Ok(GeometryPayload { license_id, ring })
}

fn value_to_id(value: &Value) -> Option<LicenseId> {
    match value {
        Value::Number(number) => number.as_i64().or_else(|| {
            number
                .as_f64()
                .filter(|value| value.fract() == 0.0)
                .map(|value| value as i64)
        }),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}
