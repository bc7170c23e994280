//! JSON-with-comments preprocessing.
//!
//! Descriptors are JSON documents that allow `//` line comments, `/* */` block
//! comments and trailing commas. Comments are replaced by whitespace (newlines are
//! kept) so serde_json error positions still point at the original line.

use crate::error::{PodError, Result};

/// Strip comments and trailing commas, yielding plain JSON.
pub fn to_json(source: &str) -> Result<String> {
    let stripped = strip_comments(source)?;
    Ok(strip_trailing_commas(&stripped))
}

fn strip_comments(source: &str) -> Result<String> {
    let bytes = source.as_bytes();
    let mut out = String::with_capacity(source.len());
    let mut chars = source.char_indices().peekable();
    let mut in_string = false;

    while let Some((offset, c)) = chars.next() {
        if in_string {
            out.push(c);
            match c {
                '\\' => {
                    if let Some((_, escaped)) = chars.next() {
                        out.push(escaped);
                    }
                }
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '/' if bytes.get(offset + 1) == Some(&b'/') => {
                // line comment runs to (but not including) the newline
                while let Some(&(_, next)) = chars.peek() {
                    if next == '\n' {
                        break;
                    }
                    chars.next();
                }
            }
            '/' if bytes.get(offset + 1) == Some(&b'*') => {
                chars.next();
                let mut closed = false;
                while let Some((_, next)) = chars.next() {
                    if next == '*' && chars.peek().map(|&(_, c)| c) == Some('/') {
                        chars.next();
                        closed = true;
                        break;
                    }
                    if next == '\n' {
                        out.push('\n');
                    }
                }
                if !closed {
                    return Err(PodError::Jsonc {
                        offset,
                        reason: "unterminated block comment".to_string(),
                    });
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
    }

    if in_string {
        return Err(PodError::Jsonc {
            offset: source.len(),
            reason: "unterminated string".to_string(),
        });
    }

    Ok(out)
}

fn strip_trailing_commas(json: &str) -> String {
    let chars: Vec<char> = json.chars().collect();
    let mut out = String::with_capacity(json.len());
    let mut in_string = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if in_string {
            out.push(c);
            if c == '\\' {
                if let Some(&escaped) = chars.get(i + 1) {
                    out.push(escaped);
                    i += 1;
                }
            } else if c == '"' {
                in_string = false;
            }
        } else if c == '"' {
            in_string = true;
            out.push(c);
        } else if c == ',' {
            let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                out.push(' ');
            } else {
                out.push(c);
            }
        } else {
            out.push(c);
        }
        i += 1;
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_comments_removed() {
        let src = "{\n  // the driver\n  \"driver\": \"x.py\" // trailing\n}";
        let json = to_json(src).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["driver"], "x.py");
    }

    #[test]
    fn test_block_comment_keeps_line_count() {
        let src = "{ /* one\ntwo\nthree */ \"a\": 1 }";
        let json = to_json(src).unwrap();
        assert_eq!(json.matches('\n').count(), 2);
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn test_comment_markers_inside_strings_are_kept() {
        let src = r#"{ "url": "ftp://ftp.example.org/data", "glob": "a/*b*/c" }"#;
        let json = to_json(src).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["url"], "ftp://ftp.example.org/data");
        assert_eq!(value["glob"], "a/*b*/c");
    }

    #[test]
    fn test_escaped_quote_does_not_end_string() {
        let src = r#"{ "d": "say \"hi\" // not a comment" }"#;
        let json = to_json(src).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["d"], "say \"hi\" // not a comment");
    }

    #[test]
    fn test_trailing_commas_tolerated() {
        let src = "{ \"dims\": [\"time\", \"lat\",\n ],\n \"x\": 1,\n}";
        let json = to_json(src).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["dims"].as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn test_unterminated_block_comment_rejected() {
        let err = to_json("{ /* never closed ").unwrap_err();
        assert!(matches!(err, PodError::Jsonc { offset: 2, .. }));
    }
}
