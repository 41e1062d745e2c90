//! Locating and repairing the JSON object inside a model reply.

/// Slice of `raw` from the first `{` through the `}` that balances it.
///
/// Returns the text through the end of `raw` when the object never closes, so the
/// caller can attempt [`close_unbalanced`] on it. `None` when there is no `{`.
pub fn extract_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let candidate = &raw[start..];
    let mut scan = Scanner::default();
    for (offset, ch) in candidate.char_indices() {
        scan.feed(ch);
        if scan.stack.is_empty() {
            return Some(&candidate[..offset + ch.len_utf8()]);
        }
    }
    Some(candidate)
}

/// Append the minimal closing characters for unterminated strings and delimiters.
///
/// Returns `None` when nothing is missing (the input is already balanced) or the
/// delimiters are mismatched in a way appending cannot fix.
pub fn close_unbalanced(fragment: &str) -> Option<String> {
    let mut scan = Scanner::default();
    for ch in fragment.chars() {
        scan.feed(ch);
        if scan.mismatched {
            return None;
        }
    }
    if scan.stack.is_empty() && !scan.in_string {
        return None;
    }

    let mut repaired = fragment.trim_end().to_string();
    if scan.in_string {
        if scan.escaped {
            repaired.pop();
        }
        repaired.push('"');
    }
    // A dangling separator would still be invalid after closing.
    while repaired.ends_with(',') || repaired.ends_with(':') {
        repaired.pop();
        repaired = repaired.trim_end().to_string();
    }
    for open in scan.stack.iter().rev() {
        repaired.push(if *open == '{' { '}' } else { ']' });
    }
    Some(repaired)
}

#[derive(Default)]
struct Scanner {
    stack: Vec<char>,
    in_string: bool,
    escaped: bool,
    mismatched: bool,
}

impl Scanner {
    fn feed(&mut self, ch: char) {
        if self.in_string {
            if self.escaped {
                self.escaped = false;
            } else if ch == '\\' {
                self.escaped = true;
            } else if ch == '"' {
                self.in_string = false;
            }
            return;
        }
        match ch {
            '"' => self.in_string = true,
            '{' | '[' => self.stack.push(ch),
            '}' | ']' => {
                let expected = if ch == '}' { '{' } else { '[' };
                if self.stack.pop() != Some(expected) {
                    self.mismatched = true;
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_object_from_surrounding_prose() {
        let raw = "Sure! Here you go:\n```json\n{\"a\": {\"b\": \"}\"}}\n```\nDone.";
        assert_eq!(extract_object(raw), Some("{\"a\": {\"b\": \"}\"}}"));
    }

    #[test]
    fn extract_returns_none_without_brace() {
        assert_eq!(extract_object("I will write the file now."), None);
    }

    #[test]
    fn extract_returns_tail_when_unclosed() {
        assert_eq!(extract_object("x {\"a\": [1, 2"), Some("{\"a\": [1, 2"));
    }

    #[test]
    fn closes_nested_delimiters_in_order() {
        let repaired = close_unbalanced("{\"a\": [1, {\"b\": 2").expect("repair");
        assert_eq!(repaired, "{\"a\": [1, {\"b\": 2}]}");
        assert!(serde_json::from_str::<serde_json::Value>(&repaired).is_ok());
    }

    #[test]
    fn closes_unterminated_string() {
        let repaired = close_unbalanced("{\"a\": \"hel").expect("repair");
        assert_eq!(repaired, "{\"a\": \"hel\"}");
    }

    #[test]
    fn drops_dangling_separator() {
        let repaired = close_unbalanced("{\"a\": 1,").expect("repair");
        assert_eq!(repaired, "{\"a\": 1}");
    }

    #[test]
    fn balanced_or_mismatched_input_is_not_repaired() {
        assert_eq!(close_unbalanced("{\"a\": 1}"), None);
        assert_eq!(close_unbalanced("{\"a\": [1}"), None);
    }
}
