/// Split text into chunks of at most `max_len` bytes.
///
/// Prefers newline boundaries; a single line longer than the limit is
/// hard-split on char boundaries.
pub fn split_text(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len || max_len == 0 {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();

    for line in text.split('\n') {
        let needed = if current.is_empty() {
            line.len()
        } else {
            current.len() + 1 + line.len()
        };

        if needed <= max_len {
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(line);
            continue;
        }

        if !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }

        let mut remaining = line;
        while remaining.len() > max_len {
            let mut cut = max_len;
            while !remaining.is_char_boundary(cut) {
                cut -= 1;
            }
            if cut == 0 {
                cut = remaining.chars().next().map_or(remaining.len(), char::len_utf8);
            }
            chunks.push(remaining[..cut].to_string());
            remaining = &remaining[cut..];
        }
        current = remaining.to_string();
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_unchanged() {
        assert_eq!(split_text("hello", 100), vec!["hello"]);
        assert_eq!(split_text("", 100), vec![""]);
    }

    #[test]
    fn splits_on_newlines() {
        assert_eq!(
            split_text("line1\nline2\nline3", 11),
            vec!["line1\nline2", "line3"]
        );
    }

    #[test]
    fn hard_splits_long_line() {
        let result = split_text(&"a".repeat(25), 10);
        assert_eq!(result.iter().map(|c| c.len()).collect::<Vec<_>>(), vec![10, 10, 5]);
    }

    #[test]
    fn respects_char_boundaries() {
        // 'é' is two bytes
        let text = "é".repeat(6);
        for chunk in split_text(&text, 5) {
            assert!(chunk.len() <= 5);
            assert!(chunk.chars().all(|c| c == 'é'));
        }
    }
}
