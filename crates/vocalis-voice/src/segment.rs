//! Cutting streamed text into speakable segments.

const TERMINATORS: &[char] = &['.', '!', '?', ':'];

/// Characters that are read aloud badly and carry no meaning in speech.
const STRIPPED: &[char] = &['[', ']', '*', '#', '`', '_', '~', '|', '<', '>', '{', '}'];

/// Accumulates streamed tokens and yields complete sentences.
///
/// A sentence ends at a terminator (`.`, `!`, `?`, `:`) followed by
/// whitespace, or at a newline. Decimal points and abbreviations glued to
/// the next character do not split.
#[derive(Debug, Default, Clone)]
pub struct SentenceSegmenter {
    buffer: String,
}

impl SentenceSegmenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a token and returns every sentence it completed.
    pub fn push(&mut self, token: &str) -> Vec<String> {
        self.buffer.push_str(token);
        let mut out = Vec::new();
        while let Some(end) = self.boundary() {
            let sentence: String = self.buffer.drain(..end).collect();
            if !sentence.trim().is_empty() {
                out.push(sentence.trim().to_string());
            }
        }
        out
    }

    /// Returns whatever is left, if it contains anything but whitespace.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = rest.trim();
        (!rest.is_empty()).then(|| rest.to_string())
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Byte offset just past the first sentence boundary.
    fn boundary(&self) -> Option<usize> {
        let mut chars = self.buffer.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            if c == '\n' {
                return Some(i + 1);
            }
            if TERMINATORS.contains(&c) {
                if let Some(&(_, next)) = chars.peek() {
                    if next.is_whitespace() {
                        return Some(i + c.len_utf8());
                    }
                }
            }
        }
        None
    }
}

/// Strips markup characters and collapses whitespace.
pub fn clean_for_speech(text: &str) -> String {
    text.chars()
        .filter(|c| !STRIPPED.contains(c))
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_terminator_followed_by_space() {
        let mut s = SentenceSegmenter::new();
        assert!(s.push("Hay 10").is_empty());
        assert!(s.push(" usuarios.").is_empty());
        assert_eq!(s.push(" ¿Algo más?"), vec!["Hay 10 usuarios.".to_string()]);
        assert_eq!(s.finish(), Some("¿Algo más?".to_string()));
        assert_eq!(s.finish(), None);
    }

    #[test]
    fn decimals_do_not_split() {
        let mut s = SentenceSegmenter::new();
        assert!(s.push("El importe es 59.90 euros").is_empty());
        assert_eq!(
            s.push(". Gracias\n"),
            vec![
                "El importe es 59.90 euros.".to_string(),
                "Gracias".to_string()
            ]
        );
    }

    #[test]
    fn newlines_split() {
        let mut s = SentenceSegmenter::new();
        assert_eq!(
            s.push("Tablas\n\n- usuarios\n"),
            vec!["Tablas".to_string(), "- usuarios".to_string()]
        );
    }

    #[test]
    fn clean_removes_markup() {
        assert_eq!(
            clean_for_speech("**Hay** [10]   `usuarios`\n"),
            "Hay 10 usuarios"
        );
        assert_eq!(clean_for_speech("[ ]"), "");
    }
}
