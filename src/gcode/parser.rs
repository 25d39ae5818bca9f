//! Single-line G-code tokenizer with span tracking.
//!
//! Splits one source line into `letter+number` words, `;` and `( )` comments and
//! an optional `*NN` checksum. Spans index into the original line so the rewriter
//! can replace a single word without re-serialising the rest of the line.

use std::ops::Range;
use thiserror::Error;

/// Span in the original source text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GCodeSpan {
    pub range: Range<usize>,
}

impl GCodeSpan {
    fn new(range: Range<usize>) -> Self {
        Self { range }
    }
}

/// G-code token, with span info
#[derive(Debug, Clone, PartialEq)]
pub enum GCodeToken<'a> {
    Word { letter: char, value: &'a str, span: GCodeSpan },
    Comment(&'a str, GCodeSpan),
    Checksum { value: &'a str, span: GCodeSpan },
}

impl GCodeToken<'_> {
    pub fn span(&self) -> &GCodeSpan {
        match self {
            GCodeToken::Word { span, .. } => span,
            GCodeToken::Comment(_, span) => span,
            GCodeToken::Checksum { span, .. } => span,
        }
    }
}

/// Error with span info
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message} (at {span:?})")]
pub struct GCodeError {
    pub message: String,
    pub span: GCodeSpan,
}

/// Tokenizer over a single line. Iterates until the end of the line or the first error.
pub struct GCodeParser<'a> {
    src: &'a str,
    pos: usize,
    failed: bool,
}

impl<'a> GCodeParser<'a> {
    pub fn new(src: &'a str) -> Self {
        Self { src, pos: 0, failed: false }
    }

    /// Collects every token of the line, stopping at the first error.
    pub fn tokenize(src: &'a str) -> Result<Vec<GCodeToken<'a>>, GCodeError> {
        GCodeParser::new(src).collect()
    }

    fn next_token(&mut self) -> Option<Result<GCodeToken<'a>, GCodeError>> {
        let bytes = self.src.as_bytes();
        let len = bytes.len();
        while self.pos < len && bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
        if self.pos >= len {
            return None;
        }
        let start = self.pos;
        let c = bytes[self.pos] as char;

        // Semicolon comment runs to end of line
        if c == ';' {
            self.pos = len;
            let comment = self.src[start + 1..].trim();
            return Some(Ok(GCodeToken::Comment(comment, GCodeSpan::new(start..len))));
        }

        // Parenthesised comment
        if c == '(' {
            let Some(close) = self.src[start..].find(')') else {
                self.pos = len;
                return Some(Err(GCodeError {
                    message: "Unclosed comment".to_string(),
                    span: GCodeSpan::new(start..len),
                }));
            };
            let end = start + close + 1;
            self.pos = end;
            let comment = self.src[start + 1..end - 1].trim();
            return Some(Ok(GCodeToken::Comment(comment, GCodeSpan::new(start..end))));
        }

        if c == '*' {
            self.pos += 1;
            let value_start = self.pos;
            while self.pos < len && bytes[self.pos].is_ascii_digit() {
                self.pos += 1;
            }
            let value = &self.src[value_start..self.pos];
            return Some(Ok(GCodeToken::Checksum { value, span: GCodeSpan::new(start..self.pos) }));
        }

        // Word: letter followed by a signed decimal number
        if c.is_ascii_alphabetic() {
            let letter = c.to_ascii_uppercase();
            self.pos += 1;
            let value_start = self.pos;
            while self.pos < len && (bytes[self.pos].is_ascii_digit() || matches!(bytes[self.pos], b'.' | b'-' | b'+')) {
                self.pos += 1;
            }
            let value = &self.src[value_start..self.pos];
            return Some(Ok(GCodeToken::Word { letter, value, span: GCodeSpan::new(start..self.pos) }));
        }

        let err_span = GCodeSpan::new(start..start + c.len_utf8());
        self.pos = len;
        Some(Err(GCodeError { message: format!("Unexpected character: {}", c), span: err_span }))
    }
}

impl<'a> Iterator for GCodeParser<'a> {
    type Item = Result<GCodeToken<'a>, GCodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let token = self.next_token();
        if matches!(token, Some(Err(_))) {
            self.failed = true;
        }
        token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_parsing() {
        let tokens = GCodeParser::tokenize("G1 X10.0 Y-20.5").unwrap();
        assert_eq!(tokens.len(), 3);
        match &tokens[1] {
            GCodeToken::Word { letter, value, span } => {
                assert_eq!(*letter, 'X');
                assert_eq!(*value, "10.0");
                assert_eq!(span.range, 3..8);
            }
            _ => panic!("Expected X word"),
        }
        match &tokens[2] {
            GCodeToken::Word { letter, value, .. } => {
                assert_eq!(*letter, 'Y');
                assert_eq!(*value, "-20.5");
            }
            _ => panic!("Expected Y word"),
        }
    }

    #[test]
    fn test_packed_words_split() {
        let tokens = GCodeParser::tokenize("g1x1y2").unwrap();
        let letters: Vec<char> = tokens
            .iter()
            .filter_map(|t| match t {
                GCodeToken::Word { letter, .. } => Some(*letter),
                _ => None,
            })
            .collect();
        assert_eq!(letters, vec!['G', 'X', 'Y']);
    }

    #[test]
    fn test_trailing_comment() {
        let tokens = GCodeParser::tokenize("G1 X1 ; perimeter").unwrap();
        match tokens.last().unwrap() {
            GCodeToken::Comment(text, span) => {
                assert_eq!(*text, "perimeter");
                assert_eq!(span.range, 6..17);
            }
            _ => panic!("Expected comment"),
        }
    }

    #[test]
    fn test_paren_comment_and_checksum() {
        let tokens = GCodeParser::tokenize("N10 G1 (move) X5*71").unwrap();
        assert!(matches!(tokens[2], GCodeToken::Comment("move", _)));
        assert!(matches!(tokens[4], GCodeToken::Checksum { value: "71", .. }));
    }

    #[test]
    fn test_unexpected_character_stops_iteration() {
        let mut parser = GCodeParser::new("G1 #X1 Y2");
        assert!(parser.next().unwrap().is_ok());
        let err = parser.next().unwrap().unwrap_err();
        assert_eq!(err.span.range, 3..4);
        assert!(parser.next().is_none());
    }

    #[test]
    fn test_unclosed_comment() {
        let result = GCodeParser::tokenize("G1 (oops");
        assert!(result.is_err());
    }
}
