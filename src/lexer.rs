//! Lexical analysis of a raw input line into [`Token`]s.
//!
//! The tokenizer only decides where tokens begin and end. Backslash escapes
//! that do not affect token boundaries are left in the token text so that the
//! preprocess hooks (hex decoding, variable expansion) can interpret them.

use crate::error::TokenizeError;

/// Characters that form operators when unquoted.
const OPERATOR_CHARS: &str = "|&;<>";

/// Literal text, possibly enclosed in quotes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringToken {
    /// Char offset of the first character of the token in the line.
    pub index: usize,
    pub text: String,
    /// The enclosing quote character, if the token was quoted.
    pub quote: Option<char>,
}

impl StringToken {
    pub fn new(index: usize, text: impl Into<String>, quote: Option<char>) -> Self {
        Self {
            index,
            text: text.into(),
            quote,
        }
    }
}

/// Shell operator recognized between words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// `|`: pipe stdout into the next stage
    Pipe,
    /// `||`: run next only if previous failed
    Or,
    /// `&&`: run next only if previous succeeded
    And,
    /// `;`: run next unconditionally
    Semicolon,
    /// `>`
    RedirectOut,
    /// `>>`
    RedirectAppend,
    /// `<`
    RedirectIn,
}

impl Operator {
    /// The operator's shell syntax.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Pipe => "|",
            Operator::Or => "||",
            Operator::And => "&&",
            Operator::Semicolon => ";",
            Operator::RedirectOut => ">",
            Operator::RedirectAppend => ">>",
            Operator::RedirectIn => "<",
        }
    }

    pub fn is_redirect(&self) -> bool {
        matches!(
            self,
            Operator::RedirectOut | Operator::RedirectAppend | Operator::RedirectIn
        )
    }
}

/// Represents a token resulting from lexical analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    String(StringToken),
    /// A run of one or more whitespace characters.
    Whitespace { index: usize },
    Operator { index: usize, op: Operator },
}

impl Token {
    pub fn string(index: usize, text: impl Into<String>, quote: Option<char>) -> Self {
        Token::String(StringToken::new(index, text, quote))
    }

    pub fn whitespace(index: usize) -> Self {
        Token::Whitespace { index }
    }

    pub fn index(&self) -> usize {
        match self {
            Token::String(t) => t.index,
            Token::Whitespace { index } | Token::Operator { index, .. } => *index,
        }
    }

    /// The token's text as it would read on the command line.
    pub fn text(&self) -> &str {
        match self {
            Token::String(t) => &t.text,
            Token::Whitespace { .. } => " ",
            Token::Operator { op, .. } => op.as_str(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexingState {
    Normal,
    Quoted(char),
}

struct LexingFSM {
    input: Vec<char>,
    pos: usize,
    state: LexingState,
    current: Option<StringToken>,
    out: Vec<Token>,
}

impl LexingFSM {
    fn new(line: &str) -> Self {
        LexingFSM {
            input: line.chars().collect(),
            pos: 0,
            state: LexingState::Normal,
            current: None,
            out: Vec::new(),
        }
    }

    fn make_tokens(mut self) -> Result<Vec<Token>, TokenizeError> {
        while let Some(ch) = self.read_char() {
            match self.state {
                LexingState::Normal => self.handle_normal(ch),
                LexingState::Quoted(quote) => self.handle_quoted(ch, quote),
            }
        }

        if let LexingState::Quoted(quote) = self.state {
            let index = self.current.as_ref().map_or(0, |t| t.index);
            return Err(TokenizeError::UnterminatedQuote { quote, index });
        }

        self.finish_word();
        Ok(self.out)
    }

    fn read_char(&mut self) -> Option<char> {
        let ch = self.input.get(self.pos).copied();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    fn peek_char(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    /// Offset of the character most recently returned by `read_char`.
    fn last_index(&self) -> usize {
        self.pos - 1
    }

    fn push_word_char(&mut self, index: usize, ch: char) {
        self.current
            .get_or_insert_with(|| StringToken::new(index, String::new(), None))
            .text
            .push(ch);
    }

    fn finish_word(&mut self) {
        if let Some(token) = self.current.take() {
            self.out.push(Token::String(token));
        }
    }

    fn push_operator(&mut self, index: usize, op: Operator) {
        self.finish_word();
        self.out.push(Token::Operator { index, op });
    }

    fn handle_normal(&mut self, ch: char) {
        let index = self.last_index();
        match ch {
            c if c.is_whitespace() => {
                self.finish_word();
                if !matches!(self.out.last(), Some(Token::Whitespace { .. })) {
                    self.out.push(Token::whitespace(index));
                }
            }
            '\\' => match self.peek_char() {
                Some(next)
                    if next.is_whitespace()
                        || next == '\''
                        || next == '"'
                        || OPERATOR_CHARS.contains(next) =>
                {
                    self.read_char();
                    self.push_word_char(index, next);
                }
                Some(next) => {
                    self.read_char();
                    self.push_word_char(index, '\\');
                    self.push_word_char(index, next);
                }
                None => self.push_word_char(index, '\\'),
            },
            '\'' | '"' => {
                self.finish_word();
                self.current = Some(StringToken::new(index, String::new(), Some(ch)));
                self.state = LexingState::Quoted(ch);
            }
            '|' => {
                if self.peek_char() == Some('|') {
                    self.read_char();
                    self.push_operator(index, Operator::Or);
                } else {
                    self.push_operator(index, Operator::Pipe);
                }
            }
            '&' if self.peek_char() == Some('&') => {
                self.read_char();
                self.push_operator(index, Operator::And);
            }
            ';' => self.push_operator(index, Operator::Semicolon),
            '>' => {
                if self.peek_char() == Some('>') {
                    self.read_char();
                    self.push_operator(index, Operator::RedirectAppend);
                } else {
                    self.push_operator(index, Operator::RedirectOut);
                }
            }
            '<' => self.push_operator(index, Operator::RedirectIn),
            c => self.push_word_char(index, c),
        }
    }

    fn handle_quoted(&mut self, ch: char, quote: char) {
        if ch == quote {
            self.finish_word();
            self.state = LexingState::Normal;
            return;
        }

        let text = match self.current.as_mut() {
            Some(token) => &mut token.text,
            None => return,
        };
        if ch == '\\' && self.input.get(self.pos) == Some(&quote) {
            self.pos += 1;
            text.push(quote);
        } else {
            text.push(ch);
        }
    }
}

/// Split a raw input line into tokens.
pub fn tokenize(line: &str) -> Result<Vec<Token>, TokenizeError> {
    LexingFSM::new(line).make_tokens()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(tokens: &[Token]) -> Vec<String> {
        tokens.iter().map(|t| t.text().to_string()).collect()
    }

    #[test]
    fn test_words_and_whitespace() {
        let tokens = tokenize("echo  hello world").unwrap();
        assert_eq!(texts(&tokens), vec!["echo", " ", "hello", " ", "world"]);
        assert_eq!(tokens[2].index(), 6);
    }

    #[test]
    fn test_indices_never_decrease() {
        let tokens = tokenize("a 'b c'|d>>e").unwrap();
        let indices: Vec<usize> = tokens.iter().map(Token::index).collect();
        assert!(indices.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_quoted_token_keeps_marker_and_spaces() {
        let tokens = tokenize("echo \"a  b\" 'c'").unwrap();
        assert_eq!(tokens[2], Token::string(5, "a  b", Some('"')));
        assert_eq!(tokens[4], Token::string(12, "c", Some('\'')));
    }

    #[test]
    fn test_empty_quotes_produce_token() {
        let tokens = tokenize("''").unwrap();
        assert_eq!(tokens, vec![Token::string(0, "", Some('\''))]);
    }

    #[test]
    fn test_adjacent_quoted_and_bare_text_are_separate_tokens() {
        let tokens = tokenize("ab\"cd\"ef").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::string(0, "ab", None),
                Token::string(2, "cd", Some('"')),
                Token::string(6, "ef", None),
            ]
        );
    }

    #[test]
    fn test_operators() {
        let tokens = tokenize("a|b||c&&d;e>f>>g<h").unwrap();
        let ops: Vec<Operator> = tokens
            .iter()
            .filter_map(|t| match t {
                Token::Operator { op, .. } => Some(*op),
                _ => None,
            })
            .collect();
        assert_eq!(
            ops,
            vec![
                Operator::Pipe,
                Operator::Or,
                Operator::And,
                Operator::Semicolon,
                Operator::RedirectOut,
                Operator::RedirectAppend,
                Operator::RedirectIn,
            ]
        );
    }

    #[test]
    fn test_operator_chars_inside_quotes_are_literal() {
        let tokens = tokenize("'a | b'").unwrap();
        assert_eq!(tokens, vec![Token::string(0, "a | b", Some('\''))]);
    }

    #[test]
    fn test_escapes_for_hooks_are_preserved() {
        let tokens = tokenize(r"\x41 \$name").unwrap();
        assert_eq!(texts(&tokens), vec![r"\x41", " ", r"\$name"]);
    }

    #[test]
    fn test_escaped_space_and_pipe_join_word() {
        let tokens = tokenize(r"a\ b\|c").unwrap();
        assert_eq!(tokens, vec![Token::string(0, "a b|c", None)]);
    }

    #[test]
    fn test_escaped_quote_inside_quotes() {
        let tokens = tokenize(r#""say \"hi\"""#).unwrap();
        assert_eq!(tokens, vec![Token::string(0, r#"say "hi""#, Some('"'))]);
    }

    #[test]
    fn test_trailing_backslash_is_kept() {
        let tokens = tokenize("abc\\").unwrap();
        assert_eq!(tokens, vec![Token::string(0, "abc\\", None)]);
    }

    #[test]
    fn test_unterminated_quote() {
        let err = tokenize("echo 'oops").unwrap_err();
        assert_eq!(
            err,
            TokenizeError::UnterminatedQuote {
                quote: '\'',
                index: 5
            }
        );
    }
}
