use crate::lexer::Token;
use crate::plugin::{Plugin, TokenOrigin};
use crate::shell::ShellContext;
use anyhow::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    Normal,
    Escape,
    /// Collecting the digits after `\x`.
    Hex,
}

/// Decode `\xHH` escapes in `text`.
///
/// Anything that is not a well-formed two digit escape is kept verbatim,
/// including unknown escapes such as `\n` and a trailing `\`.
pub fn decode_escapes(text: &str) -> String {
    if !text.contains('\\') {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut state = DecodeState::Normal;
    let mut digits = String::with_capacity(2);

    for c in text.chars() {
        match state {
            DecodeState::Normal => {
                if c == '\\' {
                    state = DecodeState::Escape;
                } else {
                    out.push(c);
                }
            }
            DecodeState::Escape => {
                if c == 'x' {
                    digits.clear();
                    state = DecodeState::Hex;
                } else {
                    out.push('\\');
                    out.push(c);
                    state = DecodeState::Normal;
                }
            }
            DecodeState::Hex => {
                digits.push(c);
                if digits.chars().count() == 2 {
                    match decode_hex_pair(&digits) {
                        Some(decoded) => out.push(decoded),
                        None => {
                            out.push_str("\\x");
                            out.push_str(&digits);
                        }
                    }
                    state = DecodeState::Normal;
                }
            }
        }
    }

    match state {
        DecodeState::Normal => {}
        DecodeState::Escape => out.push('\\'),
        DecodeState::Hex => {
            out.push_str("\\x");
            out.push_str(&digits);
        }
    }
    out
}

fn decode_hex_pair(digits: &str) -> Option<char> {
    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    u8::from_str_radix(digits, 16).ok().map(char::from)
}

/// Preprocess hook decoding `\xHH` escapes in every string token.
pub struct HexCodePlugin {
    preprocess: i32,
}

impl HexCodePlugin {
    pub fn new(preprocess: i32) -> Self {
        Self { preprocess }
    }
}

impl Default for HexCodePlugin {
    fn default() -> Self {
        Self::new(5)
    }
}

impl Plugin for HexCodePlugin {
    fn name(&self) -> &str {
        "hexcode"
    }

    fn preprocess_priority(&self) -> Option<i32> {
        Some(self.preprocess)
    }

    fn on_tokenize(
        &self,
        _ctx: &ShellContext,
        mut tokens: Vec<Token>,
        _origin: TokenOrigin,
    ) -> Result<Vec<Token>> {
        for token in tokens.iter_mut() {
            if let Token::String(t) = token {
                if t.text.contains('\\') {
                    t.text = decode_escapes(&t.text);
                }
            }
        }
        Ok(tokens)
    }
}
