use std::convert::TryFrom;
use std::error::Error;
use std::fmt::{self, Display};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Operator symbols, longest first so that `<=` wins over `<`.
static SYMBOLS: &[&str] = &[
    "**", "==", "!=", "<>", "<=", ">=", "&&", "||", "+", "-", "*", "/", "^", "%", "&", "!", "=",
    "<", ">",
];

const fn build_symbol_starts() -> [bool; 256] {
    let mut tbl = [false; 256];
    let mut i = 0;
    while i < SYMBOLS.len() {
        tbl[SYMBOLS[i].as_bytes()[0] as usize] = true;
        i += 1;
    }
    tbl
}
static SYMBOL_STARTS: [bool; 256] = build_symbol_starts();

#[inline(always)]
fn is_symbol_start(c: u8) -> bool {
    SYMBOL_STARTS[c as usize] || c == b'|'
}

#[inline(always)]
fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

#[inline(always)]
fn is_ident_continue(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_' || c == b'.'
}

/// A lexing failure with the byte offset it was detected at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
    pub message: String,
    pub pos: usize,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LexError at {}: {}", self.pos, self.message)
    }
}

impl Error for LexError {}

/// The raw class of a lexeme; operator/function meaning is assigned later
/// by whoever owns an operator registry.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LexemeKind {
    Number,
    Text,
    Ident,
    Symbol,
    LeftParen,
    RightParen,
    Comma,
}

impl Display for LexemeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// One lexeme with its byte span in the source.
///
/// For `Text` lexemes `value` holds the unescaped content; for every other
/// kind it is the source slice.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Lexeme {
    pub value: String,
    pub kind: LexemeKind,
    pub start: usize,
    pub end: usize,
}

impl Display for Lexeme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} {} @{}..{}>", self.kind, self.value, self.start, self.end)
    }
}

impl Lexeme {
    pub fn new(value: impl Into<String>, kind: LexemeKind, start: usize, end: usize) -> Self {
        Lexeme {
            value: value.into(),
            kind,
            start,
            end,
        }
    }

    fn from_slice(source: &str, kind: LexemeKind, start: usize, end: usize) -> Self {
        Lexeme::new(&source[start..end], kind, start, end)
    }

    pub fn is_symbol(&self, symbol: &str) -> bool {
        self.kind == LexemeKind::Symbol && self.value == symbol
    }

    /// Number literals parse with Rust float syntax.
    pub fn as_number(&self) -> Option<f64> {
        match self.kind {
            LexemeKind::Number => self.value.parse::<f64>().ok(),
            _ => None,
        }
    }

    /// Source form of the lexeme (text is re-quoted).
    pub fn source_form(&self) -> String {
        match self.kind {
            LexemeKind::Text => quote_text(&self.value),
            _ => self.value.clone(),
        }
    }
}

/// Quote `s` as a double-quoted formula string, doubling embedded quotes.
pub fn quote_text(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Splits formula text into lexemes.
#[derive(Debug)]
pub struct Lexer {
    formula: String,
    pub items: Vec<Lexeme>,
    offset: usize,
}

impl Lexer {
    /// Create a new lexer and immediately scan the formula.
    pub fn new(formula: &str) -> Result<Self, LexError> {
        let mut lexer = Lexer {
            formula: formula.to_string(),
            items: Vec::with_capacity(formula.len() / 2),
            offset: 0,
        };
        lexer.scan()?;
        Ok(lexer)
    }

    pub fn formula(&self) -> &str {
        &self.formula
    }

    #[inline]
    fn current_byte(&self) -> Option<u8> {
        self.formula.as_bytes().get(self.offset).copied()
    }

    #[inline]
    fn peek_byte(&self, ahead: usize) -> Option<u8> {
        self.formula.as_bytes().get(self.offset + ahead).copied()
    }

    fn scan(&mut self) -> Result<(), LexError> {
        // An optional leading '=' marks formula text.
        let leading = self.formula.len() - self.formula.trim_start().len();
        self.offset = leading;
        if self.current_byte() == Some(b'=') && self.peek_byte(1) != Some(b'=') {
            self.offset += 1;
        }

        while let Some(curr_byte) = self.current_byte() {
            match curr_byte {
                b' ' | b'\t' | b'\n' | b'\r' => self.offset += 1,
                b'"' | b'\'' => self.scan_text()?,
                b'(' => self.push_single(LexemeKind::LeftParen),
                b')' => self.push_single(LexemeKind::RightParen),
                b',' => self.push_single(LexemeKind::Comma),
                b'0'..=b'9' => self.scan_number()?,
                b'.' if self.peek_byte(1).is_some_and(|b| b.is_ascii_digit()) => {
                    self.scan_number()?
                }
                c if is_ident_start(c) => self.scan_ident(),
                c if is_symbol_start(c) => self.scan_symbol()?,
                _ => {
                    let ch = self.formula[self.offset..].chars().next().unwrap_or('?');
                    return Err(LexError {
                        message: format!("Unexpected character '{ch}'"),
                        pos: self.offset,
                    });
                }
            }
        }
        Ok(())
    }

    fn push_single(&mut self, kind: LexemeKind) {
        self.items.push(Lexeme::from_slice(
            &self.formula,
            kind,
            self.offset,
            self.offset + 1,
        ));
        self.offset += 1;
    }

    fn scan_number(&mut self) -> Result<(), LexError> {
        let start = self.offset;
        let bytes = self.formula.as_bytes();
        let mut dot_seen = false;
        while self.offset < bytes.len() {
            match bytes[self.offset] {
                b'0'..=b'9' => self.offset += 1,
                b'.' if !dot_seen => {
                    dot_seen = true;
                    self.offset += 1;
                }
                _ => break,
            }
        }

        // Scientific notation: 1.5e-3, 2E10
        if matches!(self.current_byte(), Some(b'e' | b'E')) {
            let mut look = 1;
            if matches!(self.peek_byte(1), Some(b'+' | b'-')) {
                look = 2;
            }
            if self.peek_byte(look).is_some_and(|b| b.is_ascii_digit()) {
                self.offset += look;
                while self.current_byte().is_some_and(|b| b.is_ascii_digit()) {
                    self.offset += 1;
                }
            }
        }

        let lexeme = Lexeme::from_slice(&self.formula, LexemeKind::Number, start, self.offset);
        if lexeme.as_number().is_none() {
            return Err(LexError {
                message: format!("Malformed number '{}'", lexeme.value),
                pos: start,
            });
        }
        self.items.push(lexeme);
        Ok(())
    }

    fn scan_ident(&mut self) {
        let start = self.offset;
        while self.current_byte().is_some_and(is_ident_continue) {
            self.offset += 1;
        }
        self.items.push(Lexeme::from_slice(
            &self.formula,
            LexemeKind::Ident,
            start,
            self.offset,
        ));
    }

    fn scan_symbol(&mut self) -> Result<(), LexError> {
        let rest = &self.formula[self.offset..];
        match SYMBOLS.iter().find(|s| rest.starts_with(**s)) {
            Some(symbol) => {
                let end = self.offset + symbol.len();
                self.items.push(Lexeme::from_slice(
                    &self.formula,
                    LexemeKind::Symbol,
                    self.offset,
                    end,
                ));
                self.offset = end;
                Ok(())
            }
            None => Err(LexError {
                message: format!("Unknown operator symbol at '{}'", &rest[..1]),
                pos: self.offset,
            }),
        }
    }

    /// Scan a quoted string; a doubled delimiter escapes itself.
    fn scan_text(&mut self) -> Result<(), LexError> {
        let delim = self.formula.as_bytes()[self.offset];
        let start = self.offset;
        self.offset += 1;

        let mut content = String::new();
        let mut chunk_start = self.offset;
        while self.offset < self.formula.len() {
            if self.formula.as_bytes()[self.offset] == delim {
                content.push_str(&self.formula[chunk_start..self.offset]);
                self.offset += 1;
                if self.current_byte() == Some(delim) {
                    content.push(delim as char);
                    self.offset += 1;
                    chunk_start = self.offset;
                } else {
                    self.items
                        .push(Lexeme::new(content, LexemeKind::Text, start, self.offset));
                    return Ok(());
                }
            } else {
                self.offset += 1;
            }
        }

        Err(LexError {
            message: "Reached end of formula while parsing string".to_string(),
            pos: start,
        })
    }

    /// Reconstruct a normalized formula from the lexemes.
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(self.formula.len());
        let mut prev: Option<&Lexeme> = None;
        for item in &self.items {
            if let Some(p) = prev {
                let tight = p.kind == LexemeKind::LeftParen
                    || matches!(item.kind, LexemeKind::RightParen | LexemeKind::Comma)
                    || (item.kind == LexemeKind::LeftParen && p.kind == LexemeKind::Ident);
                if !tight {
                    out.push(' ');
                }
            }
            out.push_str(&item.source_form());
            prev = Some(item);
        }
        out
    }
}

impl TryFrom<&str> for Lexer {
    type Error = LexError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Lexer::new(value)
    }
}

impl TryFrom<String> for Lexer {
    type Error = LexError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Lexer::new(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(formula: &str) -> Vec<LexemeKind> {
        Lexer::new(formula)
            .unwrap()
            .items
            .into_iter()
            .map(|l| l.kind)
            .collect()
    }

    #[test]
    fn scans_arithmetic_with_spans() {
        let lexer = Lexer::new("2 + 3*4").unwrap();
        let values: Vec<&str> = lexer.items.iter().map(|l| l.value.as_str()).collect();
        assert_eq!(values, ["2", "+", "3", "*", "4"]);
        assert_eq!((lexer.items[3].start, lexer.items[3].end), (5, 6));
    }

    #[test]
    fn longest_symbol_wins() {
        let lexer = Lexer::new("a <= b <> c ** 2 && d").unwrap();
        let symbols: Vec<&str> = lexer
            .items
            .iter()
            .filter(|l| l.kind == LexemeKind::Symbol)
            .map(|l| l.value.as_str())
            .collect();
        assert_eq!(symbols, ["<=", "<>", "**", "&&"]);
    }

    #[test]
    fn scientific_numbers_stay_whole() {
        let lexer = Lexer::new("1.5e-3 + .5 + 2E10").unwrap();
        let numbers: Vec<f64> = lexer.items.iter().filter_map(|l| l.as_number()).collect();
        assert_eq!(numbers, [0.0015, 0.5, 2e10]);
    }

    #[test]
    fn strings_unescape_doubled_delimiters() {
        let lexer = Lexer::new(r#"col "Unit ""Net"" Price""#).unwrap();
        assert_eq!(lexer.items[1].kind, LexemeKind::Text);
        assert_eq!(lexer.items[1].value, "Unit \"Net\" Price");
        assert_eq!(lexer.items[1].source_form(), r#""Unit ""Net"" Price""#);
    }

    #[test]
    fn leading_equals_is_skipped() {
        assert_eq!(
            kinds("=sum(col 1)"),
            [
                LexemeKind::Ident,
                LexemeKind::LeftParen,
                LexemeKind::Ident,
                LexemeKind::Number,
                LexemeKind::RightParen
            ]
        );
        assert_eq!(kinds("== 1"), [LexemeKind::Symbol, LexemeKind::Number]);
    }

    #[test]
    fn errors_carry_positions() {
        let err = Lexer::new("1 + \"open").unwrap_err();
        assert_eq!(err.pos, 4);
        let err = Lexer::new("1 # 2").unwrap_err();
        assert_eq!(err.pos, 2);
        let err = Lexer::new("a | b").unwrap_err();
        assert_eq!(err.pos, 2);
    }

    #[test]
    fn render_normalizes_spacing() {
        let lexer = Lexer::new("max2( 1 ,2)+'x'").unwrap();
        assert_eq!(lexer.render(), "max2(1, 2) + \"x\"");
    }
}
