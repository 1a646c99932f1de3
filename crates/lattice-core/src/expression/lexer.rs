//! Tokenizer for step predicates and parameter expressions.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    True,
    False,
    String(String),
    Identifier(String),

    Eq,  // ==
    Ne,  // !=
    And, // &&
    Or,  // ||
    Not, // !
    Dot,
    Comma,
    LParen,
    RParen,

    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::True => write!(f, "true"),
            Token::False => write!(f, "false"),
            Token::String(s) => write!(f, "'{}'", s),
            Token::Identifier(s) => write!(f, "{}", s),
            Token::Eq => write!(f, "=="),
            Token::Ne => write!(f, "!="),
            Token::And => write!(f, "&&"),
            Token::Or => write!(f, "||"),
            Token::Not => write!(f, "!"),
            Token::Dot => write!(f, "."),
            Token::Comma => write!(f, ","),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::Eof => write!(f, "end of expression"),
        }
    }
}

/// A token plus the byte offset it starts at.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub position: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub message: String,
    pub position: usize,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at position {}", self.message, self.position)
    }
}

impl std::error::Error for LexError {}

pub struct Lexer<'a> {
    input: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.char_indices().peekable(),
        }
    }

    /// Tokenize the whole input. The last token is always `Eof`.
    pub fn tokenize(mut self) -> Result<Vec<Spanned>, LexError> {
        let mut tokens = Vec::new();
        loop {
            let spanned = self.next_token()?;
            let done = spanned.token == Token::Eof;
            tokens.push(spanned);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn next_token(&mut self) -> Result<Spanned, LexError> {
        while self.chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}

        let Some((position, c)) = self.chars.next() else {
            return Ok(Spanned {
                token: Token::Eof,
                position: self.input.len(),
            });
        };

        let token = match c {
            '(' => Token::LParen,
            ')' => Token::RParen,
            ',' => Token::Comma,
            '.' => Token::Dot,
            '=' => self.expect_second('=', Token::Eq, position)?,
            '&' => self.expect_second('&', Token::And, position)?,
            '|' => self.expect_second('|', Token::Or, position)?,
            '!' => {
                if self.chars.next_if(|(_, c)| *c == '=').is_some() {
                    Token::Ne
                } else {
                    Token::Not
                }
            }
            '\'' | '"' => self.read_string(c, position)?,
            c if is_identifier_start(c) => self.read_identifier(position),
            other => {
                return Err(LexError {
                    message: format!("unexpected character '{}'", other),
                    position,
                });
            }
        };

        Ok(Spanned { token, position })
    }

    fn expect_second(
        &mut self,
        second: char,
        token: Token,
        position: usize,
    ) -> Result<Token, LexError> {
        if self.chars.next_if(|(_, c)| *c == second).is_some() {
            Ok(token)
        } else {
            Err(LexError {
                message: format!("expected '{}{}'", second, second),
                position,
            })
        }
    }

    fn read_string(&mut self, quote: char, position: usize) -> Result<Token, LexError> {
        let mut value = String::new();
        loop {
            match self.chars.next() {
                // A doubled quote inside a string is a literal quote.
                Some((_, c)) if c == quote => {
                    if self.chars.next_if(|(_, c)| *c == quote).is_some() {
                        value.push(quote);
                    } else {
                        return Ok(Token::String(value));
                    }
                }
                Some((_, c)) => value.push(c),
                None => {
                    return Err(LexError {
                        message: "unterminated string".to_string(),
                        position,
                    });
                }
            }
        }
    }

    fn read_identifier(&mut self, start: usize) -> Token {
        let mut end = self.input.len();
        while let Some(&(i, c)) = self.chars.peek() {
            if is_identifier_continue(c) {
                self.chars.next();
            } else {
                end = i;
                break;
            }
        }

        match &self.input[start..end] {
            "true" => Token::True,
            "false" => Token::False,
            ident => Token::Identifier(ident.to_string()),
        }
    }
}

fn is_identifier_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_identifier_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}
