use crate::error::{ExprError, ExprResult};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    Percent,
    LParen,
    RParen,
    Comma,
    Eof,
}

/// A token with the 1-based column it starts at.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Spanned {
    pub token: Token,
    pub col: usize,
}

#[derive(Debug)]
pub(crate) struct Lexer<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input: input.as_bytes(),
            pos: 0,
        }
    }

    fn error(&self, msg: impl Into<String>) -> ExprError {
        ExprError::Parse {
            col: self.pos + 1,
            message: msg.into(),
        }
    }

    fn peek_byte(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn peek_byte_at(&self, offset: usize) -> Option<u8> {
        self.input.get(self.pos + offset).copied()
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek_byte(), Some(b' ' | b'\t' | b'\r' | b'\n')) {
            self.pos += 1;
        }
    }

    pub fn tokenize(mut self) -> ExprResult<Vec<Spanned>> {
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

    fn next_token(&mut self) -> ExprResult<Spanned> {
        self.skip_whitespace();
        let col = self.pos + 1;

        let Some(b) = self.peek_byte() else {
            return Ok(Spanned {
                token: Token::Eof,
                col,
            });
        };

        let token = match b {
            b'+' => self.single(Token::Plus),
            b'-' => self.single(Token::Minus),
            b'*' => {
                if self.peek_byte_at(1) == Some(b'*') {
                    self.pos += 2;
                    Token::DoubleStar
                } else {
                    self.single(Token::Star)
                }
            }
            b'/' => self.single(Token::Slash),
            b'%' => self.single(Token::Percent),
            b'(' => self.single(Token::LParen),
            b')' => self.single(Token::RParen),
            b',' => self.single(Token::Comma),
            b'0'..=b'9' | b'.' => self.read_number()?,
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => self.read_ident(),
            _ => return Err(self.error(format!("unexpected character: {:?}", b as char))),
        };

        Ok(Spanned { token, col })
    }

    fn single(&mut self, token: Token) -> Token {
        self.pos += 1;
        token
    }

    fn read_number(&mut self) -> ExprResult<Token> {
        let start = self.pos;
        while matches!(self.peek_byte(), Some(b'0'..=b'9' | b'.')) {
            self.pos += 1;
        }
        // Exponent: only consumed when followed by digits, so `2e` stays an error.
        if matches!(self.peek_byte(), Some(b'e' | b'E')) {
            let sign = usize::from(matches!(self.peek_byte_at(1), Some(b'+' | b'-')));
            if matches!(self.peek_byte_at(1 + sign), Some(b'0'..=b'9')) {
                self.pos += 1 + sign;
                while matches!(self.peek_byte(), Some(b'0'..=b'9')) {
                    self.pos += 1;
                }
            }
        }

        let text = std::str::from_utf8(&self.input[start..self.pos])
            .map_err(|_| self.error("invalid UTF-8 in number"))?;
        text.parse::<f64>()
            .map(Token::Number)
            .map_err(|_| ExprError::Parse {
                col: start + 1,
                message: format!("invalid number: {text:?}"),
            })
    }

    fn read_ident(&mut self) -> Token {
        let start = self.pos;
        while matches!(
            self.peek_byte(),
            Some(b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'_')
        ) {
            self.pos += 1;
        }
        // Identifier bytes are ASCII, so the slice is valid UTF-8.
        let name = String::from_utf8_lossy(&self.input[start..self.pos]).into_owned();
        Token::Ident(name)
    }
}
