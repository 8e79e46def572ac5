use crate::ast::{Document, Import, Node, Prop, Value};
use crate::error::ParseError;
use crate::lexer::{Lexer, Token, TokenWithPos};

// ── Parser ────────────────────────────────────────────────────────────────

pub struct Parser {
    tokens: Vec<TokenWithPos>,
    pos: usize,
}

impl Parser {
    pub fn new(tokens: Vec<TokenWithPos>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn current_pos(&self) -> (usize, usize) {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or((1, 1), |t| (t.line, t.col))
    }

    fn peek(&self) -> &Token {
        self.peek_ahead(0)
    }

    /// Look at the token `offset` positions ahead of current without consuming.
    fn peek_ahead(&self, offset: usize) -> &Token {
        self.tokens.get(self.pos + offset).map_or(&Token::Eof, |t| &t.token)
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    /// Error positioned at the current token.
    fn err(&self, msg: impl Into<String>) -> ParseError {
        let (line, col) = self.current_pos();
        ParseError::new(msg, line, col)
    }

    /// Consumes the current token, or fails pointing at it.
    fn expect(&mut self, expected: &Token) -> Result<(), ParseError> {
        if self.peek() == expected {
            self.advance();
            Ok(())
        } else {
            Err(self.err(format!("expected {expected:?}, got {:?}", self.peek())))
        }
    }

    fn expect_ident(&mut self) -> Result<String, ParseError> {
        match self.peek() {
            Token::Ident(s) => {
                let s = s.clone();
                self.advance();
                Ok(s)
            }
            tok => Err(self.err(format!("expected identifier, got {tok:?}"))),
        }
    }

    fn expect_str(&mut self) -> Result<String, ParseError> {
        match self.peek() {
            Token::Str(s) => {
                let s = s.clone();
                self.advance();
                Ok(s)
            }
            tok => Err(self.err(format!("expected string, got {tok:?}"))),
        }
    }

    // ── Document ──────────────────────────────────────────────────────────

    pub fn parse_document(&mut self) -> Result<Document, ParseError> {
        let mut imports = Vec::new();
        while self.peek() == &Token::Use {
            imports.push(self.parse_import()?);
        }

        let root = self.parse_node()?;
        if self.peek() != &Token::Eof {
            return Err(self.err("expected end of input after the root node"));
        }
        Ok(Document { imports, root })
    }

    fn parse_import(&mut self) -> Result<Import, ParseError> {
        self.advance(); // consume `use`
        let path = self.expect_str()?;
        self.expect(&Token::As)?;
        let alias = self.expect_ident()?;
        Ok(Import { path, alias })
    }

    // ── Node ──────────────────────────────────────────────────────────────

    fn parse_node(&mut self) -> Result<Node, ParseError> {
        let (line, col) = self.current_pos();
        let tag = self.expect_ident()?;

        let (props, children) = if self.peek() == &Token::LBrace {
            self.parse_block()?
        } else {
            (Vec::new(), Vec::new())
        };
        Ok(Node { tag, props, children, line, col })
    }

    /// Parse `{ item* }` where each item is a `key: value` property or a child node.
    ///
    /// Disambiguation looks one token past the identifier:
    /// - `Ident ":"` or `Ident "."` → property
    /// - anything else → child node
    fn parse_block(&mut self) -> Result<(Vec<Prop>, Vec<Node>), ParseError> {
        let open = self.err("unclosed '{' block");
        self.advance(); // consume `{`
        let mut props = Vec::new();
        let mut children = Vec::new();

        loop {
            match self.peek() {
                Token::RBrace => {
                    self.advance();
                    break;
                }
                Token::Eof => return Err(open),
                Token::Comma => {
                    self.advance();
                }
                Token::Ident(_) => {
                    if matches!(self.peek_ahead(1), Token::Colon | Token::Dot) {
                        props.push(self.parse_prop()?);
                    } else {
                        children.push(self.parse_node()?);
                    }
                }
                tok => {
                    return Err(self.err(format!(
                        "unexpected {tok:?} inside block, expected a property (key: value) or an element"
                    )));
                }
            }
        }
        Ok((props, children))
    }

    // ── Prop ──────────────────────────────────────────────────────────────

    /// `ident ("." ident)* ":"`
    fn parse_key(&mut self) -> Result<String, ParseError> {
        let mut key = self.expect_ident()?;
        while self.peek() == &Token::Dot {
            self.advance();
            key.push('.');
            key.push_str(&self.expect_ident()?);
        }
        self.expect(&Token::Colon)?;
        Ok(key)
    }

    fn parse_prop(&mut self) -> Result<Prop, ParseError> {
        let (line, col) = self.current_pos();
        let key = self.parse_key()?;
        let value = self.parse_value()?;
        Ok(Prop { key, value, line, col })
    }

    // ── Value ─────────────────────────────────────────────────────────────

    fn parse_value(&mut self) -> Result<Value, ParseError> {
        let value = match self.peek() {
            Token::Str(s) => Value::Str(s.clone()),
            Token::Number(n) => Value::Number(*n),
            Token::Color(c) => Value::Color(*c),
            Token::Ident(s) => Value::Ident(s.clone()),
            Token::True => Value::Bool(true),
            Token::False => Value::Bool(false),
            Token::Null => Value::Null,
            Token::LBracket => return self.parse_list(),
            Token::LBrace => return self.parse_map(),
            tok => return Err(self.err(format!("expected a value, got {tok:?}"))),
        };
        self.advance();
        Ok(value)
    }

    fn parse_list(&mut self) -> Result<Value, ParseError> {
        let open = self.err("unclosed '[' list");
        self.advance(); // consume `[`
        let mut items = Vec::new();
        loop {
            match self.peek() {
                Token::RBracket => {
                    self.advance();
                    return Ok(Value::List(items));
                }
                Token::Eof => return Err(open),
                Token::Comma => {
                    self.advance();
                }
                _ => items.push(self.parse_value()?),
            }
        }
    }

    fn parse_map(&mut self) -> Result<Value, ParseError> {
        let open = self.err("unclosed '{' map");
        self.advance(); // consume `{`
        let mut entries = Vec::new();
        loop {
            match self.peek() {
                Token::RBrace => {
                    self.advance();
                    return Ok(Value::Map(entries));
                }
                Token::Eof => return Err(open),
                Token::Comma => {
                    self.advance();
                }
                _ => {
                    let key = self.parse_key()?;
                    entries.push((key, self.parse_value()?));
                }
            }
        }
    }
}

// ── Public parse entry point ──────────────────────────────────────────────

/// Parse `.psm` source into a [`Document`].
pub fn parse_str(src: &str) -> Result<Document, ParseError> {
    let tokens = Lexer::new(src).tokenize()?;
    Parser::new(tokens).parse_document()
}
