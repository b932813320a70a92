use crate::frontend::token::{Keyword, Operator, Separator, Token};

#[derive(Debug, Clone, PartialEq)]
pub struct Span {
    pub line: usize,
    pub col: usize,
}

#[derive(Debug, Clone)]
pub struct Spanned {
    pub token: Token,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{line}:{col}: {message}")]
pub struct LexerError {
    pub message: String,
    pub line: usize,
    pub col: usize,
}

pub struct Lexer {
    source: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        let source = source.strip_prefix('\u{feff}').unwrap_or(source);
        Lexer {
            source: source.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    fn current(&self) -> Option<char> {
        self.source.get(self.pos).copied()
    }

    fn peek(&self) -> Option<char> {
        self.source.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.current();
        if ch == Some('\n') {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        self.pos += 1;
        ch
    }

    fn span(&self) -> Span {
        Span {
            line: self.line,
            col: self.col,
        }
    }

    fn error_at(&self, message: String, span: &Span) -> LexerError {
        LexerError {
            message,
            line: span.line,
            col: span.col,
        }
    }

    fn starts_with(&self, text: &str) -> bool {
        text.chars()
            .enumerate()
            .all(|(i, ch)| self.source.get(self.pos + i) == Some(&ch))
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.current() {
            if ch == ' ' || ch == '\t' || ch == '\r' {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn read_to_line_end(&mut self) -> String {
        let mut text = String::new();
        while let Some(ch) = self.current() {
            if ch == '\n' {
                break;
            }
            text.push(ch);
            self.advance();
        }
        text.trim_end_matches('\r').to_string()
    }

    /// `#error` stops lexing with the rest of its line as the message.
    fn read_preprocessor(&mut self, span: &Span) -> Result<Token, LexerError> {
        let line = self.read_to_line_end();
        let directive = line.trim_start_matches('#').trim_start();
        if directive.split_whitespace().next() == Some("error") {
            let message = directive["error".len()..].trim();
            return Err(self.error_at(format!("#error {}", message), span));
        }
        Ok(Token::Preprocessor(line))
    }

    /// Reads `// ...` or `/* ... */`. A block comment left open at end of input
    /// runs to the end of the file.
    fn read_comment(&mut self) -> Token {
        self.advance(); // '/'
        if self.advance() == Some('/') {
            return Token::Comment(self.read_to_line_end().trim().to_string());
        }

        let mut comment = String::new();
        while let Some(ch) = self.current() {
            if ch == '*' && self.peek() == Some('/') {
                self.advance();
                self.advance();
                break;
            }
            comment.push(ch);
            self.advance();
        }
        Token::Comment(comment.trim().to_string())
    }

    fn read_separator(&mut self) -> Option<Token> {
        let separator = Separator::from_char(self.current()?)?;
        self.advance();
        Some(Token::Separator(separator))
    }

    fn read_operator(&mut self) -> Option<Token> {
        let (text, op) = Operator::SPELLINGS
            .iter()
            .find(|(text, _)| self.starts_with(text))
            .copied()?;
        for _ in 0..text.chars().count() {
            self.advance();
        }
        Some(Token::Operator(op))
    }

    fn read_string(&mut self) -> Result<Token, LexerError> {
        let start = self.span();
        self.advance();

        let mut string = String::new();
        loop {
            match self.current() {
                Some('"') => {
                    self.advance();
                    return Ok(Token::String(string));
                }
                Some('\\') => {
                    self.advance();
                    match self.current() {
                        Some('n') => string.push('\n'),
                        Some('t') => string.push('\t'),
                        Some('r') => string.push('\r'),
                        Some('\\') => string.push('\\'),
                        Some('"') => string.push('"'),
                        Some(ch) => {
                            return Err(self.error_at(
                                format!("unknown escape sequence: \\{}", ch),
                                &self.span(),
                            ));
                        }
                        None => {
                            return Err(self.error_at(
                                "unexpected EOF in escape sequence".to_string(),
                                &self.span(),
                            ));
                        }
                    }
                    self.advance();
                }
                Some('\n') => {
                    return Err(self.error_at(
                        "unterminated string (newline before closing quote)".to_string(),
                        &start,
                    ));
                }
                Some(ch) => {
                    string.push(ch);
                    self.advance();
                }
                None => {
                    return Err(
                        self.error_at("unterminated string literal".to_string(), &start)
                    );
                }
            }
        }
    }

    /// Integer, hex integer or float. Floats need a `.` or an `f` suffix.
    fn read_number(&mut self) -> Result<Token, LexerError> {
        let start = self.span();

        if self.current() == Some('0') && matches!(self.peek(), Some('x') | Some('X')) {
            self.advance(); // '0'
            self.advance(); // 'x'

            let mut hex = String::new();
            while let Some(ch) = self.current() {
                if ch.is_ascii_hexdigit() {
                    hex.push(ch);
                    self.advance();
                } else {
                    break;
                }
            }
            if hex.is_empty() {
                return Err(self.error_at("expected hex digits after 0x".to_string(), &start));
            }
            let value = u32::from_str_radix(&hex, 16).map_err(|_| {
                self.error_at(format!("hex number out of range: 0x{}", hex), &start)
            })?;
            return Ok(Token::Int(i64::from(value as i32)));
        }

        let mut digits = String::new();
        let mut is_float = false;
        while let Some(ch) = self.current() {
            if ch.is_ascii_digit() {
                digits.push(ch);
                self.advance();
            } else if ch == '.' && !is_float {
                is_float = true;
                digits.push('.');
                self.advance();
            } else {
                break;
            }
        }
        if matches!(self.current(), Some('f') | Some('F')) {
            is_float = true;
            self.advance();
        }

        if is_float {
            let value: f32 = digits
                .parse()
                .map_err(|_| self.error_at(format!("invalid float: {}", digits), &start))?;
            Ok(Token::Float(value))
        } else {
            let value: u32 = digits
                .parse()
                .map_err(|_| self.error_at(format!("integer out of range: {}", digits), &start))?;
            Ok(Token::Int(i64::from(value)))
        }
    }

    fn read_word(&mut self) -> Token {
        let mut word = String::new();
        while let Some(ch) = self.current() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                word.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        match Keyword::from_word(&word) {
            Some(keyword) => Token::Keyword(keyword),
            None => Token::Ident(word),
        }
    }

    pub fn tokenize(&mut self) -> Result<Vec<Spanned>, LexerError> {
        let mut tokens = Vec::new();

        loop {
            self.skip_whitespace();
            let span = self.span();

            let token = match self.current() {
                None => {
                    tokens.push(Spanned {
                        token: Token::Eof,
                        span,
                    });
                    break;
                }
                Some('\n') => {
                    self.advance();
                    Token::Newline
                }
                Some('#') => self.read_preprocessor(&span)?,
                Some('/') if matches!(self.peek(), Some('/') | Some('*')) => self.read_comment(),
                Some('"') => self.read_string()?,
                Some(ch) if ch.is_ascii_digit() || self.dot_starts_number() => self.read_number()?,
                Some(ch) if ch.is_ascii_alphabetic() || ch == '_' => self.read_word(),
                Some(ch) => match self.read_separator().or_else(|| self.read_operator()) {
                    Some(token) => token,
                    None => {
                        return Err(
                            self.error_at(format!("unexpected character: '{}'", ch), &span)
                        );
                    }
                },
            };
            tokens.push(Spanned { token, span });
        }

        tracing::trace!(count = tokens.len(), "lexed tokens");
        Ok(tokens)
    }

    /// `.5` is a float, `a.b` is member access.
    fn dot_starts_number(&self) -> bool {
        self.current() == Some('.')
            && self.peek().is_some_and(|c| c.is_ascii_digit())
            && !matches!(
                self.pos.checked_sub(1).and_then(|p| self.source.get(p)),
                Some(c) if c.is_ascii_alphanumeric() || *c == '_' || *c == ')' || *c == ']'
            )
    }

    /// Tokens without comments and newlines.
    #[cfg(test)]
    pub fn tokenize_clean(&mut self) -> Result<Vec<Spanned>, LexerError> {
        let tokens = self.tokenize()?;
        Ok(tokens.into_iter().filter(|t| !t.token.is_trivia()).collect())
    }
}
