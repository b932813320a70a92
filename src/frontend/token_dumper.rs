
use crate::frontend::lexer::Spanned;
use crate::frontend::token::{Operator, Token};

pub struct TokenDumper {
    pub color: bool,
    pub show_debug_repr: bool, // if false, prints source-like text for tokens
}

impl Default for TokenDumper {
    fn default() -> Self {
        Self {
            color: true,
            show_debug_repr: true,
        }
    }
}

impl TokenDumper {
    // ANSI colors
    const RESET: &'static str = "\x1b[0m";
    const DIM: &'static str = "\x1b[2m";
    const GRN: &'static str = "\x1b[32m";
    const YEL: &'static str = "\x1b[33m";
    const CYN: &'static str = "\x1b[36m";
    const MAG: &'static str = "\x1b[35m";
    const BLU: &'static str = "\x1b[34m";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn no_color(mut self) -> Self {
        self.color = false;
        self
    }

    pub fn pretty(mut self) -> Self {
        self.show_debug_repr = false;
        self
    }

    pub fn dump(&self, tokens: &[Spanned]) {
        print!("{}", self.render(tokens));
    }

    pub fn render(&self, tokens: &[Spanned]) -> String {
        let mut out = String::new();
        for s in tokens {
            self.render_one(&mut out, s);
        }
        out
    }

    fn render_one(&self, out: &mut String, s: &Spanned) {
        let line = s.span.line;
        let col = s.span.col;

        let kind = self.kind(&s.token);
        let colr = if self.color { self.color(&s.token) } else { "" };
        let reset = if self.color { Self::RESET } else { "" };

        let text = if self.show_debug_repr {
            format!("{}{:<8} {:?}{}", colr, kind, s.token, reset)
        } else {
            match &s.token {
                Token::Comment(c) => format!("{}{:<8} COMMENT: {}{}", colr, kind, c, reset),
                Token::Newline => format!("{}{:<8} NEWLINE{}", colr, kind, reset),
                token => format!("{}{:<8} {}{}", colr, kind, token, reset),
            }
        };
        out.push_str(&format!("[{:02}:{:02}] {}\n", line, col, text));
    }

    fn kind(&self, t: &Token) -> &'static str {
        match t {
            Token::Newline => "NEWLINE",
            Token::Comment(_) => "COMMENT",
            Token::Eof => "EOF",
            Token::Preprocessor(_) => "PREPROC",

            Token::Int(_) => "INT",
            Token::Float(_) => "FLOAT",
            Token::String(_) => "STRING",

            Token::Ident(_) => "IDENT",
            Token::Keyword(k) if k.is_type() => "TYPE",
            Token::Keyword(_) => "KEYWORD",
            Token::Separator(_) => "SEP",

            Token::Operator(
                Operator::EqEq
                | Operator::NotEq
                | Operator::Lt
                | Operator::LtEq
                | Operator::Gt
                | Operator::GtEq,
            ) => "CMP",
            Token::Operator(_) => "OP",
        }
    }

    fn color(&self, t: &Token) -> &'static str {
        match t {
            Token::Newline | Token::Comment(_) | Token::Eof => Self::DIM,
            Token::Preprocessor(_) => Self::BLU,
            Token::String(_) => Self::GRN,
            Token::Int(_) | Token::Float(_) => Self::CYN,
            Token::Ident(_) => Self::YEL,
            Token::Operator(_) => Self::MAG,
            _ => Self::RESET,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::lexer::Lexer;

    #[test]
    fn test_pretty_plain_dump() {
        let tokens = Lexer::new("int x = 1; // hi").tokenize().unwrap();
        let out = TokenDumper::new().no_color().pretty().render(&tokens);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "[01:01] TYPE     int");
        assert_eq!(lines[2], "[01:07] OP       =");
        assert_eq!(lines[5], "[01:12] COMMENT  COMMENT: hi");
        assert_eq!(lines.last(), Some(&"[01:17] EOF      end of file"));
    }

    #[test]
    fn test_color_codes_only_when_enabled() {
        let tokens = Lexer::new("x").tokenize().unwrap();
        assert!(TokenDumper::new().render(&tokens).contains("\x1b["));
        assert!(!TokenDumper::new().no_color().render(&tokens).contains("\x1b["));
    }
}
