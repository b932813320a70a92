#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    If,
    Else,
    For,
    While,
    Do,
    Switch,
    Case,
    Default,
    Break,
    Continue,
    Return,
    Const,
    Struct,
    Include,

    // Types
    Void,
    Int,
    Float,
    String,
    Object,
    Vector,
    Location,
    Effect,
    Event,
    Talent,
    Action,
    ItemProperty,

    // Object constants
    ObjectSelf,
    ObjectInvalid,
}

impl Keyword {
    pub fn from_word(word: &str) -> Option<Keyword> {
        use Keyword::*;
        Some(match word {
            "if" => If,
            "else" => Else,
            "for" => For,
            "while" => While,
            "do" => Do,
            "switch" => Switch,
            "case" => Case,
            "default" => Default,
            "break" => Break,
            "continue" => Continue,
            "return" => Return,
            "const" => Const,
            "struct" => Struct,
            "include" => Include,
            "void" => Void,
            "int" => Int,
            "float" => Float,
            "string" => String,
            "object" => Object,
            "vector" => Vector,
            "location" => Location,
            "effect" => Effect,
            "event" => Event,
            "talent" => Talent,
            "action" => Action,
            "itemproperty" => ItemProperty,
            "OBJECT_SELF" => ObjectSelf,
            "OBJECT_INVALID" => ObjectInvalid,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        use Keyword::*;
        match self {
            If => "if",
            Else => "else",
            For => "for",
            While => "while",
            Do => "do",
            Switch => "switch",
            Case => "case",
            Default => "default",
            Break => "break",
            Continue => "continue",
            Return => "return",
            Const => "const",
            Struct => "struct",
            Include => "include",
            Void => "void",
            Int => "int",
            Float => "float",
            String => "string",
            Object => "object",
            Vector => "vector",
            Location => "location",
            Effect => "effect",
            Event => "event",
            Talent => "talent",
            Action => "action",
            ItemProperty => "itemproperty",
            ObjectSelf => "OBJECT_SELF",
            ObjectInvalid => "OBJECT_INVALID",
        }
    }

    /// Keywords that name a builtin type.
    pub fn is_type(self) -> bool {
        use Keyword::*;
        matches!(
            self,
            Void | Int
                | Float
                | String
                | Object
                | Vector
                | Location
                | Effect
                | Event
                | Talent
                | Action
                | ItemProperty
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Separator {
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Semicolon,
    Comma,
    Dot,
}

impl Separator {
    pub fn from_char(ch: char) -> Option<Separator> {
        Some(match ch {
            '(' => Separator::LParen,
            ')' => Separator::RParen,
            '{' => Separator::LBrace,
            '}' => Separator::RBrace,
            '[' => Separator::LBracket,
            ']' => Separator::RBracket,
            ';' => Separator::Semicolon,
            ',' => Separator::Comma,
            '.' => Separator::Dot,
            _ => return None,
        })
    }

    pub fn as_char(self) -> char {
        match self {
            Separator::LParen => '(',
            Separator::RParen => ')',
            Separator::LBrace => '{',
            Separator::RBrace => '}',
            Separator::LBracket => '[',
            Separator::RBracket => ']',
            Separator::Semicolon => ';',
            Separator::Comma => ',',
            Separator::Dot => '.',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    // Arithmetic
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    PlusPlus,
    MinusMinus,

    // Comparison
    EqEq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,

    // Logic and bits
    AndAnd,
    OrOr,
    Not,
    Amp,
    Pipe,
    Caret,
    Tilde,
    Shl,
    Shr,
    UShr,

    // Assignment
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    PercentAssign,
    AmpAssign,
    PipeAssign,
    CaretAssign,
    ShlAssign,
    ShrAssign,
    UShrAssign,

    // Ternary
    Question,
    Colon,
}

impl Operator {
    /// Operator spellings, longest first so that a prefix scan finds the
    /// longest match.
    pub const SPELLINGS: [(&'static str, Operator); 37] = [
        (">>>=", Operator::UShrAssign),
        (">>>", Operator::UShr),
        (">>=", Operator::ShrAssign),
        ("<<=", Operator::ShlAssign),
        (">>", Operator::Shr),
        ("<<", Operator::Shl),
        ("++", Operator::PlusPlus),
        ("--", Operator::MinusMinus),
        ("==", Operator::EqEq),
        ("!=", Operator::NotEq),
        ("<=", Operator::LtEq),
        (">=", Operator::GtEq),
        ("&&", Operator::AndAnd),
        ("||", Operator::OrOr),
        ("+=", Operator::PlusAssign),
        ("-=", Operator::MinusAssign),
        ("*=", Operator::StarAssign),
        ("/=", Operator::SlashAssign),
        ("%=", Operator::PercentAssign),
        ("&=", Operator::AmpAssign),
        ("|=", Operator::PipeAssign),
        ("^=", Operator::CaretAssign),
        ("+", Operator::Plus),
        ("-", Operator::Minus),
        ("*", Operator::Star),
        ("/", Operator::Slash),
        ("%", Operator::Percent),
        ("<", Operator::Lt),
        (">", Operator::Gt),
        ("!", Operator::Not),
        ("&", Operator::Amp),
        ("|", Operator::Pipe),
        ("^", Operator::Caret),
        ("~", Operator::Tilde),
        ("=", Operator::Assign),
        ("?", Operator::Question),
        (":", Operator::Colon),
    ];

    pub fn as_str(self) -> &'static str {
        Operator::SPELLINGS
            .iter()
            .find(|(_, op)| *op == self)
            .map(|(text, _)| *text)
            .unwrap_or("?")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    /// Magnitude as written; the parser range-checks it after folding a
    /// leading minus.
    Int(i64),
    Float(f32),
    String(std::string::String),

    Keyword(Keyword),
    Ident(std::string::String),
    Separator(Separator),
    Operator(Operator),

    /// A whole `#...` line, including the `#`.
    Preprocessor(std::string::String),

    // Special
    Comment(std::string::String),
    Newline,
    Eof,
}

impl Token {
    /// Tokens the parser never looks at.
    pub fn is_trivia(&self) -> bool {
        matches!(self, Token::Comment(_) | Token::Newline)
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Int(n) => write!(f, "{}", n),
            Token::Float(x) => write!(f, "{:?}", x),
            Token::String(s) => write!(f, "\"{}\"", s),
            Token::Keyword(k) => write!(f, "{}", k.as_str()),
            Token::Ident(s) => write!(f, "{}", s),
            Token::Separator(s) => write!(f, "{}", s.as_char()),
            Token::Operator(o) => write!(f, "{}", o.as_str()),
            Token::Preprocessor(p) => write!(f, "{}", p),
            Token::Comment(c) => write!(f, "// {}", c),
            Token::Newline => write!(f, "\\n"),
            Token::Eof => write!(f, "end of file"),
        }
    }
}
