use ecow::EcoString;

/// A run of insignificant text that precedes a token.
///
/// Offsets are byte offsets into the submission text. A zero-length run is
/// valid and still records where it would have started.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Whitespace {
    pub start: usize,
    pub text: EcoString,
}

impl Whitespace {
    pub fn new(start: usize, text: impl Into<EcoString>) -> Self {
        Whitespace {
            start,
            text: text.into(),
        }
    }

    pub fn empty(start: usize) -> Self {
        Whitespace::new(start, "")
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn end(&self) -> usize {
        self.start + self.len()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Copy)]
pub enum TokenKind {
    // Literals
    NumberLiteral,
    TrueLiteral,
    FalseLiteral,
    StringLiteral,

    Identifier,

    // Keywords
    AsKeyword,
    BooleanKeyword,
    NumberKeyword,
    StringKeyword,
    IfKeyword,
    ElseKeyword,
    EndKeyword,
    WhileKeyword,
    AndKeyword,
    OrKeyword,

    // Operators
    Plus,
    Minus,
    Asterisk,
    Slash,
    LeftParen,
    RightParen,
    LessThan,
    LessThanEqual,
    GreaterThan,
    GreaterThanEqual,
    EqualEqual,
    BangEqual,
    Equal,

    EndOfInput,

    // Only produced by the recovering lexer
    Unknown,
}

impl TokenKind {
    pub fn is_type_name(self) -> bool {
        matches!(
            self,
            TokenKind::BooleanKeyword
                | TokenKind::NumberKeyword
                | TokenKind::StringKeyword
                | TokenKind::Identifier
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Token {
    pub whitespace: Whitespace,
    pub text: EcoString,
    pub kind: TokenKind,
}

impl Token {
    pub fn new(whitespace: Whitespace, text: impl Into<EcoString>, kind: TokenKind) -> Self {
        Token {
            whitespace,
            text: text.into(),
            kind,
        }
    }

    /// A token with no leading whitespace whose text begins at `start`.
    pub fn at(start: usize, text: impl Into<EcoString>, kind: TokenKind) -> Self {
        Token::new(Whitespace::empty(start), text, kind)
    }

    pub fn trimmed_start(&self) -> usize {
        self.whitespace.start + self.whitespace.len()
    }

    pub fn trimmed_len(&self) -> usize {
        self.text.len()
    }

    pub fn full_start(&self) -> usize {
        self.whitespace.start
    }

    pub fn full_len(&self) -> usize {
        self.whitespace.len() + self.text.len()
    }

    pub fn full_end(&self) -> usize {
        self.full_start() + self.full_len()
    }

    pub fn with_whitespace(self, whitespace: Whitespace) -> Self {
        if self.whitespace == whitespace {
            return self;
        }

        Token { whitespace, ..self }
    }

    pub fn with_text(self, text: impl Into<EcoString>) -> Self {
        Token {
            text: text.into(),
            ..self
        }
    }

    pub fn with_kind(self, kind: TokenKind) -> Self {
        Token { kind, ..self }
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.text)
    }
}
