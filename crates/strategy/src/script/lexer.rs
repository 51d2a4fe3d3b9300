use super::LoadError;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Number(f64),
    Str(String),
    // keywords
    Strategy,
    State,
    Let,
    If,
    Elif,
    Else,
    Return,
    Pass,
    And,
    Or,
    Not,
    True,
    False,
    None,
    // punctuation
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Colon,
    Dot,
    Assign,
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    // layout
    Newline,
    Indent,
    Dedent,
    Eof,
}

impl TokenKind {
    /// Short human description used in parse errors.
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Ident(name) => format!("identifier '{name}'"),
            TokenKind::Number(n) => format!("number {n}"),
            TokenKind::Str(_) => "string".to_string(),
            TokenKind::Newline => "end of line".to_string(),
            TokenKind::Indent => "indent".to_string(),
            TokenKind::Dedent => "dedent".to_string(),
            TokenKind::Eof => "end of input".to_string(),
            other => format!("'{}'", other.symbol()),
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            TokenKind::Strategy => "strategy",
            TokenKind::State => "state",
            TokenKind::Let => "let",
            TokenKind::If => "if",
            TokenKind::Elif => "elif",
            TokenKind::Else => "else",
            TokenKind::Return => "return",
            TokenKind::Pass => "pass",
            TokenKind::And => "and",
            TokenKind::Or => "or",
            TokenKind::Not => "not",
            TokenKind::True => "true",
            TokenKind::False => "false",
            TokenKind::None => "none",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::Comma => ",",
            TokenKind::Colon => ":",
            TokenKind::Dot => ".",
            TokenKind::Assign => "=",
            TokenKind::Eq => "==",
            TokenKind::NotEq => "!=",
            TokenKind::Lt => "<",
            TokenKind::Le => "<=",
            TokenKind::Gt => ">",
            TokenKind::Ge => ">=",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Percent => "%",
            _ => "?",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub column: usize,
}

fn keyword(word: &str) -> Option<TokenKind> {
    Some(match word {
        "strategy" => TokenKind::Strategy,
        "state" => TokenKind::State,
        "let" => TokenKind::Let,
        "if" => TokenKind::If,
        "elif" => TokenKind::Elif,
        "else" => TokenKind::Else,
        "return" => TokenKind::Return,
        "pass" => TokenKind::Pass,
        "and" => TokenKind::And,
        "or" => TokenKind::Or,
        "not" => TokenKind::Not,
        "true" | "True" => TokenKind::True,
        "false" | "False" => TokenKind::False,
        "none" | "None" => TokenKind::None,
        _ => return None,
    })
}

/// Split program text into tokens, emitting `Indent`/`Dedent` from leading
/// spaces. Newlines inside brackets do not end a logical line.
pub fn tokenize(text: &str) -> Result<Vec<Token>, LoadError> {
    let mut tokens = Vec::new();
    let mut indents: Vec<usize> = vec![0];
    let mut depth: usize = 0;
    let mut last_line = 0;

    for (idx, raw_line) in text.lines().enumerate() {
        let line_no = idx + 1;
        last_line = line_no;
        let chars: Vec<char> = raw_line.chars().collect();
        let mut i = 0;

        if depth == 0 {
            while i < chars.len() && (chars[i] == ' ' || chars[i] == '\t') {
                if chars[i] == '\t' {
                    return Err(LoadError::syntax(
                        line_no,
                        i + 1,
                        "tabs are not allowed in indentation",
                    ));
                }
                i += 1;
            }
            // Blank and comment-only lines carry no layout.
            if i == chars.len() || chars[i] == '#' {
                continue;
            }
            let width = i;
            let current = *indents.last().unwrap_or(&0);
            if width > current {
                indents.push(width);
                tokens.push(Token {
                    kind: TokenKind::Indent,
                    line: line_no,
                    column: 1,
                });
            } else if width < current {
                while indents.last().is_some_and(|&w| w > width) {
                    indents.pop();
                    tokens.push(Token {
                        kind: TokenKind::Dedent,
                        line: line_no,
                        column: 1,
                    });
                }
                if indents.last() != Some(&width) {
                    return Err(LoadError::syntax(
                        line_no,
                        width + 1,
                        "unindent does not match any outer indentation level",
                    ));
                }
            }
        }

        let mut emitted = false;
        while i < chars.len() {
            let c = chars[i];
            let column = i + 1;
            let mut push = |kind: TokenKind| {
                tokens.push(Token {
                    kind,
                    line: line_no,
                    column,
                })
            };

            match c {
                ' ' | '\t' | '\r' => {
                    i += 1;
                    continue;
                }
                '#' => break,
                '0'..='9' => {
                    let start = i;
                    while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.' || chars[i] == '_') {
                        i += 1;
                    }
                    let lexeme: String = chars[start..i].iter().filter(|c| **c != '_').collect();
                    let value = lexeme.parse::<f64>().map_err(|_| {
                        LoadError::syntax(line_no, column, format!("invalid number '{lexeme}'"))
                    })?;
                    push(TokenKind::Number(value));
                }
                c if c.is_alphabetic() || c == '_' => {
                    let start = i;
                    while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                        i += 1;
                    }
                    let word: String = chars[start..i].iter().collect();
                    push(keyword(&word).unwrap_or(TokenKind::Ident(word)));
                }
                '"' | '\'' => {
                    let quote = c;
                    let start = i + 1;
                    i += 1;
                    while i < chars.len() && chars[i] != quote {
                        i += 1;
                    }
                    if i == chars.len() {
                        return Err(LoadError::syntax(line_no, column, "unterminated string"));
                    }
                    let s: String = chars[start..i].iter().collect();
                    i += 1;
                    push(TokenKind::Str(s));
                }
                _ => {
                    let next = chars.get(i + 1).copied();
                    let (kind, width) = match (c, next) {
                        ('=', Some('=')) => (TokenKind::Eq, 2),
                        ('!', Some('=')) => (TokenKind::NotEq, 2),
                        ('<', Some('=')) => (TokenKind::Le, 2),
                        ('>', Some('=')) => (TokenKind::Ge, 2),
                        ('=', _) => (TokenKind::Assign, 1),
                        ('<', _) => (TokenKind::Lt, 1),
                        ('>', _) => (TokenKind::Gt, 1),
                        ('+', _) => (TokenKind::Plus, 1),
                        ('-', _) => (TokenKind::Minus, 1),
                        ('*', _) => (TokenKind::Star, 1),
                        ('/', _) => (TokenKind::Slash, 1),
                        ('%', _) => (TokenKind::Percent, 1),
                        (',', _) => (TokenKind::Comma, 1),
                        (':', _) => (TokenKind::Colon, 1),
                        ('.', _) => (TokenKind::Dot, 1),
                        ('(', _) => (TokenKind::LParen, 1),
                        (')', _) => (TokenKind::RParen, 1),
                        ('[', _) => (TokenKind::LBracket, 1),
                        (']', _) => (TokenKind::RBracket, 1),
                        _ => {
                            return Err(LoadError::syntax(
                                line_no,
                                column,
                                format!("unexpected character '{c}'"),
                            ))
                        }
                    };
                    match kind {
                        TokenKind::LParen | TokenKind::LBracket => depth += 1,
                        TokenKind::RParen | TokenKind::RBracket => {
                            depth = depth.checked_sub(1).ok_or_else(|| {
                                LoadError::syntax(line_no, column, format!("unmatched '{c}'"))
                            })?;
                        }
                        _ => {}
                    }
                    push(kind);
                    i += width;
                }
            }
            emitted = true;
        }

        if emitted && depth == 0 {
            tokens.push(Token {
                kind: TokenKind::Newline,
                line: line_no,
                column: chars.len() + 1,
            });
        }
    }

    if depth > 0 {
        return Err(LoadError::syntax(last_line.max(1), 1, "unclosed bracket at end of input"));
    }

    let end_line = last_line + 1;
    while indents.len() > 1 {
        indents.pop();
        tokens.push(Token {
            kind: TokenKind::Dedent,
            line: end_line,
            column: 1,
        });
    }
    tokens.push(Token {
        kind: TokenKind::Eof,
        line: end_line,
        column: 1,
    });
    Ok(tokens)
}
