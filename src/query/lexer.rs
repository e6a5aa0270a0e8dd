use super::ParseError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    /// `.` on its own
    Dot,
    /// `..`
    DotDot,
    /// `.name` with no whitespace between the dot and the name
    Field(String),
    Ident(String),
    Keyword(Keyword),
    Var(String),
    Number(f64),
    Str(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Pipe,
    Comma,
    Colon,
    Semicolon,
    Question,
    Alt,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Keyword {
    And,
    Or,
    If,
    Then,
    Elif,
    Else,
    End,
    Try,
    Catch,
    As,
    True,
    False,
    Null,
}

impl Keyword {
    fn from_ident(ident: &str) -> Option<Self> {
        Some(match ident {
            "and" => Self::And,
            "or" => Self::Or,
            "if" => Self::If,
            "then" => Self::Then,
            "elif" => Self::Elif,
            "else" => Self::Else,
            "end" => Self::End,
            "try" => Self::Try,
            "catch" => Self::Catch,
            "as" => Self::As,
            "true" => Self::True,
            "false" => Self::False,
            "null" => Self::Null,
            _ => return None,
        })
    }
}

/// A token and the char offset where it starts.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Spanned {
    pub token: Token,
    pub offset: usize,
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

pub(crate) fn tokenize(input: &str) -> Result<Vec<Spanned>, ParseError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let start = i;

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        // comment to end of line
        if c == '#' {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }

        let token = match c {
            '.' => {
                if chars.get(i + 1) == Some(&'.') {
                    i += 2;
                    Token::DotDot
                } else if chars.get(i + 1).copied().is_some_and(is_ident_start) {
                    i += 1;
                    let mut name = String::new();
                    while i < chars.len() && is_ident_continue(chars[i]) {
                        name.push(chars[i]);
                        i += 1;
                    }
                    Token::Field(name)
                } else {
                    i += 1;
                    Token::Dot
                }
            }
            '$' => {
                i += 1;
                let mut name = String::new();
                while i < chars.len() && is_ident_continue(chars[i]) {
                    name.push(chars[i]);
                    i += 1;
                }
                if name.is_empty() {
                    return Err(ParseError::new("expected variable name after '$'", start));
                }
                Token::Var(name)
            }
            '"' => {
                let (value, next) = lex_string(&chars, i)?;
                i = next;
                Token::Str(value)
            }
            '0'..='9' => {
                let mut text = String::new();
                while i < chars.len() && chars[i].is_ascii_digit() {
                    text.push(chars[i]);
                    i += 1;
                }
                if chars.get(i) == Some(&'.') && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit()) {
                    text.push('.');
                    i += 1;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        text.push(chars[i]);
                        i += 1;
                    }
                }
                if matches!(chars.get(i), Some('e') | Some('E')) {
                    let mut j = i + 1;
                    if matches!(chars.get(j), Some('+') | Some('-')) {
                        j += 1;
                    }
                    if chars.get(j).is_some_and(|d| d.is_ascii_digit()) {
                        text.extend(&chars[i..j]);
                        i = j;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            text.push(chars[i]);
                            i += 1;
                        }
                    }
                }
                let n = text
                    .parse::<f64>()
                    .map_err(|_| ParseError::new(format!("invalid number: {}", text), start))?;
                Token::Number(n)
            }
            '(' => {
                i += 1;
                Token::LParen
            }
            ')' => {
                i += 1;
                Token::RParen
            }
            '[' => {
                i += 1;
                Token::LBracket
            }
            ']' => {
                i += 1;
                Token::RBracket
            }
            '{' => {
                i += 1;
                Token::LBrace
            }
            '}' => {
                i += 1;
                Token::RBrace
            }
            '|' => {
                i += 1;
                Token::Pipe
            }
            ',' => {
                i += 1;
                Token::Comma
            }
            ':' => {
                i += 1;
                Token::Colon
            }
            ';' => {
                i += 1;
                Token::Semicolon
            }
            '?' => {
                i += 1;
                Token::Question
            }
            '+' => {
                i += 1;
                Token::Plus
            }
            '-' => {
                i += 1;
                Token::Minus
            }
            '*' => {
                i += 1;
                Token::Star
            }
            '%' => {
                i += 1;
                Token::Percent
            }
            '/' => {
                if chars.get(i + 1) == Some(&'/') {
                    i += 2;
                    Token::Alt
                } else {
                    i += 1;
                    Token::Slash
                }
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    i += 2;
                    Token::Eq
                } else {
                    return Err(ParseError::new(
                        "assignment is not supported, use '==' to compare",
                        start,
                    ));
                }
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    i += 2;
                    Token::Ne
                } else {
                    return Err(ParseError::new("unexpected '!', use 'not'", start));
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    i += 2;
                    Token::Le
                } else {
                    i += 1;
                    Token::Lt
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    i += 2;
                    Token::Ge
                } else {
                    i += 1;
                    Token::Gt
                }
            }
            _ if is_ident_start(c) => {
                let mut ident = String::new();
                while i < chars.len() && is_ident_continue(chars[i]) {
                    ident.push(chars[i]);
                    i += 1;
                }
                match Keyword::from_ident(&ident) {
                    Some(keyword) => Token::Keyword(keyword),
                    None => Token::Ident(ident),
                }
            }
            _ => {
                return Err(ParseError::new(format!("unexpected character '{}'", c), start));
            }
        };

        tokens.push(Spanned {
            token,
            offset: start,
        });
    }

    Ok(tokens)
}

/// Lex a string literal starting at the opening quote. Returns the decoded
/// value and the index just past the closing quote.
fn lex_string(chars: &[char], open: usize) -> Result<(String, usize), ParseError> {
    let mut i = open + 1;
    let mut value = String::new();

    while i < chars.len() {
        match chars[i] {
            '"' => return Ok((value, i + 1)),
            '\\' => {
                let escaped = chars
                    .get(i + 1)
                    .ok_or_else(|| ParseError::new("unterminated escape sequence", i))?;
                match escaped {
                    'n' => value.push('\n'),
                    't' => value.push('\t'),
                    'r' => value.push('\r'),
                    'b' => value.push('\u{8}'),
                    'f' => value.push('\u{c}'),
                    '/' => value.push('/'),
                    '\\' => value.push('\\'),
                    '"' => value.push('"'),
                    'u' => {
                        let (ch, consumed) = lex_unicode_escape(chars, i)?;
                        value.push(ch);
                        i += consumed;
                        continue;
                    }
                    '(' => {
                        return Err(ParseError::new(
                            "string interpolation is not supported",
                            i,
                        ))
                    }
                    other => {
                        return Err(ParseError::new(
                            format!("invalid escape '\\{}'", other),
                            i,
                        ))
                    }
                }
                i += 2;
            }
            c => {
                value.push(c);
                i += 1;
            }
        }
    }

    Err(ParseError::new("unterminated string literal", open))
}

fn hex4(chars: &[char], at: usize) -> Option<u32> {
    let digits: String = chars.get(at..at + 4)?.iter().collect();
    u32::from_str_radix(&digits, 16).ok()
}

/// Decode `\uXXXX` (and a following low surrogate when needed) at `at`,
/// which points to the backslash. Returns the char and chars consumed.
fn lex_unicode_escape(chars: &[char], at: usize) -> Result<(char, usize), ParseError> {
    let high = hex4(chars, at + 2).ok_or_else(|| ParseError::new("invalid \\u escape", at))?;
    if (0xD800..0xDC00).contains(&high) {
        let low = if chars.get(at + 6) == Some(&'\\') && chars.get(at + 7) == Some(&'u') {
            hex4(chars, at + 8)
        } else {
            None
        };
        if let Some(low) = low.filter(|l| (0xDC00..0xE000).contains(l)) {
            let code = 0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00);
            let ch = char::from_u32(code).unwrap_or('\u{FFFD}');
            return Ok((ch, 12));
        }
        return Ok(('\u{FFFD}', 6));
    }
    Ok((char::from_u32(high).unwrap_or('\u{FFFD}'), 6))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<Token> {
        tokenize(input)
            .unwrap()
            .into_iter()
            .map(|s| s.token)
            .collect()
    }

    #[test]
    fn test_fields_and_dots() {
        assert_eq!(
            kinds(". .a .. .b_2"),
            vec![
                Token::Dot,
                Token::Field("a".into()),
                Token::DotDot,
                Token::Field("b_2".into())
            ]
        );
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            kinds("== != <= >= < > // / | ,"),
            vec![
                Token::Eq,
                Token::Ne,
                Token::Le,
                Token::Ge,
                Token::Lt,
                Token::Gt,
                Token::Alt,
                Token::Slash,
                Token::Pipe,
                Token::Comma
            ]
        );
    }

    #[test]
    fn test_numbers_and_keywords() {
        assert_eq!(
            kinds("12 3.5 1e3 and null foo $line"),
            vec![
                Token::Number(12.0),
                Token::Number(3.5),
                Token::Number(1000.0),
                Token::Keyword(Keyword::And),
                Token::Keyword(Keyword::Null),
                Token::Ident("foo".into()),
                Token::Var("line".into())
            ]
        );
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            kinds(r#""a\"b\n\u00e9\ud83d\ude00""#),
            vec![Token::Str("a\"b\né😀".into())]
        );
    }

    #[test]
    fn test_comment_is_skipped() {
        assert_eq!(kinds(".a # trailing"), vec![Token::Field("a".into())]);
    }

    #[test]
    fn test_lex_errors() {
        assert!(tokenize("\"open").is_err());
        assert!(tokenize(".a = 1").is_err());
        assert!(tokenize("\"\\(x)\"").is_err());
        assert!(tokenize("@base64").is_err());
    }
}
