//! Tokenizer for rule expressions.
//!
//! Identifiers are Unicode-aware (`연체일수_B1M`, `_1순위카드이용금액`), `{NAME}` is a
//! single threshold token, and `&`/`|` are lexed straight to `and`/`or`.

use super::EvalError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    Threshold(String),
    True,
    False,
    None,
    And,
    Or,
    Not,
    In,
    Plus,
    Minus,
    Star,
    Slash,
    DoubleSlash,
    Percent,
    DoubleStar,
    Lt,
    Le,
    Gt,
    Ge,
    EqEq,
    NotEq,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    /// char offset into the source
    pub pos: usize,
}

pub fn tokenize(src: &str) -> Result<Vec<Spanned>, EvalError> {
    let chars: Vec<char> = src.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let start = i;

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let token = match c {
            '0'..='9' => {
                let (tok, next) = lex_number(&chars, i)?;
                i = next;
                tok
            }
            '.' if chars.get(i + 1).is_some_and(|d| d.is_ascii_digit()) => {
                let (tok, next) = lex_number(&chars, i)?;
                i = next;
                tok
            }
            '\'' | '"' => {
                let (s, next) = lex_string(&chars, i)?;
                i = next;
                Token::Str(s)
            }
            '{' => {
                let close = chars[i + 1..]
                    .iter()
                    .position(|&ch| ch == '}')
                    .ok_or(EvalError::Lex {
                        pos: start,
                        message: "unterminated `{` placeholder".into(),
                    })?;
                let name: String = chars[i + 1..i + 1 + close].iter().collect();
                let name = name.trim().to_string();
                if !crate::thresholds::is_valid_threshold_name(&name) {
                    return Err(EvalError::Lex {
                        pos: start,
                        message: format!("invalid threshold name `{name}`"),
                    });
                }
                i += close + 2;
                Token::Threshold(name)
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut j = i;
                while j < chars.len() && (chars[j].is_alphanumeric() || chars[j] == '_') {
                    j += 1;
                }
                let word: String = chars[i..j].iter().collect();
                i = j;
                keyword_or_ident(word)
            }
            _ => {
                let two: String = chars[i..(i + 2).min(chars.len())].iter().collect();
                let (tok, len) = match two.as_str() {
                    "//" => (Token::DoubleSlash, 2),
                    "**" => (Token::DoubleStar, 2),
                    "<=" => (Token::Le, 2),
                    ">=" => (Token::Ge, 2),
                    "==" => (Token::EqEq, 2),
                    "!=" => (Token::NotEq, 2),
                    "&&" => (Token::And, 2),
                    "||" => (Token::Or, 2),
                    _ => match c {
                        '+' => (Token::Plus, 1),
                        '-' => (Token::Minus, 1),
                        '*' => (Token::Star, 1),
                        '/' => (Token::Slash, 1),
                        '%' => (Token::Percent, 1),
                        '<' => (Token::Lt, 1),
                        '>' => (Token::Gt, 1),
                        '&' => (Token::And, 1),
                        '|' => (Token::Or, 1),
                        '(' => (Token::LParen, 1),
                        ')' => (Token::RParen, 1),
                        '[' => (Token::LBracket, 1),
                        ']' => (Token::RBracket, 1),
                        ',' => (Token::Comma, 1),
                        '.' => (Token::Dot, 1),
                        other => {
                            return Err(EvalError::Lex {
                                pos: start,
                                message: format!("unexpected character `{other}`"),
                            })
                        }
                    },
                };
                i += len;
                tok
            }
        };

        out.push(Spanned { token, pos: start });
    }

    Ok(out)
}

fn keyword_or_ident(word: String) -> Token {
    match word.as_str() {
        "and" => Token::And,
        "or" => Token::Or,
        "not" => Token::Not,
        "in" => Token::In,
        "True" => Token::True,
        "False" => Token::False,
        "None" => Token::None,
        _ => Token::Ident(word),
    }
}

fn lex_number(chars: &[char], start: usize) -> Result<(Token, usize), EvalError> {
    let mut j = start;
    let mut is_float = false;
    let digits = |j: &mut usize| {
        while *j < chars.len() && (chars[*j].is_ascii_digit() || chars[*j] == '_') {
            *j += 1;
        }
    };

    digits(&mut j);
    if j < chars.len() && chars[j] == '.' {
        is_float = true;
        j += 1;
        digits(&mut j);
    }
    if j < chars.len() && (chars[j] == 'e' || chars[j] == 'E') {
        let mut k = j + 1;
        if k < chars.len() && (chars[k] == '+' || chars[k] == '-') {
            k += 1;
        }
        if k < chars.len() && chars[k].is_ascii_digit() {
            is_float = true;
            j = k;
            digits(&mut j);
        }
    }

    let text: String = chars[start..j].iter().filter(|&&c| c != '_').collect();
    let bad = |message: String| EvalError::Lex { pos: start, message };

    // `10abc` is not a number followed by a name
    if j < chars.len() && (chars[j].is_alphabetic() || chars[j] == '_') {
        return Err(bad(format!("invalid numeric literal `{text}{}`", chars[j])));
    }

    if is_float {
        let v: f64 = text
            .parse()
            .map_err(|_| bad(format!("invalid float literal `{text}`")))?;
        Ok((Token::Float(v), j))
    } else {
        let v: i64 = text
            .parse()
            .map_err(|_| bad(format!("integer literal `{text}` out of range")))?;
        Ok((Token::Int(v), j))
    }
}

fn lex_string(chars: &[char], start: usize) -> Result<(String, usize), EvalError> {
    let quote = chars[start];
    let mut out = String::new();
    let mut j = start + 1;
    while j < chars.len() {
        match chars[j] {
            '\\' if j + 1 < chars.len() => {
                let esc = chars[j + 1];
                out.push(match esc {
                    'n' => '\n',
                    't' => '\t',
                    other => other,
                });
                j += 2;
            }
            c if c == quote => return Ok((out, j + 1)),
            c => {
                out.push(c);
                j += 1;
            }
        }
    }
    Err(EvalError::Lex {
        pos: start,
        message: "unterminated string literal".into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Token> {
        tokenize(src).unwrap().into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn unicode_identifiers_and_placeholders() {
        assert_eq!(
            kinds("연체일수_B1M >= {STRESS_HIGH}"),
            vec![
                Token::Ident("연체일수_B1M".into()),
                Token::Ge,
                Token::Threshold("STRESS_HIGH".into()),
            ]
        );
        assert_eq!(kinds("_1순위카드이용금액"), vec![Token::Ident("_1순위카드이용금액".into())]);
    }

    #[test]
    fn glyph_operators_become_keywords() {
        assert_eq!(
            kinds("(a > 0) & (b == 0) | c"),
            vec![
                Token::LParen,
                Token::Ident("a".into()),
                Token::Gt,
                Token::Int(0),
                Token::RParen,
                Token::And,
                Token::LParen,
                Token::Ident("b".into()),
                Token::EqEq,
                Token::Int(0),
                Token::RParen,
                Token::Or,
                Token::Ident("c".into()),
            ]
        );
    }

    #[test]
    fn numbers() {
        assert_eq!(kinds("500000"), vec![Token::Int(500000)]);
        assert_eq!(kinds("0.6"), vec![Token::Float(0.6)]);
        assert_eq!(kinds(".5"), vec![Token::Float(0.5)]);
        assert_eq!(kinds("1e3"), vec![Token::Float(1000.0)]);
        assert_eq!(kinds("1_000"), vec![Token::Int(1000)]);
        assert!(tokenize("10abc").is_err());
        assert!(tokenize("99999999999999999999").is_err());
    }

    #[test]
    fn strings_with_either_quote() {
        assert_eq!(
            kinds(r#"['1인가구', "대학생"]"#),
            vec![
                Token::LBracket,
                Token::Str("1인가구".into()),
                Token::Comma,
                Token::Str("대학생".into()),
                Token::RBracket,
            ]
        );
        assert!(tokenize("'open").is_err());
    }

    #[test]
    fn rejects_foreign_characters() {
        assert!(tokenize("a; b").is_err());
        assert!(tokenize("a = 1").is_err());
        assert!(tokenize("{lower}").is_err());
        assert!(tokenize("{UNCLOSED").is_err());
        assert!(tokenize("`rm -rf`").is_err());
    }
}
