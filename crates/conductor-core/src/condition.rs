//! Condition expression evaluation
//!
//! A deliberately small language for `condition` tasks:
//! `true`/`false`, numbers, quoted strings, `${name}` references,
//! comparisons (`== != < <= > >=`), boolean composition (`&& || !`),
//! and parentheses.
//!
//! Evaluation never throws on content: an empty expression is true, and
//! a comparison touching an unresolved reference is false. Only
//! malformed syntax is an error, reported with its byte position.

use serde_json::Value;

use crate::interpolate::Scope;

/// Syntax error in a condition expression
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConditionError {
    /// A character that starts no token
    #[error("unexpected character {found:?} at position {position}")]
    UnexpectedCharacter { found: char, position: usize },

    /// A token where another was required
    #[error("unexpected token {found} at position {position}")]
    UnexpectedToken { found: String, position: usize },

    /// The expression stopped mid-construct
    #[error("unexpected end of expression")]
    UnexpectedEnd,

    /// A string or `${` reference was never closed
    #[error("unterminated {what} starting at position {position}")]
    Unterminated { what: &'static str, position: usize },

    /// Valid expression followed by leftover input
    #[error("trailing input starting at position {position}")]
    TrailingInput { position: usize },
}

/// Evaluate a condition expression against the given scope
///
/// Empty or whitespace-only input is true.
pub fn evaluate(expression: &str, scope: &Scope<'_>) -> Result<bool, ConditionError> {
    if expression.trim().is_empty() {
        return Ok(true);
    }

    let tokens = tokenize(expression)?;
    let mut parser = Parser {
        tokens: &tokens,
        position: 0,
        scope,
    };
    let result = parser.or_expression()?;
    if let Some((_, position)) = parser.peek() {
        return Err(ConditionError::TrailingInput {
            position: *position,
        });
    }
    Ok(result.truthy())
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    True,
    False,
    Number(f64),
    Str(String),
    Reference(String),
    Identifier(String),
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Not,
    LParen,
    RParen,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::True => write!(f, "true"),
            Token::False => write!(f, "false"),
            Token::Number(n) => write!(f, "{n}"),
            Token::Str(s) => write!(f, "{s:?}"),
            Token::Reference(name) => write!(f, "${{{name}}}"),
            Token::Identifier(name) => write!(f, "{name}"),
            Token::EqEq => write!(f, "=="),
            Token::NotEq => write!(f, "!="),
            Token::Lt => write!(f, "<"),
            Token::Le => write!(f, "<="),
            Token::Gt => write!(f, ">"),
            Token::Ge => write!(f, ">="),
            Token::AndAnd => write!(f, "&&"),
            Token::OrOr => write!(f, "||"),
            Token::Not => write!(f, "!"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<(Token, usize)>, ConditionError> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push((Token::LParen, i));
                i += 1;
            }
            ')' => {
                tokens.push((Token::RParen, i));
                i += 1;
            }
            '=' if bytes.get(i + 1) == Some(&b'=') => {
                tokens.push((Token::EqEq, i));
                i += 2;
            }
            '!' if bytes.get(i + 1) == Some(&b'=') => {
                tokens.push((Token::NotEq, i));
                i += 2;
            }
            '!' => {
                tokens.push((Token::Not, i));
                i += 1;
            }
            '<' if bytes.get(i + 1) == Some(&b'=') => {
                tokens.push((Token::Le, i));
                i += 2;
            }
            '<' => {
                tokens.push((Token::Lt, i));
                i += 1;
            }
            '>' if bytes.get(i + 1) == Some(&b'=') => {
                tokens.push((Token::Ge, i));
                i += 2;
            }
            '>' => {
                tokens.push((Token::Gt, i));
                i += 1;
            }
            '&' if bytes.get(i + 1) == Some(&b'&') => {
                tokens.push((Token::AndAnd, i));
                i += 2;
            }
            '|' if bytes.get(i + 1) == Some(&b'|') => {
                tokens.push((Token::OrOr, i));
                i += 2;
            }
            '\'' | '"' => {
                let quote = c;
                let start = i;
                i += 1;
                let from = i;
                while i < bytes.len() && bytes[i] as char != quote {
                    i += 1;
                }
                if i >= bytes.len() {
                    return Err(ConditionError::Unterminated {
                        what: "string",
                        position: start,
                    });
                }
                tokens.push((Token::Str(input[from..i].to_string()), start));
                i += 1;
            }
            '$' if bytes.get(i + 1) == Some(&b'{') => {
                let start = i;
                i += 2;
                let from = i;
                while i < bytes.len() && bytes[i] != b'}' {
                    i += 1;
                }
                if i >= bytes.len() {
                    return Err(ConditionError::Unterminated {
                        what: "reference",
                        position: start,
                    });
                }
                tokens.push((Token::Reference(input[from..i].to_string()), start));
                i += 1;
            }
            _ if c.is_ascii_digit()
                || (c == '-' && bytes.get(i + 1).is_some_and(|b| b.is_ascii_digit())) =>
            {
                let start = i;
                i += 1;
                while i < bytes.len()
                    && ((bytes[i] as char).is_ascii_digit() || bytes[i] == b'.')
                {
                    i += 1;
                }
                let text = &input[start..i];
                match text.parse::<f64>() {
                    Ok(n) => tokens.push((Token::Number(n), start)),
                    Err(_) => {
                        return Err(ConditionError::UnexpectedCharacter {
                            found: c,
                            position: start,
                        })
                    }
                }
            }
            _ if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < bytes.len()
                    && ((bytes[i] as char).is_ascii_alphanumeric()
                        || bytes[i] == b'_'
                        || bytes[i] == b'.')
                {
                    i += 1;
                }
                let word = &input[start..i];
                let token = match word {
                    "true" => Token::True,
                    "false" => Token::False,
                    _ => Token::Identifier(word.to_string()),
                };
                tokens.push((token, start));
            }
            _ => {
                return Err(ConditionError::UnexpectedCharacter {
                    found: c,
                    position: i,
                })
            }
        }
    }

    Ok(tokens)
}

/// An operand value during evaluation
#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Bool(bool),
    Number(f64),
    Text(String),
    /// An unresolved reference or unknown identifier
    Missing,
}

impl Operand {
    fn from_value(value: Value) -> Self {
        match value {
            Value::Bool(b) => Operand::Bool(b),
            Value::Number(n) => n.as_f64().map(Operand::Number).unwrap_or(Operand::Missing),
            Value::String(s) => Operand::Text(s),
            Value::Null => Operand::Missing,
            other => Operand::Text(other.to_string()),
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            Operand::Number(n) => Some(*n),
            Operand::Text(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    fn as_text(&self) -> Option<String> {
        match self {
            Operand::Text(s) => Some(s.clone()),
            Operand::Number(n) => Some(n.to_string()),
            Operand::Bool(b) => Some(b.to_string()),
            Operand::Missing => None,
        }
    }

    /// Truthiness when an operand stands alone as a boolean
    fn truthy(&self) -> bool {
        match self {
            Operand::Bool(b) => *b,
            Operand::Number(n) => *n != 0.0,
            Operand::Text(s) => s.eq_ignore_ascii_case("true"),
            Operand::Missing => false,
        }
    }
}

struct Parser<'a, 'b> {
    tokens: &'a [(Token, usize)],
    position: usize,
    scope: &'a Scope<'b>,
}

impl Parser<'_, '_> {
    fn peek(&self) -> Option<&(Token, usize)> {
        self.tokens.get(self.position)
    }

    fn advance(&mut self) -> Option<&(Token, usize)> {
        let token = self.tokens.get(self.position);
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn or_expression(&mut self) -> Result<Operand, ConditionError> {
        let mut left = self.and_expression()?;
        while matches!(self.peek(), Some((Token::OrOr, _))) {
            self.advance();
            let right = self.and_expression()?;
            left = Operand::Bool(left.truthy() || right.truthy());
        }
        Ok(left)
    }

    fn and_expression(&mut self) -> Result<Operand, ConditionError> {
        let mut left = self.comparison()?;
        while matches!(self.peek(), Some((Token::AndAnd, _))) {
            self.advance();
            let right = self.comparison()?;
            left = Operand::Bool(left.truthy() && right.truthy());
        }
        Ok(left)
    }

    fn comparison(&mut self) -> Result<Operand, ConditionError> {
        let left = self.unary()?;

        let op = match self.peek() {
            Some((token, _))
                if matches!(
                    token,
                    Token::EqEq | Token::NotEq | Token::Lt | Token::Le | Token::Gt | Token::Ge
                ) =>
            {
                token.clone()
            }
            _ => return Ok(left),
        };
        self.advance();
        let right = self.unary()?;

        Ok(Operand::Bool(compare(&op, &left, &right)))
    }

    fn unary(&mut self) -> Result<Operand, ConditionError> {
        if matches!(self.peek(), Some((Token::Not, _))) {
            self.advance();
            let operand = self.unary()?;
            return Ok(Operand::Bool(!operand.truthy()));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Operand, ConditionError> {
        let (token, position) = match self.advance() {
            Some(entry) => entry.clone(),
            None => return Err(ConditionError::UnexpectedEnd),
        };

        match token {
            Token::True => Ok(Operand::Bool(true)),
            Token::False => Ok(Operand::Bool(false)),
            Token::Number(n) => Ok(Operand::Number(n)),
            Token::Str(s) => Ok(Operand::Text(s)),
            Token::Reference(name) | Token::Identifier(name) => Ok(self
                .scope
                .resolve(&name)
                .map(Operand::from_value)
                .unwrap_or(Operand::Missing)),
            Token::LParen => {
                let inner = self.or_expression()?;
                match self.advance() {
                    Some((Token::RParen, _)) => Ok(inner),
                    Some((token, position)) => Err(ConditionError::UnexpectedToken {
                        found: token.to_string(),
                        position: *position,
                    }),
                    None => Err(ConditionError::UnexpectedEnd),
                }
            }
            other => Err(ConditionError::UnexpectedToken {
                found: other.to_string(),
                position,
            }),
        }
    }
}

/// Compare two operands; any missing side makes the comparison false
fn compare(op: &Token, left: &Operand, right: &Operand) -> bool {
    if *left == Operand::Missing || *right == Operand::Missing {
        return false;
    }

    // Numeric comparison when both sides look numeric, else string
    if let (Some(l), Some(r)) = (left.as_number(), right.as_number()) {
        return match op {
            Token::EqEq => l == r,
            Token::NotEq => l != r,
            Token::Lt => l < r,
            Token::Le => l <= r,
            Token::Gt => l > r,
            Token::Ge => l >= r,
            _ => false,
        };
    }

    match (left.as_text(), right.as_text()) {
        (Some(l), Some(r)) => match op {
            Token::EqEq => l == r,
            Token::NotEq => l != r,
            Token::Lt => l < r,
            Token::Le => l <= r,
            Token::Gt => l > r,
            Token::Ge => l >= r,
            _ => false,
        },
        _ => false,
    }
}
