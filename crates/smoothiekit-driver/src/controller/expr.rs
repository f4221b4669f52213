//! Arithmetic expression evaluation
//!
//! Evaluates the bracket expressions and `%name=expr` assignments the line
//! preprocessor encounters. The grammar is deliberately small: numbers,
//! context identifiers (dotted names allowed), unary sign, `+ - * / %`,
//! and parentheses.

use std::fmt;

/// Why an expression failed to evaluate
#[derive(Debug, Clone, PartialEq)]
pub enum ExprError {
    /// A character outside the grammar
    UnexpectedChar(char),
    /// Input ended mid-expression
    UnexpectedEnd,
    /// A token where an operator or end was expected
    TrailingInput,
    /// An identifier with no binding in the context
    UnknownVariable(String),
}

impl fmt::Display for ExprError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExprError::UnexpectedChar(c) => write!(f, "unexpected character '{}'", c),
            ExprError::UnexpectedEnd => write!(f, "unexpected end of expression"),
            ExprError::TrailingInput => write!(f, "trailing input after expression"),
            ExprError::UnknownVariable(name) => write!(f, "unknown variable '{}'", name),
        }
    }
}

impl std::error::Error for ExprError {}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, ExprError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' => {
                chars.next();
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '%' => {
                chars.next();
                tokens.push(Token::Percent);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '0'..='9' | '.' => {
                let mut text = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        text.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value = text.parse::<f64>().map_err(|_| ExprError::TrailingInput)?;
                tokens.push(Token::Number(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut name = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_alphanumeric() || d == '_' || d == '.' {
                        name.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(name));
            }
            other => return Err(ExprError::UnexpectedChar(other)),
        }
    }

    Ok(tokens)
}

struct Parser<'a, F> {
    tokens: Vec<Token>,
    pos: usize,
    lookup: &'a F,
}

impl<'a, F> Parser<'a, F>
where
    F: Fn(&str) -> Option<f64>,
{
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expr(&mut self) -> Result<f64, ExprError> {
        let mut value = self.term()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.next();
                    value += self.term()?;
                }
                Some(Token::Minus) => {
                    self.next();
                    value -= self.term()?;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<f64, ExprError> {
        let mut value = self.unary()?;
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.next();
                    value *= self.unary()?;
                }
                Some(Token::Slash) => {
                    self.next();
                    value /= self.unary()?;
                }
                Some(Token::Percent) => {
                    self.next();
                    value %= self.unary()?;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn unary(&mut self) -> Result<f64, ExprError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.next();
                Ok(-self.unary()?)
            }
            Some(Token::Plus) => {
                self.next();
                self.unary()
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<f64, ExprError> {
        match self.next() {
            Some(Token::Number(value)) => Ok(value),
            Some(Token::Ident(name)) => {
                (self.lookup)(&name).ok_or(ExprError::UnknownVariable(name))
            }
            Some(Token::LParen) => {
                let value = self.expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(value),
                    Some(_) => Err(ExprError::TrailingInput),
                    None => Err(ExprError::UnexpectedEnd),
                }
            }
            Some(_) => Err(ExprError::TrailingInput),
            None => Err(ExprError::UnexpectedEnd),
        }
    }
}

/// Evaluate an expression against a variable lookup
pub fn evaluate<F>(input: &str, lookup: &F) -> Result<f64, ExprError>
where
    F: Fn(&str) -> Option<f64>,
{
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(ExprError::UnexpectedEnd);
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        lookup,
    };
    let value = parser.expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(ExprError::TrailingInput);
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_vars(_: &str) -> Option<f64> {
        None
    }

    #[test]
    fn arithmetic() {
        assert_eq!(evaluate("1 + 2 * 3", &no_vars).unwrap(), 7.0);
        assert_eq!(evaluate("(1 + 2) * 3", &no_vars).unwrap(), 9.0);
        assert_eq!(evaluate("-4 / 2", &no_vars).unwrap(), -2.0);
        assert_eq!(evaluate("7 % 4", &no_vars).unwrap(), 3.0);
        assert_eq!(evaluate("1.5 + .5", &no_vars).unwrap(), 2.0);
    }

    #[test]
    fn variables() {
        let lookup = |name: &str| match name {
            "xmin" => Some(10.0),
            "mposz" => Some(-2.5),
            _ => None,
        };
        assert_eq!(evaluate("xmin + 5", &lookup).unwrap(), 15.0);
        assert_eq!(evaluate("mposz * 2", &lookup).unwrap(), -5.0);
        assert_eq!(
            evaluate("ymax", &lookup),
            Err(ExprError::UnknownVariable("ymax".to_string()))
        );
    }

    #[test]
    fn malformed_input() {
        assert!(evaluate("", &no_vars).is_err());
        assert!(evaluate("1 +", &no_vars).is_err());
        assert!(evaluate("(1 + 2", &no_vars).is_err());
        assert!(evaluate("1 2", &no_vars).is_err());
        assert!(evaluate("#5", &no_vars).is_err());
    }
}
