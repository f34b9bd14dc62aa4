//! Condition language for `conditional` mappings.
//!
//! Equality and existence checks only:
//!
//! ```text
//! expr  := and ("||" and)*
//! and   := unary ("&&" unary)*
//! unary := "!" unary | atom
//! atom  := "exists(" path ")" | path ("==" | "!=") literal | "(" expr ")"
//! ```
//!
//! Literals are single- or double-quoted with no escapes. Paths use the grammar of the
//! source side of the rule. A missing value is never equal to a literal.

use crate::rule::DocPath;
use crate::Format;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Predicate {
    Exists(DocPath),
    Equals {
        path: DocPath,
        literal: String,
        negated: bool,
    },
    Not(Box<Predicate>),
    All(Vec<Predicate>),
    Any(Vec<Predicate>),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("at offset {offset}: {message}")]
pub struct PredicateError {
    pub offset: usize,
    pub message: String,
}

impl Predicate {
    /// Parse predicate text whose paths address `format` documents.
    ///
    /// # Errors
    ///
    /// Returns [`PredicateError`] with the byte offset of the first offending token.
    pub fn parse(input: &str, format: Format) -> Result<Self, PredicateError> {
        let tokens = lex(input)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            format,
            end: input.len(),
        };
        let predicate = parser.expr()?;
        if let Some(extra) = parser.tokens.get(parser.pos) {
            return Err(PredicateError {
                offset: extra.offset,
                message: "unexpected trailing input".into(),
            });
        }
        Ok(predicate)
    }

    /// Evaluate against a document, reading values through `read`.
    pub fn evaluate<F>(&self, read: &F) -> bool
    where
        F: Fn(&DocPath) -> Option<String>,
    {
        match self {
            Predicate::Exists(path) => read(path).is_some(),
            Predicate::Equals {
                path,
                literal,
                negated,
            } => {
                let equal = read(path).is_some_and(|v| v == *literal);
                equal != *negated
            }
            Predicate::Not(inner) => !inner.evaluate(read),
            Predicate::All(items) => items.iter().all(|p| p.evaluate(read)),
            Predicate::Any(items) => items.iter().any(|p| p.evaluate(read)),
        }
    }
}

// ============================================================================
// Lexer
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
enum Tok {
    Open,
    Close,
    And,
    Or,
    Not,
    Eq,
    Ne,
    Literal(String),
    Word(String),
}

#[derive(Clone, Debug)]
struct Token {
    tok: Tok,
    offset: usize,
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '[' | ']' | '_')
}

fn lex(input: &str) -> Result<Vec<Token>, PredicateError> {
    let err = |offset: usize, message: &str| PredicateError {
        offset,
        message: message.to_owned(),
    };

    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();
    while let Some((offset, c)) = chars.next() {
        let tok = match c {
            c if c.is_whitespace() => continue,
            '(' => Tok::Open,
            ')' => Tok::Close,
            '&' => match chars.next_if(|(_, n)| *n == '&') {
                Some(_) => Tok::And,
                None => return Err(err(offset, "expected '&&'")),
            },
            '|' => match chars.next_if(|(_, n)| *n == '|') {
                Some(_) => Tok::Or,
                None => return Err(err(offset, "expected '||'")),
            },
            '=' => match chars.next_if(|(_, n)| *n == '=') {
                Some(_) => Tok::Eq,
                None => return Err(err(offset, "expected '=='")),
            },
            '!' => match chars.next_if(|(_, n)| *n == '=') {
                Some(_) => Tok::Ne,
                None => Tok::Not,
            },
            '\'' | '"' => {
                let mut literal = String::new();
                let mut closed = false;
                for (_, n) in chars.by_ref() {
                    if n == c {
                        closed = true;
                        break;
                    }
                    literal.push(n);
                }
                if !closed {
                    return Err(err(offset, "unterminated string literal"));
                }
                Tok::Literal(literal)
            }
            c if is_word_char(c) => {
                let mut word = String::from(c);
                while let Some((_, n)) = chars.next_if(|(_, n)| is_word_char(*n)) {
                    word.push(n);
                }
                Tok::Word(word)
            }
            other => return Err(err(offset, &format!("unexpected character '{other}'"))),
        };
        tokens.push(Token { tok, offset });
    }
    Ok(tokens)
}

// ============================================================================
// Parser
// ============================================================================

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    format: Format,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|t| &t.tok)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.end, |t| t.offset)
    }

    fn error(&self, message: impl Into<String>) -> PredicateError {
        PredicateError {
            offset: self.offset(),
            message: message.into(),
        }
    }

    fn next(&mut self) -> Option<Tok> {
        let tok = self.tokens.get(self.pos).map(|t| t.tok.clone());
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, expected: Tok, what: &str) -> Result<(), PredicateError> {
        if self.peek() == Some(&expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(format!("expected {what}")))
        }
    }

    fn expr(&mut self) -> Result<Predicate, PredicateError> {
        let mut items = vec![self.and()?];
        while self.peek() == Some(&Tok::Or) {
            self.pos += 1;
            items.push(self.and()?);
        }
        Ok(collapse(items, Predicate::Any))
    }

    fn and(&mut self) -> Result<Predicate, PredicateError> {
        let mut items = vec![self.unary()?];
        while self.peek() == Some(&Tok::And) {
            self.pos += 1;
            items.push(self.unary()?);
        }
        Ok(collapse(items, Predicate::All))
    }

    fn unary(&mut self) -> Result<Predicate, PredicateError> {
        if self.peek() == Some(&Tok::Not) {
            self.pos += 1;
            return Ok(Predicate::Not(Box::new(self.unary()?)));
        }
        self.atom()
    }

    fn atom(&mut self) -> Result<Predicate, PredicateError> {
        let offset = self.offset();
        match self.next() {
            Some(Tok::Open) => {
                let inner = self.expr()?;
                self.expect(Tok::Close, "')'")?;
                Ok(inner)
            }
            Some(Tok::Word(word)) if word == "exists" && self.peek() == Some(&Tok::Open) => {
                self.pos += 1;
                let path = self.path()?;
                self.expect(Tok::Close, "')' after exists path")?;
                Ok(Predicate::Exists(path))
            }
            Some(Tok::Word(word)) => {
                let path = self.parse_path(&word, offset)?;
                let negated = match self.peek() {
                    Some(Tok::Eq) => false,
                    Some(Tok::Ne) => true,
                    _ => return Err(self.error("expected '==' or '!=' after path")),
                };
                self.pos += 1;
                let literal = match self.peek() {
                    Some(Tok::Literal(literal)) => literal.clone(),
                    _ => return Err(self.error("expected a quoted literal")),
                };
                self.pos += 1;
                Ok(Predicate::Equals {
                    path,
                    literal,
                    negated,
                })
            }
            _ => Err(PredicateError {
                offset,
                message: "expected a condition".into(),
            }),
        }
    }

    fn path(&mut self) -> Result<DocPath, PredicateError> {
        let offset = self.offset();
        match self.next() {
            Some(Tok::Word(word)) => self.parse_path(&word, offset),
            _ => Err(PredicateError {
                offset,
                message: "expected a path".into(),
            }),
        }
    }

    fn parse_path(&self, word: &str, offset: usize) -> Result<DocPath, PredicateError> {
        DocPath::parse(self.format, word).map_err(|message| PredicateError { offset, message })
    }
}

fn collapse(mut items: Vec<Predicate>, wrap: fn(Vec<Predicate>) -> Predicate) -> Predicate {
    if items.len() == 1 {
        items.remove(0)
    } else {
        wrap(items)
    }
}
