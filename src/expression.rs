use std::collections::BTreeSet;

use regex::Regex;

use crate::{
    dataset::{Dataset, StudySet},
    error::{Error, Result},
};

/// A parsed boolean term expression.
///
/// Terms may contain internal spaces and `*` wildcards; `~` binds tighter
/// than `&`, which binds tighter than `|`.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Term(String),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

impl Expr {
    /// Parse an expression into its syntax tree.
    pub fn parse(expression: &str) -> Result<Expr> {
        let trimmed = expression.trim();
        if trimmed.is_empty() {
            return Err(Error::EmptyExpression);
        }
        let tokens = tokenize(trimmed)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            source: trimmed,
        };
        let expr = parser.parse_or()?;
        match parser.peek() {
            None => Ok(expr),
            Some(Token::Close) => Err(Error::UnmatchedParenthesis(trimmed.to_string())),
            Some(_) => Err(Error::IllegalOperators(trimmed.to_string())),
        }
    }

    /// Resolve the expression to a set of study IDs against `dataset`.
    pub fn evaluate(&self, dataset: &Dataset) -> Result<StudySet> {
        match self {
            Expr::Term(term) => dataset.resolve_term(term),
            Expr::Not(inner) => {
                let inner = inner.evaluate(dataset)?;
                Ok(dataset.study_ids().difference(&inner).copied().collect())
            }
            Expr::And(left, right) => {
                let left = left.evaluate(dataset)?;
                let right = right.evaluate(dataset)?;
                Ok(left.intersection(&right).copied().collect())
            }
            Expr::Or(left, right) => {
                let left = left.evaluate(dataset)?;
                let right = right.evaluate(dataset)?;
                Ok(left.union(&right).copied().collect())
            }
        }
    }
}

/// Surface checks on a raw expression, mirrored by the parser but cheaper
/// and with friendlier messages for interactive use.
///
/// Rejects illegal characters, doubled or dangling binary operators, and
/// any bare term (no wildcard) missing from `known_terms`.
pub fn validate_expression(expression: &str, known_terms: &BTreeSet<String>) -> Result<()> {
    let expression = expression.trim();
    if expression.is_empty() {
        return Err(Error::EmptyExpression);
    }

    let illegal_chars = Regex::new(r"[^a-zA-Z0-9*&~|() ]").expect("static pattern");
    if illegal_chars.is_match(expression) {
        return Err(Error::IllegalCharacters(expression.to_string()));
    }

    let doubled_ops = Regex::new(r"[|&] *[|&]").expect("static pattern");
    let bad_leading = Regex::new(r"^[|&)]").expect("static pattern");
    let bad_trailing = Regex::new(r"[|&(~]$").expect("static pattern");
    if doubled_ops.is_match(expression)
        || bad_leading.is_match(expression)
        || bad_trailing.is_match(expression)
    {
        return Err(Error::IllegalOperators(expression.to_string()));
    }

    let term_chunks = Regex::new(r"[a-zA-Z0-9* ]+").expect("static pattern");
    for chunk in term_chunks.find_iter(expression) {
        let entry = chunk.as_str().trim();
        if entry.is_empty() {
            continue;
        }
        if entry.trim_matches(['*', ' ']).is_empty() {
            return Err(Error::IllegalOperators(expression.to_string()));
        }
        if entry.contains('*') {
            continue;
        }
        if !known_terms.contains(entry) {
            return Err(Error::UnknownTerm(entry.to_string()));
        }
    }
    Ok(())
}

/// Anchored matcher for a `*`-wildcard term over the vocabulary.
pub(crate) fn wildcard_matcher(term: &str) -> Regex {
    let pattern = term
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("^{pattern}$")).expect("escaped pattern")
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Term(String),
    And,
    Or,
    Not,
    Open,
    Close,
}

fn tokenize(expression: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut term = String::new();
    let flush = |term: &mut String, tokens: &mut Vec<Token>| {
        let trimmed = term.trim();
        if !trimmed.is_empty() {
            tokens.push(Token::Term(trimmed.to_string()));
        }
        term.clear();
    };
    for ch in expression.chars() {
        match ch {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '*' | ' ' => term.push(ch),
            '&' => {
                flush(&mut term, &mut tokens);
                tokens.push(Token::And);
            }
            '|' => {
                flush(&mut term, &mut tokens);
                tokens.push(Token::Or);
            }
            '~' => {
                flush(&mut term, &mut tokens);
                tokens.push(Token::Not);
            }
            '(' => {
                flush(&mut term, &mut tokens);
                tokens.push(Token::Open);
            }
            ')' => {
                flush(&mut term, &mut tokens);
                tokens.push(Token::Close);
            }
            _ => return Err(Error::IllegalCharacters(expression.to_string())),
        }
    }
    flush(&mut term, &mut tokens);
    Ok(tokens)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    source: &'a str,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while self.eat(&Token::Or) {
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        while self.eat(&Token::And) {
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.eat(&Token::Not) {
            let inner = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        if self.eat(&Token::Open) {
            let inner = self.parse_or()?;
            if !self.eat(&Token::Close) {
                return Err(Error::UnmatchedParenthesis(self.source.to_string()));
            }
            return Ok(inner);
        }
        match self.peek().cloned() {
            Some(Token::Term(term)) => {
                self.pos += 1;
                if term.trim_matches(['*', ' ']).is_empty() {
                    return Err(Error::IllegalOperators(self.source.to_string()));
                }
                Ok(Expr::Term(term))
            }
            _ => Err(Error::IllegalOperators(self.source.to_string())),
        }
    }
}
