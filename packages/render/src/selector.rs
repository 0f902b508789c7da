//! A small selector engine for selector queries and intersection observers.
//!
//! Supported: type (`view`), id (`#main`), class (`.item`), compounds of
//! those (`view.item.active`), the descendant combinator (whitespace) and
//! selector lists (`a, b`).

use std::iter::Peekable;
use std::str::CharIndices;

use crate::error::{RenderError, Result};

/// One compound selector such as `view#a.b.c`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Compound {
    pub tag: Option<String>,
    pub id: Option<String>,
    pub classes: Vec<String>,
}

impl Compound {
    /// Does a node with the given properties match?
    pub fn matches(&self, tag: &str, id: Option<&str>, classes: &[&str]) -> bool {
        if let Some(t) = &self.tag {
            if t != tag {
                return false;
            }
        }
        if let Some(want) = &self.id {
            if id != Some(want.as_str()) {
                return false;
            }
        }
        self.classes.iter().all(|c| classes.contains(&c.as_str()))
    }
}

/// A descendant chain, outermost compound first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Complex {
    pub compounds: Vec<Compound>,
}

/// A comma separated selector list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    pub alternatives: Vec<Complex>,
}

impl Selector {
    pub fn parse(input: &str) -> Result<Self> {
        let fail = |message: &str| RenderError::Selector {
            selector: input.to_string(),
            message: message.to_string(),
        };

        let mut alternatives = Vec::new();
        for part in input.split(',') {
            let mut compounds = Vec::new();
            for word in part.split_whitespace() {
                compounds.push(parse_compound(word).map_err(|m| fail(&m))?);
            }
            if compounds.is_empty() {
                return Err(fail("empty selector"));
            }
            alternatives.push(Complex { compounds });
        }
        Ok(Self { alternatives })
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_'
}

fn read_ident(chars: &mut Peekable<CharIndices<'_>>) -> String {
    let mut ident = String::new();
    while let Some(&(_, c)) = chars.peek() {
        if !is_ident_char(c) {
            break;
        }
        ident.push(c);
        chars.next();
    }
    ident
}

fn parse_compound(word: &str) -> std::result::Result<Compound, String> {
    let mut compound = Compound::default();
    let mut chars = word.char_indices().peekable();

    if word == "*" {
        return Ok(compound);
    }

    if matches!(chars.peek(), Some(&(_, c)) if is_ident_char(c)) {
        compound.tag = Some(read_ident(&mut chars));
    }

    while let Some((pos, c)) = chars.next() {
        let ident = read_ident(&mut chars);
        if ident.is_empty() {
            return Err(format!("expected a name after `{}` at {}", c, pos));
        }
        match c {
            '#' if compound.id.is_none() => compound.id = Some(ident),
            '#' => return Err("a compound may carry only one id".to_string()),
            '.' => compound.classes.push(ident),
            other => return Err(format!("unsupported character `{}` at {}", other, pos)),
        }
    }
    Ok(compound)
}
