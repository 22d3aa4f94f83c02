//! Query translation for the embedded store
//!
//! Queries compile into a tree of closures evaluated against each record's
//! tag map.

use wallet_storage_core::types::{TagName, Tags};
use wallet_storage_core::{Query, QueryTranslator};

/// Compiled tag predicate.
pub type Predicate = Box<dyn Fn(&Tags) -> bool + Send + Sync>;

/// Compiles a [`Query`] into a [`Predicate`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PredicateCompiler;

impl QueryTranslator for PredicateCompiler {
    type Output = Predicate;

    fn translate(&self, query: &Query) -> Predicate {
        match query {
            Query::And(children) => {
                let parts: Vec<Predicate> = children.iter().map(|q| self.translate(q)).collect();
                Box::new(move |tags| parts.iter().all(|p| p(tags)))
            }
            Query::Or(children) => {
                let parts: Vec<Predicate> = children.iter().map(|q| self.translate(q)).collect();
                Box::new(move |tags| parts.iter().any(|p| p(tags)))
            }
            Query::Not(child) => {
                let inner = self.translate(child);
                Box::new(move |tags| !inner(tags))
            }
            Query::Eq(name, value) => {
                let value = value.clone();
                tag_predicate(name, move |t| t == value)
            }
            Query::Neq(name, value) => {
                let value = value.clone();
                tag_predicate(name, move |t| t != value)
            }
            Query::Gt(name, value) => {
                let value = value.clone();
                tag_predicate(name, move |t| t > value.as_str())
            }
            Query::Gte(name, value) => {
                let value = value.clone();
                tag_predicate(name, move |t| t >= value.as_str())
            }
            Query::Lt(name, value) => {
                let value = value.clone();
                tag_predicate(name, move |t| t < value.as_str())
            }
            Query::Lte(name, value) => {
                let value = value.clone();
                tag_predicate(name, move |t| t <= value.as_str())
            }
            Query::Like(name, pattern) => {
                let pattern = LikePattern::new(pattern);
                tag_predicate(name, move |t| pattern.matches(t))
            }
            Query::In(name, values) => {
                let values = values.clone();
                tag_predicate(name, move |t| values.iter().any(|v| v == t))
            }
        }
    }
}

/// Predicate holding only when the tag is present and `test` accepts its value.
fn tag_predicate<F>(name: &TagName, test: F) -> Predicate
where
    F: Fn(&str) -> bool + Send + Sync + 'static,
{
    let key = name.storage_key();
    Box::new(move |tags: &Tags| tags.get(&key).is_some_and(|v| test(v.as_str())))
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum LikeToken {
    Literal(char),
    /// `_`
    AnyChar,
    /// `%`
    AnyRun,
}

/// Case-sensitive SQL LIKE pattern with `\` as escape character.
#[derive(Debug, Clone)]
pub struct LikePattern {
    tokens: Vec<LikeToken>,
}

impl LikePattern {
    #[must_use]
    pub fn new(pattern: &str) -> Self {
        let mut tokens = Vec::with_capacity(pattern.len());
        let mut chars = pattern.chars();
        while let Some(c) = chars.next() {
            let token = match c {
                '%' => LikeToken::AnyRun,
                '_' => LikeToken::AnyChar,
                '\\' => LikeToken::Literal(chars.next().unwrap_or('\\')),
                other => LikeToken::Literal(other),
            };
            // Consecutive `%` are equivalent to one.
            if token == LikeToken::AnyRun && tokens.last() == Some(&LikeToken::AnyRun) {
                continue;
            }
            tokens.push(token);
        }
        Self { tokens }
    }

    #[must_use]
    pub fn matches(&self, text: &str) -> bool {
        let text: Vec<char> = text.chars().collect();
        let (mut t, mut p) = (0, 0);
        // Last `%` seen and the text position it is currently absorbing up to.
        let mut backtrack: Option<(usize, usize)> = None;

        while t < text.len() {
            match self.tokens.get(p) {
                Some(LikeToken::AnyRun) => {
                    backtrack = Some((p, t));
                    p += 1;
                }
                Some(LikeToken::AnyChar) => {
                    t += 1;
                    p += 1;
                }
                Some(LikeToken::Literal(c)) if *c == text[t] => {
                    t += 1;
                    p += 1;
                }
                _ => match backtrack {
                    Some((star, absorbed)) => {
                        backtrack = Some((star, absorbed + 1));
                        p = star + 1;
                        t = absorbed + 1;
                    }
                    None => return false,
                },
            }
        }

        self.tokens[p..].iter().all(|tok| *tok == LikeToken::AnyRun)
    }
}
