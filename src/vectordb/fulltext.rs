//! Token index and query language for full-text columns.
//!
//! ```text
//! expression := clause (ws clause)*
//! clause     := ['-'] (phrase | prefix | word)
//! phrase     := '"' any-but-quote* '"'
//! prefix     := word '*'
//! ```
//!
//! All positive clauses must match and no negated clause may match.

use std::collections::{BTreeMap, HashMap, HashSet};

use nom::{
    branch::alt,
    bytes::complete::{take_while, take_while1},
    character::complete::{char, multispace0},
    combinator::{all_consuming, map, opt},
    multi::many1,
    sequence::{delimited, pair, terminated},
    IResult,
};

use crate::query::tokenize;

#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Word(String),
    Prefix(String),
    Phrase(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub negated: bool,
    pub term: Term,
}

fn ws<'a, F, O>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn word(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric())(input)
}

fn term(input: &str) -> IResult<&str, Term> {
    alt((
        map(delimited(char('"'), take_while(|c: char| c != '"'), char('"')), |s: &str| {
            Term::Phrase(tokenize(s))
        }),
        map(terminated(word, char('*')), |w: &str| Term::Prefix(w.to_lowercase())),
        map(word, |w: &str| Term::Word(w.to_lowercase())),
    ))(input)
}

fn clause(input: &str) -> IResult<&str, Clause> {
    map(pair(opt(char('-')), term), |(negated, term)| Clause {
        negated: negated.is_some(),
        term,
    })(input)
}

pub fn parse_expression(input: &str) -> Result<Vec<Clause>, String> {
    match all_consuming(many1(ws(clause)))(input) {
        Ok((_, clauses)) => Ok(clauses),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            let context: String = e.input.chars().take(20).collect();
            Err(format!("invalid full-text expression near '{context}'"))
        }
        Err(nom::Err::Incomplete(_)) => Err("incomplete full-text expression".to_string()),
    }
}

/// Positional postings of one column. The token map is ordered so prefix
/// clauses are range scans.
#[derive(Debug, Default, Clone)]
pub struct InvertedIndex {
    postings: BTreeMap<String, HashMap<u64, Vec<u32>>>,
    lengths: HashMap<u64, u32>,
}

impl InvertedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lengths.is_empty()
    }

    pub fn insert(&mut self, seq: u64, text: &str) {
        let tokens = tokenize(text);
        self.lengths.insert(seq, tokens.len() as u32);
        for (position, token) in tokens.into_iter().enumerate() {
            self.postings.entry(token).or_default().entry(seq).or_default().push(position as u32);
        }
    }

    pub fn remove(&mut self, seq: u64, text: &str) {
        if self.lengths.remove(&seq).is_none() {
            return;
        }
        for token in tokenize(text) {
            if let Some(docs) = self.postings.get_mut(&token) {
                docs.remove(&seq);
                if docs.is_empty() {
                    self.postings.remove(&token);
                }
            }
        }
    }

    pub fn clear(&mut self) {
        self.postings.clear();
        self.lengths.clear();
    }

    /// Term frequency per matching row.
    fn matches(&self, term: &Term) -> HashMap<u64, usize> {
        let mut hits: HashMap<u64, usize> = HashMap::new();
        match term {
            Term::Word(w) => {
                if let Some(docs) = self.postings.get(w) {
                    hits.extend(docs.iter().map(|(seq, positions)| (*seq, positions.len())));
                }
            }
            Term::Prefix(p) => {
                for (_, docs) in self.postings.range(p.clone()..).take_while(|(token, _)| token.starts_with(p.as_str())) {
                    for (seq, positions) in docs {
                        *hits.entry(*seq).or_default() += positions.len();
                    }
                }
            }
            Term::Phrase(words) if words.len() == 1 => return self.matches(&Term::Word(words[0].clone())),
            Term::Phrase(words) => {
                let lists: Option<Vec<&HashMap<u64, Vec<u32>>>> = words.iter().map(|w| self.postings.get(w)).collect();
                let Some(lists) = lists else {
                    return hits;
                };
                let Some((first, rest)) = lists.split_first() else {
                    return hits;
                };
                for (seq, starts) in first.iter() {
                    let Some(following): Option<Vec<&Vec<u32>>> = rest.iter().map(|l| l.get(seq)).collect() else {
                        continue;
                    };
                    let occurrences = starts
                        .iter()
                        .filter(|&&start| {
                            following
                                .iter()
                                .enumerate()
                                .all(|(i, positions)| positions.contains(&(start + i as u32 + 1)))
                        })
                        .count();
                    if occurrences > 0 {
                        hits.insert(*seq, occurrences);
                    }
                }
            }
        }
        hits
    }

    /// Matching rows with their score (summed term frequency over row length),
    /// best first; ties keep row order.
    pub fn search(&self, clauses: &[Clause]) -> Vec<(u64, f64)> {
        let mut positive = clauses.iter().filter(|c| !c.negated);
        let Some(first) = positive.next() else {
            return Vec::new();
        };
        let mut candidates = self.matches(&first.term);
        for clause in positive {
            let matched = self.matches(&clause.term);
            candidates.retain(|seq, tf| match matched.get(seq) {
                Some(more) => {
                    *tf += more;
                    true
                }
                None => false,
            });
        }
        let excluded: HashSet<u64> = clauses
            .iter()
            .filter(|c| c.negated)
            .flat_map(|c| self.matches(&c.term).into_keys())
            .collect();

        let mut scored: Vec<(u64, f64)> = candidates
            .into_iter()
            .filter(|(seq, _)| !excluded.contains(seq))
            .map(|(seq, tf)| {
                let length = self.lengths.get(&seq).copied().unwrap_or(1).max(1);
                (seq, tf as f64 / length as f64)
            })
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored
    }
}
