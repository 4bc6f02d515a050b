//! Label and field selectors.
//!
//! A selector is a conjunction of `key=value` / `key!=value` requirements,
//! evaluated against a string map. `everything` and `nothing` are the
//! universal accept/reject predicates.

use std::fmt;
use std::str::FromStr;

use crate::{Error, Labels};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equals,
    NotEquals,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub key: String,
    pub op: Operator,
    pub value: String,
}

impl Requirement {
    fn matches(&self, set: &Labels) -> bool {
        let actual = set.get(&self.key).map(String::as_str);
        match self.op {
            Operator::Equals => actual == Some(self.value.as_str()),
            Operator::NotEquals => actual != Some(self.value.as_str()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Selector {
    #[default]
    Everything,
    Nothing,
    Requirements(Vec<Requirement>),
}

impl Selector {
    pub fn everything() -> Self {
        Selector::Everything
    }

    pub fn nothing() -> Self {
        Selector::Nothing
    }

    /// Selector requiring every pair of `set` to be present.
    pub fn from_set(set: &Labels) -> Self {
        if set.is_empty() {
            return Selector::Everything;
        }
        Selector::Requirements(
            set.iter()
                .map(|(k, v)| Requirement { key: k.clone(), op: Operator::Equals, value: v.clone() })
                .collect(),
        )
    }

    pub fn is_everything(&self) -> bool {
        match self {
            Selector::Everything => true,
            Selector::Requirements(reqs) => reqs.is_empty(),
            Selector::Nothing => false,
        }
    }

    pub fn matches(&self, set: &Labels) -> bool {
        match self {
            Selector::Everything => true,
            Selector::Nothing => false,
            Selector::Requirements(reqs) => reqs.iter().all(|r| r.matches(set)),
        }
    }

    /// Parse `k=v,k2!=v2`. The empty string selects everything.
    pub fn parse(input: &str) -> Result<Self, Error> {
        let input = input.trim();
        if input.is_empty() {
            return Ok(Selector::Everything);
        }
        let mut reqs = Vec::new();
        for term in input.split(',') {
            let term = term.trim();
            let (key, op, value) = if let Some((k, v)) = term.split_once("!=") {
                (k, Operator::NotEquals, v)
            } else if let Some((k, v)) = term.split_once("==") {
                (k, Operator::Equals, v)
            } else if let Some((k, v)) = term.split_once('=') {
                (k, Operator::Equals, v)
            } else {
                return Err(Error::BadRequest(format!("invalid selector {input:?}: {term:?} is not key=value")));
            };
            let key = key.trim();
            if key.is_empty() {
                return Err(Error::BadRequest(format!("invalid selector {input:?}: empty key")));
            }
            reqs.push(Requirement { key: key.to_string(), op, value: value.trim().to_string() });
        }
        Ok(Selector::Requirements(reqs))
    }
}

impl FromStr for Selector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Selector::parse(s)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Everything => Ok(()),
            Selector::Nothing => f.write_str("<none>"),
            Selector::Requirements(reqs) => {
                let rendered: Vec<String> = reqs
                    .iter()
                    .map(|r| match r.op {
                        Operator::Equals => format!("{}={}", r.key, r.value),
                        Operator::NotEquals => format!("{}!={}", r.key, r.value),
                    })
                    .collect();
                f.write_str(&rendered.join(","))
            }
        }
    }
}
