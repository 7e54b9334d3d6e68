//! NFA description backing the CEP `MATCHER` operator.
//!
//! The matcher compiles a pattern into states, transitions, and per-edge
//! predicates; the emitter renders these as a controller object plus one
//! predicate closure per transition.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::SchemaError;
use crate::expr::Predicate;
use crate::schema::Schema;

/// Role of a state within the pattern automaton.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateKind {
    Start,
    Normal,
    Final,
}

/// A single automaton state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub name: String,
    pub kind: StateKind,
}

impl State {
    pub fn new(name: &str, kind: StateKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
        }
    }
}

/// A predicate-guarded transition between two states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub from: String,
    pub to: String,
    pub predicate: Predicate,
}

/// Event-selection policy after a completed match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SkipStrategy {
    /// Resume scanning at the event following the first of the match.
    #[default]
    NextMatch,
    /// Resume scanning at the event following the last of the match.
    AnyMatch,
}

/// The full automaton description carried by a `Matcher` operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Nfa {
    pub states: Vec<State>,
    pub transitions: Vec<Transition>,
}

impl Nfa {
    pub fn new(states: Vec<State>, transitions: Vec<Transition>) -> Self {
        Self {
            states,
            transitions,
        }
    }

    pub fn start_state(&self) -> Option<&State> {
        self.states.iter().find(|s| s.kind == StateKind::Start)
    }

    pub fn final_states(&self) -> impl Iterator<Item = &State> {
        self.states.iter().filter(|s| s.kind == StateKind::Final)
    }

    /// Verify every transition predicate resolves against the input schema.
    pub fn check(&self, schema: Option<&Schema>) -> Result<(), SchemaError> {
        for t in &self.transitions {
            t.predicate.check(schema)?;
        }
        Ok(())
    }
}

impl fmt::Display for Nfa {
    /// Canonical rendering used in lineage strings.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, s) in self.states.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", s.name)?;
        }
        write!(f, "|")?;
        for (i, t) in self.transitions.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}->{}:{}", t.from, t.to, t.predicate)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{CmpOp, Expr, Literal, Ref};
    use crate::schema::Field;
    use crate::types::FieldType;

    fn sample() -> Nfa {
        Nfa::new(
            vec![
                State::new("s0", StateKind::Start),
                State::new("s1", StateKind::Final),
            ],
            vec![Transition {
                from: "s0".into(),
                to: "s1".into(),
                predicate: Predicate::Cmp(
                    CmpOp::Gt,
                    Expr::named("x"),
                    Expr::Ref(Ref::Value(Literal::Int(10))),
                ),
            }],
        )
    }

    #[test]
    fn start_and_final() {
        let nfa = sample();
        assert_eq!(nfa.start_state().unwrap().name, "s0");
        assert_eq!(nfa.final_states().count(), 1);
    }

    #[test]
    fn check_against_schema() {
        let nfa = sample();
        let good = Schema::from_fields(vec![Field::new("x", FieldType::Int)]);
        let bad = Schema::from_fields(vec![Field::new("y", FieldType::Int)]);
        assert!(nfa.check(Some(&good)).is_ok());
        assert!(nfa.check(Some(&bad)).is_err());
    }
}
