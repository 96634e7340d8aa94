//! Operator-authored rules.
//!
//! Rules are written in a small `when ... then ...` language, compiled into an
//! immutable [`KnowledgeBase`] and evaluated against a [`RequestFact`] bound
//! under a name (usually `MF`). Predicates from [`functions`] are reachable
//! through the `RF` object.

pub mod ast;
pub mod engine;
pub mod eval;
pub mod fact;
pub mod functions;
pub mod lexer;
pub mod parser;

pub use engine::{
    check_rule_available, test_rule, KnowledgeBase, MatchedRule, RuleConfig, RuleEngine,
    RuleScan, RuleTestRequest, DEFAULT_FACT_NAME, DEFAULT_MAX_CYCLES,
};
pub use fact::{FactField, RequestFact, Value};
pub use functions::Predicate;
