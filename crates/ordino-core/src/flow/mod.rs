//! Flow state machine core: definition parsing, turn execution, and the gates around it.
//!
//! This module contains the "brain" of the conversation engine:
//! - `definition` -- YAML parsing, structural validation, filesystem load/save
//! - `graph` -- petgraph reachability audit over the state graph
//! - `path` -- dotted-path reads and writes into context data
//! - `template` -- `{{ a.b || fallback }}` interpolation for action configs
//! - `expression` -- JEXL evaluator for decision-state `when` clauses
//! - `retry` -- exponential backoff policy for failing actions
//! - `validator` -- input validation contract plus the built-in rule validator
//! - `schema` -- optional post-turn context schema check, never fatal
//! - `interrupt` -- intent interruption resolution (cancel / help / flow switch)
//! - `engine` -- the one-state-per-turn executor tying it all together

pub mod definition;
pub mod engine;
pub mod expression;
pub mod graph;
pub mod interrupt;
pub mod path;
pub mod retry;
pub mod schema;
pub mod template;
pub mod validator;
