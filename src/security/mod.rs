//! Command execution safety core: parse → classify → validate.
//!
//! Nothing in this module performs I/O. The parser produces a structural
//! view of a command, the classifier matches it against the dangerous-pattern
//! rule set, and the validator gates every step before it may reach the
//! execution engine.

pub mod classifier;
pub mod parser;
pub mod rules;
pub mod validator;

pub use classifier::{classify, ClassificationResult, PlanContext, Verdict};
pub use parser::{parse, ParsedCommand, Token};
pub use rules::{Rule, RuleCategory, Severity, RULES};
pub use validator::{ExecutionPolicy, ValidationOutcome, Validator};
