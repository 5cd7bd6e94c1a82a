//! Operation planner.

use std::fmt;

use crate::diff::OperationDiff;
use crate::entity::Entity;

/// One atomic remote operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Create,
    Update(OperationDiff),
}

impl Operation {
    pub fn name(&self) -> String {
        match self {
            Operation::Create => "create".to_string(),
            Operation::Update(d) => match &d.update_op {
                Some(op) => format!("update:{}", op),
                None => "recreate".to_string(),
            },
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Create => write!(f, "create"),
            Operation::Update(d) => write!(f, "update {}", d),
        }
    }
}

/// Turn approved diffs into an ordered list of operations.
///
/// Runs only after the lifecycle check approved `diffs`. An empty plan means
/// the resource already matches.
pub fn plan(initial: Option<&Entity>, diffs: Vec<OperationDiff>) -> Vec<Operation> {
    match initial {
        None => vec![Operation::Create],
        Some(_) => diffs.into_iter().map(Operation::Update).collect(),
    }
}
