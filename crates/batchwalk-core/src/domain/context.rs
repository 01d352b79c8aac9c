//! Execution context threaded through store queries and handlers.

use std::fmt;

/// Capability token handed to collaborators.
///
/// The core never inspects it beyond `is_privileged`. Background tasks run
/// under `ExecutionContext::system()` obtained once when a walk starts, so a
/// request-scoped user context is never used after its request ended.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExecutionContext {
    principal: Principal,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Principal {
    System,
    User(String),
}

impl ExecutionContext {
    pub fn system() -> Self {
        Self {
            principal: Principal::System,
        }
    }

    pub fn user(name: impl Into<String>) -> Self {
        Self {
            principal: Principal::User(name.into()),
        }
    }

    pub fn is_privileged(&self) -> bool {
        matches!(self.principal, Principal::System)
    }

    pub fn user_name(&self) -> Option<&str> {
        match &self.principal {
            Principal::User(name) => Some(name),
            Principal::System => None,
        }
    }
}

impl fmt::Display for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.principal {
            Principal::System => write!(f, "system"),
            Principal::User(name) => write!(f, "user:{name}"),
        }
    }
}
