//! ProcedureRegistry - in-process procedure engine.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{ExecutionContext, Record};
use crate::error::{BatchError, Result};
use crate::ports::ProcedureRunner;

type ProcedureFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;
type Procedure = Arc<dyn Fn(ExecutionContext, Option<Record>) -> ProcedureFuture + Send + Sync>;

/// Named procedures (name -> async fn).
///
/// Built during initialization, read-only afterwards, so no lock is needed.
#[derive(Default)]
pub struct ProcedureRegistry {
    procedures: HashMap<String, Procedure>,
}

impl ProcedureRegistry {
    pub fn new() -> Self {
        Self {
            procedures: HashMap::new(),
        }
    }

    /// Register a procedure. Names must be unique.
    pub fn register<F, Fut>(&mut self, name: impl Into<String>, procedure: F) -> Result<()>
    where
        F: Fn(ExecutionContext, Option<Record>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let name = name.into();
        if self.procedures.contains_key(&name) {
            return Err(BatchError::InvalidArgument(format!(
                "duplicate procedure '{name}'"
            )));
        }
        let boxed: Procedure = Arc::new(
            move |ctx: ExecutionContext, param: Option<Record>| -> ProcedureFuture {
                Box::pin(procedure(ctx, param))
            },
        );
        self.procedures.insert(name, boxed);
        Ok(())
    }
}

#[async_trait]
impl ProcedureRunner for ProcedureRegistry {
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        name: &str,
        param: Option<&Record>,
    ) -> Result<()> {
        let procedure = self
            .procedures
            .get(name)
            .cloned()
            .ok_or_else(|| BatchError::Procedure {
                name: name.to_string(),
                message: "not registered".to_string(),
            })?;

        procedure(ctx.clone(), param.cloned())
            .await
            .map_err(|e| match e {
                BatchError::Procedure { .. } => e,
                other => BatchError::Procedure {
                    name: name.to_string(),
                    message: other.to_string(),
                },
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RecordId;

    #[tokio::test]
    async fn runs_registered_procedure() {
        let mut registry = ProcedureRegistry::new();
        registry
            .register("Ping", |ctx: ExecutionContext, _param| async move {
                assert!(ctx.is_privileged());
                Ok(())
            })
            .unwrap();

        registry
            .execute(&ExecutionContext::system(), "Ping", None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unknown_procedure_is_an_error() {
        let registry = ProcedureRegistry::new();
        let err = registry
            .execute(&ExecutionContext::system(), "Missing", None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("'Missing'"));
        assert!(err.to_string().contains("not registered"));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut registry = ProcedureRegistry::new();
        registry.register("Ping", |_ctx, _param| async { Ok(()) }).unwrap();
        let err = registry
            .register("Ping", |_ctx, _param| async { Ok(()) })
            .unwrap_err();
        assert!(matches!(err, BatchError::InvalidArgument(_)));
        assert_eq!(registry.procedures.len(), 1);
    }

    #[tokio::test]
    async fn failures_name_the_procedure() {
        let mut registry = ProcedureRegistry::new();
        registry
            .register("Orders.Close", |_ctx, param: Option<Record>| async move {
                Err(BatchError::Handler {
                    record: param.map(|r| r.id).unwrap_or(RecordId::new(0)),
                    message: "already closed".to_string(),
                })
            })
            .unwrap();

        let record = Record::new(RecordId::new(3), "Sales.Order");
        let err = registry
            .execute(&ExecutionContext::system(), "Orders.Close", Some(&record))
            .await
            .unwrap_err();
        assert!(matches!(err, BatchError::Procedure { ref name, .. } if name == "Orders.Close"));
        assert!(err.to_string().contains("already closed"));
    }
}
