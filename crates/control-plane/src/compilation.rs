//! The external compilation worker (builds container images for a given
//! environment definition + architecture) is out of scope for the core;
//! it is modeled as a collaborator trait with an in-process stub that
//! always succeeds immediately, since real image builds never happen here.

use async_trait::async_trait;
use orchestration_core::model::{Architecture, EnvironmentDefinition};

/// One distinct (environment, graph, architecture) combination that needs
/// compiling before its deployments can be deployed.
#[derive(Debug, Clone)]
pub struct CompilationJob {
    pub environment_definition: EnvironmentDefinition,
    pub graph: serde_json::Value,
    pub architecture: Architecture,
}

#[derive(Debug, Clone)]
pub enum CompilationOutcome {
    Success { artifact_ref: String },
    Failure { reason: String },
}

#[async_trait]
pub trait CompilationWorker: Send + Sync {
    async fn compile(&self, job: &CompilationJob) -> CompilationOutcome;
}

/// Always resolves every job successfully, synchronously. Stands in for a
/// real compilation service that would build and push a container image.
pub struct StubCompilationWorker;

#[async_trait]
impl CompilationWorker for StubCompilationWorker {
    async fn compile(&self, _job: &CompilationJob) -> CompilationOutcome {
        CompilationOutcome::Success {
            artifact_ref: "stub://no-op".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_worker_always_succeeds() {
        let worker = StubCompilationWorker;
        let job = CompilationJob {
            environment_definition: EnvironmentDefinition::ShellCommands { commands: vec![] },
            graph: serde_json::json!({}),
            architecture: Architecture::LinuxAmd64,
        };
        assert!(matches!(worker.compile(&job).await, CompilationOutcome::Success { .. }));
    }
}
