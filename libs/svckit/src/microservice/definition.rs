use std::sync::Arc;

use async_trait::async_trait;

use super::Microservice;
use crate::channel::ApiChannel;
use crate::config::{ConfigurationModel, ResolvedConfig};
use crate::error::LifecycleError;
use crate::lifecycle::ComponentSlot;
use crate::tenant::Tenant;

/// What a concrete microservice contributes to the orchestrator.
///
/// The orchestrator owns sequencing, locking and failure policy; a definition
/// only describes identity and builds components.
#[async_trait]
pub trait MicroserviceDefinition: Send + Sync + 'static {
    /// Human-readable name, used in step names ("Start {name}").
    fn name(&self) -> &str;

    /// Stable machine identifier, used as component owner in logs and events.
    fn identifier(&self) -> &str;

    /// Global microservices serve every tenant from one instance and never host tenant engines.
    fn is_global(&self) -> bool;

    fn configuration_model(&self) -> ConfigurationModel {
        ConfigurationModel::default()
    }

    /// Channels to the remote APIs this microservice depends on. Every channel is
    /// required: it must initialize and start, and it is awaited after start.
    ///
    /// # Errors
    /// Any error fails microservice initialization.
    fn build_api_channels(&self, _config: &ResolvedConfig) -> anyhow::Result<Vec<Arc<ApiChannel>>> {
        Ok(Vec::new())
    }

    /// Process-wide components started after the API channels.
    ///
    /// # Errors
    /// Any error fails microservice initialization.
    fn global_components(&self, _config: &ResolvedConfig) -> anyhow::Result<Vec<ComponentSlot>> {
        Ok(Vec::new())
    }

    /// Components making up the engine for `tenant`.
    ///
    /// # Errors
    /// Any error fails the tenant assignment; nothing is registered.
    async fn create_tenant_engine(
        &self,
        _tenant: &Tenant,
        _config: &ResolvedConfig,
    ) -> anyhow::Result<Vec<ComponentSlot>> {
        Ok(Vec::new())
    }

    /// Runs once the microservice reached `Started`. By default waits for every
    /// required API to become reachable.
    ///
    /// # Errors
    /// An error does not fail the start; the microservice keeps running degraded.
    async fn after_started(&self, microservice: &Microservice) -> Result<(), LifecycleError> {
        microservice.wait_for_apis_available().await
    }
}
