use std::collections::BTreeMap;
use std::sync::Arc;

use super::Topology;
use crate::agent::Agent;
use crate::config::RunConfig;
use crate::error::ConfigurationError;
use crate::id::AgentId;
use crate::model_client::ModelRegistry;
use crate::tool::ToolGateway;

/// A topology compiled for one task: every agent resolved against the
/// gateway catalog and the model registry.
pub(crate) struct Plan {
    topology: Arc<Topology>,
    agents: BTreeMap<AgentId, Agent>,
    config: Arc<RunConfig>,
}

impl Plan {
    #[inline]
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    #[inline]
    pub fn agent(&self, name: &str) -> Option<&Agent> {
        self.agents.get(name)
    }

    #[inline]
    pub fn config(&self) -> &Arc<RunConfig> {
        &self.config
    }

    /// Resolves tool bindings and model providers.
    ///
    /// Bindings without a schema take the one advertised by the gateway.
    pub fn compile(
        topology: &Arc<Topology>,
        config: Arc<RunConfig>,
        gateway: &ToolGateway,
        models: &ModelRegistry,
    ) -> Result<Plan, ConfigurationError> {
        let mut agents = BTreeMap::new();
        for (name, descriptor) in &topology.agents {
            let provider = &descriptor.model().provider;
            let Some(model) = models.client(provider) else {
                return Err(ConfigurationError::UnknownModelProvider {
                    agent: name.clone(),
                    provider: provider.clone(),
                });
            };

            let mut resolved = descriptor.as_ref().clone();
            for binding in resolved.tools_mut() {
                let Some(found) = gateway.descriptor(binding.server(), binding.tool())
                else {
                    return Err(ConfigurationError::UnknownTool {
                        agent: name.clone(),
                        server: binding.server().to_owned(),
                        tool: binding.tool().to_owned(),
                    });
                };
                binding.resolve(found);
            }

            let agent = Agent::new(
                Arc::new(resolved),
                model,
                gateway.clone(),
                Arc::clone(&config),
            );
            agents.insert(name.clone(), agent);
        }

        debug!("compiled {} agents", agents.len());
        Ok(Plan {
            topology: Arc::clone(topology),
            agents,
            config,
        })
    }
}
