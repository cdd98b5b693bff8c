use super::{FanOut, Handoff, Route, Topology};
use crate::agent::AgentDescriptor;
use crate::error::ConfigurationError;
use crate::id::AgentId;

/// [`Topology`] builder.
///
/// Nothing is checked until [`build`](Self::build).
#[derive(Debug, Default)]
pub struct TopologyBuilder {
    pub(super) agents: Vec<AgentDescriptor>,
    pub(super) entry: Option<Handoff>,
    pub(super) handoffs: Vec<(AgentId, Handoff)>,
    pub(super) best_effort: Vec<AgentId>,
    pub(super) max_hops: Option<u32>,
}

impl TopologyBuilder {
    /// Declares an agent.
    #[inline]
    pub fn agent(mut self, descriptor: AgentDescriptor) -> Self {
        self.agents.push(descriptor);
        self
    }

    /// Sets the handoff applied to the caller's input.
    #[inline]
    pub fn entry<H: Into<Handoff>>(mut self, handoff: H) -> Self {
        self.entry = Some(handoff.into());
        self
    }

    /// Starts every task with `agent`.
    #[inline]
    pub fn start_with<A: Into<AgentId>>(self, agent: A) -> Self {
        self.entry(Handoff::Sequence(agent.into()))
    }

    /// Sets the outgoing handoff of `from`.
    #[inline]
    pub fn handoff<A: Into<AgentId>, H: Into<Handoff>>(
        mut self,
        from: A,
        handoff: H,
    ) -> Self {
        self.handoffs.push((from.into(), handoff.into()));
        self
    }

    /// Runs `to` after `from`.
    #[inline]
    pub fn sequence<A: Into<AgentId>, B: Into<AgentId>>(
        self,
        from: A,
        to: B,
    ) -> Self {
        self.handoff(from, Handoff::Sequence(to.into()))
    }

    /// Fans out the output of `from`.
    #[inline]
    pub fn fan_out<A: Into<AgentId>>(self, from: A, fan_out: FanOut) -> Self {
        self.handoff(from, Handoff::FanOut(fan_out))
    }

    /// Routes the output of `from` through `routes`.
    #[inline]
    pub fn conditional<A: Into<AgentId>>(
        self,
        from: A,
        routes: impl IntoIterator<Item = Route>,
    ) -> Self {
        self.handoff(from, Handoff::conditional(routes))
    }

    /// Marks a fan-out branch as best-effort: its failure is recorded but
    /// does not fail the task.
    #[inline]
    pub fn best_effort<A: Into<AgentId>>(mut self, agent: A) -> Self {
        self.best_effort.push(agent.into());
        self
    }

    /// Bounds the number of agent activations of a task. Cyclic graphs are
    /// only accepted with a bound.
    #[inline]
    pub fn max_hops(mut self, max_hops: u32) -> Self {
        self.max_hops = Some(max_hops);
        self
    }

    /// Validates and builds the topology.
    pub fn build(self) -> Result<Topology, ConfigurationError> {
        let topology = super::validate::validate(self)?;
        debug!(
            "built topology with {} agents and {} handoffs",
            topology.agents.len(),
            topology.handoffs.len()
        );
        Ok(topology)
    }
}
