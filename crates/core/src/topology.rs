//! Declarative agent graphs.
//!
//! A [`Topology`] is a set of [`AgentDescriptor`]s plus at most one
//! outgoing [`Handoff`] per agent, and an entry handoff applied to the
//! caller's input. Handoffs come from a closed set of variants, all
//! interpreted by the runner, so the graph can be checked when it is built:
//! agent names are unique, every edge points to a declared agent and the
//! graph is acyclic unless a hop bound is set.

mod builder;
mod plan;
mod validate;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Debug, Display};
use std::sync::Arc;

pub use builder::TopologyBuilder;
pub(crate) use plan::Plan;

use crate::agent::AgentDescriptor;
use crate::id::AgentId;
use crate::message::Message;

/// How control leaves an agent.
#[derive(Clone, Debug)]
pub enum Handoff {
    /// The target always runs next, on the outgoing message.
    Sequence(AgentId),
    /// Several agents run concurrently on the outgoing message.
    FanOut(FanOut),
    /// The first route whose predicate matches the outgoing message wins.
    /// No match fails the task.
    Conditional(Vec<Route>),
}

impl Handoff {
    /// Creates a conditional handoff.
    #[inline]
    pub fn conditional(routes: impl IntoIterator<Item = Route>) -> Self {
        Handoff::Conditional(routes.into_iter().collect())
    }

    /// Returns every agent this handoff may activate.
    pub fn targets(&self) -> Vec<&AgentId> {
        match self {
            Handoff::Sequence(to) => vec![to],
            Handoff::FanOut(fan_out) => {
                fan_out.branches.iter().chain(&fan_out.join).collect()
            }
            Handoff::Conditional(routes) => {
                routes.iter().map(|route| &route.to).collect()
            }
        }
    }
}

impl From<FanOut> for Handoff {
    #[inline]
    fn from(value: FanOut) -> Self {
        Handoff::FanOut(value)
    }
}

/// Concurrent branches, optionally joined.
///
/// Branch outputs are ordered by completion time, ties broken by agent
/// name. With a join agent, the ordered outputs are merged by the
/// aggregator into the join agent's incoming message; without one, they
/// are returned to the caller.
#[derive(Clone, Debug)]
pub struct FanOut {
    branches: Vec<AgentId>,
    join: Option<AgentId>,
    aggregator: Aggregator,
}

impl FanOut {
    /// Creates a fan-out over `branches`, without a join.
    pub fn new<I, A>(branches: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<AgentId>,
    {
        Self {
            branches: branches.into_iter().map(Into::into).collect(),
            join: None,
            aggregator: Aggregator::default(),
        }
    }

    /// Joins the branches at `agent`.
    #[inline]
    pub fn join_at<A: Into<AgentId>>(mut self, agent: A) -> Self {
        self.join = Some(agent.into());
        self
    }

    /// Sets how branch outputs are merged for the join agent.
    #[inline]
    pub fn with_aggregator(mut self, aggregator: Aggregator) -> Self {
        self.aggregator = aggregator;
        self
    }

    /// Returns the branches.
    #[inline]
    pub fn branches(&self) -> &[AgentId] {
        &self.branches
    }

    /// Returns the join agent.
    #[inline]
    pub fn join(&self) -> Option<&AgentId> {
        self.join.as_ref()
    }

    /// Returns the aggregator.
    #[inline]
    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }
}

/// Merges ordered branch outputs into one message content.
#[derive(Clone)]
pub struct Aggregator(Arc<dyn Fn(&[Message]) -> String + Send + Sync>);

impl Aggregator {
    /// Wraps a merge function.
    #[inline]
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&[Message]) -> String + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Merges `outputs`.
    #[inline]
    pub fn aggregate(&self, outputs: &[Message]) -> String {
        (self.0)(outputs)
    }
}

impl Default for Aggregator {
    /// Renders each output as a `[sender]` header followed by its content,
    /// separated by blank lines.
    fn default() -> Self {
        Self::new(|outputs| {
            outputs
                .iter()
                .map(|message| format!("[{}]\n{}", message.sender(), message.content()))
                .collect::<Vec<_>>()
                .join("\n\n")
        })
    }
}

impl Debug for Aggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Aggregator(..)")
    }
}

/// One entry of a conditional handoff.
#[derive(Clone, Debug)]
pub struct Route {
    predicate: RoutePredicate,
    to: AgentId,
}

impl Route {
    /// Routes to `to` when `predicate` matches.
    #[inline]
    pub fn when<A: Into<AgentId>>(predicate: RoutePredicate, to: A) -> Self {
        Self {
            predicate,
            to: to.into(),
        }
    }

    /// Routes to `to` unconditionally.
    #[inline]
    pub fn otherwise<A: Into<AgentId>>(to: A) -> Self {
        Self::when(RoutePredicate::Otherwise, to)
    }

    /// Returns the predicate.
    #[inline]
    pub fn predicate(&self) -> &RoutePredicate {
        &self.predicate
    }

    /// Returns the target agent.
    #[inline]
    pub fn to(&self) -> &AgentId {
        &self.to
    }
}

/// Tests an outgoing message's content.
#[derive(Clone)]
pub enum RoutePredicate {
    /// The content contains the text.
    Contains(String),
    /// The content starts with the text, ignoring leading whitespace.
    StartsWith(String),
    /// The trimmed content equals the text.
    Equals(String),
    /// Always matches.
    Otherwise,
    /// A caller-supplied test.
    Custom(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

impl RoutePredicate {
    /// Wraps a caller-supplied test.
    #[inline]
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        RoutePredicate::Custom(Arc::new(f))
    }

    /// Returns `true` if `content` satisfies the predicate.
    pub fn matches(&self, content: &str) -> bool {
        match self {
            RoutePredicate::Contains(text) => content.contains(text.as_str()),
            RoutePredicate::StartsWith(text) => {
                content.trim_start().starts_with(text.as_str())
            }
            RoutePredicate::Equals(text) => content.trim() == text,
            RoutePredicate::Otherwise => true,
            RoutePredicate::Custom(f) => f(content),
        }
    }
}

impl Display for RoutePredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutePredicate::Contains(text) => write!(f, "contains {text:?}"),
            RoutePredicate::StartsWith(text) => write!(f, "starts with {text:?}"),
            RoutePredicate::Equals(text) => write!(f, "equals {text:?}"),
            RoutePredicate::Otherwise => write!(f, "otherwise"),
            RoutePredicate::Custom(_) => write!(f, "custom"),
        }
    }
}

impl Debug for RoutePredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RoutePredicate({self})")
    }
}

/// A validated agent graph.
///
/// Build it with [`Topology::builder`]. A topology can be shared by any
/// number of tasks.
#[derive(Clone, Debug)]
pub struct Topology {
    agents: BTreeMap<AgentId, Arc<AgentDescriptor>>,
    entry: Handoff,
    handoffs: BTreeMap<AgentId, Handoff>,
    best_effort: BTreeSet<AgentId>,
    max_hops: Option<u32>,
}

impl Topology {
    /// Creates a builder.
    #[inline]
    pub fn builder() -> TopologyBuilder {
        TopologyBuilder::default()
    }

    /// Creates a topology running `agents` one after another.
    pub fn chain(
        agents: impl IntoIterator<Item = AgentDescriptor>,
    ) -> Result<Self, crate::ConfigurationError> {
        let agents: Vec<_> = agents.into_iter().collect();
        let mut builder = Topology::builder();
        if let Some(first) = agents.first() {
            builder = builder.start_with(first.name().clone());
        }
        for pair in agents.windows(2) {
            builder = builder.sequence(pair[0].name().clone(), pair[1].name().clone());
        }
        for agent in agents {
            builder = builder.agent(agent);
        }
        builder.build()
    }

    /// Returns the declared agents, ordered by name.
    pub fn agents(&self) -> impl Iterator<Item = &AgentDescriptor> {
        self.agents.values().map(Arc::as_ref)
    }

    /// Looks up an agent.
    #[inline]
    pub fn agent(&self, name: &str) -> Option<&AgentDescriptor> {
        self.agents.get(name).map(Arc::as_ref)
    }

    /// Returns the handoff applied to the caller's input.
    #[inline]
    pub fn entry(&self) -> &Handoff {
        &self.entry
    }

    /// Returns the outgoing handoff of `agent`; `None` means the agent's
    /// output goes to the caller.
    #[inline]
    pub fn handoff(&self, agent: &str) -> Option<&Handoff> {
        self.handoffs.get(agent)
    }

    /// Returns `true` if failures of `agent` as a fan-out branch do not fail
    /// the task.
    #[inline]
    pub fn is_best_effort(&self, agent: &str) -> bool {
        self.best_effort.contains(agent)
    }

    /// Returns the hop bound.
    #[inline]
    pub fn max_hops(&self) -> Option<u32> {
        self.max_hops
    }
}
