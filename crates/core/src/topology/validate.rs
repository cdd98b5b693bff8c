use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use super::{Handoff, Topology, TopologyBuilder};
use crate::error::ConfigurationError;
use crate::id::{AgentId, Participant};

pub(super) fn validate(
    builder: TopologyBuilder,
) -> Result<Topology, ConfigurationError> {
    let TopologyBuilder {
        agents: declared,
        entry,
        handoffs: declared_handoffs,
        best_effort: declared_best_effort,
        max_hops,
    } = builder;

    let mut agents = BTreeMap::new();
    for descriptor in declared {
        let name = descriptor.name().clone();
        let mut tools = HashSet::new();
        for binding in descriptor.tools() {
            if !tools.insert(binding.tool()) {
                return Err(ConfigurationError::DuplicateToolBinding {
                    agent: name,
                    tool: binding.tool().to_owned(),
                });
            }
        }
        if agents.insert(name.clone(), Arc::new(descriptor)).is_some() {
            return Err(ConfigurationError::DuplicateAgent(name));
        }
    }

    let entry = entry.ok_or(ConfigurationError::MissingEntry)?;

    let mut handoffs = BTreeMap::new();
    for (from, handoff) in declared_handoffs {
        if !agents.contains_key(&from) {
            return Err(ConfigurationError::UnknownAgent {
                from: Participant::Agent(from.clone()),
                agent: from,
            });
        }
        if handoffs.contains_key(&from) {
            return Err(ConfigurationError::DuplicateHandoff(from));
        }
        handoffs.insert(from, handoff);
    }

    check_handoff(&Participant::Caller, &entry, &agents, &handoffs)?;
    for (from, handoff) in &handoffs {
        check_handoff(
            &Participant::Agent(from.clone()),
            handoff,
            &agents,
            &handoffs,
        )?;
    }

    let branches: BTreeSet<&AgentId> = std::iter::once(&entry)
        .chain(handoffs.values())
        .filter_map(|handoff| match handoff {
            Handoff::FanOut(fan_out) => Some(fan_out.branches()),
            _ => None,
        })
        .flatten()
        .collect();
    let mut best_effort = BTreeSet::new();
    for agent in declared_best_effort {
        if !branches.contains(&agent) {
            return Err(ConfigurationError::BestEffortOutsideFanOut(agent));
        }
        best_effort.insert(agent);
    }

    match max_hops {
        Some(0) => return Err(ConfigurationError::ZeroHopBound),
        Some(_) => {}
        None => check_acyclic(&agents, &handoffs)?,
    }

    Ok(Topology {
        agents,
        entry,
        handoffs,
        best_effort,
        max_hops,
    })
}

fn check_handoff<T>(
    from: &Participant,
    handoff: &Handoff,
    agents: &BTreeMap<AgentId, T>,
    handoffs: &BTreeMap<AgentId, Handoff>,
) -> Result<(), ConfigurationError> {
    for target in handoff.targets() {
        if !agents.contains_key(target) {
            return Err(ConfigurationError::UnknownAgent {
                from: from.clone(),
                agent: target.clone(),
            });
        }
    }

    match handoff {
        Handoff::Sequence(_) => {}
        Handoff::FanOut(fan_out) => {
            if fan_out.branches().is_empty() {
                return Err(ConfigurationError::EmptyFanOut(from.clone()));
            }
            let mut seen = HashSet::new();
            for branch in fan_out.branches() {
                if !seen.insert(branch) {
                    return Err(ConfigurationError::DuplicateBranch {
                        from: from.clone(),
                        agent: branch.clone(),
                    });
                }
                if handoffs.contains_key(branch) {
                    return Err(ConfigurationError::BranchWithHandoff(
                        branch.clone(),
                    ));
                }
            }
            if let Some(join) = fan_out.join() {
                if seen.contains(join) {
                    return Err(ConfigurationError::JoinIsBranch {
                        from: from.clone(),
                        agent: join.clone(),
                    });
                }
            }
        }
        Handoff::Conditional(routes) => {
            if routes.is_empty() {
                return Err(ConfigurationError::EmptyConditional(from.clone()));
            }
        }
    }
    Ok(())
}

/// Edges of the activation graph: handoff targets, plus branch to join
/// for joined fan-outs.
fn successors<'a>(
    agent: &AgentId,
    handoffs: &'a BTreeMap<AgentId, Handoff>,
    joins: &'a BTreeMap<&'a AgentId, Vec<&'a AgentId>>,
) -> Vec<&'a AgentId> {
    let mut next = handoffs
        .get(agent)
        .map(Handoff::targets)
        .unwrap_or_default();
    if let Some(join) = joins.get(agent) {
        next.extend(join.iter().copied());
    }
    next
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

fn check_acyclic<T>(
    agents: &BTreeMap<AgentId, T>,
    handoffs: &BTreeMap<AgentId, Handoff>,
) -> Result<(), ConfigurationError> {
    let mut joins: BTreeMap<&AgentId, Vec<&AgentId>> = BTreeMap::new();
    for handoff in handoffs.values() {
        let Handoff::FanOut(fan_out) = handoff else {
            continue;
        };
        if let Some(join) = fan_out.join() {
            for branch in fan_out.branches() {
                joins.entry(branch).or_default().push(join);
            }
        }
    }

    let mut marks: BTreeMap<&AgentId, Mark> = BTreeMap::new();
    for start in agents.keys() {
        if marks.contains_key(start) {
            continue;
        }
        // Iterative DFS; `path` holds the agents being visited.
        let mut path: Vec<&AgentId> = vec![start];
        let mut stack = vec![successors(start, handoffs, &joins).into_iter()];
        marks.insert(start, Mark::Visiting);

        while let Some(next) = stack.last_mut() {
            let Some(agent) = next.next() else {
                stack.pop();
                if let Some(done) = path.pop() {
                    marks.insert(done, Mark::Done);
                }
                continue;
            };
            match marks.get(agent) {
                Some(Mark::Done) => {}
                Some(Mark::Visiting) => {
                    let begin = path
                        .iter()
                        .position(|visiting| *visiting == agent)
                        .unwrap_or_default();
                    let mut cycle: Vec<AgentId> =
                        path[begin..].iter().map(|id| (*id).clone()).collect();
                    cycle.push(agent.clone());
                    return Err(ConfigurationError::Cycle { path: cycle });
                }
                None => {
                    marks.insert(agent, Mark::Visiting);
                    path.push(agent);
                    stack.push(successors(agent, handoffs, &joins).into_iter());
                }
            }
        }
    }
    Ok(())
}
