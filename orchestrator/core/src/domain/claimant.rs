// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Agent role used by the cross-type stealing rules and same-type rebalancing
/// (e.g. `coder`, `reviewer`, `coordinator`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentType(pub String);

impl AgentType {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AgentType {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimantKind {
    Human,
    Agent,
}

impl fmt::Display for ClaimantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Human => write!(f, "human"),
            Self::Agent => write!(f, "agent"),
        }
    }
}

/// Owner (or would-be owner) of a claim.
///
/// Identity is the variant plus its id field: a human's display name and an
/// agent's type are descriptive only and do not take part in equality or
/// hashing. Ownership checks across the engine go through this equality.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Claimant {
    Human {
        user_id: String,
        name: String,
    },
    Agent {
        agent_id: String,
        agent_type: AgentType,
    },
}

impl Claimant {
    pub fn human(user_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Human {
            user_id: user_id.into(),
            name: name.into(),
        }
    }

    pub fn agent(agent_id: impl Into<String>, agent_type: impl Into<AgentType>) -> Self {
        Self::Agent {
            agent_id: agent_id.into(),
            agent_type: agent_type.into(),
        }
    }

    /// User id or agent id, depending on the variant.
    pub fn id(&self) -> &str {
        match self {
            Self::Human { user_id, .. } => user_id,
            Self::Agent { agent_id, .. } => agent_id,
        }
    }

    pub fn kind(&self) -> ClaimantKind {
        match self {
            Self::Human { .. } => ClaimantKind::Human,
            Self::Agent { .. } => ClaimantKind::Agent,
        }
    }

    pub fn agent_type(&self) -> Option<&AgentType> {
        match self {
            Self::Human { .. } => None,
            Self::Agent { agent_type, .. } => Some(agent_type),
        }
    }

    pub fn is_human(&self) -> bool {
        matches!(self, Self::Human { .. })
    }

    pub fn is_agent(&self) -> bool {
        matches!(self, Self::Agent { .. })
    }
}

impl From<String> for AgentType {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl PartialEq for Claimant {
    fn eq(&self, other: &Self) -> bool {
        self.kind() == other.kind() && self.id() == other.id()
    }
}

impl Eq for Claimant {}

impl Hash for Claimant {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind().hash(state);
        self.id().hash(state);
    }
}

impl fmt::Display for Claimant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Human { user_id, .. } => write!(f, "human:{}", user_id),
            Self::Agent { agent_id, agent_type } => write!(f, "agent:{}({})", agent_id, agent_type),
        }
    }
}
