//! Procedures: one-shot remote calls.

use thiserror::Error;

use crate::{
    identity::{Identity, Key},
    relevance::Scope,
    wire::{Reader, WireError},
};

/// Who may originate a call, and so where it executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallRule {
    /// Anyone calls, anyone executes.
    Any,
    /// Only the server calls; clients execute.
    Server,
    /// Only clients call; the server executes.
    Client,
}

/// Context handed to a procedure handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Invocation {
    pub entity: Identity,
    pub key: Key,
    pub target: Identity,
    /// Peer the packet arrived from. On a client this is always the server.
    pub sender: Identity,
}

pub type Handler = Box<dyn FnMut(&Invocation, &mut Reader<'_>) -> Result<(), WireError> + Send>;

/// Registration request for a procedure.
pub struct ProcedureDescriptor {
    pub id: u8,
    pub rule: CallRule,
    pub scope: Scope,
    pub handler: Handler,
}

impl ProcedureDescriptor {
    pub fn new(
        id: u8,
        rule: CallRule,
        handler: impl FnMut(&Invocation, &mut Reader<'_>) -> Result<(), WireError> + Send + 'static,
    ) -> Self {
        Self {
            id,
            rule,
            scope: Scope::Everyone,
            handler: Box::new(handler),
        }
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }
}

/// Why a local call was refused before anything was sent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    #[error("call addressed to the caller itself ({0})")]
    SelfTarget(Identity),
    #[error("no entity {0}")]
    UnknownEntity(Identity),
    #[error("entity {entity} has no procedure {key}")]
    UnknownProcedure { entity: Identity, key: Key },
    #[error("{rule:?} procedures may not be called from here")]
    Unauthorized { rule: CallRule },
}
