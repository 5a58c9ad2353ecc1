// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! State machine engine.
//!
//! A [`StateTable`] maps each [`TransactionStateName`] to the processor
//! operation run in that state and the successors it may pick. Executing a
//! state runs exactly one operation; repeated calls while the operation is
//! pending leave the transaction unchanged.

pub mod tables;

use crate::actions::Transition;
use crate::error::EngineError;
use crate::transaction::{Transaction, TransactionStateName};
use std::collections::HashMap;

/// Operation bound to a state.
pub type Action<P, T> = fn(&mut P, &mut T, Transition);

/// One registered state.
pub struct State<P, T> {
    pub name: TransactionStateName,
    pub action: Action<P, T>,
    pub transition: Transition,
}

impl<P, T> State<P, T> {
    pub fn execute(&self, processor: &mut P, tx: &mut T) {
        (self.action)(processor, tx, self.transition)
    }
}

impl<P, T> std::fmt::Debug for State<P, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("State")
            .field("name", &self.name)
            .field("next", &self.transition.next)
            .field("on_error", &self.transition.on_error)
            .finish()
    }
}

/// Registry of named states for one processor and transaction shape.
pub struct StateTable<P, T> {
    states: HashMap<TransactionStateName, State<P, T>>,
}

impl<P, T: Transaction> StateTable<P, T> {
    pub fn new() -> Self {
        Self {
            states: HashMap::new(),
        }
    }

    /// Register `name`; a later registration of the same name replaces it.
    pub fn register(
        &mut self,
        name: TransactionStateName,
        action: Action<P, T>,
        next: TransactionStateName,
        on_error: TransactionStateName,
    ) -> &mut Self {
        self.states.insert(
            name,
            State {
                name,
                action,
                transition: Transition::new(next, on_error),
            },
        );
        self
    }

    pub fn get(&self, name: TransactionStateName) -> Option<&State<P, T>> {
        self.states.get(&name)
    }

    pub fn contains(&self, name: TransactionStateName) -> bool {
        self.states.contains_key(&name)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Run the transaction's current state once; returns the resulting state.
    pub fn execute(&self, processor: &mut P, tx: &mut T) -> Result<TransactionStateName, EngineError> {
        let name = tx.state();
        let state = self
            .states
            .get(&name)
            .ok_or_else(|| EngineError::UnknownState(name.to_string()))?;
        state.execute(processor, tx);
        Ok(tx.state())
    }
}

impl<P, T: Transaction> Default for StateTable<P, T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TcpError;
    use crate::message::TransactionIdentity;
    use crate::transaction::{Direction, SimpleTransaction, TransactionCore};
    use std::time::Duration;
    use TransactionStateName as S;

    #[derive(Default)]
    struct Counter {
        calls: usize,
        fail: bool,
    }

    fn bump(p: &mut Counter, tx: &mut SimpleTransaction, t: Transition) {
        p.calls += 1;
        if p.fail {
            tx.set_error(TcpError::io("boom"));
            tx.set_state(t.on_error);
        } else {
            tx.set_state(t.next);
        }
    }

    fn tx(state: S) -> SimpleTransaction {
        let mut tx = SimpleTransaction::new(TransactionCore::new(
            TransactionIdentity::default(),
            Direction::SendCommand,
            Duration::from_secs(1),
        ));
        tx.set_state(state);
        tx
    }

    #[test]
    fn test_execute_follows_transition() {
        let mut table: StateTable<Counter, SimpleTransaction> = StateTable::new();
        table.register(S::AssembleCommand, bump, S::SendingCommand, S::ClosingConnection);

        let mut p = Counter::default();
        let mut t = tx(S::AssembleCommand);
        assert_eq!(table.execute(&mut p, &mut t).unwrap(), S::SendingCommand);
        assert_eq!(p.calls, 1);

        let mut p = Counter { fail: true, ..Default::default() };
        let mut t = tx(S::AssembleCommand);
        assert_eq!(table.execute(&mut p, &mut t).unwrap(), S::ClosingConnection);
    }

    #[test]
    fn test_unknown_state_is_error() {
        let table: StateTable<Counter, SimpleTransaction> = StateTable::new();
        let mut t = tx(S::BroadcastCommand);
        let err = table.execute(&mut Counter::default(), &mut t).unwrap_err();
        assert!(matches!(err, EngineError::UnknownState(ref s) if s == "BROADCAST_COMMAND"));
        assert_eq!(t.state(), S::BroadcastCommand);
    }

    #[test]
    fn test_reregistration_replaces() {
        let mut table: StateTable<Counter, SimpleTransaction> = StateTable::new();
        table
            .register(S::AssembleCommand, bump, S::SendingCommand, S::ClosingConnection)
            .register(S::AssembleCommand, bump, S::TransactionDone, S::ClosingConnection);
        assert_eq!(table.len(), 1);
        assert_eq!(
            table.get(S::AssembleCommand).unwrap().transition.next,
            S::TransactionDone
        );
    }
}
