// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transaction identities.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Identity of one protocol transaction.
///
/// `(step, sub_step, correction_step)` with 0 meaning "not present". The
/// transaction id is derived from the triple and only names the fields that
/// are set, so equal triples always give equal ids.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(from = "IdentityFields")]
pub struct TransactionIdentity {
    step: u32,
    sub_step: u32,
    correction_step: u32,
    trans_id: String,
}

impl TransactionIdentity {
    pub fn new(step: u32, sub_step: u32, correction_step: u32) -> Self {
        Self {
            step,
            sub_step,
            correction_step,
            trans_id: derive_id(step, sub_step, correction_step),
        }
    }

    pub fn step(&self) -> u32 {
        self.step
    }

    pub fn sub_step(&self) -> u32 {
        self.sub_step
    }

    pub fn correction_step(&self) -> u32 {
        self.correction_step
    }

    /// Derived opaque id.
    pub fn trans_id(&self) -> &str {
        &self.trans_id
    }

    /// True when no field is set.
    pub fn is_unset(&self) -> bool {
        self.step == 0 && self.sub_step == 0 && self.correction_step == 0
    }

    fn triple(&self) -> (u32, u32, u32) {
        (self.step, self.sub_step, self.correction_step)
    }
}

impl Default for TransactionIdentity {
    fn default() -> Self {
        Self::new(0, 0, 0)
    }
}

/// Wire shape; the id is always re-derived on decode.
#[derive(Deserialize)]
struct IdentityFields {
    #[serde(default)]
    step: u32,
    #[serde(default)]
    sub_step: u32,
    #[serde(default)]
    correction_step: u32,
}

impl From<IdentityFields> for TransactionIdentity {
    fn from(f: IdentityFields) -> Self {
        Self::new(f.step, f.sub_step, f.correction_step)
    }
}

fn derive_id(step: u32, sub_step: u32, correction_step: u32) -> String {
    let parts: Vec<String> = [("step", step), ("sub", sub_step), ("cor", correction_step)]
        .iter()
        .filter(|(_, value)| *value != 0)
        .map(|(label, value)| format!("{}{}", label, value))
        .collect();

    if parts.is_empty() {
        "unset".to_string()
    } else {
        parts.join(".")
    }
}

impl PartialEq for TransactionIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.triple() == other.triple()
    }
}

impl Eq for TransactionIdentity {}

impl std::hash::Hash for TransactionIdentity {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.triple().hash(state);
    }
}

impl PartialOrd for TransactionIdentity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TransactionIdentity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.triple().cmp(&other.triple())
    }
}

impl std::fmt::Display for TransactionIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.trans_id)
    }
}
