//! Opaque token identifying one optimistic mutation.
//!
//! Every layer created for the same mutation shares one id, so rolling the
//! mutation back removes them all in one pass.

use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OptimisticId(Uuid);

impl OptimisticId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for OptimisticId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OptimisticId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
