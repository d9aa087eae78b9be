//! Opaque continuation cursors for paginated range queries
//!
//! Wire form: `{scope},{orClauseIndex},{backendToken}` with percent-encoded
//! components, so scopes and backend tokens may contain arbitrary text.

use crate::common::{decode_component, encode_component};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    /// Parent / query scope this cursor belongs to
    pub scope: String,
    /// OR-clause the scan stopped in
    pub clause: usize,
    /// Backend-native continuation token within that clause
    pub token: Option<String>,
}

impl Cursor {
    pub fn new(scope: impl Into<String>, clause: usize, token: Option<String>) -> Self {
        Self {
            scope: scope.into(),
            clause,
            token,
        }
    }

    /// Encode to the opaque wire form
    pub fn encode(&self) -> String {
        format!(
            "{},{},{}",
            encode_component(&self.scope),
            self.clause,
            self.token.as_deref().map(encode_component).unwrap_or_default()
        )
    }

    /// Decode from the opaque wire form
    pub fn decode(s: &str) -> crate::Result<Self> {
        let mut parts = s.splitn(3, ',');
        let (scope, clause, token) = match (parts.next(), parts.next(), parts.next()) {
            (Some(a), Some(b), Some(c)) => (a, b, c),
            _ => {
                return Err(crate::Error::InvalidQuery(format!(
                    "malformed cursor: {}",
                    s
                )))
            }
        };
        let clause: usize = clause
            .parse()
            .map_err(|_| crate::Error::InvalidQuery(format!("bad clause index in cursor: {}", s)))?;
        let token = if token.is_empty() {
            None
        } else {
            Some(decode_component(token)?)
        };
        Ok(Cursor {
            scope: decode_component(scope)?,
            clause,
            token,
        })
    }

    /// A cursor belongs to the query it was issued for; scopes must match
    pub fn check_scope(&self, scope: &str) -> crate::Result<()> {
        if self.scope != scope {
            return Err(crate::Error::InvalidQuery(format!(
                "cursor scope '{}' does not match query scope '{}'",
                self.scope, scope
            )));
        }
        Ok(())
    }
}
