//! SNMP object identifiers.

use std::fmt;
use std::str::FromStr;

use crate::error::SnmpError;

/// An ordered sequence of OID arcs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Oid {
    arcs: Vec<u32>,
}

impl Oid {
    pub fn new(arcs: Vec<u32>) -> Oid {
        Oid { arcs }
    }

    pub fn from_slice(arcs: &[u32]) -> Oid {
        Oid {
            arcs: arcs.to_vec(),
        }
    }

    pub fn arcs(&self) -> &[u32] {
        &self.arcs
    }

    pub fn len(&self) -> usize {
        self.arcs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arcs.is_empty()
    }

    pub fn last(&self) -> Option<u32> {
        self.arcs.last().copied()
    }

    /// Appends an arc.
    pub fn extend(&mut self, arc: u32) {
        self.arcs.push(arc);
    }

    /// True when this identifier begins with `prefix`.
    pub fn starts_with(&self, prefix: &[u32]) -> bool {
        self.arcs.len() >= prefix.len() && &self.arcs[..prefix.len()] == prefix
    }

    /// Returns the identifier truncated to `len` arcs.
    pub fn truncated(&self, len: usize) -> Oid {
        Oid {
            arcs: self.arcs[..len.min(self.arcs.len())].to_vec(),
        }
    }
}

impl From<&[u32]> for Oid {
    fn from(arcs: &[u32]) -> Oid {
        Oid::from_slice(arcs)
    }
}

impl<const N: usize> From<[u32; N]> for Oid {
    fn from(arcs: [u32; N]) -> Oid {
        Oid { arcs: arcs.to_vec() }
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for arc in &self.arcs {
            if !first {
                write!(f, ".")?;
            }
            write!(f, "{arc}")?;
            first = false;
        }
        Ok(())
    }
}

impl FromStr for Oid {
    type Err = SnmpError;

    /// Parses dotted-decimal OID text, with an optional leading dot.
    fn from_str(s: &str) -> Result<Oid, SnmpError> {
        let s = s.strip_prefix('.').unwrap_or(s);
        if s.is_empty() {
            return Ok(Oid::default());
        }
        let arcs = s
            .split('.')
            .map(|part| part.parse::<u32>())
            .collect::<Result<Vec<u32>, _>>()
            .map_err(|_| SnmpError::Parameter("invalid OID text"))?;
        Ok(Oid { arcs })
    }
}
