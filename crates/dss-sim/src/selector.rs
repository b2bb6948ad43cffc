//! Row selectors for tabular cell I/O.
//!
//! The simulator addresses rows either by plain index or by a native
//! predicate string such as `ip = 12 & iq = 34 & np = 1`. Both forms are
//! carried by [`RowSelector`]; the builders below cover the predicates the
//! solvers actually use.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowSelector {
    Index(usize),
    Where(String),
}

impl RowSelector {
    pub fn index(i: usize) -> Self {
        RowSelector::Index(i)
    }

    pub fn filter(predicate: impl Into<String>) -> Self {
        RowSelector::Where(predicate.into())
    }

    /// `ny=<node>` — a bus by its number.
    pub fn node(ny: i64) -> Self {
        RowSelector::Where(format!("ny={ny}"))
    }

    /// `ip=<ip> & iq=<iq> & np=<np>` — a branch by endpoints and circuit.
    pub fn branch(ip: i64, iq: i64, np: i64) -> Self {
        RowSelector::Where(format!("ip={ip} & iq={iq} & np={np}"))
    }
}

impl fmt::Display for RowSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowSelector::Index(i) => write!(f, "#{i}"),
            RowSelector::Where(pred) => f.write_str(pred),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_predicate_shape() {
        assert_eq!(
            RowSelector::branch(12, 34, 1),
            RowSelector::Where("ip=12 & iq=34 & np=1".into())
        );
    }

    #[test]
    fn display_forms() {
        assert_eq!(RowSelector::index(3).to_string(), "#3");
        assert_eq!(RowSelector::node(501).to_string(), "ny=501");
    }
}
