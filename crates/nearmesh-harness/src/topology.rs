//! Link topologies for simulated meshes

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Shape of the in-range graph between `n` devices indexed `0..n`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    /// Every device in range of every other
    #[default]
    Full,
    /// Chain `0 - 1 - ... - n-1`
    Line,
    /// Chain closed back onto device 0
    Ring,
    /// Device 0 in the middle, everyone else only in range of it
    Star,
}

impl Topology {
    pub const ALL: [Topology; 4] = [Topology::Full, Topology::Line, Topology::Ring, Topology::Star];

    /// Undirected edges as index pairs with `a < b`
    pub fn edges(&self, n: usize) -> Vec<(usize, usize)> {
        match self {
            Topology::Full => (0..n)
                .flat_map(|a| (a + 1..n).map(move |b| (a, b)))
                .collect(),
            Topology::Line => (1..n).map(|b| (b - 1, b)).collect(),
            Topology::Ring => {
                let mut edges = Topology::Line.edges(n);
                if n > 2 {
                    edges.push((0, n - 1));
                }
                edges
            }
            Topology::Star => (1..n).map(|b| (0, b)).collect(),
        }
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Topology::Full => "full",
            Topology::Line => "line",
            Topology::Ring => "ring",
            Topology::Star => "star",
        };
        f.write_str(name)
    }
}

impl FromStr for Topology {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "full" => Ok(Topology::Full),
            "line" => Ok(Topology::Line),
            "ring" => Ok(Topology::Ring),
            "star" => Ok(Topology::Star),
            other => Err(format!(
                "unknown topology '{other}' (expected full, line, ring or star)"
            )),
        }
    }
}
