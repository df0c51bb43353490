//! Binding directions and their algebra.
//!
//! Every binding in the graph carries one of four canonical directions,
//! forming two opposite pairs: {North, South} and {East, West}. The mirror
//! half of a binding always uses `opposite()` of the origin half — this
//! module is the single source of truth for that reversal.

use serde::{Deserialize, Serialize};

/// Canonical binding direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    North,
    South,
    East,
    West,
}

impl Direction {
    /// All four directions, in a fixed iteration order.
    pub const ALL: [Direction; 4] = [
        Direction::North,
        Direction::South,
        Direction::East,
        Direction::West,
    ];

    /// The reverse of this direction. Total — every direction has exactly
    /// one opposite, and `d.opposite().opposite() == d`.
    pub const fn opposite(self) -> Direction {
        match self {
            Direction::North => Direction::South,
            Direction::South => Direction::North,
            Direction::East => Direction::West,
            Direction::West => Direction::East,
        }
    }

    /// Stable index into per-direction adjacency tables.
    pub(crate) const fn index(self) -> usize {
        match self {
            Direction::North => 0,
            Direction::South => 1,
            Direction::East => 2,
            Direction::West => 3,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Direction::North => "NORTH",
            Direction::South => "SOUTH",
            Direction::East => "EAST",
            Direction::West => "WEST",
        }
    }

    /// Parse a direction from its persisted form. Returns `None` for
    /// anything that is not one of the four canonical names.
    pub fn parse(s: &str) -> Option<Direction> {
        match s {
            "NORTH" => Some(Direction::North),
            "SOUTH" => Some(Direction::South),
            "EAST" => Some(Direction::East),
            "WEST" => Some(Direction::West),
            _ => None,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Direction {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Direction::parse(s).ok_or(())
    }
}
