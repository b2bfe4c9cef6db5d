//! Score model: box-drop rubric and the three-component breakdown.
//!
//! The total is always recomputed from current state, never stored, so a
//! snapshot can never disagree with its own breakdown.

use serde::{Deserialize, Serialize};

/// Rubric grade for how well a dropped box landed in the target zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropRating {
    FullyIn,
    EdgeTouching,
    LessThanHalfOut,
    MostlyOut,
}

impl DropRating {
    pub fn points(self) -> i64 {
        match self {
            DropRating::FullyIn => 5,
            DropRating::EdgeTouching => 4,
            DropRating::LessThanHalfOut => 2,
            DropRating::MostlyOut => 1,
        }
    }

    /// Parse a wire-format rating. Unknown strings normalize to `None`
    /// (unset); producers are permissive by contract, so this never errors.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fully_in" => Some(DropRating::FullyIn),
            "edge_touching" => Some(DropRating::EdgeTouching),
            "less_than_half_out" => Some(DropRating::LessThanHalfOut),
            "mostly_out" => Some(DropRating::MostlyOut),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DropRating::FullyIn => "fully_in",
            DropRating::EdgeTouching => "edge_touching",
            DropRating::LessThanHalfOut => "less_than_half_out",
            DropRating::MostlyOut => "mostly_out",
        }
    }
}

/// Points for an optional drop; unset scores zero.
pub fn drop_points(rating: Option<DropRating>) -> i64 {
    rating.map(DropRating::points).unwrap_or(0)
}

/// Per-component score for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    /// 0 before the start, `-touches` while running, `5 - touches` once
    /// ended (the one-time completion credit).
    pub obstacle: i64,
    /// +5 once the run has ended under 60 seconds, 0 otherwise. Never
    /// visible mid-run.
    pub completed_under_60: i64,
    /// Sum of both drop ratings.
    pub box_drop: i64,
}

impl ScoreBreakdown {
    pub fn total(&self) -> i64 {
        self.obstacle + self.completed_under_60 + self.box_drop
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rubric_points() {
        assert_eq!(DropRating::FullyIn.points(), 5);
        assert_eq!(DropRating::EdgeTouching.points(), 4);
        assert_eq!(DropRating::LessThanHalfOut.points(), 2);
        assert_eq!(DropRating::MostlyOut.points(), 1);
        assert_eq!(drop_points(None), 0);
    }

    #[test]
    fn parse_is_permissive() {
        assert_eq!(DropRating::parse("fully_in"), Some(DropRating::FullyIn));
        assert_eq!(DropRating::parse("edge_touching"), Some(DropRating::EdgeTouching));
        assert_eq!(DropRating::parse("upside_down"), None);
        assert_eq!(DropRating::parse(""), None);
    }

    #[test]
    fn wire_names_round_trip_through_parse() {
        for r in [
            DropRating::FullyIn,
            DropRating::EdgeTouching,
            DropRating::LessThanHalfOut,
            DropRating::MostlyOut,
        ] {
            assert_eq!(DropRating::parse(r.as_str()), Some(r));
        }
    }
}
