//! Course mark input types.

use serde::{Deserialize, Serialize};

/// Which side the mark must be left on when rounding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundingSide {
    Port,
    Starboard,
}

impl std::fmt::Display for RoundingSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoundingSide::Port => write!(f, "port"),
            RoundingSide::Starboard => write!(f, "starboard"),
        }
    }
}

/// A race-course mark supplied by the host.
///
/// An empty mark list disables layline and rounding detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mark {
    pub mark_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub rounding_side: RoundingSide,
}
