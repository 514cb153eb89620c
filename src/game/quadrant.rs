//! Quadrant geometry
//!
//! Each team owns one quarter of the map. A quadrant is identified by the
//! sign of the two horizontal axes; `x_sign`/`z_sign` place its boundary.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::host::Location;

/// One of the four team regions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Quadrant {
    NE,
    NW,
    SE,
    SW,
}

impl Quadrant {
    pub const ALL: [Quadrant; 4] = [Quadrant::NE, Quadrant::NW, Quadrant::SE, Quadrant::SW];

    /// Sign applied to x offsets for this quadrant
    pub const fn x_sign(self) -> f64 {
        match self {
            Quadrant::NE | Quadrant::NW => 1.0,
            Quadrant::SE | Quadrant::SW => -1.0,
        }
    }

    /// Sign applied to z offsets for this quadrant
    pub const fn z_sign(self) -> f64 {
        match self {
            Quadrant::NE | Quadrant::SE => 1.0,
            Quadrant::NW | Quadrant::SW => -1.0,
        }
    }
}

impl fmt::Display for Quadrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Quadrant::NE => "NE",
            Quadrant::NW => "NW",
            Quadrant::SE => "SE",
            Quadrant::SW => "SW",
        };
        f.write_str(name)
    }
}

/// Unrecognised quadrant name
#[derive(Debug, thiserror::Error)]
#[error("Unknown quadrant: {0}")]
pub struct UnknownQuadrant(pub String);

impl FromStr for Quadrant {
    type Err = UnknownQuadrant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NE" => Ok(Quadrant::NE),
            "NW" => Ok(Quadrant::NW),
            "SE" => Ok(Quadrant::SE),
            "SW" => Ok(Quadrant::SW),
            _ => Err(UnknownQuadrant(s.to_string())),
        }
    }
}

/// Classify horizontal coordinates into a quadrant.
///
/// A coordinate of exactly zero counts as positive, so points on an axis
/// belong to the quadrant on the positive side of it.
pub fn quadrant_at(x: f64, z: f64) -> Quadrant {
    if x < 0.0 {
        if z < 0.0 {
            Quadrant::SW
        } else {
            Quadrant::SE
        }
    } else if z < 0.0 {
        Quadrant::NW
    } else {
        Quadrant::NE
    }
}

/// Quadrant containing a location
pub fn quadrant_of(location: &Location) -> Quadrant {
    quadrant_at(location.x, location.z)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::WorldKey;

    #[test]
    fn classifies_each_open_quadrant() {
        assert_eq!(quadrant_at(-10.0, -10.0), Quadrant::SW);
        assert_eq!(quadrant_at(-10.0, 10.0), Quadrant::SE);
        assert_eq!(quadrant_at(10.0, -10.0), Quadrant::NW);
        assert_eq!(quadrant_at(10.0, 10.0), Quadrant::NE);
    }

    #[test]
    fn axis_ties_go_to_positive_side() {
        assert_eq!(quadrant_at(0.0, 0.0), Quadrant::NE);
        assert_eq!(quadrant_at(0.0, -1.0), Quadrant::NW);
        assert_eq!(quadrant_at(-1.0, 0.0), Quadrant::SE);
        assert_eq!(quadrant_at(-0.0, -0.0), Quadrant::NE);
    }

    #[test]
    fn signs_point_back_into_the_quadrant() {
        for quadrant in Quadrant::ALL {
            let x = quadrant.x_sign() * 100.0;
            let z = quadrant.z_sign() * 100.0;
            assert_eq!(quadrant_at(x, z), quadrant);
        }
    }

    #[test]
    fn location_uses_horizontal_axes_only() {
        let loc = Location::new(WorldKey::new("minecraft:overworld"), -5.0, 300.0, 2.0);
        assert_eq!(quadrant_of(&loc), Quadrant::SE);
    }

    #[test]
    fn parses_case_insensitive_names() {
        assert_eq!("ne".parse::<Quadrant>().unwrap(), Quadrant::NE);
        assert_eq!("Sw".parse::<Quadrant>().unwrap(), Quadrant::SW);
        assert!("north".parse::<Quadrant>().is_err());
    }
}
