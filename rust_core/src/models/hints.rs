//! Context hints attached to source observations.
//!
//! Team and position hints arrive from external sources in many shapes
//! ("bha", " BHA ", "Midfielder", "MID"). They are parsed into strongly
//! typed values here; anything that does not parse is reported back as an
//! invalid hint and simply contributes no context boost.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Short team code such as `BHA` or `ARS`.
///
/// Always stored uppercase, 2-4 ASCII alphanumeric characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TeamCode(String);

impl TeamCode {
    /// Parse a team code, returning `None` for anything malformed.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        let len = trimmed.chars().count();
        if !(2..=4).contains(&len) {
            return None;
        }
        if !trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
            return None;
        }
        Some(Self(trimmed.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TeamCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Playing position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Position {
    Goalkeeper,
    Defender,
    Midfielder,
    Forward,
}

impl Position {
    /// Parse long or short position names, case-insensitively.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "G" | "GK" | "GKP" | "GOALKEEPER" | "KEEPER" => Some(Position::Goalkeeper),
            "D" | "DEF" | "DF" | "DEFENDER" => Some(Position::Defender),
            "M" | "MID" | "MF" | "MIDFIELDER" => Some(Position::Midfielder),
            "F" | "FW" | "FWD" | "ST" | "FORWARD" | "STRIKER" => Some(Position::Forward),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Position::Goalkeeper => "GK",
            Position::Defender => "DEF",
            Position::Midfielder => "MID",
            Position::Forward => "FWD",
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which hint a warning refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HintField {
    Team,
    Position,
}
