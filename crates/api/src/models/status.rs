use super::sanitize;
use crate::error::{Error, ErrorKind};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

/// Personal reading status of a library entry.
///
/// "Not in library" is modelled as the absence of a status, never as a
/// seventh variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingStatus {
    Reading,
    OnHold,
    PlanToRead,
    Dropped,
    ReReading,
    Completed,
}
impl ReadingStatus {
    pub const ALL: [ReadingStatus; 6] =
        [Self::Reading, Self::OnHold, Self::PlanToRead, Self::Dropped, Self::ReReading, Self::Completed];

    /// Wire value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reading => "reading",
            Self::OnHold => "on_hold",
            Self::PlanToRead => "plan_to_read",
            Self::Dropped => "dropped",
            Self::ReReading => "re_reading",
            Self::Completed => "completed",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Reading => "Reading",
            Self::OnHold => "On Hold",
            Self::PlanToRead => "Plan to Read",
            Self::Dropped => "Dropped",
            Self::ReReading => "Re-reading",
            Self::Completed => "Completed",
        }
    }
}
impl FromStr for ReadingStatus {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match sanitize(s).as_str() {
            "reading" => Self::Reading,
            "onhold" => Self::OnHold,
            "plantoread" => Self::PlanToRead,
            "dropped" => Self::Dropped,
            "rereading" => Self::ReReading,
            "completed" => Self::Completed,
            _ => exn::bail!(ErrorKind::Parse { field: "reading status", value: s.to_string() }),
        })
    }
}
impl Display for ReadingStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.label())
    }
}
