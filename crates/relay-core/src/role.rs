//! Participant roles within an interview session.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::RelayError;

/// A participant slot in a session. Each session has at most one live
/// connection per role.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The person running the interview.
    Interviewer,
    /// The person being interviewed.
    Candidate,
}

impl Role {
    /// Every role, in a stable order.
    pub const ALL: [Self; 2] = [Self::Interviewer, Self::Candidate];

    /// Wire representation used in paths and `sender` fields.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Interviewer => "interviewer",
            Self::Candidate => "candidate",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Case-sensitive exact match against the wire strings.
impl FromStr for Role {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "interviewer" => Ok(Self::Interviewer),
            "candidate" => Ok(Self::Candidate),
            other => Err(RelayError::InvalidRole(other.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn parses_wire_strings() {
        assert_eq!("interviewer".parse::<Role>().unwrap(), Role::Interviewer);
        assert_eq!("candidate".parse::<Role>().unwrap(), Role::Candidate);
    }

    #[test]
    fn rejects_other_case() {
        assert_matches!("Interviewer".parse::<Role>(), Err(RelayError::InvalidRole(r)) if r == "Interviewer");
        assert_matches!("CANDIDATE".parse::<Role>(), Err(RelayError::InvalidRole(_)));
    }

    #[test]
    fn rejects_unknown_and_empty() {
        assert_matches!("observer".parse::<Role>(), Err(RelayError::InvalidRole(_)));
        assert_matches!("".parse::<Role>(), Err(RelayError::InvalidRole(_)));
        assert_matches!(" candidate".parse::<Role>(), Err(RelayError::InvalidRole(_)));
    }

    #[test]
    fn display_roundtrips_through_parse() {
        for role in Role::ALL {
            assert_eq!(role.to_string().parse::<Role>().unwrap(), role);
        }
    }

    #[test]
    fn serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Candidate).unwrap(), "\"candidate\"");
        assert_eq!(serde_json::to_string(&Role::Interviewer).unwrap(), "\"interviewer\"");
    }
}
