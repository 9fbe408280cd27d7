use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{IllegalTransition, UnknownVariant};

/// Implements `as_str`, `Display` and `FromStr` over the serde names of a
/// fieldless enum so the same spelling is used on the wire and in SQLite.
macro_rules! string_enum {
    ($ty:ident, $kind:literal, { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok(Self::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

/// Authoritative status of a permit. Only `Active` permits verify as valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PermitStatus {
    Pending,
    Active,
    Suspended,
    Revoked,
    Expired,
}

string_enum!(PermitStatus, "permit status", {
    Pending => "Pending",
    Active => "Active",
    Suspended => "Suspended",
    Revoked => "Revoked",
    Expired => "Expired",
});

impl PermitStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

/// Outcome category of one credential verification attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VerificationResult {
    Valid,
    Expired,
    NotFound,
    SignatureInvalid,
    Revoked,
    Malformed,
}

string_enum!(VerificationResult, "verification result", {
    Valid => "Valid",
    Expired => "Expired",
    NotFound => "NotFound",
    SignatureInvalid => "SignatureInvalid",
    Revoked => "Revoked",
    Malformed => "Malformed",
});

impl VerificationResult {
    /// Whether this result implies the officer resolved the scan to a
    /// concrete permit.
    pub fn implies_resolved_permit(&self) -> bool {
        matches!(self, Self::Valid | Self::Expired | Self::Revoked)
    }
}

/// Billing lifecycle of a logged airport service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceLogStatus {
    Pending,
    Invoiced,
    Cancelled,
}

string_enum!(ServiceLogStatus, "service log status", {
    Pending => "Pending",
    Invoiced => "Invoiced",
    Cancelled => "Cancelled",
});

impl ServiceLogStatus {
    /// Validate a status change.
    ///
    /// `Pending -> Invoiced`, `Pending -> Cancelled` and
    /// `Invoiced -> Cancelled` are the only moves; `Cancelled` is terminal.
    pub fn transition(self, to: ServiceLogStatus) -> Result<ServiceLogStatus, IllegalTransition> {
        match (self, to) {
            (Self::Pending, Self::Invoiced)
            | (Self::Pending, Self::Cancelled)
            | (Self::Invoiced, Self::Cancelled) => Ok(to),
            _ => Err(IllegalTransition {
                from: self.as_str(),
                to: to.as_str(),
            }),
        }
    }
}

/// Lifecycle of an offline record from capture on a device to reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordState {
    Captured,
    Uploaded,
    Applied,
    Rejected,
}

string_enum!(RecordState, "record state", {
    Captured => "Captured",
    Uploaded => "Uploaded",
    Applied => "Applied",
    Rejected => "Rejected",
});

impl RecordState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Applied | Self::Rejected)
    }

    /// Validate a state change. `Uploaded -> Captured` is the retry reset
    /// after an upload that never got an answer.
    pub fn transition(self, to: RecordState) -> Result<RecordState, IllegalTransition> {
        match (self, to) {
            (Self::Captured, Self::Uploaded)
            | (Self::Uploaded, Self::Applied)
            | (Self::Uploaded, Self::Rejected)
            | (Self::Uploaded, Self::Captured) => Ok(to),
            _ => Err(IllegalTransition {
                from: self.as_str(),
                to: to.as_str(),
            }),
        }
    }
}

/// Kind tag of a record carried in a sync batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecordKind {
    Verification,
    ServiceLog,
}

string_enum!(RecordKind, "record kind", {
    Verification => "verification",
    ServiceLog => "serviceLog",
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            PermitStatus::Pending,
            PermitStatus::Active,
            PermitStatus::Suspended,
            PermitStatus::Revoked,
            PermitStatus::Expired,
        ] {
            assert_eq!(status.as_str().parse::<PermitStatus>().unwrap(), status);
        }
        assert!("active".parse::<PermitStatus>().is_err());
    }

    #[test]
    fn test_service_log_transitions() {
        use ServiceLogStatus::*;
        assert_eq!(Pending.transition(Invoiced), Ok(Invoiced));
        assert_eq!(Invoiced.transition(Cancelled), Ok(Cancelled));
        assert!(Invoiced.transition(Pending).is_err());
        assert!(Cancelled.transition(Pending).is_err());
        assert!(Cancelled.transition(Invoiced).is_err());
    }

    #[test]
    fn test_applied_never_moves_back() {
        use RecordState::*;
        for to in [Captured, Uploaded, Applied, Rejected] {
            assert!(Applied.transition(to).is_err());
        }
        assert_eq!(Uploaded.transition(Captured), Ok(Captured));
        assert!(Captured.transition(Applied).is_err());
    }

    #[test]
    fn test_record_kind_serde_matches_str() {
        let json = serde_json::to_string(&RecordKind::ServiceLog).unwrap();
        assert_eq!(json, "\"serviceLog\"");
        assert_eq!("verification".parse::<RecordKind>().unwrap(), RecordKind::Verification);
    }
}
