//! Table session record and its status machine.

use chrono::{DateTime, Utc};
use common::{RestaurantId, SessionId, TableId};
use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// How the table intends to split the check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SplitType {
    #[default]
    Individual,
    Combined,
    Custom,
}

impl SplitType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SplitType::Individual => "individual",
            SplitType::Combined => "combined",
            SplitType::Custom => "custom",
        }
    }
}

impl std::str::FromStr for SplitType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "individual" => Ok(SplitType::Individual),
            "combined" => Ok(SplitType::Combined),
            "custom" => Ok(SplitType::Custom),
            other => Err(ModelError::UnknownValue {
                kind: "split type",
                value: other.to_string(),
            }),
        }
    }
}

/// The state of a table session.
///
/// State transitions:
/// ```text
/// Waiting ──► Active ──► RequestingBill ──► Completed
///    │          │  └──────────────────────────┘ ▲
///    │          └──────────────────────────────►│ (guarded)
///    ├──► Abandoned (idle timeout)
///    └──► Cancelled (staff, from any non-terminal state)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Customers seated, no confirmed order yet.
    #[default]
    Waiting,

    /// At least one order confirmed.
    Active,

    /// Payment intent flagged; ordering is still allowed.
    RequestingBill,

    /// Normal terminal state.
    Completed,

    /// Staff-initiated terminal state.
    Cancelled,

    /// Timeout-initiated terminal state.
    Abandoned,
}

impl SessionStatus {
    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Cancelled | SessionStatus::Abandoned
        )
    }

    /// Returns true if the first confirmed order should activate the session.
    pub fn can_activate(&self) -> bool {
        matches!(self, SessionStatus::Waiting)
    }

    pub fn can_request_bill(&self) -> bool {
        !self.is_terminal()
    }

    /// Returns true if completion may be attempted from this state.
    ///
    /// `Waiting` only completes with an explicit force override.
    pub fn can_complete(&self, force: bool) -> bool {
        match self {
            SessionStatus::Active | SessionStatus::RequestingBill => true,
            SessionStatus::Waiting => force,
            _ => false,
        }
    }

    pub fn can_cancel(&self) -> bool {
        !self.is_terminal()
    }

    pub fn can_abandon(&self) -> bool {
        matches!(self, SessionStatus::Waiting)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Waiting => "waiting",
            SessionStatus::Active => "active",
            SessionStatus::RequestingBill => "requesting_bill",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
            SessionStatus::Abandoned => "abandoned",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(SessionStatus::Waiting),
            "active" => Ok(SessionStatus::Active),
            "requesting_bill" => Ok(SessionStatus::RequestingBill),
            "completed" => Ok(SessionStatus::Completed),
            "cancelled" => Ok(SessionStatus::Cancelled),
            "abandoned" => Ok(SessionStatus::Abandoned),
            other => Err(ModelError::UnknownValue {
                kind: "session status",
                value: other.to_string(),
            }),
        }
    }
}

/// Input for opening a session at a table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSession {
    pub restaurant_id: RestaurantId,
    pub table_id: TableId,
    pub party_size: u32,
    #[serde(default)]
    pub split_type: SplitType,
    #[serde(default)]
    pub session_name: Option<String>,
}

/// One dining occasion at one table.
///
/// Money totals are not stored here; see [`crate::SessionTotals`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSession {
    pub id: SessionId,
    pub restaurant_id: RestaurantId,
    pub table_id: TableId,
    /// Human-facing table number, used in bill numbers.
    pub table_number: u32,
    pub session_name: Option<String>,
    pub party_size: u32,
    pub split_type: SplitType,
    pub status: SessionStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub bill_requested_at: Option<DateTime<Utc>>,
}

impl TableSession {
    /// Opens a session in `Waiting` status.
    pub fn open(
        input: NewSession,
        table_number: u32,
        now: DateTime<Utc>,
    ) -> Result<Self, ModelError> {
        if input.party_size == 0 {
            return Err(ModelError::InvalidPartySize(input.party_size));
        }

        Ok(Self {
            id: SessionId::new(),
            restaurant_id: input.restaurant_id,
            table_id: input.table_id,
            table_number,
            session_name: input
                .session_name
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty()),
            party_size: input.party_size,
            split_type: input.split_type,
            status: SessionStatus::Waiting,
            start_time: now,
            end_time: None,
            bill_requested_at: None,
        })
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Moves the session to `to`, stamping timestamps.
    ///
    /// Only checks that the edge exists in the state machine; business guards
    /// (unpaid bills) are enforced by the lifecycle manager.
    pub fn transition(
        &mut self,
        to: SessionStatus,
        force: bool,
        now: DateTime<Utc>,
    ) -> Result<SessionStatus, ModelError> {
        let from = self.status;
        let allowed = match to {
            SessionStatus::Active => from.can_activate(),
            SessionStatus::RequestingBill => from.can_request_bill(),
            SessionStatus::Completed => from.can_complete(force),
            SessionStatus::Cancelled => from.can_cancel(),
            SessionStatus::Abandoned => from.can_abandon(),
            SessionStatus::Waiting => false,
        };
        if !allowed {
            return Err(ModelError::InvalidSessionTransition { from, to });
        }

        self.status = to;
        if to == SessionStatus::RequestingBill && self.bill_requested_at.is_none() {
            self.bill_requested_at = Some(now);
        }
        if to.is_terminal() {
            self.end_time = Some(now);
        }
        Ok(from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_session() -> TableSession {
        TableSession::open(
            NewSession {
                restaurant_id: RestaurantId::new(),
                table_id: TableId::new(),
                party_size: 3,
                split_type: SplitType::Individual,
                session_name: Some("  Birthday ".to_string()),
            },
            12,
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn open_starts_waiting_and_trims_name() {
        let session = new_session();
        assert_eq!(session.status, SessionStatus::Waiting);
        assert_eq!(session.session_name.as_deref(), Some("Birthday"));
        assert!(session.end_time.is_none());
    }

    #[test]
    fn open_rejects_empty_party() {
        let result = TableSession::open(
            NewSession {
                restaurant_id: RestaurantId::new(),
                table_id: TableId::new(),
                party_size: 0,
                split_type: SplitType::Combined,
                session_name: None,
            },
            1,
            Utc::now(),
        );
        assert_eq!(result, Err(ModelError::InvalidPartySize(0)));
    }

    #[test]
    fn terminal_states() {
        assert!(!SessionStatus::Waiting.is_terminal());
        assert!(!SessionStatus::Active.is_terminal());
        assert!(!SessionStatus::RequestingBill.is_terminal());
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Cancelled.is_terminal());
        assert!(SessionStatus::Abandoned.is_terminal());
    }

    #[test]
    fn completion_from_waiting_needs_force() {
        assert!(!SessionStatus::Waiting.can_complete(false));
        assert!(SessionStatus::Waiting.can_complete(true));
        assert!(SessionStatus::Active.can_complete(false));
        assert!(SessionStatus::RequestingBill.can_complete(false));
        assert!(!SessionStatus::Cancelled.can_complete(true));
    }

    #[test]
    fn transition_stamps_timestamps() {
        let mut session = new_session();
        let now = Utc::now();

        session
            .transition(SessionStatus::Active, false, now)
            .unwrap();
        session
            .transition(SessionStatus::RequestingBill, false, now)
            .unwrap();
        assert_eq!(session.bill_requested_at, Some(now));

        let from = session
            .transition(SessionStatus::Completed, false, now)
            .unwrap();
        assert_eq!(from, SessionStatus::RequestingBill);
        assert_eq!(session.end_time, Some(now));
    }

    #[test]
    fn abandon_only_from_waiting() {
        let mut session = new_session();
        session
            .transition(SessionStatus::Active, false, Utc::now())
            .unwrap();
        let err = session
            .transition(SessionStatus::Abandoned, false, Utc::now())
            .unwrap_err();
        assert_eq!(
            err,
            ModelError::InvalidSessionTransition {
                from: SessionStatus::Active,
                to: SessionStatus::Abandoned,
            }
        );
    }

    #[test]
    fn status_string_roundtrip() {
        for status in [
            SessionStatus::Waiting,
            SessionStatus::Active,
            SessionStatus::RequestingBill,
            SessionStatus::Completed,
            SessionStatus::Cancelled,
            SessionStatus::Abandoned,
        ] {
            assert_eq!(status.as_str().parse::<SessionStatus>().unwrap(), status);
        }
        assert!("closed".parse::<SessionStatus>().is_err());
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&SessionStatus::RequestingBill).unwrap();
        assert_eq!(json, "\"requesting_bill\"");
    }
}
