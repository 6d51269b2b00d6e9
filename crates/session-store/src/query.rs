use chrono::{DateTime, Utc};
use common::{RestaurantId, TableId};
use domain::{SessionStatus, TableSession};

/// Builder for filtering sessions.
///
/// Every criterion left unset matches all sessions.
#[derive(Debug, Clone, Default)]
pub struct SessionQuery {
    /// Filter by restaurant.
    pub restaurant_id: Option<RestaurantId>,

    /// Filter by table.
    pub table_id: Option<TableId>,

    /// Filter by status (any of these).
    pub statuses: Option<Vec<SessionStatus>>,

    /// Sessions that started strictly before this instant.
    pub started_before: Option<DateTime<Utc>>,

    /// Maximum number of sessions to return.
    pub limit: Option<usize>,
}

impl SessionQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a query for every session of a restaurant.
    pub fn for_restaurant(restaurant_id: RestaurantId) -> Self {
        Self {
            restaurant_id: Some(restaurant_id),
            ..Default::default()
        }
    }

    /// Creates a query for non-terminal sessions of a restaurant.
    pub fn open_in(restaurant_id: RestaurantId) -> Self {
        Self::for_restaurant(restaurant_id).statuses(vec![
            SessionStatus::Waiting,
            SessionStatus::Active,
            SessionStatus::RequestingBill,
        ])
    }

    pub fn restaurant_id(mut self, restaurant_id: RestaurantId) -> Self {
        self.restaurant_id = Some(restaurant_id);
        self
    }

    pub fn table_id(mut self, table_id: TableId) -> Self {
        self.table_id = Some(table_id);
        self
    }

    pub fn status(mut self, status: SessionStatus) -> Self {
        self.statuses = Some(vec![status]);
        self
    }

    pub fn statuses(mut self, statuses: Vec<SessionStatus>) -> Self {
        self.statuses = Some(statuses);
        self
    }

    pub fn started_before(mut self, instant: DateTime<Utc>) -> Self {
        self.started_before = Some(instant);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Evaluates the filter against one session. Ignores `limit`.
    pub fn matches(&self, session: &TableSession) -> bool {
        if self
            .restaurant_id
            .is_some_and(|id| id != session.restaurant_id)
        {
            return false;
        }
        if self.table_id.is_some_and(|id| id != session.table_id) {
            return false;
        }
        if let Some(statuses) = &self.statuses
            && !statuses.contains(&session.status)
        {
            return false;
        }
        if self
            .started_before
            .is_some_and(|instant| session.start_time >= instant)
        {
            return false;
        }
        true
    }
}
