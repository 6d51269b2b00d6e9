//! Read-only menu lookup.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use common::{MenuItemId, Money, RestaurantId};

use crate::error::EngineError;

/// A priced menu entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuItem {
    pub id: MenuItemId,
    pub name: String,
    pub price: Money,
}

/// Menu collaborator resolving names and prices by id.
#[async_trait]
pub trait MenuLookup: Send + Sync {
    async fn menu_item(
        &self,
        restaurant_id: RestaurantId,
        item_id: MenuItemId,
    ) -> Result<Option<MenuItem>, EngineError>;
}

/// In-memory menu shared by every restaurant.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMenu {
    items: Arc<Mutex<HashMap<MenuItemId, MenuItem>>>,
}

impl InMemoryMenu {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a dish and returns its id.
    pub fn add_item(&self, name: impl Into<String>, price: Money) -> MenuItemId {
        let item = MenuItem {
            id: MenuItemId::new(),
            name: name.into(),
            price,
        };
        let id = item.id;
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, item);
        id
    }
}

#[async_trait]
impl MenuLookup for InMemoryMenu {
    async fn menu_item(
        &self,
        _restaurant_id: RestaurantId,
        item_id: MenuItemId,
    ) -> Result<Option<MenuItem>, EngineError> {
        let items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(items.get(&item_id).cloned())
    }
}
