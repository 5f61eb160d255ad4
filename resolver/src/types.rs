use serde::{Deserialize, Serialize};

pub type UserId = u64;
pub type ContainerId = u64;
pub type ItemId = u64;

/// What a caller asked to resolve. An id skips handle resolution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IdentityInput {
    Handle(String),
    Id(UserId),
}

/// A resolved account reference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub handle: Option<String>,
    pub id: UserId,
}

/// A grouping unit (an experience) owned by an identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Container {
    pub id: ContainerId,
    pub display_name: String,
}

impl Container {
    pub fn new<N: Into<String>>(id: ContainerId, display_name: N) -> Self {
        Container {
            id,
            display_name: display_name.into(),
        }
    }
}

/// An item as listed upstream. Nothing about it has been validated yet.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct RawItem {
    #[serde(default)]
    pub id: Option<ItemId>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub price: Option<serde_json::Value>,
}

impl RawItem {
    pub fn new<N: Into<String>>(id: ItemId, name: N, price: serde_json::Value) -> Self {
        RawItem {
            id: Some(id),
            name: Some(name.into()),
            price: Some(price),
        }
    }
}

/// A purchasable item with a positive price.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Item {
    pub id: ItemId,
    pub name: String,
    pub price: u64,
}

/// One container of the aggregated result, with its items in price order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ContainerItems {
    #[serde(rename = "experienceName")]
    pub container_name: String,
    #[serde(rename = "gameId")]
    pub container_id: ContainerId,
    #[serde(rename = "passes")]
    pub items: Vec<Item>,
}

/// Containers in listing order. Containers without items are absent.
pub type AggregatedResult = Vec<ContainerItems>;
