//! Turns an upstream item listing into the list returned to clients.
//!
//! The policy is a pure function of its input: items without a positive
//! integral price or without an id are dropped, duplicates by id keep their
//! first occurrence, and the survivors are stably sorted by ascending price.

use crate::types::{Item, RawItem};
use serde_json::Value;
use std::collections::HashSet;

pub struct AggregationPolicy;

impl AggregationPolicy {
    pub fn apply(raw_items: &[RawItem]) -> Vec<Item> {
        let mut seen = HashSet::with_capacity(raw_items.len());

        let mut items: Vec<Item> = raw_items
            .iter()
            .filter_map(|raw| {
                let id = raw.id?;
                let price = raw.price.as_ref().and_then(positive_price)?;
                Some(Item {
                    id,
                    name: raw.name.clone().unwrap_or_default(),
                    price,
                })
            })
            .filter(|item| seen.insert(item.id))
            .collect();

        // sort_by_key is stable, ties keep listing order
        items.sort_by_key(|item| item.price);
        items
    }
}

/// Returns the price if it is a number strictly greater than zero with no
/// fractional part.
fn positive_price(value: &Value) -> Option<u64> {
    let number = match value {
        Value::Number(n) => n,
        _ => return None,
    };

    if let Some(price) = number.as_u64() {
        return (price > 0).then_some(price);
    }

    // Negative integers land here too and fail the > 0 check.
    let price = number.as_f64()?;
    if price > 0.0 && price.fract() == 0.0 && price <= u64::MAX as f64 {
        Some(price as u64)
    } else {
        None
    }
}
