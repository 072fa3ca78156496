use shared::protocol::Props;

use crate::document::{Capability, ElementSnapshot};

/// Decides which properties of the source element travel with an event.
pub trait PropertyExtractor: Send + Sync {
    fn extract(&self, element: &ElementSnapshot) -> Props;
}

/// Picks properties by what the element can hold.
#[derive(Debug, Default, Clone, Copy)]
pub struct CapabilityExtractor;

impl PropertyExtractor for CapabilityExtractor {
    fn extract(&self, element: &ElementSnapshot) -> Props {
        let keys: &[&str] = match element.capability() {
            Capability::ValueBearing => &["value"],
            Capability::Checkable => &["value", "checked"],
            Capability::Inert => &[],
        };
        copy_present(element, keys)
    }
}

/// Sends `value` only, for every element that has one.
#[derive(Debug, Default, Clone, Copy)]
pub struct ValueExtractor;

impl PropertyExtractor for ValueExtractor {
    fn extract(&self, element: &ElementSnapshot) -> Props {
        copy_present(element, &["value"])
    }
}

fn copy_present(element: &ElementSnapshot, keys: &[&str]) -> Props {
    keys.iter()
        .filter_map(|key| {
            element
                .property(key)
                .map(|value| (key.to_string(), value.clone()))
        })
        .collect()
}
