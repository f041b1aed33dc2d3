//! # TTL Policy

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The query endpoints, grouped by how quickly their answers go stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EndpointClass {
    /// `/transactions`
    List,
    /// `/transactions/filters`
    Filters,
    /// `/transactions/dates`
    DateRange,
    /// `/transactions/{id}`
    ById,
}

impl EndpointClass {
    /// Classifies an upstream-relative path such as `/transactions/dates`.
    /// Returns `None` for paths outside the transaction resource.
    pub fn from_path(path: &str) -> Option<Self> {
        let mut segments = path.split('/').filter(|s| !s.is_empty());
        if segments.next()? != "transactions" {
            return None;
        }
        let class = match segments.next() {
            None => EndpointClass::List,
            Some("filters") => EndpointClass::Filters,
            Some("dates") => EndpointClass::DateRange,
            Some(_) => EndpointClass::ById,
        };
        match segments.next() {
            None => Some(class),
            Some(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlPolicy {
    pub list: Duration,
    pub filters: Duration,
    pub date_range: Duration,
    pub by_id: Duration,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            list: Duration::from_secs(30),
            filters: Duration::from_secs(30),
            date_range: Duration::from_secs(60),
            by_id: Duration::from_secs(300),
        }
    }
}

impl TtlPolicy {
    pub fn ttl_for(&self, class: EndpointClass) -> Duration {
        match class {
            EndpointClass::List => self.list,
            EndpointClass::Filters => self.filters,
            EndpointClass::DateRange => self.date_range,
            EndpointClass::ById => self.by_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_map_to_classes() {
        assert_eq!(EndpointClass::from_path("/transactions"), Some(EndpointClass::List));
        assert_eq!(EndpointClass::from_path("/transactions/"), Some(EndpointClass::List));
        assert_eq!(
            EndpointClass::from_path("/transactions/filters"),
            Some(EndpointClass::Filters)
        );
        assert_eq!(
            EndpointClass::from_path("/transactions/dates"),
            Some(EndpointClass::DateRange)
        );
        assert_eq!(
            EndpointClass::from_path("/transactions/tx-9"),
            Some(EndpointClass::ById)
        );
        assert_eq!(EndpointClass::from_path("/transactions/1/items"), None);
        assert_eq!(EndpointClass::from_path("/accounts"), None);
    }

    #[test]
    fn default_ttls() {
        let policy = TtlPolicy::default();
        assert_eq!(policy.ttl_for(EndpointClass::List), Duration::from_secs(30));
        assert_eq!(policy.ttl_for(EndpointClass::ById), Duration::from_secs(300));
    }
}
