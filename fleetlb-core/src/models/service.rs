use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use url::Url;

/// A routable endpoint bound to exactly one cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceProperties {
    pub service_name: String,
    pub cluster_name: String,
    pub path: String,
    /// Used only when `load_balancer_strategy_list` is empty
    pub load_balancer_strategy_name: String,
    #[serde(default)]
    pub load_balancer_strategy_list: Vec<String>,
    #[serde(default)]
    pub load_balancer_strategy_properties: HashMap<String, Value>,
    #[serde(default)]
    pub transport_client_properties: HashMap<String, Value>,
    #[serde(default)]
    pub degrader_properties: HashMap<String, String>,
    #[serde(default)]
    pub prioritized_schemes: Vec<String>,
    #[serde(default)]
    pub banned_uris: HashSet<Url>,
}

impl ServiceProperties {
    #[must_use]
    pub fn new(
        service_name: impl Into<String>,
        cluster_name: impl Into<String>,
        path: impl Into<String>,
        load_balancer_strategy_name: impl Into<String>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            cluster_name: cluster_name.into(),
            path: path.into(),
            load_balancer_strategy_name: load_balancer_strategy_name.into(),
            load_balancer_strategy_list: Vec::new(),
            load_balancer_strategy_properties: HashMap::new(),
            transport_client_properties: HashMap::new(),
            degrader_properties: HashMap::new(),
            prioritized_schemes: Vec::new(),
            banned_uris: HashSet::new(),
        }
    }

    #[must_use]
    pub fn with_strategy_list<I, S>(mut self, strategies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.load_balancer_strategy_list = strategies.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_schemes<I, S>(mut self, schemes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.prioritized_schemes = schemes.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_strategy_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.load_balancer_strategy_properties.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn with_transport_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.transport_client_properties.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn with_banned_uris<I: IntoIterator<Item = Url>>(mut self, uris: I) -> Self {
        self.banned_uris = uris.into_iter().collect();
        self
    }

    /// Strategy names in preference order
    ///
    /// A non-empty strategy list wins over the single default name.
    #[must_use]
    pub fn strategy_preferences(&self) -> Vec<&str> {
        if self.load_balancer_strategy_list.is_empty() {
            vec![self.load_balancer_strategy_name.as_str()]
        } else {
            self.load_balancer_strategy_list.iter().map(String::as_str).collect()
        }
    }

    #[must_use]
    pub fn is_banned(&self, uri: &Url) -> bool {
        self.banned_uris.contains(uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_preferences_default_name() {
        let service = ServiceProperties::new("service-1", "cluster-1", "/test", "random");
        assert_eq!(service.strategy_preferences(), vec!["random"]);
    }

    #[test]
    fn test_strategy_list_takes_precedence() {
        let service = ServiceProperties::new("service-1", "cluster-1", "/test", "unused")
            .with_strategy_list(["degraderV3", "random"]);
        assert_eq!(service.strategy_preferences(), vec!["degraderV3", "random"]);
    }

    #[test]
    fn test_service_value_equality() {
        let a = ServiceProperties::new("service-1", "cluster-1", "/test", "random").with_schemes(["http"]);
        let b = ServiceProperties::new("service-1", "cluster-1", "/test", "random").with_schemes(["http"]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_service_from_json() {
        let json = r#"{
            "service_name": "service-1",
            "cluster_name": "cluster-1",
            "path": "/test",
            "load_balancer_strategy_name": "random",
            "prioritized_schemes": ["http"],
            "transport_client_properties": {"timeout_ms": 1000}
        }"#;
        let service: ServiceProperties = serde_json::from_str(json).unwrap();
        assert_eq!(service.prioritized_schemes, vec!["http".to_string()]);
        assert_eq!(
            service.transport_client_properties.get("timeout_ms"),
            Some(&serde_json::json!(1000))
        );
        assert!(service.banned_uris.is_empty());
    }
}
