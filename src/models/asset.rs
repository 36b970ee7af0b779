use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    #[default]
    Host,
    Domain,
    IpRange,
    WebApplication,
    Api,
    CloudResource,
    Unknown,
}

impl AssetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::Domain => "domain",
            Self::IpRange => "ip_range",
            Self::WebApplication => "web_application",
            Self::Api => "api",
            Self::CloudResource => "cloud_resource",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "host" => Self::Host,
            "domain" => Self::Domain,
            "ip_range" => Self::IpRange,
            "web_application" => Self::WebApplication,
            "api" => Self::Api,
            "cloud_resource" => Self::CloudResource,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AssetCriticality {
    Critical,
    High,
    Medium,
    Low,
    #[default]
    Unknown,
}

impl AssetCriticality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "critical" => Self::Critical,
            "high" => Self::High,
            "medium" => Self::Medium,
            "low" => Self::Low,
            _ => Self::Unknown,
        }
    }
}

/// A deduplicated target record, keyed by `identifier`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub id: String,
    pub identifier: String,
    pub name: Option<String>,
    pub asset_type: AssetType,
    pub criticality: AssetCriticality,
    pub discovered_by: String,
    pub properties: Map<String, Value>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl Asset {
    pub fn new(identifier: &str, asset_type: AssetType, discovered_by: &str) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            identifier: identifier.to_string(),
            name: None,
            asset_type,
            criticality: AssetCriticality::Unknown,
            discovered_by: discovered_by.to_string(),
            properties: Map::new(),
            first_seen: now,
            last_seen: now,
        }
    }

    /// Fold a re-discovery of the same identifier into this record.
    ///
    /// The stored id, first discoverer and first_seen survive; properties
    /// merge, and last_seen moves forward.
    pub fn merge(&mut self, incoming: Asset) {
        if self.name.is_none() {
            self.name = incoming.name;
        }
        if self.asset_type == AssetType::Unknown {
            self.asset_type = incoming.asset_type;
        }
        if incoming.criticality != AssetCriticality::Unknown {
            self.criticality = incoming.criticality;
        }
        merge_maps(&mut self.properties, incoming.properties);
        self.last_seen = self.last_seen.max(incoming.last_seen);
    }
}

fn merge_maps(base: &mut Map<String, Value>, incoming: Map<String, Value>) {
    for (key, value) in incoming {
        match base.get_mut(&key) {
            Some(existing) => merge_values(existing, value),
            None => {
                base.insert(key, value);
            }
        }
    }
}

fn merge_values(existing: &mut Value, incoming: Value) {
    match (existing, incoming) {
        (Value::Object(base), Value::Object(inc)) => merge_maps(base, inc),
        (Value::Array(base), Value::Array(inc)) => {
            for item in inc {
                if !base.contains(&item) {
                    base.push(item);
                }
            }
        }
        (_, Value::Null) => {}
        (slot, value) => *slot = value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn asset_with(props: Value) -> Asset {
        let mut a = Asset::new("10.0.0.5", AssetType::Host, "nmap");
        if let Value::Object(map) = props {
            a.properties = map;
        }
        a
    }

    #[test]
    fn test_merge_unions_arrays_and_overwrites_scalars() {
        let mut stored = asset_with(json!({
            "hostnames": ["db.internal"],
            "os": "Linux 4.x",
            "ports": [{"port": 22, "protocol": "tcp"}]
        }));
        let incoming = asset_with(json!({
            "hostnames": ["db.internal", "db"],
            "os": "Linux 5.x",
            "ports": [{"port": 22, "protocol": "tcp"}, {"port": 5432, "protocol": "tcp"}]
        }));
        stored.merge(incoming);

        assert_eq!(stored.properties["hostnames"], json!(["db.internal", "db"]));
        assert_eq!(stored.properties["os"], json!("Linux 5.x"));
        assert_eq!(stored.properties["ports"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_merge_keeps_identity_and_bumps_last_seen() {
        let mut stored = asset_with(json!({}));
        let original_id = stored.id.clone();
        let first_seen = stored.first_seen;
        let mut incoming = Asset::new("10.0.0.5", AssetType::Host, "masscan");
        incoming.last_seen = stored.last_seen + chrono::Duration::seconds(30);
        let expected = incoming.last_seen;

        stored.merge(incoming);
        assert_eq!(stored.id, original_id);
        assert_eq!(stored.discovered_by, "nmap");
        assert_eq!(stored.first_seen, first_seen);
        assert_eq!(stored.last_seen, expected);
    }

    #[test]
    fn test_merge_null_does_not_erase() {
        let mut stored = asset_with(json!({"os": "Windows"}));
        stored.merge(asset_with(json!({"os": null})));
        assert_eq!(stored.properties["os"], json!("Windows"));
    }

    #[test]
    fn test_nested_objects_merge() {
        let mut stored = asset_with(json!({"web": {"server": "nginx"}}));
        stored.merge(asset_with(json!({"web": {"technologies": ["PHP"]}})));
        assert_eq!(stored.properties["web"]["server"], json!("nginx"));
        assert_eq!(stored.properties["web"]["technologies"], json!(["PHP"]));
    }
}
