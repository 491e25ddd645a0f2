//! Port forwarding rules as the router lists and accepts them.

use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;

/// TCP, as the router spells it.
pub const PROTOCOL_TCP: &str = "6";

const ORIGIN: &str = "webui";
const SOURCE_INTERFACE: &str = "data";

/// A single NAT forwarding rule.
///
/// Ports are kept as strings because the router reports them that way;
/// matching compares the string forms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardingRule {
    pub id: String,
    pub external_port: String,
    pub internal_port: String,
    pub destination_ip: String,
    pub protocol: String,
    pub enabled: bool,
    pub persistent: bool,
    pub description: String,
}

impl ForwardingRule {
    /// A rule owned by this agent: TCP, enabled, persistent.
    pub fn managed(id: &str, source_port: u16, dest_ip: &str, dest_port: u16) -> Self {
        Self {
            id: id.to_string(),
            external_port: source_port.to_string(),
            internal_port: dest_port.to_string(),
            destination_ip: dest_ip.to_string(),
            protocol: PROTOCOL_TCP.to_string(),
            enabled: true,
            persistent: true,
            description: id.to_string(),
        }
    }

    /// Whether this rule is the mapping `:source_port -> dest_ip:dest_port`.
    ///
    /// Ignores the rule id and the `enabled` flag.
    pub fn matches(&self, source_port: u16, dest_ip: &str, dest_port: u16) -> bool {
        self.external_port == source_port.to_string()
            && self.internal_port == dest_port.to_string()
            && self.destination_ip == dest_ip
    }

    /// Parameters for `Firewall.setPortForwarding`.
    pub(crate) fn to_parameters(&self) -> Value {
        json!({
            "id": self.id,
            "internalPort": self.internal_port,
            "externalPort": self.external_port,
            "destinationIPAddress": self.destination_ip,
            "enable": self.enabled,
            "persistent": self.persistent,
            "protocol": self.protocol,
            "description": self.description,
            "sourceInterface": SOURCE_INTERFACE,
            "origin": ORIGIN,
        })
    }

    /// Decodes the `status` object of `Firewall.getPortForwarding`, which is
    /// keyed by rule id.
    pub(crate) fn from_listing(status: Value) -> Result<Vec<Self>, serde_json::Error> {
        let listing: BTreeMap<String, ListedRule> = serde_json::from_value(status)?;
        Ok(listing
            .into_iter()
            .map(|(id, rule)| Self {
                id,
                external_port: rule.external_port,
                internal_port: rule.internal_port,
                destination_ip: rule.destination_ip,
                protocol: rule.protocol,
                enabled: rule.enable,
                persistent: rule.persistent,
                description: rule.description,
            })
            .collect())
    }
}

impl fmt::Display for ForwardingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:<15}] (:{} -> {}:{}) \"{}\"",
            self.id, self.external_port, self.destination_ip, self.internal_port, self.description
        )
    }
}

pub(crate) fn origin_parameters() -> Value {
    json!({ "origin": ORIGIN })
}

pub(crate) fn removal_parameters(id: &str, dest_ip: &str) -> Value {
    json!({
        "id": id,
        "destinationIPAddress": dest_ip,
        "origin": ORIGIN,
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListedRule {
    #[serde(deserialize_with = "port_string")]
    external_port: String,
    #[serde(deserialize_with = "port_string")]
    internal_port: String,
    #[serde(rename = "DestinationIPAddress")]
    destination_ip: String,
    #[serde(default)]
    protocol: String,
    #[serde(default)]
    enable: bool,
    #[serde(default)]
    persistent: bool,
    #[serde(default)]
    description: String,
}

/// Accepts `"22"` as well as `22`.
fn port_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("unexpected port value {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_on_triple_only() {
        let mut rule = ForwardingRule::managed("someone-else", 2222, "192.168.1.20", 22);
        rule.enabled = false;
        assert!(rule.matches(2222, "192.168.1.20", 22));
        assert!(!rule.matches(22, "192.168.1.20", 2222));
        assert!(!rule.matches(2222, "192.168.1.21", 22));
    }

    #[test]
    fn decodes_router_listing() {
        let status = json!({
            "webui_ssh-raspi": {
                "Id": "webui_ssh-raspi",
                "ExternalPort": "2222",
                "InternalPort": "22",
                "DestinationIPAddress": "192.168.1.20",
                "Protocol": "6",
                "Enable": true,
                "Persistent": true,
                "Description": "webui_ssh-raspi"
            },
            "webui_http": {
                "ExternalPort": 8080,
                "InternalPort": "80",
                "DestinationIPAddress": "192.168.1.30"
            }
        });
        let rules = ForwardingRule::from_listing(status).unwrap();
        assert_eq!(rules.len(), 2);
        let http = rules.iter().find(|r| r.id == "webui_http").unwrap();
        assert_eq!(http.external_port, "8080");
        assert!(!http.enabled);
        let ssh = rules.iter().find(|r| r.id == "webui_ssh-raspi").unwrap();
        assert_eq!(ssh, &ForwardingRule::managed("webui_ssh-raspi", 2222, "192.168.1.20", 22));
    }

    #[test]
    fn set_parameters_carry_fixed_fields() {
        let params = ForwardingRule::managed("webui_ssh-raspi", 2222, "192.168.1.20", 22).to_parameters();
        assert_eq!(params["externalPort"], "2222");
        assert_eq!(params["internalPort"], "22");
        assert_eq!(params["protocol"], "6");
        assert_eq!(params["enable"], true);
        assert_eq!(params["persistent"], true);
        assert_eq!(params["sourceInterface"], "data");
        assert_eq!(params["origin"], "webui");
    }

    #[test]
    fn display_matches_listing_format() {
        let rule = ForwardingRule::managed("webui_ssh-raspi", 2222, "192.168.1.20", 22);
        assert_eq!(
            rule.to_string(),
            "[webui_ssh-raspi] (:2222 -> 192.168.1.20:22) \"webui_ssh-raspi\""
        );
    }
}
