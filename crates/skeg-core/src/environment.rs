//! Environment reconciliation
//!
//! An environment is the union of a local directory and, optionally, a
//! runtime container named after it. Neither source owns the other, so the
//! view is recomputed from both on every call.

use crate::naming::{self, labels};
use crate::ports::Port;
use serde::{Deserialize, Serialize};
use skeg_provider::ContainerInfo;
use std::collections::{BTreeMap, HashMap};

/// Environment type reported when a container carries no base label
pub const UNKNOWN_TYPE: &str = "unknown";

/// A runtime container belonging to an environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub name: String,
    pub image: String,
    pub running: bool,
    pub ports: Vec<Port>,
    #[serde(skip)]
    pub labels: HashMap<String, String>,
}

impl Container {
    fn from_info(info: &ContainerInfo) -> Self {
        Self {
            name: info.name.clone(),
            image: info.image.clone(),
            running: info.status.contains("Up"),
            ports: info.ports.iter().filter_map(Port::from_info).collect(),
            labels: info.labels.clone(),
        }
    }

    /// Host binding of the ssh daemon, if published
    pub fn ssh_port(&self) -> Option<&Port> {
        self.ports.iter().find(|p| p.is_ssh() && p.host_port != 0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub name: String,
    pub container: Option<Container>,
    #[serde(rename = "type")]
    pub kind: String,
}

impl Environment {
    pub fn is_running(&self) -> bool {
        self.container.as_ref().map(|c| c.running).unwrap_or(false)
    }

    /// `running`, `stopped` or `no container`
    pub fn state(&self) -> &'static str {
        match &self.container {
            Some(c) if c.running => "running",
            Some(_) => "stopped",
            None => "no container",
        }
    }
}

/// Merge runtime containers with local environment directories.
///
/// Only directories produce environments; containers without a directory are
/// ignored. Containers still using the pre-user naming scheme are reported
/// but not adopted.
pub fn reconcile(
    containers: &[ContainerInfo],
    dir_names: &[String],
    user: &str,
) -> BTreeMap<String, Environment> {
    let by_name: HashMap<&str, &ContainerInfo> =
        containers.iter().map(|c| (c.name.as_str(), c)).collect();

    let mut environments = BTreeMap::new();
    for dir in dir_names {
        let legacy = naming::legacy_container_name(dir);
        if by_name.contains_key(legacy.as_str()) {
            tracing::warn!(
                "Container '{}' uses the old naming scheme, rename it with: docker rename {} {}",
                legacy,
                legacy,
                naming::container_name(user, dir)
            );
        }

        let env = match by_name.get(naming::container_name(user, dir).as_str()) {
            Some(info) => {
                let container = Container::from_info(info);
                let kind = container
                    .labels
                    .get(labels::BASE)
                    .filter(|b| !b.is_empty())
                    .cloned()
                    .unwrap_or_else(|| UNKNOWN_TYPE.to_string());
                Environment {
                    name: dir.clone(),
                    container: Some(container),
                    kind,
                }
            }
            None => Environment {
                name: dir.clone(),
                container: None,
                kind: String::new(),
            },
        };
        environments.insert(dir.clone(), env);
    }

    environments
}

#[cfg(test)]
mod tests {
    use super::*;
    use skeg_provider::{ContainerId, PortInfo};

    fn alice_foo() -> ContainerInfo {
        ContainerInfo {
            id: ContainerId::new("abc123"),
            name: "skeg_alice_foo".to_string(),
            image: "skeg-alice-1234".to_string(),
            status: "Up 2 hours".to_string(),
            ports: vec![PortInfo {
                container_port: 22,
                host_port: Some(32768),
                protocol: "tcp".to_string(),
                host_ip: Some("0.0.0.0".to_string()),
            }],
            labels: HashMap::from([(labels::BASE.to_string(), "clojure".to_string())]),
        }
    }

    #[test]
    fn test_reconcile_running_container() {
        let envs = reconcile(&[alice_foo()], &["foo".to_string()], "alice");

        let foo = &envs["foo"];
        assert_eq!(foo.name, "foo");
        assert_eq!(foo.kind, "clojure");
        let container = foo.container.as_ref().unwrap();
        assert_eq!(container.name, "skeg_alice_foo");
        assert!(container.running);
        assert_eq!(
            container.ports,
            vec![Port {
                host_ip: "0.0.0.0".to_string(),
                host_port: 32768,
                container_port: 22,
                protocol: crate::ports::Protocol::Tcp,
            }]
        );
    }

    #[test]
    fn test_directory_without_container() {
        let envs = reconcile(&[], &["bar".to_string()], "alice");
        assert_eq!(
            envs["bar"],
            Environment {
                name: "bar".to_string(),
                container: None,
                kind: String::new(),
            }
        );
    }

    #[test]
    fn test_missing_base_label_is_unknown() {
        let mut info = alice_foo();
        info.labels.clear();
        info.status = "Exited (0) 3 days ago".to_string();
        let envs = reconcile(&[info], &["foo".to_string()], "alice");
        assert_eq!(envs["foo"].kind, UNKNOWN_TYPE);
        assert!(!envs["foo"].is_running());
        assert_eq!(envs["foo"].state(), "stopped");
    }

    #[test]
    fn test_other_users_and_orphans_ignored() {
        let mut legacy = alice_foo();
        legacy.name = "skeg_foo".to_string();
        let mut bob = alice_foo();
        bob.name = "skeg_bob_foo".to_string();
        let mut orphan = alice_foo();
        orphan.name = "skeg_alice_gone".to_string();

        let envs = reconcile(&[legacy, bob, orphan], &["foo".to_string()], "alice");
        assert_eq!(envs.len(), 1);
        assert!(envs["foo"].container.is_none());
    }

    #[test]
    fn test_reconcile_is_repeatable() {
        let containers = vec![alice_foo()];
        let dirs = vec!["foo".to_string(), "bar".to_string()];
        let first = reconcile(&containers, &dirs, "alice");
        let second = reconcile(&containers, &dirs, "alice");
        assert_eq!(first, second);
    }

    #[test]
    fn test_labels_not_serialized() {
        let envs = reconcile(&[alice_foo()], &["foo".to_string()], "alice");
        let json = serde_json::to_value(&envs["foo"]).unwrap();
        assert_eq!(json["type"], "clojure");
        assert!(json["container"].get("labels").is_none());
        assert_eq!(json["container"]["ports"][0]["hostPort"], 32768);
    }
}
