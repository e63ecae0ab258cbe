//! Pod manifest model.
//!
//! These types mirror the already-validated pod manifest written by the
//! pod-assembly step. Parsing is plain serde; no semantic validation is
//! done here beyond what the types enforce.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, ResultExt, StagehandError};
use crate::quantity::Quantity;
use crate::types::PodId;

/// A pod being launched: its on-disk root plus the manifest describing it.
#[derive(Debug, Clone)]
pub struct Pod {
    /// Root directory of the pod.
    pub root: PathBuf,
    /// Unique identifier of the pod.
    pub uuid: PodId,
    /// The pod manifest.
    pub manifest: PodManifest,
    /// Image name for each app, keyed by app name.
    pub images: HashMap<String, String>,
    /// URL of the metadata service, if one is running.
    pub metadata_service_url: Option<String>,
}

impl Pod {
    /// Builds a pod handle from an in-memory manifest.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, uuid: PodId, manifest: PodManifest) -> Self {
        let images = manifest
            .apps
            .iter()
            .filter_map(|ra| ra.image.name.clone().map(|n| (ra.name.clone(), n)))
            .collect();
        Self {
            root: root.into(),
            uuid,
            manifest,
            images,
            metadata_service_url: None,
        }
    }

    /// Loads the manifest stored at `<root>/pod`.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest cannot be read or parsed.
    pub fn load(root: &Path, uuid: PodId) -> Result<Self> {
        let path = root.join(crate::constants::POD_MANIFEST_FILE);
        let data = std::fs::read_to_string(&path).map_err(|e| StagehandError::io(&path, e))?;
        let manifest: PodManifest = serde_json::from_str(&data)
            .map_err(StagehandError::from)
            .with_context(|| format!("invalid pod manifest {}", path.display()))?;
        Ok(Self::new(root, uuid, manifest))
    }

    /// Returns the image name the app was started from, or its image id
    /// when the manifest does not name it.
    #[must_use]
    pub fn image_name(&self, app: &RuntimeApp) -> String {
        self.images
            .get(&app.name)
            .cloned()
            .unwrap_or_else(|| app.image.id.clone())
    }

    /// Finds the host port forwarded to the named pod port; `0` means none.
    #[must_use]
    pub fn host_port(&self, name: &str) -> u16 {
        self.manifest
            .ports
            .iter()
            .filter(|p| p.name == name)
            .map(|p| p.host_port)
            .last()
            .unwrap_or(0)
    }
}

/// The pod manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PodManifest {
    /// Apps to run, in declaration order.
    pub apps: Vec<RuntimeApp>,
    /// Volumes available to the apps.
    pub volumes: Vec<Volume>,
    /// Host ports forwarded into the pod.
    pub ports: Vec<ExposedPort>,
}

/// One app instance inside a pod.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeApp {
    /// App name, unique within the pod.
    pub name: String,
    /// Image the app was extracted from.
    #[serde(default)]
    pub image: ImageRef,
    /// App definition.
    pub app: App,
    /// Volumes bound to mount points of the app.
    #[serde(default)]
    pub mounts: Vec<Mount>,
}

/// Reference to the image an app came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    /// Human readable image name.
    #[serde(default)]
    pub name: Option<String>,
    /// Content-addressed image id.
    #[serde(default)]
    pub id: String,
}

/// App definition: what to execute and how to confine it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct App {
    /// Executable followed by its arguments.
    pub exec: Vec<String>,
    /// User spec: `root`, an absolute path, a numeric uid, or a name.
    pub user: String,
    /// Group spec: `root`, an absolute path, a numeric gid, or a name.
    pub group: String,
    /// Additional groups for the process.
    #[serde(rename = "supplementaryGIDs")]
    pub supplementary_gids: Vec<u32>,
    /// Commands run around the app's lifetime.
    pub event_handlers: Vec<EventHandler>,
    /// Working directory inside the app root; `/` when empty.
    pub working_directory: Option<String>,
    /// Declared environment.
    pub environment: Environment,
    /// Declared isolators.
    pub isolators: Vec<Isolator>,
    /// Paths inside the app that volumes may bind to.
    pub mount_points: Vec<MountPoint>,
    /// Ports the app listens on.
    pub ports: Vec<Port>,
}

/// A named command hooked onto the app lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventHandler {
    /// Hook name, `pre-start` or `post-stop`.
    pub name: String,
    /// Command to run.
    pub exec: Vec<String>,
}

/// One environment variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    /// Variable name.
    pub name: String,
    /// Variable value.
    pub value: String,
}

/// Ordered environment of an app.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Environment(Vec<EnvVar>);

impl Environment {
    /// Returns the value of `name`, if declared.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.value.as_str())
    }

    /// Sets `name`, replacing an existing entry in place or appending a new one.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|e| e.name == name) {
            Some(entry) => entry.value = value,
            None => self.0.push(EnvVar { name, value }),
        }
    }

    /// Iterates over the variables in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &EnvVar> {
        self.0.iter()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Environment {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut env = Self::default();
        for (k, v) in iter {
            env.set(k, v);
        }
        env
    }
}

/// Isolator name for CPU limits.
pub const ISOLATOR_CPU: &str = "resource/cpu";
/// Isolator name for memory limits.
pub const ISOLATOR_MEMORY: &str = "resource/memory";
/// Isolator name for retained Linux capabilities.
pub const ISOLATOR_CAPS_RETAIN: &str = "os/linux/capabilities-retain-set";

/// A resource or capability restriction attached to an app.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawIsolator")]
pub enum Isolator {
    /// CPU bandwidth limit in milli-cores.
    Cpu {
        /// Upper bound, if declared.
        limit: Option<Quantity>,
    },
    /// Memory limit in bytes.
    Memory {
        /// Upper bound, if declared.
        limit: Option<Quantity>,
    },
    /// Capabilities retained in addition to the defaults.
    CapabilitiesRetain(Vec<String>),
    /// Any isolator this crate does not interpret.
    Other {
        /// Declared isolator name.
        name: String,
        /// Declared value, kept verbatim.
        value: serde_json::Value,
    },
}

/// Wire shape of an isolator: a name and an untyped value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawIsolator {
    /// Isolator name.
    pub name: String,
    /// Isolator value.
    #[serde(default)]
    pub value: serde_json::Value,
}

#[derive(Default, Serialize, Deserialize)]
struct ResourceValue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    request: Option<Quantity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    limit: Option<Quantity>,
}

#[derive(Serialize, Deserialize)]
struct CapabilitySetValue {
    set: Vec<String>,
}

impl TryFrom<RawIsolator> for Isolator {
    type Error = StagehandError;

    fn try_from(raw: RawIsolator) -> Result<Self> {
        let parsed = match raw.name.as_str() {
            ISOLATOR_CPU => {
                let v: ResourceValue = serde_json::from_value(raw.value)?;
                Self::Cpu { limit: v.limit }
            }
            ISOLATOR_MEMORY => {
                let v: ResourceValue = serde_json::from_value(raw.value)?;
                Self::Memory { limit: v.limit }
            }
            ISOLATOR_CAPS_RETAIN => {
                let v: CapabilitySetValue = serde_json::from_value(raw.value)?;
                Self::CapabilitiesRetain(v.set)
            }
            _ => Self::Other {
                name: raw.name,
                value: raw.value,
            },
        };
        Ok(parsed)
    }
}

impl TryFrom<&Isolator> for RawIsolator {
    type Error = StagehandError;

    fn try_from(isolator: &Isolator) -> Result<Self> {
        let resource = |name: &str, limit: Option<&Quantity>| -> Result<Self> {
            Ok(Self {
                name: name.to_string(),
                value: serde_json::to_value(ResourceValue {
                    request: None,
                    limit: limit.cloned(),
                })?,
            })
        };
        match isolator {
            Isolator::Cpu { limit } => resource(ISOLATOR_CPU, limit.as_ref()),
            Isolator::Memory { limit } => resource(ISOLATOR_MEMORY, limit.as_ref()),
            Isolator::CapabilitiesRetain(set) => Ok(Self {
                name: ISOLATOR_CAPS_RETAIN.to_string(),
                value: serde_json::to_value(CapabilitySetValue { set: set.clone() })?,
            }),
            Isolator::Other { name, value } => Ok(Self {
                name: name.clone(),
                value: value.clone(),
            }),
        }
    }
}

impl Serialize for Isolator {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        RawIsolator::try_from(self)
            .map_err(serde::ser::Error::custom)?
            .serialize(serializer)
    }
}

/// A named location inside the app where a volume may be mounted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountPoint {
    /// Name matched against volume names.
    pub name: String,
    /// Path inside the app root.
    pub path: String,
    /// Whether the app only needs read access.
    #[serde(default)]
    pub read_only: bool,
}

/// Binding of a pod volume onto a path of one app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    /// Name of the pod volume.
    pub volume: String,
    /// Path inside the app root.
    pub path: String,
}

/// A pod-level storage location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    /// Volume name.
    pub name: String,
    /// Forces the mount read-only (or read-write) regardless of mount points.
    #[serde(default)]
    pub read_only: Option<bool>,
    /// Where the data comes from.
    #[serde(flatten)]
    pub kind: VolumeKind,
}

/// Backing storage of a volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum VolumeKind {
    /// A directory or file on the host.
    Host {
        /// Host path.
        source: String,
    },
    /// A fresh directory created under the pod's shared volumes.
    Empty {
        /// Octal permission string, `0755` when absent.
        #[serde(default)]
        mode: Option<String>,
        /// Owner uid.
        #[serde(default)]
        uid: Option<u32>,
        /// Owner gid.
        #[serde(default)]
        gid: Option<u32>,
    },
}

/// A port an app listens on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Port {
    /// Port name, matched against pod-level port forwards.
    pub name: String,
    /// Transport protocol, `tcp` or `udp`.
    pub protocol: String,
    /// Port number inside the app.
    pub port: u16,
    /// Whether the supervisor should create the listening socket.
    #[serde(default)]
    pub socket_activated: bool,
}

/// A pod port forwarded from the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExposedPort {
    /// Name of the app port.
    pub name: String,
    /// Host-side port number.
    pub host_port: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"{
        "apps": [{
            "name": "web",
            "image": {"name": "example.com/web", "id": "sha512-abc"},
            "app": {
                "exec": ["/bin/web", "--port", "80"],
                "user": "1000",
                "group": "root",
                "supplementaryGIDs": [10, 20],
                "environment": [{"name": "MODE", "value": "prod"}],
                "isolators": [
                    {"name": "resource/memory", "value": {"limit": "100Mi"}},
                    {"name": "resource/cpu", "value": {"request": "250m", "limit": "500m"}},
                    {"name": "os/linux/capabilities-retain-set", "value": {"set": ["CAP_NET_ADMIN"]}},
                    {"name": "os/linux/no-new-privileges", "value": true}
                ],
                "mountPoints": [{"name": "data", "path": "/var/data", "readOnly": true}],
                "ports": [{"name": "http", "protocol": "tcp", "port": 80, "socketActivated": true}]
            }
        }],
        "volumes": [
            {"name": "data", "kind": "host", "source": "/srv/data"},
            {"name": "scratch", "kind": "empty", "mode": "0700"}
        ],
        "ports": [{"name": "http", "hostPort": 8080}]
    }"#;

    fn pod() -> Pod {
        let manifest: PodManifest = serde_json::from_str(MANIFEST).unwrap();
        Pod::new("/var/lib/pods/p1", PodId::generate(), manifest)
    }

    #[test]
    fn parses_isolators_by_name() {
        let pod = pod();
        let isolators = &pod.manifest.apps[0].app.isolators;
        assert_eq!(isolators.len(), 4);
        assert!(matches!(&isolators[0], Isolator::Memory { limit: Some(q) } if q.value() == 104_857_600));
        assert!(matches!(&isolators[1], Isolator::Cpu { limit: Some(q) } if q.milli_value() == 500));
        assert_eq!(
            isolators[2],
            Isolator::CapabilitiesRetain(vec!["CAP_NET_ADMIN".into()])
        );
        assert!(matches!(&isolators[3], Isolator::Other { name, .. } if name == "os/linux/no-new-privileges"));
    }

    #[test]
    fn isolators_serialize_to_wire_shape() {
        let pod = pod();
        let isolators = &pod.manifest.apps[0].app.isolators;
        let json = serde_json::to_value(isolators).unwrap();
        assert_eq!(json[1]["name"], ISOLATOR_CPU);
        assert!(json[1]["value"].get("request").is_none());
        assert_eq!(json[2]["value"]["set"][0], "CAP_NET_ADMIN");
        assert_eq!(json[3]["value"], true);
        let back: Vec<Isolator> = serde_json::from_value(json).unwrap();
        assert_eq!(&back, isolators);
    }

    #[test]
    fn parses_volume_kinds() {
        let pod = pod();
        assert_eq!(
            pod.manifest.volumes[0].kind,
            VolumeKind::Host {
                source: "/srv/data".into()
            }
        );
        assert!(matches!(
            &pod.manifest.volumes[1].kind,
            VolumeKind::Empty { mode: Some(m), .. } if m == "0700"
        ));
    }

    #[test]
    fn image_name_prefers_manifest_name() {
        let pod = pod();
        assert_eq!(pod.image_name(&pod.manifest.apps[0]), "example.com/web");
    }

    #[test]
    fn host_port_lookup() {
        let pod = pod();
        assert_eq!(pod.host_port("http"), 8080);
        assert_eq!(pod.host_port("metrics"), 0);
    }

    #[test]
    fn environment_set_replaces_in_place() {
        let mut env: Environment = [("A", "1"), ("B", "2")].into_iter().collect();
        env.set("A", "3");
        env.set("C", "4");
        let pairs: Vec<_> = env.iter().map(|e| (e.name.as_str(), e.value.as_str())).collect();
        assert_eq!(pairs, vec![("A", "3"), ("B", "2"), ("C", "4")]);
    }

    #[test]
    fn load_reads_pod_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("pod"), MANIFEST).unwrap();
        let pod = Pod::load(dir.path(), PodId::generate()).unwrap();
        assert_eq!(pod.manifest.apps[0].name, "web");
    }
}
