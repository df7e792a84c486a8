// ABOUTME: Port forward maps and the full forwarding specification of a tunnel
// Ports may be written as numbers or strings in config files; both parse into a typed Port

use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;

/// Native container runtime socket on the remote host
pub const REMOTE_DOCKER_SOCKET: &str = "/var/run/docker.sock";

/// Non-zero TCP port
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(try_from = "RawPort")]
pub struct Port(u16);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawPort {
    Number(u64),
    Text(String),
}

impl Port {
    pub fn new(port: u16) -> Option<Self> {
        (port != 0).then_some(Self(port))
    }

    pub fn get(self) -> u16 {
        self.0
    }
}

impl TryFrom<RawPort> for Port {
    type Error = String;

    fn try_from(raw: RawPort) -> Result<Self, Self::Error> {
        let number = match raw {
            RawPort::Number(n) => u16::try_from(n).map_err(|_| format!("port {n} out of range"))?,
            RawPort::Text(s) => s
                .trim()
                .parse::<u16>()
                .map_err(|_| format!("invalid port: {s:?}"))?,
        };
        Self::new(number).ok_or_else(|| "port 0 is not forwardable".to_string())
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Named groups of `from -> to` port mappings for one forwarding direction.
///
/// Names are unique within a map and `from` ports are unique within a group;
/// a group repeating a port (e.g. `8080` and `"08080"`) fails to load.
/// Duplicate ports across groups are not detected here; ssh reports the bind
/// failure at tunnel start.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct PortForwardMap(BTreeMap<String, ForwardGroup>);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct ForwardGroup(BTreeMap<Port, Port>);

impl<'de> Deserialize<'de> for ForwardGroup {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct GroupVisitor;

        impl<'de> Visitor<'de> for GroupVisitor {
            type Value = ForwardGroup;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of from-port to to-port")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut group = BTreeMap::new();
                while let Some((from, to)) = access.next_entry::<Port, Port>()? {
                    if group.insert(from, to).is_some() {
                        return Err(de::Error::custom(format!(
                            "port {from} is forwarded more than once in the same group"
                        )));
                    }
                }
                Ok(ForwardGroup(group))
            }
        }

        deserializer.deserialize_map(GroupVisitor)
    }
}

impl PortForwardMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a mapping to the named group, creating the group if needed.
    /// An existing mapping from the same port is replaced.
    pub fn insert(&mut self, name: impl Into<String>, from: Port, to: Port) {
        self.0.entry(name.into()).or_default().0.insert(from, to);
    }

    /// Builder form of [`insert`](Self::insert)
    pub fn with(mut self, name: impl Into<String>, from: Port, to: Port) -> Self {
        self.insert(name, from, to);
        self
    }

    /// Every mapping across all groups
    pub fn pairs(&self) -> impl Iterator<Item = (Port, Port)> + '_ {
        self.0
            .values()
            .flat_map(|group| group.0.iter().map(|(from, to)| (*from, *to)))
    }

    pub fn len(&self) -> usize {
        self.0.values().map(|group| group.0.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Everything a tunnel forwards: the mandatory container runtime socket plus TCP ports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortForwardSpec {
    /// Local socket path, e.g. `/var/run/<project_code>.sock`
    pub socket_path: String,
    pub remote_socket: String,
    /// Local bind host for `-L` forwards
    pub bind_address: String,
    pub local: PortForwardMap,
    pub remote: PortForwardMap,
}

impl PortForwardSpec {
    pub fn new(socket_path: impl Into<String>, local: PortForwardMap, remote: PortForwardMap) -> Self {
        Self {
            socket_path: socket_path.into(),
            remote_socket: REMOTE_DOCKER_SOCKET.to_string(),
            bind_address: "localhost".to_string(),
            local,
            remote,
        }
    }

    pub fn with_bind_address(mut self, bind_address: impl Into<String>) -> Self {
        self.bind_address = bind_address.into();
        self
    }

    /// `-L` value for the container runtime socket
    pub fn socket_forward(&self) -> String {
        format!("{}:{}", self.socket_path, self.remote_socket)
    }

    /// One `-L` value per local mapping
    pub fn local_forwards(&self) -> Vec<String> {
        self.local
            .pairs()
            .map(|(from, to)| format!("{}:{}:localhost:{}", self.bind_address, from, to))
            .collect()
    }

    /// One `-R` value per remote mapping, bound on all remote interfaces
    pub fn remote_forwards(&self) -> Vec<String> {
        self.remote
            .pairs()
            .map(|(from, to)| format!("0.0.0.0:{from}:localhost:{to}"))
            .collect()
    }
}
