use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::constants::DEFAULT_ROOT_PATH;

/// Identifier of a remote-callable contract, e.g. `org.example.Greeter`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CapabilityType(String);

impl CapabilityType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CapabilityType {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CapabilityType {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for CapabilityType {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Absolute node path inside the coordination store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StorePath(String);

impl StorePath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// Node that holds one child per endpoint offering `capability_type`.
    ///
    /// Dots become path separators so that `org.example.Greeter` lives at
    /// `<root>/org/example/Greeter`.
    pub fn for_capability(
        root: &str,
        capability_type: &CapabilityType,
    ) -> Self {
        let root = root.trim_end_matches('/');
        Self(format!("{}/{}", root, capability_type.as_str().replace('.', "/")))
    }

    pub fn child(
        &self,
        key: &str,
    ) -> Self {
        Self(format!("{}/{}", self.0.trim_end_matches('/'), key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorePath {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Store path for `capability_type` under the default registry root.
pub fn path_for(capability_type: &CapabilityType) -> StorePath {
    StorePath::for_capability(DEFAULT_ROOT_PATH, capability_type)
}
