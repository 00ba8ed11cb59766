use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use url::Url;

use super::CapabilityType;
use crate::constants::ENDPOINT_FRAMEWORK_UUID;
use crate::constants::ENDPOINT_ID;
use crate::constants::ENDPOINT_SERVICE_ID;
use crate::constants::OBJECT_CLASS;
use crate::constants::SERVICE_IMPORTED_CONFIGS;
use crate::constants::SERVICE_INTENTS;
use crate::DecodeError;
use crate::RawEntry;
use crate::Result;

/// A single endpoint property value as published in the store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PropertyValue {
    String(String),
    Strings(Vec<String>),
    Long(i64),
    Bool(bool),
}

impl PropertyValue {
    /// Single strings are read as one-element lists.
    fn as_strings(&self) -> Vec<&str> {
        match self {
            PropertyValue::String(s) => vec![s.as_str()],
            PropertyValue::Strings(list) => list.iter().map(String::as_str).collect(),
            _ => Vec::new(),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::String(value)
    }
}

impl From<Vec<String>> for PropertyValue {
    fn from(value: Vec<String>) -> Self {
        PropertyValue::Strings(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Long(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

pub type EndpointProperties = BTreeMap<String, PropertyValue>;

/// Immutable description of one remote endpoint.
///
/// Identity is the store child key; two descriptors with the same key but
/// different properties are different descriptors, so a republished entry is
/// observed as one disappearance plus one appearance.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EndpointDescriptor {
    key: String,
    properties: Arc<EndpointProperties>,
}

impl fmt::Debug for EndpointDescriptor {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("EndpointDescriptor")
            .field("key", &self.key)
            .field("address", &self.address_str())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for EndpointDescriptor {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{} ({})", self.key, self.address_str())
    }
}

impl EndpointDescriptor {
    /// Validates `properties` and builds a descriptor.
    ///
    /// # Errors
    /// `DecodeError::MissingProperty` when `objectClass` or `endpoint.id` is
    /// absent, `DecodeError::InvalidAddress` when `endpoint.id` is not a URL.
    pub fn new(
        key: impl Into<String>,
        properties: EndpointProperties,
    ) -> Result<Self> {
        let key = key.into();

        let has_types = properties
            .get(OBJECT_CLASS)
            .map(|v| !v.as_strings().is_empty())
            .unwrap_or(false);
        if !has_types {
            return Err(DecodeError::MissingProperty {
                key,
                property: OBJECT_CLASS,
            }
            .into());
        }

        let address = match properties.get(ENDPOINT_ID) {
            Some(PropertyValue::String(address)) => address,
            _ => {
                return Err(DecodeError::MissingProperty {
                    key,
                    property: ENDPOINT_ID,
                }
                .into())
            }
        };
        if let Err(source) = Url::parse(address) {
            return Err(DecodeError::InvalidAddress {
                address: address.clone(),
                key,
                source,
            }
            .into());
        }

        Ok(Self {
            key,
            properties: Arc::new(properties),
        })
    }

    pub fn builder(
        key: impl Into<String>,
        address: impl Into<String>,
    ) -> EndpointDescriptorBuilder {
        EndpointDescriptorBuilder::new(key, address)
    }

    /// Decodes one store child entry.
    pub fn decode(entry: &RawEntry) -> Result<Self> {
        let properties: EndpointProperties =
            bincode::deserialize(&entry.data).map_err(|source| DecodeError::Malformed {
                key: entry.key.clone(),
                source,
            })?;
        Self::new(entry.key.clone(), properties)
    }

    /// Serializes the property map in the format `decode` expects.
    pub fn encode_properties(&self) -> Result<Vec<u8>> {
        bincode::serialize(self.properties.as_ref()).map_err(|source| {
            DecodeError::Malformed {
                key: self.key.clone(),
                source,
            }
            .into()
        })
    }

    pub fn to_raw_entry(&self) -> Result<RawEntry> {
        Ok(RawEntry {
            key: self.key.clone(),
            data: self.encode_properties()?,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn properties(&self) -> &EndpointProperties {
        &self.properties
    }

    pub fn property(
        &self,
        name: &str,
    ) -> Option<&PropertyValue> {
        self.properties.get(name)
    }

    pub fn capability_types(&self) -> Vec<CapabilityType> {
        self.string_list(OBJECT_CLASS).into_iter().map(CapabilityType::from).collect()
    }

    pub fn offers(
        &self,
        capability_type: &CapabilityType,
    ) -> bool {
        self.string_list(OBJECT_CLASS).contains(&capability_type.as_str())
    }

    /// Raw `endpoint.id` value.
    pub fn address_str(&self) -> &str {
        match self.properties.get(ENDPOINT_ID) {
            Some(PropertyValue::String(address)) => address,
            _ => "",
        }
    }

    /// Transport address. Validated at construction.
    pub fn address(&self) -> Result<Url> {
        Url::parse(self.address_str()).map_err(|source| {
            DecodeError::InvalidAddress {
                key: self.key.clone(),
                address: self.address_str().to_string(),
                source,
            }
            .into()
        })
    }

    /// Query parameters of the transport address, percent-decoded.
    ///
    /// A parameter without `=` maps to an empty value.
    pub fn address_parameters(&self) -> Result<BTreeMap<String, String>> {
        let address = self.address()?;
        Ok(address.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())).collect())
    }

    pub fn intents(&self) -> Vec<&str> {
        self.string_list(SERVICE_INTENTS)
    }

    pub fn configuration_types(&self) -> Vec<&str> {
        self.string_list(SERVICE_IMPORTED_CONFIGS)
    }

    pub fn framework_uuid(&self) -> Option<&str> {
        match self.properties.get(ENDPOINT_FRAMEWORK_UUID) {
            Some(PropertyValue::String(uuid)) => Some(uuid),
            _ => None,
        }
    }

    pub fn service_id(&self) -> Option<i64> {
        match self.properties.get(ENDPOINT_SERVICE_ID) {
            Some(PropertyValue::Long(id)) => Some(*id),
            _ => None,
        }
    }

    fn string_list(
        &self,
        name: &str,
    ) -> Vec<&str> {
        self.properties.get(name).map(PropertyValue::as_strings).unwrap_or_default()
    }
}

pub struct EndpointDescriptorBuilder {
    key: String,
    capability_types: Vec<String>,
    properties: EndpointProperties,
}

impl EndpointDescriptorBuilder {
    fn new(
        key: impl Into<String>,
        address: impl Into<String>,
    ) -> Self {
        let mut properties = EndpointProperties::new();
        properties.insert(ENDPOINT_ID.to_string(), PropertyValue::String(address.into()));
        Self {
            key: key.into(),
            capability_types: Vec::new(),
            properties,
        }
    }

    pub fn capability(
        mut self,
        capability_type: impl Into<CapabilityType>,
    ) -> Self {
        self.capability_types.push(capability_type.into().as_str().to_string());
        self
    }

    pub fn intents(
        self,
        intents: &[&str],
    ) -> Self {
        let intents = intents.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        self.property(SERVICE_INTENTS, intents)
    }

    pub fn configuration_types(
        self,
        config_types: &[&str],
    ) -> Self {
        let config_types = config_types.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        self.property(SERVICE_IMPORTED_CONFIGS, config_types)
    }

    pub fn property(
        mut self,
        name: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn build(mut self) -> Result<EndpointDescriptor> {
        if !self.capability_types.is_empty() {
            self.properties.insert(
                OBJECT_CLASS.to_string(),
                PropertyValue::Strings(self.capability_types),
            );
        }
        EndpointDescriptor::new(self.key, self.properties)
    }
}
