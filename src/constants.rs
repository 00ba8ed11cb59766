// -
// Coordination store layout

/// Root under which every capability type gets its own node
pub const DEFAULT_ROOT_PATH: &str = "/osgi/service_registry";

// -
// Endpoint property keys

/// Capability types the endpoint offers
pub const OBJECT_CLASS: &str = "objectClass";
/// Transport address of the endpoint
pub const ENDPOINT_ID: &str = "endpoint.id";
/// Service id within the exporting framework
pub const ENDPOINT_SERVICE_ID: &str = "endpoint.service.id";
/// Identity of the exporting framework
pub const ENDPOINT_FRAMEWORK_UUID: &str = "endpoint.framework.uuid";
/// Configuration types a provider must understand to import the endpoint
pub const SERVICE_IMPORTED_CONFIGS: &str = "service.imported.configs";
/// Intents a provider must satisfy to import the endpoint
pub const SERVICE_INTENTS: &str = "service.intents";
