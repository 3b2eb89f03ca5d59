pub mod error;
pub mod manifest;
pub mod paths;
pub mod plugin_reference;
pub mod type_reference;
pub mod version;
