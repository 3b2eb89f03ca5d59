pub mod asset_importer;
pub mod assembly_cache;
pub mod dependency_graph;
pub mod host;
pub mod load_batch;
pub mod loader;
pub mod metadata;
pub mod mod_entity;
pub mod mod_importer;
pub mod operation;
pub mod package;
pub mod registry;
pub mod type_catalog;
