//! The narrow boundary to the game runtime that actually loads assemblies
//! and asset bundles.

use crate::core::metadata::MetadataCatalog;
use crate::core::operation::Operation;
use crate::core::type_catalog::TypeCatalog;
use crate::models::error::SError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::Poll;
use tracing::debug;

/// A loaded assembly, seen through its reflection catalog.
pub type LoadedAssembly = Arc<dyn TypeCatalog>;

pub trait AssetBundle: Send + Sync {
    fn name(&self) -> &str;
    fn unload(&self);
}

pub type LoadedBundle = Arc<dyn AssetBundle>;

pub trait HostRuntime: Send + Sync {
    /// Loads raw assembly bytes. Effectively synchronous.
    fn load_assembly(&self, name: &str, bytes: Vec<u8>) -> Result<LoadedAssembly, SError>;

    /// Starts loading an asset bundle; the host completes it across polls.
    fn load_asset_bundle(&self, path: &str, bytes: Arc<[u8]>) -> Operation<LoadedBundle>;
}

/// Inspection-only host: assemblies "load" as their static catalog and
/// bundles are kept as bytes, completing after a fixed number of polls.
#[derive(Debug, Default)]
pub struct DetachedHost {
    bundle_latency: u32,
}

impl DetachedHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bundle requests report pending this many times before completing.
    pub fn with_bundle_latency(polls: u32) -> Self {
        Self {
            bundle_latency: polls,
        }
    }
}

pub struct DetachedBundle {
    name: String,
    bytes: Arc<[u8]>,
    loaded: AtomicBool,
}

impl DetachedBundle {
    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl AssetBundle for DetachedBundle {
    fn name(&self) -> &str {
        &self.name
    }

    fn unload(&self) {
        self.loaded.store(false, Ordering::Release);
    }
}

impl HostRuntime for DetachedHost {
    fn load_assembly(&self, name: &str, bytes: Vec<u8>) -> Result<LoadedAssembly, SError> {
        let catalog = MetadataCatalog::parse(&bytes)?;
        debug!(assembly = name, types = catalog.type_count(), "assembly loaded");
        Ok(Arc::new(catalog))
    }

    fn load_asset_bundle(&self, path: &str, bytes: Arc<[u8]>) -> Operation<LoadedBundle> {
        let mut remaining = self.bundle_latency;
        let mut bundle = Some(DetachedBundle {
            name: path.to_string(),
            bytes,
            loaded: AtomicBool::new(true),
        });
        Operation::from_poll(move || {
            if remaining > 0 {
                remaining -= 1;
                return Poll::Pending;
            }
            match bundle.take() {
                Some(bundle) => Poll::Ready(Ok(Arc::new(bundle) as LoadedBundle)),
                None => Poll::Ready(Err(Arc::new(SError::InvalidState(
                    "bundle request already completed".to_string(),
                )))),
            }
        })
    }
}
