use crate::core::loader::ModLoader;
use crate::models::error::SError;
use parking_lot::Mutex;
use std::sync::Arc;

/// Coarse lock for hosts that touch the loader from more than one thread.
/// `None` until the host has finished constructing its loader.
pub type SharedLoader = Arc<Mutex<Option<ModLoader>>>;

pub fn shared(loader: ModLoader) -> SharedLoader {
    Arc::new(Mutex::new(Some(loader)))
}

pub fn with_loader_mut<F, R>(handle: &SharedLoader, f: F) -> Result<R, SError>
where
    F: FnOnce(&mut ModLoader) -> R,
{
    let mut guard = handle.lock();
    let loader = guard
        .as_mut()
        .ok_or_else(|| SError::InvalidState("mod loader is not initialized".to_string()))?;
    Ok(f(loader))
}

pub fn with_loader<F, R>(handle: &SharedLoader, f: F) -> Result<R, SError>
where
    F: FnOnce(&ModLoader) -> R,
{
    let guard = handle.lock();
    let loader = guard
        .as_ref()
        .ok_or_else(|| SError::InvalidState("mod loader is not initialized".to_string()))?;
    Ok(f(loader))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoaderSettings;
    use crate::core::host::DetachedHost;

    fn settings() -> LoaderSettings {
        let mut settings = LoaderSettings::default();
        settings.cache.enabled = false;
        settings
    }

    #[test]
    fn uninitialized_handle_is_an_error() {
        let handle: SharedLoader = Arc::new(Mutex::new(None));
        let result = with_loader(&handle, |l| l.registry().len());
        assert!(matches!(result, Err(SError::InvalidState(_))));
    }

    #[test]
    fn helpers_reach_the_loader_across_threads() {
        let handle = shared(ModLoader::new(settings(), Arc::new(DetachedHost::new())));
        let remote = Arc::clone(&handle);
        let pending = std::thread::spawn(move || with_loader_mut(&remote, |l| l.update()))
            .join()
            .unwrap()
            .unwrap();
        assert_eq!(pending, 0);
        assert_eq!(with_loader(&handle, |l| l.registry().len()).unwrap(), 0);
    }
}
