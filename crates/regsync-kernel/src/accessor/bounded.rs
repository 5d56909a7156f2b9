//! Time-bounded accessor
//!
//! Planning is synchronous code running on the blocking pool. This wrapper
//! gives each of its backend calls the same bound the executor puts on
//! actions: the call runs as its own blocking task and the caller waits at
//! most `timeout` for it. A call that overruns keeps running detached and
//! its result is dropped.

use super::RegistryAccessor;
use crate::error::AccessError;
use crate::path::{HostArch, RegistryPath};
use crate::types::{ValueData, ValueName};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

/// Accessor whose calls fail with [`AccessError::Timeout`] once they overrun
///
/// Must be used from a thread that may block on `runtime`, such as a
/// `spawn_blocking` task. Calling it from async code panics.
#[derive(Debug, Clone)]
pub struct BoundedAccessor {
    inner: Arc<dyn RegistryAccessor>,
    timeout: Duration,
    runtime: Handle,
}

impl BoundedAccessor {
    #[must_use]
    pub fn new(inner: Arc<dyn RegistryAccessor>, timeout: Duration, runtime: Handle) -> Self {
        Self {
            inner,
            timeout,
            runtime,
        }
    }

    fn bounded<T, F>(&self, call: F) -> Result<T, AccessError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn RegistryAccessor) -> Result<T, AccessError> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let task = self.runtime.spawn_blocking(move || call(inner.as_ref()));
        match self
            .runtime
            .block_on(tokio::time::timeout(self.timeout, task))
        {
            Err(_) => Err(AccessError::Timeout(self.timeout)),
            Ok(Err(join)) => Err(AccessError::Aborted(join.to_string())),
            Ok(Ok(result)) => result,
        }
    }
}

impl RegistryAccessor for BoundedAccessor {
    fn host_arch(&self) -> HostArch {
        self.inner.host_arch()
    }

    fn exists(&self, path: &RegistryPath) -> Result<bool, AccessError> {
        let path = path.clone();
        self.bounded(move |inner| inner.exists(&path))
    }

    fn create(&self, path: &RegistryPath) -> Result<(), AccessError> {
        let path = path.clone();
        self.bounded(move |inner| inner.create(&path))
    }

    fn delete(&self, path: &RegistryPath, recursive: bool) -> Result<(), AccessError> {
        let path = path.clone();
        self.bounded(move |inner| inner.delete(&path, recursive))
    }

    fn list_subkeys(&self, path: &RegistryPath) -> Result<Vec<String>, AccessError> {
        let path = path.clone();
        self.bounded(move |inner| inner.list_subkeys(&path))
    }

    fn list_values(&self, path: &RegistryPath) -> Result<Vec<(ValueName, ValueData)>, AccessError> {
        let path = path.clone();
        self.bounded(move |inner| inner.list_values(&path))
    }

    fn list_value_names(&self, path: &RegistryPath) -> Result<Vec<ValueName>, AccessError> {
        let path = path.clone();
        self.bounded(move |inner| inner.list_value_names(&path))
    }

    fn get_value(&self, path: &RegistryPath, name: &ValueName) -> Result<ValueData, AccessError> {
        let (path, name) = (path.clone(), name.clone());
        self.bounded(move |inner| inner.get_value(&path, &name))
    }

    fn set_value(
        &self,
        path: &RegistryPath,
        name: &ValueName,
        data: &ValueData,
    ) -> Result<(), AccessError> {
        let (path, name, data) = (path.clone(), name.clone(), data.clone());
        self.bounded(move |inner| inner.set_value(&path, &name, &data))
    }

    fn delete_value(&self, path: &RegistryPath, name: &ValueName) -> Result<(), AccessError> {
        let (path, name) = (path.clone(), name.clone());
        self.bounded(move |inner| inner.delete_value(&path, &name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::MemoryRegistry;

    #[derive(Debug)]
    struct Stalled;

    impl RegistryAccessor for Stalled {
        fn host_arch(&self) -> HostArch {
            HostArch::X64
        }
        fn exists(&self, _: &RegistryPath) -> Result<bool, AccessError> {
            std::thread::sleep(Duration::from_millis(300));
            Ok(true)
        }
        fn create(&self, _: &RegistryPath) -> Result<(), AccessError> {
            Ok(())
        }
        fn delete(&self, _: &RegistryPath, _: bool) -> Result<(), AccessError> {
            Ok(())
        }
        fn list_subkeys(&self, _: &RegistryPath) -> Result<Vec<String>, AccessError> {
            Ok(Vec::new())
        }
        fn list_values(
            &self,
            _: &RegistryPath,
        ) -> Result<Vec<(ValueName, ValueData)>, AccessError> {
            panic!("backend crashed")
        }
        fn get_value(&self, path: &RegistryPath, _: &ValueName) -> Result<ValueData, AccessError> {
            Err(AccessError::NotFound(path.to_string()))
        }
        fn set_value(
            &self,
            _: &RegistryPath,
            _: &ValueName,
            _: &ValueData,
        ) -> Result<(), AccessError> {
            Ok(())
        }
        fn delete_value(&self, _: &RegistryPath, _: &ValueName) -> Result<(), AccessError> {
            Ok(())
        }
    }

    fn path(raw: &str) -> RegistryPath {
        raw.parse().unwrap()
    }

    #[tokio::test]
    async fn calls_within_the_bound_pass_through() {
        let registry = Arc::new(MemoryRegistry::new(HostArch::X64));
        registry.create(&path(r"HKLM\Software\Foo")).unwrap();
        let bounded = BoundedAccessor::new(registry, Duration::from_secs(5), Handle::current());

        let found = tokio::task::spawn_blocking(move || {
            (
                bounded.exists(&path(r"HKLM\Software\Foo")),
                bounded.get_value(&path(r"HKLM\Software\Foo"), &ValueName::new("V")),
            )
        })
        .await
        .unwrap();
        assert_eq!(found.0, Ok(true));
        assert!(matches!(found.1, Err(AccessError::NotFound(_))));
    }

    #[tokio::test]
    async fn overrunning_and_crashing_calls_become_errors() {
        let timeout = Duration::from_millis(20);
        let bounded = BoundedAccessor::new(Arc::new(Stalled), timeout, Handle::current());

        let (slow, crashed) = tokio::task::spawn_blocking(move || {
            let key = path(r"HKLM\Software\Foo");
            (bounded.exists(&key), bounded.list_values(&key))
        })
        .await
        .unwrap();
        assert_eq!(slow, Err(AccessError::Timeout(timeout)));
        assert!(matches!(crashed, Err(AccessError::Aborted(_))));
    }
}
