//! Per-package-name serialization of compiles

use async_trait::async_trait;
use dashmap::DashMap;
use kiln_errors::CompileError;
use kiln_types::{CompiledPackage, Dependency, Package};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::compiler::Compiler;

/// Wraps a compiler so that compiles sharing a package name run one at a
/// time, while different names proceed concurrently
pub struct SerializedCompiler<C> {
    inner: C,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl<C: Compiler> SerializedCompiler<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            locks: DashMap::new(),
        }
    }

    #[must_use]
    pub fn inner(&self) -> &C {
        &self.inner
    }

    fn lock_for(&self, name: &str) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.entry(name.to_string()).or_default().value())
    }
}

#[async_trait]
impl<C: Compiler> Compiler for SerializedCompiler<C> {
    async fn compile(
        &self,
        package: &Package,
        dependencies: &[Dependency],
    ) -> Result<CompiledPackage, CompileError> {
        let lock = self.lock_for(&package.name);
        let result = {
            let _guard = lock.lock().await;
            self.inner.compile(package, dependencies).await
        };
        drop(lock);

        // Only the map still holds an idle lock; waiters keep their own clone
        self.locks
            .remove_if(&package.name, |_, lock| Arc::strong_count(lock) == 1);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_hash::{Algorithm, Digest, MultipleDigest};
    use kiln_types::{BlobId, PackageSource};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Records the highest number of compiles it saw in flight at once
    #[derive(Default)]
    struct Overlap {
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Compiler for Overlap {
        async fn compile(
            &self,
            package: &Package,
            _dependencies: &[Dependency],
        ) -> Result<CompiledPackage, CompileError> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);

            Ok(CompiledPackage {
                blob_id: BlobId::new(package.name.clone()),
                digest: MultipleDigest::new(vec![Digest::from_data(Algorithm::Sha1, b"x")])
                    .unwrap(),
            })
        }
    }

    fn package(name: &str) -> Package {
        let checksum =
            MultipleDigest::new(vec![Digest::from_data(Algorithm::Sha1, b"src")]).unwrap();
        Package::new(name, "1", PackageSource::from_blob(checksum, "blob"))
    }

    #[tokio::test]
    async fn test_same_name_compiles_do_not_overlap() {
        let compiler = SerializedCompiler::new(Overlap::default());
        let foo = package("foo");

        let (a, b, c) = tokio::join!(
            compiler.compile(&foo, &[]),
            compiler.compile(&foo, &[]),
            compiler.compile(&foo, &[]),
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(compiler.inner().peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_different_names_run_concurrently() {
        let compiler = SerializedCompiler::new(Overlap::default());
        let foo = package("foo");
        let bar = package("bar");

        let (a, b) = tokio::join!(compiler.compile(&foo, &[]), compiler.compile(&bar, &[]));
        assert_eq!(a.unwrap().blob_id.as_str(), "foo");
        assert_eq!(b.unwrap().blob_id.as_str(), "bar");
        assert_eq!(compiler.inner().peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_idle_locks_are_pruned() {
        let compiler = SerializedCompiler::new(Overlap::default());
        let foo = package("foo");
        let bar = package("bar");

        let (a, b, c) = tokio::join!(
            compiler.compile(&foo, &[]),
            compiler.compile(&foo, &[]),
            compiler.compile(&bar, &[]),
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert!(compiler.locks.is_empty());

        compiler.compile(&foo, &[]).await.unwrap();
        assert!(compiler.locks.is_empty());
    }
}
