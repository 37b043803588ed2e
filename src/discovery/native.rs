//! Native test discovery through a code index.
//!
//! A native test class lives in the namespace of its module (the lowercase module name) and exposes one or more
//! methods annotated with [`TEST_ANNOTATION`]. Scanning the index is comparatively expensive, so the filtered
//! classes of each module are kept in a [`ClassCache`] until the application model changes.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Deserialize;
use thiserror::Error;
use unitrun_core::TestSuite;

use super::{TestKind, TestSource};

/// Annotation marking a native test method.
pub const TEST_ANNOTATION: &str = "Test";

/// Errors raised while scanning for native test classes.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("failed to read code index {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse code index {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("code index unavailable: {0}")]
    Unavailable(String),
}

/// A method of an indexed class.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NativeMethod {
    pub name: String,
    #[serde(default)]
    pub annotations: Vec<String>,
}

impl NativeMethod {
    pub fn is_test(&self) -> bool {
        self.annotations.iter().any(|annotation| annotation == TEST_ANNOTATION)
    }
}

/// An indexed class, named with its namespace (`orders.CheckoutTest`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NativeClass {
    pub name: String,
    #[serde(default)]
    pub methods: Vec<NativeMethod>,
}

impl NativeClass {
    pub fn test_methods(&self) -> impl Iterator<Item = &NativeMethod> {
        self.methods.iter().filter(|method| method.is_test())
    }

    pub fn has_tests(&self) -> bool {
        self.test_methods().next().is_some()
    }
}

/// Source of the classes compiled into the host.
pub trait CodeIndex: Send + Sync {
    /// Classes declared in `namespace` (its nested namespaces included).
    fn classes(&self, namespace: &str) -> Result<Vec<NativeClass>, DiscoveryError>;
}

#[derive(Debug, Deserialize)]
struct IndexFile {
    #[serde(default)]
    classes: Vec<NativeClass>,
}

/// [`CodeIndex`] backed by a JSON file: `{"classes": [{"name", "methods": [{"name", "annotations"}]}]}`.
///
/// The file is read on every scan; caching is up to [`ClassCache`].
#[derive(Debug, Clone)]
pub struct JsonCodeIndex {
    path: PathBuf,
}

impl JsonCodeIndex {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CodeIndex for JsonCodeIndex {
    fn classes(&self, namespace: &str) -> Result<Vec<NativeClass>, DiscoveryError> {
        let content =
            fs::read_to_string(&self.path).map_err(|source| DiscoveryError::Io { path: self.path.clone(), source })?;
        let index: IndexFile = serde_json::from_str(&content)
            .map_err(|source| DiscoveryError::Parse { path: self.path.clone(), source })?;

        let prefix = format!("{namespace}.");
        Ok(index.classes.into_iter().filter(|class| class.name.starts_with(&prefix)).collect())
    }
}

/// Test classes per lowercase module name.
#[derive(Debug, Default)]
pub struct ClassCache {
    classes: Mutex<HashMap<String, Arc<[NativeClass]>>>,
}

impl ClassCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached classes of `module`, loading them on a miss. Failed loads are not cached.
    pub fn get_or_load(
        &self,
        module: &str,
        load: impl FnOnce(&str) -> Result<Vec<NativeClass>, DiscoveryError>,
    ) -> Result<Arc<[NativeClass]>, DiscoveryError> {
        let key = module.to_lowercase();
        if let Some(classes) = self.lock().get(&key) {
            return Ok(Arc::clone(classes));
        }

        let classes: Arc<[NativeClass]> = load(&key)?.into();
        self.lock().insert(key, Arc::clone(&classes));
        Ok(classes)
    }

    pub fn contains(&self, module: &str) -> bool {
        self.lock().contains_key(&module.to_lowercase())
    }

    /// Forget every cached module.
    pub fn invalidate(&self) {
        let mut classes = self.lock();
        tracing::debug!(modules = classes.len(), "invalidating native class cache");
        classes.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<[NativeClass]>>> {
        // The map is always left consistent, so a poisoned lock is still usable.
        self.classes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Native tests of a module, listed as `namespace.Class/method`.
pub struct NativeTestSource {
    index: Arc<dyn CodeIndex>,
    cache: Arc<ClassCache>,
}

impl NativeTestSource {
    pub fn new(index: Arc<dyn CodeIndex>, cache: Arc<ClassCache>) -> Self {
        Self { index, cache }
    }

    pub fn cache(&self) -> &Arc<ClassCache> {
        &self.cache
    }

    /// Classes of the suite's module that declare at least one test method.
    pub fn test_classes(&self, suite: &TestSuite) -> Result<Arc<[NativeClass]>, DiscoveryError> {
        self.cache.get_or_load(&suite.module, |namespace| {
            let classes = self.index.classes(namespace)?;
            Ok(classes.into_iter().filter(NativeClass::has_tests).collect())
        })
    }
}

impl TestSource for NativeTestSource {
    fn kind(&self) -> TestKind {
        TestKind::Native
    }

    fn discover(&self, suite: &TestSuite) -> Vec<String> {
        match self.test_classes(suite) {
            Ok(classes) => classes
                .iter()
                .flat_map(|class| class.test_methods().map(move |method| format!("{}/{}", class.name, method.name)))
                .collect(),
            Err(error) => {
                tracing::error!(module = %suite.module, "Unable to find native test classes or methods: {}", error);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const INDEX: &str = r#"{
        "classes": [
            {"name": "orders.CheckoutTest", "methods": [
                {"name": "total", "annotations": ["Test"]},
                {"name": "helper"},
                {"name": "discount", "annotations": ["Test", "Slow"]}
            ]},
            {"name": "orders.Checkout", "methods": [{"name": "total"}]},
            {"name": "ordersextra.OtherTest", "methods": [{"name": "run", "annotations": ["Test"]}]},
            {"name": "billing.InvoiceTest", "methods": [{"name": "create", "annotations": ["Test"]}]}
        ]
    }"#;

    fn index_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    struct CountingIndex {
        inner: JsonCodeIndex,
        scans: AtomicUsize,
    }

    impl CodeIndex for CountingIndex {
        fn classes(&self, namespace: &str) -> Result<Vec<NativeClass>, DiscoveryError> {
            self.scans.fetch_add(1, Ordering::SeqCst);
            self.inner.classes(namespace)
        }
    }

    // ========================================
    // JSON code index
    // ========================================

    #[test]
    fn test_json_index_filters_namespace() {
        let file = index_file(INDEX);
        let classes = JsonCodeIndex::new(file.path()).classes("orders").unwrap();
        let names: Vec<&str> = classes.iter().map(|class| class.name.as_str()).collect();
        assert_eq!(names, vec!["orders.CheckoutTest", "orders.Checkout"]);
    }

    #[test]
    fn test_json_index_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let error = JsonCodeIndex::new(dir.path().join("missing.json")).classes("orders").unwrap_err();
        assert!(matches!(error, DiscoveryError::Io { .. }));
    }

    #[test]
    fn test_json_index_parse_error() {
        let file = index_file("{ not json");
        let error = JsonCodeIndex::new(file.path()).classes("orders").unwrap_err();
        assert!(matches!(error, DiscoveryError::Parse { .. }));
    }

    // ========================================
    // Native test source
    // ========================================

    #[test]
    fn test_discover_lists_annotated_methods() {
        let file = index_file(INDEX);
        let source = NativeTestSource::new(Arc::new(JsonCodeIndex::new(file.path())), Arc::new(ClassCache::new()));
        let found = source.discover(&TestSuite::new("Orders"));
        assert_eq!(found, vec!["orders.CheckoutTest/total", "orders.CheckoutTest/discount"]);
    }

    #[test]
    fn test_classes_are_cached_until_invalidated() {
        let file = index_file(INDEX);
        let index = Arc::new(CountingIndex { inner: JsonCodeIndex::new(file.path()), scans: AtomicUsize::new(0) });
        let cache = Arc::new(ClassCache::new());
        let source = NativeTestSource::new(index.clone(), cache.clone());
        let suite = TestSuite::new("Orders");

        source.discover(&suite);
        source.discover(&suite);
        assert_eq!(index.scans.load(Ordering::SeqCst), 1);
        assert!(cache.contains("ORDERS"));

        cache.invalidate();
        source.discover(&suite);
        assert_eq!(index.scans.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_scan_failure_yields_nothing_and_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(ClassCache::new());
        let source =
            NativeTestSource::new(Arc::new(JsonCodeIndex::new(dir.path().join("missing.json"))), cache.clone());

        assert!(source.discover(&TestSuite::new("Orders")).is_empty());
        assert!(!cache.contains("orders"));
    }
}
