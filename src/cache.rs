//! Cache Module for the Block Compiler
//!
//! Compiled render functions keyed by the SHA-256 of their template text, so
//! the same text registered under several names is compiled once.

use sha2::{Digest, Sha256};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::render::RenderFunction;
use crate::validate::CompilerError;

#[derive(Debug, Default)]
pub struct CompiledCache {
    entries: RefCell<HashMap<String, Rc<RenderFunction>>>,
}

impl CompiledCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compute_hash(source: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(source.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn get(&self, source: &str) -> Option<Rc<RenderFunction>> {
        let hash = Self::compute_hash(source);
        let found = self.entries.borrow().get(&hash).cloned();
        found
    }

    pub fn set(&self, source: &str, function: Rc<RenderFunction>) {
        let hash = Self::compute_hash(source);
        self.entries.borrow_mut().insert(hash, function);
    }

    /// Cached function for `source`, compiling it on a miss. Failed
    /// compilations are not cached.
    pub fn get_or_compile(
        &self,
        source: &str,
        compile: impl FnOnce() -> Result<RenderFunction, CompilerError>,
    ) -> Result<Rc<RenderFunction>, CompilerError> {
        if let Some(function) = self.get(source) {
            log::trace!("cache hit for {}", function.name());
            return Ok(function);
        }
        let function = Rc::new(compile()?);
        self.set(source, function.clone());
        Ok(function)
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;

    #[test]
    fn test_compute_hash_is_stable() {
        assert_eq!(
            CompiledCache::compute_hash(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_ne!(
            CompiledCache::compute_hash("<div/>"),
            CompiledCache::compute_hash("<div></div>")
        );
    }

    #[test]
    fn test_same_text_compiles_once() {
        let cache = CompiledCache::new();
        let mut compilations = 0;
        let first = cache
            .get_or_compile("<p>hi</p>", || {
                compilations += 1;
                compile("<p>hi</p>")
            })
            .unwrap();
        let second = cache
            .get_or_compile("<p>hi</p>", || {
                compilations += 1;
                compile("<p>hi</p>")
            })
            .unwrap();
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(compilations, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_failed_compilation_is_not_cached() {
        let cache = CompiledCache::new();
        assert!(cache.get_or_compile("<div>", || compile("<div>")).is_err());
        assert!(cache.is_empty());
    }
}
