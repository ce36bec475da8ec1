//! Name-keyed store of managed object records.
//!
//! Like the rest of the engine, the registry never creates entries behind
//! the caller's back: `find` misses are errors, and insertion only happens
//! through [`Registry::add`] or [`Registry::restore`].
//!
//! Handlers that need the whole engine while working on one record detach
//! it with [`Registry::take`], operate on it, and hand it back with
//! [`Registry::restore`] unless the operation deleted it.

use std::collections::HashMap;

use crate::attr::{Attr, Conf};
use crate::error::{DatastoreError, DatastoreResult};

/// Registry of one object kind.
#[derive(Debug, Clone)]
pub struct Registry<A, X = ()> {
    inner: HashMap<String, Conf<A, X>>,
    delimiter: String,
}

impl<A: Attr, X> Registry<A, X> {
    pub fn new(delimiter: impl Into<String>) -> Self {
        Self {
            inner: HashMap::new(),
            delimiter: delimiter.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains_key(name)
    }

    /// Registers a record; fails if the name is taken.
    pub fn add(&mut self, conf: Conf<A, X>) -> DatastoreResult<()> {
        if self.inner.contains_key(&conf.name) {
            return Err(DatastoreError::already_exists());
        }
        self.inner.insert(conf.name.clone(), conf);
        Ok(())
    }

    pub fn find(&self, name: &str) -> DatastoreResult<&Conf<A, X>> {
        self.inner.get(name).ok_or_else(DatastoreError::not_found)
    }

    pub fn find_mut(&mut self, name: &str) -> DatastoreResult<&mut Conf<A, X>> {
        self.inner.get_mut(name).ok_or_else(DatastoreError::not_found)
    }

    /// Removes and drops a record.
    pub fn delete(&mut self, name: &str) -> DatastoreResult<()> {
        self.inner
            .remove(name)
            .map(drop)
            .ok_or_else(DatastoreError::not_found)
    }

    /// Detaches a record so it can be worked on alongside the engine.
    pub fn take(&mut self, name: &str) -> DatastoreResult<Conf<A, X>> {
        self.inner.remove(name).ok_or_else(DatastoreError::not_found)
    }

    /// Re-attaches a record detached by [`Registry::take`].
    ///
    /// # Panics
    ///
    /// Panics if the record has neither attribute set, which means the
    /// registry is corrupted.
    pub fn restore(&mut self, conf: Conf<A, X>) {
        if conf.is_corrupted() {
            log::error!("registry corrupted: {} has no attributes", conf.name);
            panic!("managed object {} has neither current nor modified attributes", conf.name);
        }
        self.inner.insert(conf.name.clone(), conf);
    }

    /// Lists non-destroying records sorted by name.
    ///
    /// `None` lists every namespace; `Some(ns)` only names starting with
    /// `ns` and the delimiter (`Some("")` is the default namespace).
    pub fn list(&self, namespace: Option<&str>) -> Vec<&Conf<A, X>> {
        let prefix = namespace.map(|ns| format!("{}{}", ns, self.delimiter));
        let mut out: Vec<&Conf<A, X>> = self
            .inner
            .values()
            .filter(|c| !c.is_destroying)
            .filter(|c| match &prefix {
                Some(p) => c.name.starts_with(p.as_str()),
                None => true,
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Wraps one record so it can share list rendering.
    pub fn one_list(conf: &Conf<A, X>) -> Vec<&Conf<A, X>> {
        vec![conf]
    }

    /// Every registered name, destroying ones included, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.keys().cloned().collect();
        names.sort();
        names
    }

    /// Names inside `ns`, destroying ones included, sorted.
    pub fn names_in(&self, ns: &str) -> Vec<String> {
        let prefix = format!("{}{}", ns, self.delimiter);
        self.names()
            .into_iter()
            .filter(|n| n.starts_with(prefix.as_str()))
            .collect()
    }

    /// Sets the used flag of a record.
    pub fn set_used(&mut self, name: &str, is_used: bool) -> DatastoreResult<()> {
        self.find_mut(name).map(|c| c.is_used = is_used)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Conf<A, X>> {
        self.inner.values()
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResultCode;
    use pretty_assertions::assert_eq;

    #[derive(Debug, Clone, PartialEq, Default)]
    struct TestAttr {
        value: u64,
    }

    fn registry() -> Registry<TestAttr> {
        let mut reg = Registry::new("/");
        for name in ["/a", "/b", "ns/a", "ns/c", "other/z"] {
            reg.add(Conf::new(name)).unwrap();
        }
        reg
    }

    fn names(list: Vec<&Conf<TestAttr>>) -> Vec<&str> {
        list.into_iter().map(|c| c.name.as_str()).collect()
    }

    #[test]
    fn test_add_find_delete() {
        let mut reg: Registry<TestAttr> = Registry::new(":");
        assert!(reg.is_empty());
        reg.add(Conf::new(":x")).unwrap();
        assert_eq!(
            reg.add(Conf::new(":x")).unwrap_err().result_code(),
            ResultCode::AlreadyExists
        );
        assert_eq!(reg.find(":x").unwrap().name, ":x");
        assert_eq!(reg.find(":y").unwrap_err().result_code(), ResultCode::NotFound);

        reg.delete(":x").unwrap();
        assert_eq!(reg.delete(":x").unwrap_err().result_code(), ResultCode::NotFound);
    }

    #[test]
    fn test_find_never_creates() {
        let mut reg: Registry<TestAttr> = Registry::new(":");
        assert!(reg.find_mut(":missing").is_err());
        assert!(reg.is_empty());
    }

    #[test]
    fn test_list_namespace_prefix() {
        let reg = registry();
        assert_eq!(names(reg.list(Some(""))), vec!["/a", "/b"]);
        assert_eq!(names(reg.list(Some("ns"))), vec!["ns/a", "ns/c"]);
        assert!(reg.list(Some("n")).is_empty());
    }

    #[test]
    fn test_list_all_is_union_of_namespaces() {
        let reg = registry();
        let mut union = names(reg.list(Some("")));
        union.extend(names(reg.list(Some("ns"))));
        union.extend(names(reg.list(Some("other"))));
        union.sort();
        assert_eq!(names(reg.list(None)), union);
    }

    #[test]
    fn test_list_skips_destroying() {
        let mut reg = registry();
        reg.find_mut("/a").unwrap().is_destroying = true;
        assert_eq!(names(reg.list(Some(""))), vec!["/b"]);
        assert!(!names(reg.list(None)).contains(&"/a"));
        assert!(reg.names().contains(&"/a".to_string()));
    }

    #[test]
    fn test_one_list_matches_list_shape() {
        let reg = registry();
        let conf = reg.find("ns/c").unwrap();
        assert_eq!(names(Registry::one_list(conf)), vec!["ns/c"]);
        assert!(names(reg.list(Some("ns"))).contains(&"ns/c"));
    }

    #[test]
    fn test_take_restore() {
        let mut reg = registry();
        let mut conf = reg.take("/a").unwrap();
        assert!(!reg.contains("/a"));
        conf.modified.as_mut().unwrap().value = 7;
        reg.restore(conf);
        assert_eq!(reg.find("/a").unwrap().modified.as_ref().unwrap().value, 7);
    }

    #[test]
    #[should_panic]
    fn test_restore_corrupted_panics() {
        let mut reg: Registry<TestAttr> = Registry::new(":");
        let mut conf = Conf::new(":x");
        conf.modified = None;
        reg.restore(conf);
    }

    #[test]
    fn test_set_used() {
        let mut reg = registry();
        reg.set_used("/b", true).unwrap();
        assert!(reg.find("/b").unwrap().is_used);
        assert!(reg.set_used("/nope", true).is_err());
    }
}
