//! Namespace bookkeeping and name resolution.
//!
//! Object names are stored fully qualified: `<namespace><delimiter><name>`.
//! The default namespace is the empty string, so its objects are stored as
//! `<delimiter><name>`.
//!
//! Resolution of a name argument:
//!
//! | input          | meaning                                   |
//! |----------------|-------------------------------------------|
//! | `a`            | object `a` in the current namespace       |
//! | `:`            | every object of the default namespace     |
//! | `ns:`          | every object of namespace `ns`            |
//! | `:a`, `ns:a`   | exactly that object                       |

use std::collections::BTreeSet;

use crate::error::{DatastoreError, DatastoreResult, ResultCode};

/// Default namespace delimiter.
pub const DEFAULT_DELIMITER: &str = ":";

/// Reserved namespace holding the dry-run copy of the configuration.
pub const DRYRUN_NAMESPACE: &str = "dryrun";

/// Default upper bound on namespace name length.
pub const DEFAULT_NAMESPACE_MAX: usize = 128;

/// What a name argument refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchTarget {
    /// The delimiter alone: all objects in the default namespace.
    DefaultNamespace,
    /// `ns` followed by the delimiter: all objects in `ns`.
    Namespace(String),
    /// A single fully-qualified object.
    Fullname(String),
}

/// Known namespaces plus the interpreter's current one.
#[derive(Debug, Clone)]
pub struct Namespaces {
    delimiter: String,
    max_len: usize,
    known: BTreeSet<String>,
    current: String,
    saved: Option<String>,
}

impl Default for Namespaces {
    fn default() -> Self {
        Self::new(DEFAULT_DELIMITER, DEFAULT_NAMESPACE_MAX)
    }
}

impl Namespaces {
    pub fn new(delimiter: impl Into<String>, max_len: usize) -> Self {
        Self {
            delimiter: delimiter.into(),
            max_len,
            known: BTreeSet::new(),
            current: String::new(),
            saved: None,
        }
    }

    pub fn delimiter(&self) -> &str {
        &self.delimiter
    }

    /// Current namespace; empty for the default one.
    pub fn current(&self) -> &str {
        &self.current
    }

    /// Namespace that was current before a dry run started.
    pub fn saved(&self) -> Option<&str> {
        self.saved.as_deref()
    }

    /// Returns true if `ns` may be used as a namespace.
    pub fn exists(&self, ns: &str) -> bool {
        ns.is_empty() || self.known.contains(ns) || (ns == DRYRUN_NAMESPACE && self.saved.is_some())
    }

    /// Registers a new namespace.
    pub fn add(&mut self, ns: &str) -> DatastoreResult<()> {
        if ns.is_empty() || ns.contains(self.delimiter.as_str()) {
            return Err(DatastoreError::invalid_args());
        }
        if ns == DRYRUN_NAMESPACE {
            return Err(DatastoreError::code(ResultCode::InvalidNamespace));
        }
        if ns.len() > self.max_len {
            return Err(DatastoreError::code(ResultCode::TooLong));
        }
        if !self.known.insert(ns.to_string()) {
            return Err(DatastoreError::already_exists());
        }
        Ok(())
    }

    /// Forgets a namespace. The caller destroys its objects first.
    pub fn remove(&mut self, ns: &str) -> DatastoreResult<()> {
        if !self.known.remove(ns) {
            return Err(DatastoreError::not_found());
        }
        if self.current == ns {
            self.current.clear();
        }
        Ok(())
    }

    pub fn set_current(&mut self, ns: &str) -> DatastoreResult<()> {
        if !self.exists(ns) {
            return Err(DatastoreError::not_found());
        }
        self.current = ns.to_string();
        Ok(())
    }

    /// Switches back to the default namespace.
    pub fn unset_current(&mut self) {
        self.current.clear();
    }

    /// Saves the current namespace and switches to the dry-run one.
    pub fn enter_dryrun(&mut self) {
        let previous = std::mem::replace(&mut self.current, DRYRUN_NAMESPACE.to_string());
        self.saved = Some(previous);
    }

    /// Restores the namespace saved by [`Namespaces::enter_dryrun`].
    pub fn leave_dryrun(&mut self) {
        self.current = self.saved.take().unwrap_or_default();
    }

    /// Registered namespaces, sorted.
    pub fn list(&self) -> impl Iterator<Item = &str> {
        self.known.iter().map(String::as_str)
    }

    /// The listing prefix for `ns`: `ns` followed by the delimiter.
    pub fn prefix(&self, ns: &str) -> String {
        format!("{}{}", ns, self.delimiter)
    }

    pub fn create_fullname(&self, ns: &str, name: &str) -> String {
        format!("{}{}{}", ns, self.delimiter, name)
    }

    /// Splits a qualified name at the first delimiter.
    pub fn split_fullname<'a>(&self, fullname: &'a str) -> Option<(&'a str, &'a str)> {
        let idx = fullname.find(self.delimiter.as_str())?;
        Some((&fullname[..idx], &fullname[idx + self.delimiter.len()..]))
    }

    /// Namespace part of a qualified name; the current namespace for a bare one.
    pub fn namespace_of<'a>(&'a self, name: &'a str) -> &'a str {
        match self.split_fullname(name) {
            Some((ns, _)) => ns,
            None => &self.current,
        }
    }

    /// Re-homes a qualified name into `target_ns`.
    pub fn rehome(&self, fullname: &str, target_ns: &str) -> String {
        let local = self
            .split_fullname(fullname)
            .map(|(_, name)| name)
            .unwrap_or(fullname);
        self.create_fullname(target_ns, local)
    }

    /// Resolves a name that designates one object to mutate.
    ///
    /// Bare names land in the current namespace. Qualified names must already
    /// be in the current namespace.
    pub fn fullname(&self, name: &str) -> DatastoreResult<String> {
        if name.is_empty() {
            return Err(DatastoreError::invalid_args());
        }
        match self.split_fullname(name) {
            None => Ok(self.create_fullname(&self.current, name)),
            Some((_, "")) => Err(DatastoreError::invalid_args()),
            Some((ns, _)) if ns == self.current => Ok(name.to_string()),
            Some(_) => Err(DatastoreError::code(ResultCode::InvalidNamespace)),
        }
    }

    /// Resolves a name argument of a show request.
    pub fn search_target(&self, name: &str) -> DatastoreResult<SearchTarget> {
        if name.is_empty() {
            return Err(DatastoreError::invalid_args());
        }
        match name.find(self.delimiter.as_str()) {
            None => self.fullname(name).map(SearchTarget::Fullname),
            Some(_) if name == self.delimiter => Ok(SearchTarget::DefaultNamespace),
            Some(0) => Ok(SearchTarget::Fullname(name.to_string())),
            Some(idx) if idx + self.delimiter.len() == name.len() => {
                Ok(SearchTarget::Namespace(name[..idx].to_string()))
            }
            Some(_) => Ok(SearchTarget::Fullname(name.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn slash() -> Namespaces {
        let mut ns = Namespaces::new("/", DEFAULT_NAMESPACE_MAX);
        ns.add("ns").unwrap();
        ns
    }

    #[test]
    fn test_search_target_three_way() {
        let ns = slash();
        assert_eq!(
            ns.search_target("a").unwrap(),
            SearchTarget::Fullname("/a".to_string())
        );
        assert_eq!(
            ns.search_target("ns/").unwrap(),
            SearchTarget::Namespace("ns".to_string())
        );
        assert_eq!(
            ns.search_target("ns/a").unwrap(),
            SearchTarget::Fullname("ns/a".to_string())
        );
        assert_eq!(ns.search_target("/").unwrap(), SearchTarget::DefaultNamespace);
        assert_eq!(
            ns.search_target("/a").unwrap(),
            SearchTarget::Fullname("/a".to_string())
        );
    }

    #[test]
    fn test_bare_name_follows_current_namespace() {
        let mut ns = slash();
        ns.set_current("ns").unwrap();
        assert_eq!(
            ns.search_target("a").unwrap(),
            SearchTarget::Fullname("ns/a".to_string())
        );
        assert_eq!(ns.fullname("a").unwrap(), "ns/a");
    }

    #[test]
    fn test_fullname_rejects_foreign_namespace() {
        let ns = slash();
        assert_eq!(ns.fullname("/a").unwrap(), "/a");
        assert_eq!(
            ns.fullname("ns/a").unwrap_err().result_code(),
            ResultCode::InvalidNamespace
        );
        assert_eq!(
            ns.fullname("/").unwrap_err().result_code(),
            ResultCode::InvalidArgs
        );
    }

    #[test]
    fn test_add_rules() {
        let mut ns = Namespaces::default();
        assert_eq!(ns.add("a:b").unwrap_err().result_code(), ResultCode::InvalidArgs);
        assert_eq!(
            ns.add(DRYRUN_NAMESPACE).unwrap_err().result_code(),
            ResultCode::InvalidNamespace
        );
        assert_eq!(
            ns.add(&"x".repeat(DEFAULT_NAMESPACE_MAX + 1))
                .unwrap_err()
                .result_code(),
            ResultCode::TooLong
        );
        ns.add("a").unwrap();
        assert_eq!(ns.add("a").unwrap_err().result_code(), ResultCode::AlreadyExists);
    }

    #[test]
    fn test_remove_unsets_current() {
        let mut ns = Namespaces::default();
        ns.add("a").unwrap();
        ns.set_current("a").unwrap();
        ns.remove("a").unwrap();
        assert_eq!(ns.current(), "");
        assert!(ns.remove("a").is_err());
    }

    #[test]
    fn test_dryrun_enter_leave() {
        let mut ns = Namespaces::default();
        ns.add("a").unwrap();
        ns.set_current("a").unwrap();
        ns.enter_dryrun();
        assert_eq!(ns.current(), DRYRUN_NAMESPACE);
        assert_eq!(ns.saved(), Some("a"));
        assert!(ns.exists(DRYRUN_NAMESPACE));
        ns.leave_dryrun();
        assert_eq!(ns.current(), "a");
        assert!(!ns.exists(DRYRUN_NAMESPACE));
    }

    #[test]
    fn test_rehome() {
        let ns = Namespaces::default();
        assert_eq!(ns.rehome(":br0", DRYRUN_NAMESPACE), "dryrun:br0");
        assert_eq!(ns.rehome("a:br0", ""), ":br0");
    }
}
