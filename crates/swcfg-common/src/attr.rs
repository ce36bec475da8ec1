//! Double-buffered attribute storage for managed objects.
//!
//! Each managed object keeps two snapshots of its attributes:
//!
//! - `current`: what is live in the dataplane (absent until first commit)
//! - `modified`: what is staged for the next commit (absent when idle)
//!
//! Command handlers only ever touch `modified`. Moving `modified` into
//! `current` is the transaction coordinator's job.

use std::fmt;

use crate::error::{DatastoreError, DatastoreResult, ResultCode};
use crate::state::InterpState;

/// Attribute set of one object kind.
///
/// `Default` is the zero-valued create, `Clone` the deep duplicate and
/// `PartialEq` the structural equality used for no-op detection.
pub trait Attr: Clone + PartialEq + Default + fmt::Debug + Send + Sync + 'static {}

impl<T> Attr for T where T: Clone + PartialEq + Default + fmt::Debug + Send + Sync + 'static {}

/// Compares two optional snapshots; absent equals absent only.
pub fn attr_equals<A: PartialEq>(a: Option<&A>, b: Option<&A>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Registry record of one managed object.
#[derive(Debug, Clone, PartialEq)]
pub struct Conf<A, X = ()> {
    /// Fully-qualified name.
    pub name: String,
    pub current: Option<A>,
    pub modified: Option<A>,
    /// Another object depends on this one.
    pub is_used: bool,
    pub is_enabled: bool,
    pub is_enabling: bool,
    pub is_disabling: bool,
    pub is_destroying: bool,
    /// Kind-specific bookkeeping outside the attribute set.
    pub extra: X,
}

impl<A: Attr, X: Default> Conf<A, X> {
    /// A fresh record staged for creation with default attributes.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            current: None,
            modified: Some(A::default()),
            is_used: false,
            is_enabled: false,
            is_enabling: false,
            is_disabling: false,
            is_destroying: false,
            extra: X::default(),
        }
    }
}

impl<A: Attr, X> Conf<A, X> {
    /// True while the object has never been committed.
    pub fn is_pending_create(&self) -> bool {
        self.current.is_none() && self.modified.is_some()
    }

    /// True if a staged edit differs from what is live.
    pub fn is_modified(&self) -> bool {
        self.modified.is_some() && !attr_equals(self.current.as_ref(), self.modified.as_ref())
    }

    /// Staged attributes if any, otherwise the live ones.
    pub fn latest(&self) -> Option<&A> {
        self.modified.as_ref().or(self.current.as_ref())
    }

    /// Stages a copy of `current` unless an edit is already pending.
    pub fn dup_modified(&mut self) -> DatastoreResult<()> {
        if self.modified.is_some() {
            return Ok(());
        }
        match &self.current {
            Some(current) => {
                self.modified = Some(current.clone());
                Ok(())
            }
            None => Err(DatastoreError::interp(
                ResultCode::NotFound,
                format!("Not found attr. : name = {}", self.name),
            )),
        }
    }

    /// Mutable access to the staged attributes.
    pub fn modified_mut(&mut self) -> DatastoreResult<&mut A> {
        let name = &self.name;
        self.modified.as_mut().ok_or_else(|| {
            DatastoreError::interp(ResultCode::NotFound, format!("Not found attr. : name = {}", name))
        })
    }

    /// Swaps `current` and `modified` when an edit is staged.
    ///
    /// Applying it twice restores the starting pair.
    pub fn switch_attr(&mut self) {
        if self.modified.is_some() {
            std::mem::swap(&mut self.current, &mut self.modified);
        }
    }

    /// Promotes `modified` to `current`.
    ///
    /// A rolled-back create keeps its staged attributes so the deferred
    /// delete can still recognise it.
    pub fn update_current_attr(&mut self, state: InterpState) {
        if state == InterpState::Rolledback && self.is_pending_create() {
            return;
        }
        if let Some(modified) = self.modified.take() {
            self.current = Some(modified);
        }
    }

    /// Resolves atomic intent flags into `is_enabled`.
    pub fn resolve_enabled(&mut self) {
        if !self.is_enabled {
            if self.is_enabling {
                self.is_enabled = true;
            }
        } else if self.is_disabling {
            self.is_enabled = false;
        }
    }

    /// Undoes an intent the committing pass already resolved.
    ///
    /// `is_enabling` only survives on a record that was disabled when the
    /// block began, and `is_disabling` only on one that was enabled, so an
    /// intent whose `is_enabled` does not match it never took effect and is
    /// dropped instead.
    pub fn revert_enabled(&mut self) {
        if self.is_enabling {
            if self.is_enabled {
                self.is_enabled = false;
            } else {
                self.is_enabling = false;
            }
        } else if self.is_disabling {
            if self.is_enabled {
                self.is_disabling = false;
            } else {
                self.is_enabled = true;
            }
        }
    }

    pub fn clear_intent(&mut self) {
        self.is_enabling = false;
        self.is_disabling = false;
    }

    /// Drops every transient flag an aborted transaction may have set.
    pub fn abort_intent(&mut self) {
        self.is_destroying = false;
        self.clear_intent();
    }

    /// Marks the object for enabling inside an atomic block.
    pub fn mark_enabling(&mut self) {
        self.is_enabling = true;
        self.is_disabling = false;
    }

    /// Marks the object for disabling inside an atomic block.
    pub fn mark_disabling(&mut self) {
        self.is_enabling = false;
        self.is_disabling = true;
    }

    /// Marks the object for destruction inside an atomic block.
    pub fn mark_destroying(&mut self) {
        self.is_destroying = true;
        if self.is_enabled {
            self.mark_disabling();
        } else {
            self.clear_intent();
        }
    }

    /// True if the record violates the registration invariant.
    pub fn is_corrupted(&self) -> bool {
        self.current.is_none() && self.modified.is_none()
    }
}

impl<A: Attr, X: Clone> Conf<A, X> {
    /// Copies the record under a new name, as used by dry runs.
    pub fn duplicate(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Default)]
    struct TestAttr {
        a: u32,
    }

    fn committed(a: u32) -> Conf<TestAttr> {
        let mut conf: Conf<TestAttr> = Conf::new(":x");
        conf.modified = Some(TestAttr { a });
        conf.update_current_attr(InterpState::AutoCommit);
        conf
    }

    #[test]
    fn test_new_is_pending_create() {
        let conf: Conf<TestAttr> = Conf::new(":x");
        assert!(conf.is_pending_create());
        assert!(conf.is_modified());
        assert!(!conf.is_corrupted());
    }

    #[test]
    fn test_attr_equals() {
        let a = TestAttr { a: 1 };
        assert!(attr_equals::<TestAttr>(None, None));
        assert!(!attr_equals(None, Some(&a)));
        assert!(attr_equals(Some(&a), Some(&a.clone())));
        assert!(!attr_equals(Some(&a), Some(&TestAttr { a: 2 })));
    }

    #[test]
    fn test_dup_modified() {
        let mut conf = committed(1);
        assert!(conf.modified.is_none());
        conf.dup_modified().unwrap();
        assert_eq!(conf.modified, Some(TestAttr { a: 1 }));
        assert!(!conf.is_modified());

        conf.modified_mut().unwrap().a = 2;
        conf.dup_modified().unwrap();
        assert_eq!(conf.modified, Some(TestAttr { a: 2 }));
    }

    #[test]
    fn test_dup_modified_without_attrs() {
        let mut conf: Conf<TestAttr> = Conf::new(":x");
        conf.modified = None;
        let err = conf.dup_modified().unwrap_err();
        assert_eq!(err.result_code(), ResultCode::NotFound);
    }

    #[test]
    fn test_switch_attr_is_its_own_inverse() {
        let mut conf = committed(1);
        conf.modified = Some(TestAttr { a: 2 });
        let before = conf.clone();

        conf.switch_attr();
        assert_eq!(conf.current, Some(TestAttr { a: 2 }));
        assert_eq!(conf.modified, Some(TestAttr { a: 1 }));

        conf.switch_attr();
        assert_eq!(conf, before);
    }

    #[test]
    fn test_switch_attr_without_edit_is_noop() {
        let mut conf = committed(1);
        conf.switch_attr();
        assert_eq!(conf.current, Some(TestAttr { a: 1 }));
        assert!(conf.modified.is_none());
    }

    #[test]
    fn test_rolledback_create_keeps_staged_attr() {
        let mut conf: Conf<TestAttr> = Conf::new(":x");
        conf.update_current_attr(InterpState::Rolledback);
        assert!(conf.is_pending_create());

        conf.update_current_attr(InterpState::Committed);
        assert_eq!(conf.current, Some(TestAttr::default()));
        assert!(conf.modified.is_none());
    }

    #[test]
    fn test_resolve_enabled() {
        let mut conf = committed(1);
        conf.mark_enabling();
        conf.resolve_enabled();
        assert!(conf.is_enabled);

        conf.mark_disabling();
        conf.resolve_enabled();
        assert!(!conf.is_enabled);

        conf.mark_destroying();
        assert!(conf.is_destroying && !conf.is_disabling && !conf.is_enabling);
        conf.abort_intent();
        assert!(!conf.is_destroying && !conf.is_disabling && !conf.is_enabling);

        conf.is_enabled = true;
        conf.mark_destroying();
        assert!(conf.is_destroying && conf.is_disabling);
    }

    #[test]
    fn test_revert_enabled() {
        let mut conf = committed(1);
        conf.mark_enabling();
        conf.resolve_enabled();
        conf.revert_enabled();
        assert!(!conf.is_enabled);
        assert!(conf.is_enabling);

        let mut conf = committed(1);
        conf.is_enabled = true;
        conf.mark_destroying();
        conf.resolve_enabled();
        conf.revert_enabled();
        assert!(conf.is_enabled);
        assert!(conf.is_disabling);

        // Never resolved: nothing to undo.
        let mut conf = committed(1);
        conf.mark_enabling();
        conf.revert_enabled();
        assert!(!conf.is_enabled);
        assert!(!conf.is_enabling);
    }
}
