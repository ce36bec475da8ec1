//! Common building blocks of the switch configuration datastore.
//!
//! This crate holds the kind-agnostic parts of the engine:
//!
//! - [`Conf`] / [`Attr`]: double-buffered attribute records
//! - [`Registry`]: name-keyed store that never auto-creates entries
//! - [`Namespaces`] / [`SearchTarget`]: namespace bookkeeping and resolution
//! - [`InterpState`]: transaction states handed to every command
//! - [`DatastoreError`] / [`ResultCode`]: error taxonomy
//! - [`Reply`]: the JSON result envelope
//! - [`RetryPolicy`]: auto-commit retry bound
//!
//! # Example
//!
//! ```
//! use swcfg_common::{Conf, InterpState, Registry};
//!
//! #[derive(Debug, Clone, PartialEq, Default)]
//! struct Attr { expire: u64 }
//!
//! let mut reg: Registry<Attr> = Registry::new(":");
//! reg.add(Conf::new(":l2b0")).unwrap();
//!
//! let conf = reg.find_mut(":l2b0").unwrap();
//! conf.modified.as_mut().unwrap().expire = 300;
//! conf.update_current_attr(InterpState::AutoCommit);
//! assert_eq!(conf.current.as_ref().unwrap().expire, 300);
//! ```

mod attr;
mod error;
mod json;
mod namespace;
mod opt;
mod registry;
mod retry;
mod state;

pub use attr::{attr_equals, Attr, Conf};
pub use error::{DatastoreError, DatastoreResult, DatastoreResultExt, ResultCode};
pub use json::Reply;
pub use namespace::{
    Namespaces, SearchTarget, DEFAULT_DELIMITER, DEFAULT_NAMESPACE_MAX, DRYRUN_NAMESPACE,
};
pub use opt::{
    parse_bool, parse_set_edit, parse_u32, parse_u64, parse_u8, parse_uint, tokenize, SetEdit,
    Tokens,
};
pub use registry::Registry;
pub use retry::{RetryPolicy, DEFAULT_UPDATE_RETRY_MAX};
pub use state::InterpState;
