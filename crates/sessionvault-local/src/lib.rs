//! A filesystem-backed concrete implementation of `sessionvault_core::Backend`.
//!
//! Organizes data under a base directory, keyed by the caller-supplied key
//! string (expected to already carry the `{tenant}/...` prefix):
//!
//! ```text
//! {base_dir}/
//!   {key}                     -- blob keys, written atomically via .tmp + rename
//!   {tenant_id}/.locks/{resource_id}.lock
//! ```

mod backend;

pub use backend::LocalFsBackend;
