//! Core types shared across the codeflow action execution service.
//!
//! This crate carries the data model (tenants, snippets, secrets, execution
//! records, usage counters), the error taxonomy, the store traits the
//! execution path consumes, and error-string sanitization.

pub mod error;
pub mod sanitization;
pub mod store;
pub mod types;

pub use error::{CoreError, CoreResult};
pub use types::{
    ActionKind, ActionResult, AttemptRecord, EncryptedBlob, ExecutionRecord, ExecutionStatus,
    PortalId, SecretRecord, SnippetRecord, TenantRecord, TenantStatus, UsageDay, UsageDelta,
};
