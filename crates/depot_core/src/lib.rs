//! # Depot Core
//!
//! The request-handling pipeline between a transport and a document
//! store. For each request addressed to a named collection it:
//! - resolves the intent (query / create / update / delete, single or
//!   multi),
//! - validates and sanitizes the payload against the declared schema,
//! - enforces permissions,
//! - runs user-supplied event scripts with a sandboxed interaction
//!   surface,
//! - applies mutation commands and persists through a [`Store`],
//! - emits `<collection>:changed` notifications.
//!
//! The HTTP transport, the script runtime, and the store internals are
//! external collaborators; this crate defines the contracts it
//! consumes from them.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod collection;
mod commands;
mod error;
mod notify;
mod permissions;
mod request;
mod schema;
mod script;

pub use collection::{Collection, CollectionConfig, Response};
pub use commands::{build_commands, exec_commands, Commands};
pub use error::{CollectionError, CollectionResult, ErrorOrigin, ValidationErrors};
pub use notify::{ChangeEvent, ChangeKind, Notifier};
pub use permissions::{
    required_permissions, DefaultVerifier, Permission, PermissionVerifier,
};
pub use request::{is_truthy, Broadcast, Method, Payload, Request, Session};
pub use schema::{PropertyDescriptor, PropertyType, Schema};
pub use script::{
    AccessDecision, EventKind, EventScript, ScriptContext, ScriptDomain, ScriptFailure,
};

pub use depot_store::{Document, Query, Store};
