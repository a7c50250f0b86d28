//! Catalog of remote services a Jacscript program can talk to.
//!
//! A [`ServiceSpec`] lists the registers, events and commands a service
//! class exposes and the wire layout of their payloads. The compiler looks
//! roles up by service name (`roles.button()`) and members by packet name
//! (`btn.pressed`); the image only ever carries the numeric identifiers.
//!
//! ## Modules
//!
//! - [`spec`] - service, packet and field descriptions
//! - [`catalog`] - [`ServiceCatalog`], name and class lookups
//! - [`builtin`] - the services every catalog starts with
//!
//! ## Example
//!
//! ```
//! use jacscript_registry::ServiceCatalog;
//!
//! let catalog = ServiceCatalog::with_builtins();
//! let button = catalog.by_name("button").unwrap();
//! let pressed = catalog.member(button, "pressed").unwrap();
//! assert!(pressed.kind.is_event());
//! ```

pub mod builtin;
pub mod catalog;
pub mod spec;

pub use catalog::{RegistryError, ServiceCatalog};
pub use spec::{FieldSpec, PacketKind, PacketSpec, ServiceSpec, camel_case};
