//! # NMC Bootstrap
//!
//! Page-side half of the offline layer: keeps exactly one registration of
//! the canonical worker script, and provides the `reset_sw` escape hatch
//! and the build-time kill switch.

pub mod bootstrap;
pub mod container;
pub mod error;
pub mod page;
pub mod registration;

pub use bootstrap::{BootstrapMode, BootstrapOptions, BootstrapReport, Bootstrapper, RESET_MARKER};
pub use container::{ContainerEvent, InMemoryContainer, RegistrationContainer};
pub use error::{BootstrapError, Result};
pub use page::{MemoryPage, PageHost};
pub use registration::{same_script, strip_version, Registration, WorkerHandle};
