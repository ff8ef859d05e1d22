//! Child-side bootstrap
//!
//! The first code that runs inside a linked child. It registers with the
//! parent's heartbeat server, arms the max-runtime kill switch, and only
//! then hands control to the payload. The payload is looked up by name in a
//! process-local [`registry::PayloadRegistry`] built by the hosting binary.

pub mod boot;
pub mod error;
pub mod registry;

pub use boot::{boot, boot_with_args, BootArgs};
pub use error::{BootstrapError, BootstrapResult};
pub use registry::{PayloadFn, PayloadFuture, PayloadRegistry};
