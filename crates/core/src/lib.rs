//! Echo core types: the `Echo` custom resource, object keys, target
//! references, field-path extraction and the error taxonomy shared by the
//! reconciler and its collaborators.

#![forbid(unsafe_code)]

mod error;
pub mod observed;
pub mod path;
mod resource;
mod store;

pub use error::{EchoError, EchoResult};
pub use path::{extract, FieldPath};
pub use resource::{Echo, EchoSpec, EchoStatus, ObjectKey, TargetRef};
pub use store::{EchoStore, Resolver};

pub mod prelude {
    pub use super::{
        extract, Echo, EchoError, EchoResult, EchoSpec, EchoStatus, EchoStore, FieldPath, ObjectKey, Resolver,
        TargetRef,
    };
}
