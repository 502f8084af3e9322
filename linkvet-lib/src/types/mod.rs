#![allow(unreachable_pub)]

mod error;
mod redirects;
mod result;
mod target;

pub use error::{Error, Result};
pub use redirects::Redirects;
pub use result::{ErrorKind, ValidationResult};
pub use target::ValidationTarget;
