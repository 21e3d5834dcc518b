#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Package compilation for the kiln agent
//!
//! [`ConcreteCompiler`] drives one compile from a clean dependency
//! environment to an uploaded artifact:
//!
//! 1. remove every applied dependency, then apply the requested ones
//! 2. fetch the source archive and unpack it atomically into
//!    `<compile_root>/<name>` ([`AtomicUnpacker`])
//! 3. install and enable an empty bundle for the compiled output
//! 4. run the `packaging` script when the source tree has one
//! 5. archive the bundle, keeping the source's compression characteristic,
//!    and upload it
//! 6. disable and uninstall the bundle and remove the dependencies again
//!
//! The compile directory is removed on every exit path once it has been
//! unpacked. Compiles of the same package name must not overlap; wrap the
//! compiler in [`SerializedCompiler`] when the caller cannot guarantee that.

mod compiler;
mod packaging;
mod serialized;
mod unpack;

pub use compiler::{Collaborators, Compiler, ConcreteCompiler};
pub use packaging::{
    PackagingScript, ENV_COMPILE_TARGET, ENV_INSTALL_TARGET, ENV_PACKAGE_NAME,
    ENV_PACKAGE_VERSION, PACKAGING_TASK,
};
pub use serialized::SerializedCompiler;
pub use unpack::AtomicUnpacker;
