//! Fixed names and defaults shared by the agent's on-disk layout

pub const DEFAULT_BASE_DIR: &str = "/var/vcap";

/// Name of the build script looked up at the root of an unpacked source tree
pub const PACKAGING_SCRIPT: &str = "packaging";

/// Suffix of the scratch directory an archive is unpacked into before it is
/// moved into place
pub const UNPACK_SUFFIX: &str = "-kiln-unpack";

/// Sub-directory of the log directory holding packaging script output
pub const COMPILATION_LOG_DIR: &str = "compilation";

pub const ENV_BASE_DIR: &str = "KILN_BASE_DIR";
pub const ENV_COMPILE_DIR: &str = "KILN_COMPILE_DIR";
pub const ENV_BLOBS_DIR: &str = "KILN_BLOBS_DIR";
pub const ENV_NETWORK_TIMEOUT: &str = "KILN_NETWORK_TIMEOUT";
pub const ENV_NETWORK_RETRIES: &str = "KILN_NETWORK_RETRIES";
pub const ENV_OUTPUT: &str = "KILN_OUTPUT";
