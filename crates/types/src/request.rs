//! Compile request and result documents

use crate::{BlobId, Dependency, Package};
use kiln_hash::MultipleDigest;
use serde::{Deserialize, Serialize};

/// A package plus its resolved dependencies, in installation order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileRequest {
    pub package: Package,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
}

/// Identity of an uploaded compiled package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledPackage {
    pub blob_id: BlobId,
    pub digest: MultipleDigest,
}
