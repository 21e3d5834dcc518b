//! System setup and initialization

use crate::error::CliError;
use kiln_bundle::{DependencyApplier, FileBundleCollection, PackageApplier};
use kiln_compiler::{Collaborators, Compiler, ConcreteCompiler, SerializedCompiler};
use kiln_config::constants::UNPACK_SUFFIX;
use kiln_config::Config;
use kiln_events::EventSender;
use kiln_net::{BlobstoreDelegator, HttpBlobProvider, LocalBlobstore, NetClient, NetConfig};
use kiln_platform::{FileLoggingCommandRunner, Platform};
use kiln_store::TarballCompressor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Prefixes of scratch entries the agent leaves in its tmp directory
const TMP_PREFIXES: [&str; 4] = ["kiln-blob-", "kiln-bundle-", "kiln-archive-", "kiln-inflate-"];

/// Wired-up collaborators for the commands that touch the agent's layout
pub struct Services {
    pub compiler: Box<dyn Compiler>,
    pub applier: Arc<dyn DependencyApplier>,
}

/// System setup and component initialization
pub struct SystemSetup {
    config: Config,
}

impl SystemSetup {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Prepare the directory layout and build the compile services
    pub async fn initialize(&self, event_sender: EventSender) -> Result<Services, CliError> {
        info!("Initializing kiln components");

        self.ensure_system_directories().await?;
        self.clean_orphaned_scratch().await?;

        let services = self.build_services(event_sender)?;
        info!("System initialization completed");
        Ok(services)
    }

    fn required_dirs(&self) -> Vec<PathBuf> {
        let paths = &self.config.paths;
        vec![
            paths.compile_dir(),
            paths.packages_dir(),
            paths.enable_dir(),
            paths.blobs_dir(),
            paths.tmp_dir(),
            paths.compilation_logs_dir(),
        ]
    }

    async fn ensure_system_directories(&self) -> Result<(), CliError> {
        for dir in self.required_dirs() {
            if !dir.exists() {
                debug!("Creating directory: {}", dir.display());
                tokio::fs::create_dir_all(&dir).await.map_err(|e| {
                    CliError::Setup(format!("Failed to create {}: {e}", dir.display()))
                })?;
            }

            let metadata = tokio::fs::metadata(&dir)
                .await
                .map_err(|e| CliError::Setup(format!("Cannot access {}: {e}", dir.display())))?;
            if metadata.permissions().readonly() {
                return Err(CliError::Setup(format!(
                    "No write permission for {}",
                    dir.display()
                )));
            }
        }
        Ok(())
    }

    /// Remove unpack scratch directories and tmp files left by an
    /// interrupted run
    async fn clean_orphaned_scratch(&self) -> Result<(), CliError> {
        let paths = &self.config.paths;
        let mut cleaned = 0;
        cleaned +=
            remove_matching(&paths.compile_dir(), |name| name.ends_with(UNPACK_SUFFIX)).await?;
        cleaned += remove_matching(&paths.tmp_dir(), |name| {
            TMP_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
        })
        .await?;

        if cleaned > 0 {
            info!("Cleaned {} orphaned scratch entries", cleaned);
        }
        Ok(())
    }

    fn build_services(&self, event_sender: EventSender) -> Result<Services, CliError> {
        let config = &self.config;
        let paths = &config.paths;
        let platform = Platform::native();
        let filesystem = platform.filesystem();
        let tmp_dir = paths.tmp_dir();

        let client = NetClient::new(NetConfig::from(&config.network))?;
        let blobs = Arc::new(BlobstoreDelegator::new(
            HttpBlobProvider::new(client, &tmp_dir),
            LocalBlobstore::new(paths.blobs_dir(), &tmp_dir),
        ));
        let compressor = Arc::new(TarballCompressor::new(Arc::clone(&filesystem), &tmp_dir));
        let bundles = Arc::new(FileBundleCollection::new(
            paths.packages_dir(),
            paths.enable_dir(),
            Arc::clone(&filesystem),
        ));
        let applier: Arc<dyn DependencyApplier> = Arc::new(PackageApplier::new(
            bundles.clone(),
            blobs.clone(),
            compressor.clone(),
            Arc::clone(&filesystem),
            &tmp_dir,
        ));
        let runner = Arc::new(FileLoggingCommandRunner::new(
            platform.process(),
            Arc::clone(&filesystem),
            paths.compilation_logs_dir(),
            config.compile.output_truncate_bytes,
        ));

        let compiler = ConcreteCompiler::new(
            Collaborators {
                applier: Arc::clone(&applier),
                bundles,
                blobs,
                compressor,
                filesystem,
                runner,
            },
            paths.compile_dir(),
        )
        .with_script_shell(
            config.compile.script_shell.clone(),
            config.compile.script_shell_args.clone(),
        )
        .with_event_sender(event_sender);

        let compiler: Box<dyn Compiler> = if config.compile.serialize_by_name {
            Box::new(SerializedCompiler::new(compiler))
        } else {
            Box::new(compiler)
        };

        Ok(Services { compiler, applier })
    }
}

/// Remove the entries of `dir` whose names satisfy `matches`, returning how
/// many were removed
async fn remove_matching<F>(dir: &Path, matches: F) -> Result<usize, CliError>
where
    F: Fn(&str) -> bool,
{
    if !dir.exists() {
        return Ok(0);
    }

    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| CliError::Setup(format!("Failed to read {}: {e}", dir.display())))?;

    let mut cleaned = 0;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| CliError::Setup(format!("Failed to read directory entry: {e}")))?
    {
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        if !matches(name) {
            continue;
        }

        debug!("Removing orphaned scratch entry: {}", name);
        let path = entry.path();
        let removed = if entry.file_type().await.is_ok_and(|t| t.is_dir()) {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        match removed {
            Ok(()) => cleaned += 1,
            Err(e) => warn!("Failed to remove orphaned scratch entry {}: {}", name, e),
        }
    }

    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config_in(base: &Path) -> Config {
        let mut config = Config::default();
        config.paths.base_dir = base.to_path_buf();
        config
    }

    #[tokio::test]
    async fn test_initialize_creates_layout() {
        let temp = tempdir().unwrap();
        let config = config_in(temp.path());
        let (sender, _receiver) = kiln_events::channel();

        SystemSetup::new(config.clone())
            .initialize(sender)
            .await
            .unwrap();

        assert!(config.paths.compile_dir().is_dir());
        assert!(config.paths.enable_dir().is_dir());
        assert!(config.paths.blobs_dir().is_dir());
        assert!(config.paths.compilation_logs_dir().is_dir());
    }

    #[tokio::test]
    async fn test_orphaned_scratch_is_removed() {
        let temp = tempdir().unwrap();
        let config = config_in(temp.path());
        let compile_dir = config.paths.compile_dir();
        let tmp_dir = config.paths.tmp_dir();
        tokio::fs::create_dir_all(compile_dir.join(format!("foo{UNPACK_SUFFIX}")))
            .await
            .unwrap();
        tokio::fs::create_dir_all(compile_dir.join("bar"))
            .await
            .unwrap();
        tokio::fs::create_dir_all(&tmp_dir).await.unwrap();
        tokio::fs::write(tmp_dir.join("kiln-blob-1234"), b"partial")
            .await
            .unwrap();
        tokio::fs::write(tmp_dir.join("keep.txt"), b"mine")
            .await
            .unwrap();

        let (sender, _receiver) = kiln_events::channel();
        SystemSetup::new(config).initialize(sender).await.unwrap();

        assert!(!compile_dir.join(format!("foo{UNPACK_SUFFIX}")).exists());
        assert!(compile_dir.join("bar").is_dir());
        assert!(!tmp_dir.join("kiln-blob-1234").exists());
        assert!(tmp_dir.join("keep.txt").exists());
    }
}
