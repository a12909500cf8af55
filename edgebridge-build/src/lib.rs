use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

const DEFAULT_STATIC_DIR_NAME: &str = "static";

/// Directories produced by the client and server builds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenerateOptions {
    pub client_out_dir: PathBuf,
    pub server_out_dir: PathBuf,
    /// Name of the static directory created next to the server bundle (defaults to `static`).
    pub static_dir_name: String,
}

impl GenerateOptions {
    pub fn new(client_out_dir: impl Into<PathBuf>, server_out_dir: impl Into<PathBuf>) -> Self {
        Self {
            client_out_dir: client_out_dir.into(),
            server_out_dir: server_out_dir.into(),
            static_dir_name: DEFAULT_STATIC_DIR_NAME.to_owned(),
        }
    }

    pub fn static_dir_name(mut self, name: impl Into<String>) -> Self {
        self.static_dir_name = name.into();
        self
    }

    /// Where the client output ends up.
    pub fn static_dir(&self) -> PathBuf {
        self.server_out_dir.join(&self.static_dir_name)
    }
}

/// Errors emitted by [`generate`].
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("client build output {0:?} does not exist or is not a directory")]
    MissingClientOutput(PathBuf),
    #[error("client build output {0:?} is already the static directory")]
    SameDirectory(PathBuf),
    #[error("io error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> BuildError + '_ {
    move |source| BuildError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Moves the client build output into the static directory the adapter serves from.
///
/// Any previous static directory is deleted first and missing parents are created. The move is a
/// single rename when source and target share a filesystem, and a copy followed by removal of the
/// source otherwise. Returns the final static directory.
pub async fn generate(options: &GenerateOptions) -> Result<PathBuf, BuildError> {
    let client = &options.client_out_dir;
    let target = options.static_dir();

    match tokio::fs::metadata(client).await {
        Ok(metadata) if metadata.is_dir() => {}
        _ => return Err(BuildError::MissingClientOutput(client.clone())),
    }
    if same_path(client, &target).await {
        return Err(BuildError::SameDirectory(client.clone()));
    }

    remove_existing(&target).await?;
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(io_error(parent))?;
    }

    match tokio::fs::rename(client, &target).await {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::CrossesDevices => {
            tracing::debug!(from = ?client, to = ?target, "rename crosses filesystems; copying");
            copy_dir(client, &target).await?;
            tokio::fs::remove_dir_all(client)
                .await
                .map_err(io_error(client))?;
        }
        Err(err) => return Err(io_error(client)(err)),
    }

    tracing::info!(static_dir = ?target, "moved client build output");
    Ok(target)
}

async fn same_path(a: &Path, b: &Path) -> bool {
    match (tokio::fs::canonicalize(a).await, tokio::fs::canonicalize(b).await) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

async fn remove_existing(target: &Path) -> Result<(), BuildError> {
    let metadata = match tokio::fs::symlink_metadata(target).await {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(io_error(target)(err)),
    };

    let removed = if metadata.is_dir() {
        tokio::fs::remove_dir_all(target).await
    } else {
        tokio::fs::remove_file(target).await
    };
    removed.map_err(io_error(target))
}

/// Recursively copies `from` into a new directory `to`.
pub async fn copy_dir(from: &Path, to: &Path) -> Result<(), BuildError> {
    let mut pending = vec![(from.to_path_buf(), to.to_path_buf())];
    while let Some((source, destination)) = pending.pop() {
        tokio::fs::create_dir_all(&destination)
            .await
            .map_err(io_error(&destination))?;

        let mut entries = tokio::fs::read_dir(&source)
            .await
            .map_err(io_error(&source))?;
        while let Some(entry) = entries.next_entry().await.map_err(io_error(&source))? {
            let path = entry.path();
            let file_type = entry.file_type().await.map_err(io_error(&path))?;
            let copy_to = destination.join(entry.file_name());
            if file_type.is_dir() {
                pending.push((path, copy_to));
            } else {
                tokio::fs::copy(&path, &copy_to)
                    .await
                    .map_err(io_error(&path))?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, contents: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    #[tokio::test]
    async fn moves_client_output_next_to_server_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let client = dir.path().join("dist");
        let server = dir.path().join("server/aws");
        write(&client.join("build/q-abc.js"), "js");
        write(&client.join("favicon.svg"), "<svg/>");

        let target = generate(&GenerateOptions::new(&client, &server))
            .await
            .expect("generate");

        assert_eq!(target, server.join("static"));
        assert_eq!(std::fs::read_to_string(target.join("build/q-abc.js")).unwrap(), "js");
        assert_eq!(std::fs::read_to_string(target.join("favicon.svg")).unwrap(), "<svg/>");
        assert!(!client.exists());
    }

    #[tokio::test]
    async fn replaces_previous_static_directory() {
        let dir = tempfile::tempdir().unwrap();
        let client = dir.path().join("dist");
        let server = dir.path().join("server");
        write(&client.join("robots.txt"), "new");
        write(&server.join("static/stale.txt"), "old");

        let target = generate(&GenerateOptions::new(&client, &server))
            .await
            .expect("generate");

        assert!(!target.join("stale.txt").exists());
        assert_eq!(std::fs::read_to_string(target.join("robots.txt")).unwrap(), "new");
    }

    #[tokio::test]
    async fn honours_custom_static_dir_name() {
        let dir = tempfile::tempdir().unwrap();
        let client = dir.path().join("dist");
        write(&client.join("manifest.json"), "{}");

        let options = GenerateOptions::new(&client, dir.path().join("server")).static_dir_name("public");
        let target = generate(&options).await.expect("generate");
        assert!(target.ends_with("server/public"));
        assert!(target.join("manifest.json").exists());
    }

    #[tokio::test]
    async fn missing_client_output_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = generate(&GenerateOptions::new(dir.path().join("nope"), dir.path()))
            .await
            .expect_err("missing");
        assert!(matches!(err, BuildError::MissingClientOutput(_)));
    }

    #[tokio::test]
    async fn refuses_to_replace_itself() {
        let dir = tempfile::tempdir().unwrap();
        let server = dir.path().join("server");
        write(&server.join("static/index.html"), "hi");

        let err = generate(&GenerateOptions::new(server.join("static"), &server))
            .await
            .expect_err("same dir");
        assert!(matches!(err, BuildError::SameDirectory(_)));
        assert!(server.join("static/index.html").exists());
    }

    #[tokio::test]
    async fn copies_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("from");
        write(&from.join("a/b/c.txt"), "deep");
        write(&from.join("top.txt"), "top");

        copy_dir(&from, &dir.path().join("to")).await.expect("copy");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("to/a/b/c.txt")).unwrap(),
            "deep"
        );
        assert!(from.join("top.txt").exists());
    }
}
