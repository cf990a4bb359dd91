//! Model references and the local model cache.
//!
//! A model is named by a URI. `stub://` references select built-in
//! detectors that need no artifact, bare paths and `file://` URLs point at a
//! local file, and `http(s)://` URLs are downloaded once into the cache
//! directory and reused on every later start.

use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use url::Url;

use crate::error::{DetectError, Result};

/// Upper bound on a downloaded model artifact.
pub const MAX_MODEL_BYTES: u64 = 512 * 1024 * 1024;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModelRef {
    /// Built-in detector, no artifact (`stub://<name>`).
    Builtin(String),
    Local(PathBuf),
    Remote(Url),
}

impl ModelRef {
    pub fn parse(uri: &str) -> Result<Self> {
        let uri = uri.trim();
        if uri.is_empty() {
            return Err(DetectError::ModelLoad("empty model reference".to_string()));
        }
        if let Some(name) = uri.strip_prefix("stub://") {
            return Ok(ModelRef::Builtin(name.to_string()));
        }

        match Url::parse(uri) {
            Ok(url) if url.scheme() == "file" => url
                .to_file_path()
                .map(ModelRef::Local)
                .map_err(|_| DetectError::ModelLoad(format!("invalid file URL {}", uri))),
            Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(ModelRef::Remote(url)),
            // Single-letter schemes are Windows drive letters.
            Ok(url) if url.scheme().len() == 1 => Ok(ModelRef::Local(PathBuf::from(uri))),
            Ok(url) => Err(DetectError::ModelLoad(format!(
                "unsupported model scheme '{}' in {}",
                url.scheme(),
                uri
            ))),
            Err(url::ParseError::RelativeUrlWithoutBase) => Ok(ModelRef::Local(PathBuf::from(uri))),
            Err(err) => Err(DetectError::ModelLoad(format!(
                "invalid model reference {}: {}",
                uri, err
            ))),
        }
    }

    pub fn is_builtin(&self) -> bool {
        matches!(self, ModelRef::Builtin(_))
    }
}

impl fmt::Display for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelRef::Builtin(name) => write!(f, "stub://{}", name),
            ModelRef::Local(path) => write!(f, "{}", path.display()),
            ModelRef::Remote(url) => write!(f, "{}", url),
        }
    }
}

/// Memory layout of the model's image input.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    /// `1 x 3 x H x W`
    Nchw,
    /// `1 x H x W x 3`
    Nhwc,
}

impl std::str::FromStr for TensorLayout {
    type Err = DetectError;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "nchw" => Ok(Self::Nchw),
            "nhwc" => Ok(Self::Nhwc),
            other => Err(DetectError::Config(format!("unknown tensor layout '{}'", other))),
        }
    }
}

/// Resolves model references to files on disk, downloading remote ones once.
#[derive(Clone, Debug)]
pub struct ModelCache {
    dir: PathBuf,
}

impl ModelCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Cache location for a remote model.
    pub fn cache_path(&self, url: &Url) -> PathBuf {
        let digest = Sha256::digest(url.as_str().as_bytes());
        self.dir.join(format!("{}.onnx", hex::encode(digest)))
    }

    /// Local file holding the model. Remote models are fetched on a cache miss.
    pub fn resolve(&self, model: &ModelRef) -> Result<PathBuf> {
        match model {
            ModelRef::Builtin(name) => Err(DetectError::ModelLoad(format!(
                "built-in model '{}' has no artifact",
                name
            ))),
            ModelRef::Local(path) => {
                if path.is_file() {
                    Ok(path.clone())
                } else {
                    Err(DetectError::ModelLoad(format!(
                        "model file {} not found",
                        path.display()
                    )))
                }
            }
            ModelRef::Remote(url) => {
                let path = self.cache_path(url);
                if path.is_file() {
                    log::info!("model cache hit for {} at {}", url, path.display());
                    return Ok(path);
                }
                self.fetch(url, &path)?;
                Ok(path)
            }
        }
    }

    #[cfg(feature = "remote-model")]
    fn fetch(&self, url: &Url, dest: &Path) -> Result<()> {
        let fail = |what: &str, err: &dyn fmt::Display| {
            DetectError::ModelLoad(format!("{} {}: {}", what, url, err))
        };

        std::fs::create_dir_all(&self.dir)
            .map_err(|e| fail("create model cache for", &e))?;

        log::info!("fetching model {}", url);
        let response = ureq::get(url.as_str())
            .call()
            .map_err(|e| fail("download", &e))?;

        let copied = store_download(response.into_reader(), dest, MAX_MODEL_BYTES)
            .map_err(|e| fail("store", &e))?;

        log::info!("model {} cached at {} ({} bytes)", url, dest.display(), copied);
        Ok(())
    }

    #[cfg(not(feature = "remote-model"))]
    fn fetch(&self, url: &Url, _dest: &Path) -> Result<()> {
        Err(DetectError::ModelLoad(format!(
            "{} is not cached and remote fetching requires the remote-model feature",
            url
        )))
    }
}

/// Stream `reader` into `<dest>.part`, sync it and rename it over `dest`.
/// The partial file never outlives a failure.
#[cfg(any(feature = "remote-model", test))]
fn store_download(reader: impl std::io::Read, dest: &Path, limit: u64) -> std::io::Result<u64> {
    use std::io::{Read, Write};

    let partial = dest.with_extension("part");
    let write = || -> std::io::Result<u64> {
        let mut file = std::fs::File::create(&partial)?;
        let copied = std::io::copy(&mut reader.take(limit + 1), &mut file)?;
        if copied > limit {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("model exceeds {} bytes", limit),
            ));
        }
        file.flush()?;
        file.sync_all()?;
        drop(file);
        std::fs::rename(&partial, dest)?;
        Ok(copied)
    };
    let result = write();
    if result.is_err() {
        let _ = std::fs::remove_file(&partial);
    }
    result
}
