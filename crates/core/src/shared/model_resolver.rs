use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelResolveError {
    #[error("failed to create model directory: {0}")]
    ModelDir(#[source] std::io::Error),
    #[error("download failed for {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to write model to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not determine model directory")]
    NoModelDir,
}

/// A downloadable ONNX model: file name plus canonical URL.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: &'static str,
    pub url: &'static str,
}

/// Progress callback: `(bytes_downloaded, total_bytes)`; total is 0 when unknown.
pub type ProgressFn = Box<dyn Fn(u64, u64) + Send>;

/// Locates a model file, downloading it on first use.
///
/// Looks in `override_dir` (when given) and the per-user model directory
/// before fetching `spec.url` into the model directory.
pub fn resolve(
    spec: ModelSpec,
    override_dir: Option<&Path>,
    progress: Option<ProgressFn>,
) -> Result<PathBuf, ModelResolveError> {
    if let Some(path) = find_existing(spec.name, override_dir)? {
        return Ok(path);
    }

    let model_dir = model_dir()?;
    fs::create_dir_all(&model_dir).map_err(ModelResolveError::ModelDir)?;
    let dest = model_dir.join(spec.name);
    log::info!("Downloading {} from {}", spec.name, spec.url);
    download(spec.url, &dest, progress)?;
    Ok(dest)
}

fn find_existing(
    name: &str,
    override_dir: Option<&Path>,
) -> Result<Option<PathBuf>, ModelResolveError> {
    if let Some(dir) = override_dir {
        let candidate = dir.join(name);
        if candidate.exists() {
            return Ok(Some(candidate));
        }
    }
    let cached = model_dir()?.join(name);
    Ok(cached.exists().then_some(cached))
}

/// Per-user model directory, e.g. `~/.cache/FaceTrack/models/` on Linux.
pub fn model_dir() -> Result<PathBuf, ModelResolveError> {
    #[cfg(target_os = "macos")]
    let base = dirs::data_dir();
    #[cfg(not(target_os = "macos"))]
    let base = dirs::cache_dir();

    base.map(|d| d.join("FaceTrack").join("models"))
        .ok_or(ModelResolveError::NoModelDir)
}

/// Default location of the identity database, e.g.
/// `~/.local/share/FaceTrack/faces.sqlite` on Linux.
pub fn default_database_path() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("FaceTrack").join("faces.sqlite"))
}

fn download(url: &str, dest: &Path, progress: Option<ProgressFn>) -> Result<(), ModelResolveError> {
    let temp_path = dest.with_extension("part");
    let result = download_to(url, dest, &temp_path, progress);
    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

fn download_to(
    url: &str,
    dest: &Path,
    temp_path: &Path,
    progress: Option<ProgressFn>,
) -> Result<(), ModelResolveError> {
    let write_err = |e: std::io::Error| ModelResolveError::Write {
        path: temp_path.to_path_buf(),
        source: e,
    };

    let mut response = reqwest::blocking::get(url)
        .and_then(|r| r.error_for_status())
        .map_err(|e| ModelResolveError::Download {
            url: url.to_string(),
            source: e,
        })?;
    let total = response.content_length().unwrap_or(0);

    let mut file = fs::File::create(temp_path).map_err(write_err)?;
    let mut buf = vec![0u8; 1024 * 1024];
    let mut downloaded: u64 = 0;
    loop {
        let n = response.read(&mut buf).map_err(write_err)?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n]).map_err(write_err)?;
        downloaded += n as u64;
        if let Some(ref cb) = progress {
            cb(downloaded, total);
        }
    }
    file.flush().map_err(write_err)?;
    drop(file);

    fs::rename(temp_path, dest).map_err(|e| ModelResolveError::Write {
        path: dest.to_path_buf(),
        source: e,
    })
}
