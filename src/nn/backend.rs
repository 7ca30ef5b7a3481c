//! Runtime selection of the inference backend.
//!
//! The backend used by detectors that don't have one configured explicitly is taken from the
//! `ULTRAFACE_ONNX_BACKEND` environment variable, which is read once per process.

use std::{
    env::{self, VarError},
    fmt,
    sync::OnceLock,
};

use anyhow::bail;

use super::Backend;

const VAR: &str = "ULTRAFACE_ONNX_BACKEND";

/// The inference backends that can be selected via `ULTRAFACE_ONNX_BACKEND`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnnxBackend {
    Tract,
    OnnxRuntime,
}

impl OnnxBackend {
    /// Parses a backend name as accepted by the environment variable.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "tract" => Some(Self::Tract),
            "onnxruntime" | "ort" => Some(Self::OnnxRuntime),
            _ => None,
        }
    }

    /// Instantiates the selected backend.
    ///
    /// Fails if ONNX Runtime was requested but the crate was built without the `onnxruntime`
    /// feature.
    pub fn instantiate(self) -> anyhow::Result<Box<dyn Backend>> {
        match self {
            Self::Tract => Ok(Box::new(super::Tract)),
            #[cfg(feature = "onnxruntime")]
            Self::OnnxRuntime => Ok(Box::new(super::onnxruntime::OnnxRuntime::new()?)),
            #[cfg(not(feature = "onnxruntime"))]
            Self::OnnxRuntime => {
                bail!("ONNX Runtime backend requested, but the `onnxruntime` feature is disabled")
            }
        }
    }
}

impl fmt::Display for OnnxBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Tract => "tract",
            Self::OnnxRuntime => "onnxruntime",
        })
    }
}

static SELECTED: OnceLock<Result<OnnxBackend, String>> = OnceLock::new();

/// Returns the backend selected by the environment, defaulting to [`OnnxBackend::Tract`].
pub fn selected() -> anyhow::Result<OnnxBackend> {
    let selected = SELECTED.get_or_init(|| {
        let backend = match env::var(VAR).as_deref() {
            Err(VarError::NotPresent) => Ok(OnnxBackend::Tract),
            Ok(name) => {
                OnnxBackend::parse(name).ok_or_else(|| format!("invalid value for `{VAR}`: '{name}'"))
            }
            Err(VarError::NotUnicode(s)) => Err(format!(
                "invalid value for `{VAR}`: {}",
                s.to_string_lossy()
            )),
        };
        match &backend {
            Ok(backend) => log::debug!("using ONNX backend {}", backend),
            Err(msg) => log::error!("{}", msg),
        }
        backend
    });

    match selected {
        Ok(backend) => Ok(*backend),
        Err(msg) => bail!("{}", msg),
    }
}

/// Instantiates the backend selected by the environment.
pub fn from_env() -> anyhow::Result<Box<dyn Backend>> {
    selected()?.instantiate()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse() {
        assert_eq!(OnnxBackend::parse("tract"), Some(OnnxBackend::Tract));
        assert_eq!(OnnxBackend::parse("ort"), Some(OnnxBackend::OnnxRuntime));
        assert_eq!(OnnxBackend::parse("onnxruntime"), Some(OnnxBackend::OnnxRuntime));
        assert_eq!(OnnxBackend::parse("Tract"), None);
        assert_eq!(OnnxBackend::parse(""), None);
    }

    #[test]
    fn tract_is_always_available() {
        assert_eq!(OnnxBackend::Tract.instantiate().unwrap().name(), "tract");
    }

    #[cfg(not(feature = "onnxruntime"))]
    #[test]
    fn onnxruntime_needs_feature() {
        OnnxBackend::OnnxRuntime.instantiate().err().unwrap();
    }
}
