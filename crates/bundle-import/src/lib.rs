use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use strum::IntoEnumIterator;

pub use onnx_graph;

pub mod bundle;
pub mod model;
mod convert;

pub use bundle::ModelBundle;
pub use convert::{convert_model, ConvertOptions, LABEL_OUTPUT, PROBABILITY_OUTPUT, REGRESSION_OUTPUT};
pub use model::BundledModel;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Bundle not found: {0}")]
    BundleNotFound(PathBuf),
    #[error("Cannot identify bundle format: {0}")]
    CannotIdentifyBundle(PathBuf),
    #[error("Bundle read error: {0}")]
    BundleReadError(#[from] std::io::Error),
    #[error("Bundle JSON parse error: {0}")]
    JsonParseError(#[from] serde_json::Error),
    #[error("Bundle CBOR parse error: {0}")]
    CborParseError(#[from] ciborium::de::Error<std::io::Error>),
    #[error("Unsupported model type: {0}")]
    UnsupportedModelType(String),
    #[error("Invalid model: {0}")]
    InvalidModel(String),
    #[error("ZipMap output is not supported for {0}")]
    ZipMapUnsupported(String),
    #[error("Graph build error: {0}")]
    GraphBuildError(#[from] onnx_graph::Error)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum_macros::EnumIter, strum_macros::Display)]
pub enum BundleFormat {
    Json,
    Cbor
}

impl BundleFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            BundleFormat::Json => "json",
            BundleFormat::Cbor => "cbor",
        }
    }

    pub fn identify(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        BundleFormat::iter().find(|format| format.extension() == ext)
    }
}

pub fn load_bundle(path: &Path) -> Result<ModelBundle, Error> {
    if !path.exists() {
        return Err(Error::BundleNotFound(path.to_path_buf()));
    }
    let format = match BundleFormat::identify(path) {
        Some(format) if path.is_file() => format,
        _ => return Err(Error::CannotIdentifyBundle(path.to_path_buf()))
    };
    let reader = BufReader::new(File::open(path)?);
    let bundle: ModelBundle = match format {
        BundleFormat::Json => serde_json::from_reader(reader)?,
        BundleFormat::Cbor => ciborium::from_reader(reader)?,
    };
    log::info!(
        "Loaded {} bundle {}: {} with {} features",
        format, path.display(), bundle.model, bundle.num_features()
    );
    Ok(bundle)
}
