use std::path::PathBuf;
use prost::Message;

pub mod artifacts;
pub mod config;

pub use artifacts::{ArtifactWriter, OccurrenceMeta};
pub use config::ExportConfig;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Import error: {0}")]
    ImportError(#[from] bundle_import::Error),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error
    },
    #[error("Metadata serialization error: {0}")]
    MetadataError(#[from] serde_json::Error)
}

/// Paths of the files written by [`export`].
#[derive(Clone, Debug, PartialEq)]
pub struct ExportedArtifacts {
    pub model_path: PathBuf,
    pub meta_path: PathBuf,
    pub num_features: usize
}

/// Loads the bundle, converts its model and writes the graph plus sidecar.
///
/// Nothing is written unless loading and conversion both succeed.
pub fn export(config: &ExportConfig) -> Result<ExportedArtifacts, Error> {
    let bundle = bundle_import::load_bundle(&config.bundle_path)?;
    let meta = OccurrenceMeta::from_bundle(&bundle);

    let model = bundle.to_onnx(&config.convert_options(meta.to_metadata_props()?))?;
    let model_bytes = model.encode_to_vec();
    let meta_json = meta.to_pretty_json()?;
    log::info!(
        "Converted {} into a {} byte graph (opset {}, {} inputs)",
        bundle.model, model_bytes.len(), config.target_opset, bundle.num_features()
    );

    let writer = ArtifactWriter::new(&config.output_dir);
    writer.ensure_dir()?;
    let model_path = writer.write(&config.model_file_name, &model_bytes)?;
    let meta_path = writer.write(&config.meta_file_name, meta_json.as_bytes())?;
    log::info!("Artifacts written to {}", writer.dir().display());

    Ok(ExportedArtifacts {
        model_path,
        meta_path,
        num_features: bundle.num_features()
    })
}
