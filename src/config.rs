use std::path::PathBuf;
use bundle_import::ConvertOptions;
use bundle_import::onnx_graph::DEFAULT_OPSET;

pub const DEFAULT_BUNDLE_PATH: &str = "models/occurrence/rf_bundle.json";
pub const DEFAULT_OUTPUT_DIR: &str = "public/data/models";
pub const MODEL_FILE_NAME: &str = "occurrence.onnx";
pub const META_FILE_NAME: &str = "occurrence_meta.json";
pub const GRAPH_NAME: &str = "occurrence_model";
pub const INPUT_NAME: &str = "input";

/// Everything the export needs to know; the binary runs with [`ExportConfig::default`].
#[derive(Clone, Debug, PartialEq)]
pub struct ExportConfig {
    pub bundle_path: PathBuf,
    pub output_dir: PathBuf,
    pub model_file_name: String,
    pub meta_file_name: String,
    pub graph_name: String,
    pub input_name: String,
    pub target_opset: i64,
    pub zipmap: bool
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            bundle_path: PathBuf::from(DEFAULT_BUNDLE_PATH),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            model_file_name: MODEL_FILE_NAME.to_string(),
            meta_file_name: META_FILE_NAME.to_string(),
            graph_name: GRAPH_NAME.to_string(),
            input_name: INPUT_NAME.to_string(),
            target_opset: DEFAULT_OPSET,
            zipmap: false
        }
    }
}

impl ExportConfig {
    /// Reads `bundle_path` and writes into `output_dir`, keeping every other default.
    pub fn new(bundle_path: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            bundle_path: bundle_path.into(),
            output_dir: output_dir.into(),
            ..Default::default()
        }
    }

    pub fn convert_options(&self, metadata: Vec<(String, String)>) -> ConvertOptions {
        ConvertOptions {
            graph_name: self.graph_name.clone(),
            input_name: self.input_name.clone(),
            target_opset: self.target_opset,
            zipmap: self.zipmap,
            metadata
        }
    }
}
