use serde::{Deserialize, Deserializer, Serialize};
use onnx_graph::onnx::ModelProto;
use crate::convert::{convert_model, ConvertOptions};
use crate::model::BundledModel;
use crate::Error;

fn default_use_log_target() -> bool {
    true
}

/// Reads a flag by truthiness: numbers are true unless zero, strings unless empty, `null` is false.
fn deserialize_truthy<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Number(f64),
        Text(String)
    }

    Ok(match Option::<Flag>::deserialize(deserializer)? {
        None => false,
        Some(Flag::Bool(value)) => value,
        Some(Flag::Number(value)) => value != 0.0,
        Some(Flag::Text(value)) => !value.is_empty(),
    })
}

/// A trained model packaged with the feature order it was fitted on.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelBundle {
    pub model: BundledModel,
    pub feature_names: Vec<String>,
    /// Whether the model predicts `log1p(target)` rather than the raw target.
    #[serde(default = "default_use_log_target", deserialize_with = "deserialize_truthy")]
    pub use_log_target: bool
}

impl ModelBundle {
    pub fn num_features(&self) -> usize {
        self.feature_names.len()
    }

    /// Converts the bundled model with an input as wide as the feature list.
    pub fn to_onnx(&self, options: &ConvertOptions) -> Result<ModelProto, Error> {
        convert_model(&self.model, self.num_features(), options)
    }
}
