use std::sync::Arc;
use onnx_graph::onnx::ModelProto;
use onnx_graph::operators::{Aggregate, ClassLabels, LinearRegressor, TreeEnsembleClassifier, TreeEnsembleRegressor};
use onnx_graph::tensor::{DType, InputTensor, Shape, Tensor};
use onnx_graph::{build_proto, ModelOptions, DEFAULT_OPSET};
use crate::model::{flatten_trees, BundledModel, Classes, Tree};
use crate::Error;

pub const REGRESSION_OUTPUT: &str = "variable";
pub const LABEL_OUTPUT: &str = "label";
pub const PROBABILITY_OUTPUT: &str = "probabilities";

#[derive(Clone, Debug)]
pub struct ConvertOptions {
    pub graph_name: String,
    pub input_name: String,
    pub target_opset: i64,
    /// Wrap classifier probabilities in a class→probability map output.
    pub zipmap: bool,
    pub metadata: Vec<(String, String)>
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            graph_name: String::new(),
            input_name: "input".to_string(),
            target_opset: DEFAULT_OPSET,
            zipmap: false,
            metadata: vec![]
        }
    }
}

type Outputs = Vec<(&'static str, Arc<dyn Tensor>)>;

fn tree_regressor(input: Arc<InputTensor>, trees: &[Tree], scale: f64, base_values: Vec<f32>) -> Result<Outputs, Error> {
    let (ensemble, n_targets) = flatten_trees(trees, |row| row.iter().map(|v| v * scale).collect())?;
    if !base_values.is_empty() && base_values.len() != n_targets {
        return Err(Error::InvalidModel(format!("{} base values for {} targets", base_values.len(), n_targets)));
    }
    let output: Arc<dyn Tensor> = TreeEnsembleRegressor::new(None, input, ensemble, n_targets, Aggregate::Sum, base_values)?;
    Ok(vec![(REGRESSION_OUTPUT, output)])
}

fn tree_classifier(input: Arc<InputTensor>, classes: &Classes, trees: &[Tree]) -> Result<Outputs, Error> {
    if classes.is_empty() {
        return Err(Error::InvalidModel("classifier has no classes".to_string()));
    }
    let n_trees = trees.len() as f64;
    // Leaf rows hold per-class sample counts (or fractions); emit each tree's share of the vote.
    let (ensemble, width) = flatten_trees(trees, |row| {
        let total: f64 = row.iter().sum();
        row.iter().map(|v| if total > 0.0 { v / total / n_trees } else { 0.0 }).collect()
    })?;
    if width != classes.len() {
        return Err(Error::InvalidModel(format!("leaf rows have {} columns for {} classes", width, classes.len())));
    }
    let (label, probabilities) = TreeEnsembleClassifier::new(None, input, ensemble, ClassLabels::from(classes))?;
    let (label, probabilities): (Arc<dyn Tensor>, Arc<dyn Tensor>) = (label, probabilities);
    Ok(vec![(LABEL_OUTPUT, label), (PROBABILITY_OUTPUT, probabilities)])
}

fn linear_regressor(input: Arc<InputTensor>, coefficients: &[f64], intercept: f64) -> Result<Outputs, Error> {
    let output: Arc<dyn Tensor> = LinearRegressor::new(
        None,
        input,
        coefficients.iter().map(|x| *x as f32).collect(),
        vec![intercept as f32]
    )?;
    Ok(vec![(REGRESSION_OUTPUT, output)])
}

/// Lowers `model` to an ONNX graph reading a `[batch, num_features]` float input.
pub fn convert_model(model: &BundledModel, num_features: usize, options: &ConvertOptions) -> Result<ModelProto, Error> {
    if num_features == 0 {
        return Err(Error::InvalidModel("model declares no input features".to_string()));
    }
    if options.zipmap && model.is_classifier() {
        return Err(Error::ZipMapUnsupported(model.to_string()));
    }

    let input = InputTensor::new(options.input_name.clone(), DType::F32, Shape::batch_of(num_features));
    let outputs = match model {
        BundledModel::RandomForestRegressor { trees } => {
            tree_regressor(input.clone(), trees, 1.0 / trees.len().max(1) as f64, vec![])?
        }
        BundledModel::DecisionTreeRegressor { tree } => {
            tree_regressor(input.clone(), std::slice::from_ref(tree), 1.0, vec![])?
        }
        BundledModel::GradientBoostingRegressor { init, learning_rate, trees } => {
            tree_regressor(input.clone(), trees, *learning_rate, vec![*init as f32])?
        }
        BundledModel::RandomForestClassifier { classes, trees } => {
            tree_classifier(input.clone(), classes, trees)?
        }
        BundledModel::DecisionTreeClassifier { classes, tree } => {
            tree_classifier(input.clone(), classes, std::slice::from_ref(tree))?
        }
        BundledModel::LinearRegression { coefficients, intercept } => {
            linear_regressor(input.clone(), coefficients, *intercept)?
        }
        BundledModel::Unsupported { model_type } if BundledModel::is_known_type(model_type) => {
            return Err(Error::InvalidModel(format!("{model_type} is missing fields or has fields of the wrong type")))
        }
        BundledModel::Unsupported { model_type } => return Err(Error::UnsupportedModelType(model_type.clone()))
    };
    log::debug!("Lowered {} reading {} {} to {} graph output(s)", model, input.dtype(), input.shape(), outputs.len());

    let model_options = ModelOptions {
        graph_name: options.graph_name.clone(),
        target_opset: options.target_opset,
        producer_name: env!("CARGO_PKG_NAME").to_string(),
        producer_version: env!("CARGO_PKG_VERSION").to_string(),
        doc_string: String::new(),
        metadata: options.metadata.clone()
    };
    Ok(build_proto(&[input], &outputs, &model_options)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use onnx_graph::onnx::{AttributeProto, NodeProto};
    use onnx_graph::onnx::tensor_shape_proto::dimension::Value;
    use crate::model::TREE_LEAF;

    fn stump(feature: i64, left: Vec<f64>, right: Vec<f64>) -> Tree {
        Tree {
            children_left: vec![1, TREE_LEAF, TREE_LEAF],
            children_right: vec![2, TREE_LEAF, TREE_LEAF],
            feature: vec![feature, -2, -2],
            threshold: vec![0.5, -2.0, -2.0],
            value: vec![vec![0.0; left.len()], left, right]
        }
    }

    fn single_node(model: &ModelProto) -> &NodeProto {
        let graph = model.graph.as_ref().unwrap();
        assert_eq!(graph.node.len(), 1);
        &graph.node[0]
    }

    fn attribute<'a>(node: &'a NodeProto, name: &str) -> &'a AttributeProto {
        node.attribute.iter().find(|x| x.name == name).unwrap()
    }

    fn input_dims(model: &ModelProto) -> Vec<Option<Value>> {
        let input = &model.graph.as_ref().unwrap().input[0];
        let Some(onnx_graph::onnx::type_proto::Value::TensorType(tensor)) = &input.r#type.as_ref().unwrap().value else {
            panic!("input is not a tensor");
        };
        tensor.shape.as_ref().unwrap().dim.iter().map(|d| d.value.clone()).collect()
    }

    #[test]
    fn random_forest_regressor_averages_trees() {
        let model = BundledModel::RandomForestRegressor {
            trees: vec![stump(0, vec![2.0], vec![4.0]), stump(2, vec![6.0], vec![8.0])]
        };
        let proto = convert_model(&model, 3, &ConvertOptions::default()).unwrap();
        let node = single_node(&proto);
        assert_eq!(node.op_type, "TreeEnsembleRegressor");
        assert_eq!(node.domain, "ai.onnx.ml");
        assert_eq!(node.output, vec![REGRESSION_OUTPUT.to_string()]);
        assert_eq!(attribute(node, "target_weights").floats, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(attribute(node, "nodes_featureids").ints, vec![0, 0, 0, 2, 0, 0]);
        assert_eq!(attribute(node, "n_targets").i, 1);
        assert_eq!(input_dims(&proto), vec![None, Some(Value::DimValue(3))]);
    }

    #[test]
    fn gradient_boosting_scales_leaves_and_sets_base_value() {
        let model = BundledModel::GradientBoostingRegressor {
            init: 1.5,
            learning_rate: 0.1,
            trees: vec![stump(0, vec![10.0], vec![-10.0])]
        };
        let proto = convert_model(&model, 1, &ConvertOptions::default()).unwrap();
        let node = single_node(&proto);
        assert_eq!(attribute(node, "base_values").floats, vec![1.5]);
        assert_eq!(attribute(node, "target_weights").floats, vec![1.0, -1.0]);
    }

    #[test]
    fn random_forest_classifier_emits_normalized_votes() {
        let model = BundledModel::RandomForestClassifier {
            classes: Classes::Int64(vec![0, 1]),
            trees: vec![stump(0, vec![3.0, 1.0], vec![0.0, 4.0]), stump(0, vec![1.0, 1.0], vec![2.0, 0.0])]
        };
        let proto = convert_model(&model, 1, &ConvertOptions::default()).unwrap();
        let node = single_node(&proto);
        assert_eq!(node.op_type, "TreeEnsembleClassifier");
        assert_eq!(node.output, vec![LABEL_OUTPUT.to_string(), PROBABILITY_OUTPUT.to_string()]);
        assert_eq!(attribute(node, "class_weights").floats, vec![0.375, 0.125, 0.0, 0.5, 0.25, 0.25, 0.5, 0.0]);
        assert_eq!(attribute(node, "class_ids").ints, vec![0, 1, 0, 1, 0, 1, 0, 1]);
        assert_eq!(attribute(node, "classlabels_int64s").ints, vec![0, 1]);

        let outputs = &proto.graph.as_ref().unwrap().output;
        assert_eq!(outputs.iter().map(|o| o.name.as_str()).collect::<Vec<_>>(), vec!["label", "probabilities"]);
        assert!(proto.graph.unwrap().node.iter().all(|n| n.op_type != "ZipMap"));
    }

    #[test]
    fn classifier_class_count_must_match_leaf_rows() {
        let model = BundledModel::DecisionTreeClassifier {
            classes: Classes::Strings(vec!["a".to_string(), "b".to_string(), "c".to_string()]),
            tree: stump(0, vec![1.0, 0.0], vec![0.0, 1.0])
        };
        assert!(matches!(convert_model(&model, 1, &ConvertOptions::default()), Err(Error::InvalidModel(_))));
    }

    #[test]
    fn zipmap_is_rejected_for_classifiers_only() {
        let options = ConvertOptions { zipmap: true, ..Default::default() };
        let classifier = BundledModel::DecisionTreeClassifier {
            classes: Classes::Int64(vec![0, 1]),
            tree: stump(0, vec![1.0, 0.0], vec![0.0, 1.0])
        };
        assert!(matches!(convert_model(&classifier, 1, &options), Err(Error::ZipMapUnsupported(_))));
        let regressor = BundledModel::DecisionTreeRegressor { tree: stump(0, vec![1.0], vec![2.0]) };
        assert!(convert_model(&regressor, 1, &options).is_ok());
    }

    #[test]
    fn linear_regression_lowers_to_linear_regressor() {
        let model = BundledModel::LinearRegression { coefficients: vec![0.5, -2.0], intercept: 3.0 };
        let proto = convert_model(&model, 2, &ConvertOptions::default()).unwrap();
        let node = single_node(&proto);
        assert_eq!(node.op_type, "LinearRegressor");
        assert_eq!(attribute(node, "coefficients").floats, vec![0.5, -2.0]);
        assert_eq!(attribute(node, "intercepts").floats, vec![3.0]);
        assert!(matches!(convert_model(&model, 3, &ConvertOptions::default()), Err(Error::GraphBuildError(_))));
    }

    #[test]
    fn tree_feature_beyond_input_width_is_rejected() {
        let model = BundledModel::DecisionTreeRegressor { tree: stump(4, vec![1.0], vec![2.0]) };
        assert!(matches!(convert_model(&model, 4, &ConvertOptions::default()), Err(Error::GraphBuildError(_))));
    }

    #[test]
    fn unsupported_model_names_its_type() {
        let model: BundledModel = serde_json::from_str(r#"{"type": "svr", "support": [0]}"#).unwrap();
        let err = convert_model(&model, 2, &ConvertOptions::default()).unwrap_err();
        assert!(matches!(&err, Error::UnsupportedModelType(name) if name == "svr"));
        assert_eq!(err.to_string(), "Unsupported model type: svr");
    }

    #[test]
    fn malformed_known_model_is_invalid() {
        let model: BundledModel = serde_json::from_str(r#"{"type": "linear_regression", "coefficients": [1.0]}"#).unwrap();
        let result = convert_model(&model, 1, &ConvertOptions::default());
        assert!(matches!(result, Err(Error::InvalidModel(msg)) if msg.starts_with("linear_regression")));
    }

    #[test]
    fn options_reach_the_model_proto() {
        let model = BundledModel::DecisionTreeRegressor { tree: stump(0, vec![1.0], vec![2.0]) };
        let options = ConvertOptions {
            graph_name: "occurrence_model".to_string(),
            input_name: "features".to_string(),
            target_opset: 15,
            metadata: vec![("k".to_string(), "v".to_string())],
            ..Default::default()
        };
        let proto = convert_model(&model, 1, &options).unwrap();
        let graph = proto.graph.as_ref().unwrap();
        assert_eq!(graph.name, "occurrence_model");
        assert_eq!(graph.input[0].name, "features");
        assert_eq!(proto.opset_import[0].version, 15);
        assert_eq!(proto.opset_import[1].version, 2);
        assert_eq!(proto.metadata_props[0].key, "k");
    }
}
