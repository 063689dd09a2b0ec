//! Operators from the `ai.onnx.ml` domain used to express classical models.
use std::collections::HashSet;
use std::sync::Arc;
use crate::{Error, ML_DOMAIN};
use crate::node::{attr_floats, attr_int, attr_ints, attr_string, attr_strings, Node};
use crate::onnx::AttributeProto;
use crate::tensor::{DType, Dimension, NodeOutput, Shape, Tensor};

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum_macros::Display)]
pub enum NodeMode {
    #[strum(serialize = "BRANCH_LEQ")]
    BranchLeq,
    #[strum(serialize = "BRANCH_LT")]
    BranchLt,
    #[strum(serialize = "BRANCH_GTE")]
    BranchGte,
    #[strum(serialize = "BRANCH_GT")]
    BranchGt,
    #[strum(serialize = "BRANCH_EQ")]
    BranchEq,
    #[strum(serialize = "BRANCH_NEQ")]
    BranchNeq,
    #[strum(serialize = "LEAF")]
    Leaf
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, strum_macros::Display)]
pub enum PostTransform {
    #[default]
    #[strum(serialize = "NONE")]
    None,
    #[strum(serialize = "SOFTMAX")]
    Softmax,
    #[strum(serialize = "LOGISTIC")]
    Logistic,
    #[strum(serialize = "SOFTMAX_ZERO")]
    SoftmaxZero,
    #[strum(serialize = "PROBIT")]
    Probit
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, strum_macros::Display)]
pub enum Aggregate {
    #[default]
    #[strum(serialize = "SUM")]
    Sum,
    #[strum(serialize = "AVERAGE")]
    Average,
    #[strum(serialize = "MIN")]
    Min,
    #[strum(serialize = "MAX")]
    Max
}

#[derive(Clone, Debug, PartialEq)]
pub struct TreeNode {
    pub tree_id: i64,
    pub node_id: i64,
    pub feature_id: i64,
    pub mode: NodeMode,
    pub value: f32,
    pub true_node_id: i64,
    pub false_node_id: i64
}

/// Contribution of a leaf to one target (regressor) or one class (classifier).
#[derive(Clone, Debug, PartialEq)]
pub struct TreeWeight {
    pub tree_id: i64,
    pub node_id: i64,
    pub target_id: i64,
    pub weight: f32
}

/// Flattened node and leaf-weight tables shared by both tree ensemble operators.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TreeEnsemble {
    pub nodes: Vec<TreeNode>,
    pub weights: Vec<TreeWeight>
}

impl TreeEnsemble {
    pub fn num_trees(&self) -> usize {
        self.nodes.iter().map(|node| node.tree_id).collect::<HashSet<_>>().len()
    }

    fn validate(&self, num_features: Option<usize>, num_targets: usize) -> Result<(), Error> {
        if self.nodes.is_empty() {
            return Err(Error::InvalidTreeEnsembleError("ensemble has no nodes".to_string()));
        }
        let mut ids = HashSet::new();
        let mut leaves = HashSet::new();
        for node in &self.nodes {
            if !ids.insert((node.tree_id, node.node_id)) {
                return Err(Error::InvalidTreeEnsembleError(format!("duplicate node {} in tree {}", node.node_id, node.tree_id)));
            }
            if node.mode == NodeMode::Leaf {
                leaves.insert((node.tree_id, node.node_id));
                continue;
            }
            let in_range = match num_features {
                Some(width) => node.feature_id >= 0 && (node.feature_id as usize) < width,
                None => node.feature_id >= 0
            };
            if !in_range {
                return Err(Error::InvalidTreeEnsembleError(format!(
                    "node {} in tree {} splits on feature {} but the input has {} features",
                    node.node_id, node.tree_id, node.feature_id,
                    num_features.map(|x| x.to_string()).unwrap_or_else(|| "?".to_string())
                )));
            }
        }
        for node in self.nodes.iter().filter(|node| node.mode != NodeMode::Leaf) {
            for child in [node.true_node_id, node.false_node_id] {
                if !ids.contains(&(node.tree_id, child)) {
                    return Err(Error::InvalidTreeEnsembleError(format!("node {} in tree {} points at missing node {}", node.node_id, node.tree_id, child)));
                }
            }
        }
        for weight in &self.weights {
            if !leaves.contains(&(weight.tree_id, weight.node_id)) {
                return Err(Error::InvalidTreeEnsembleError(format!("weight attached to non-leaf node {} in tree {}", weight.node_id, weight.tree_id)));
            }
            if weight.target_id < 0 || weight.target_id as usize >= num_targets {
                return Err(Error::InvalidTreeEnsembleError(format!("target id {} out of range for {} targets", weight.target_id, num_targets)));
            }
        }
        Ok(())
    }

    fn node_attributes(&self) -> Vec<AttributeProto> {
        vec![
            attr_ints("nodes_falsenodeids", self.nodes.iter().map(|x| x.false_node_id).collect()),
            attr_ints("nodes_featureids", self.nodes.iter().map(|x| x.feature_id).collect()),
            attr_floats("nodes_hitrates", vec![1.0; self.nodes.len()]),
            attr_ints("nodes_missing_value_tracks_true", vec![0; self.nodes.len()]),
            attr_strings("nodes_modes", &self.nodes.iter().map(|x| x.mode.to_string()).collect::<Vec<_>>()),
            attr_ints("nodes_nodeids", self.nodes.iter().map(|x| x.node_id).collect()),
            attr_ints("nodes_treeids", self.nodes.iter().map(|x| x.tree_id).collect()),
            attr_ints("nodes_truenodeids", self.nodes.iter().map(|x| x.true_node_id).collect()),
            attr_floats("nodes_values", self.nodes.iter().map(|x| x.value).collect()),
        ]
    }

    fn weight_attributes(&self, prefix: &str) -> Vec<AttributeProto> {
        vec![
            attr_ints(&format!("{prefix}_ids"), self.weights.iter().map(|x| x.target_id).collect()),
            attr_ints(&format!("{prefix}_nodeids"), self.weights.iter().map(|x| x.node_id).collect()),
            attr_ints(&format!("{prefix}_treeids"), self.weights.iter().map(|x| x.tree_id).collect()),
            attr_floats(&format!("{prefix}_weights"), self.weights.iter().map(|x| x.weight).collect()),
        ]
    }
}

/// Checks for a `[batch, features]` numeric input and returns the feature width if known.
fn validate_feature_input(input: &dyn Tensor) -> Result<Option<usize>, Error> {
    if input.rank() != 2 {
        return Err(Error::InputShapeError);
    }
    match input.dtype() {
        DType::F32 | DType::F64 | DType::I64 => Ok(input.shape().dim(-1).value),
        _ => Err(Error::DTypeMismatchError)
    }
}

fn batch_dimension(input: &dyn Tensor) -> Arc<Dimension> {
    input.shape().dim(0).clone()
}

pub struct TreeEnsembleRegressor {
    name: Option<String>,
    input: Arc<dyn Tensor>,
    ensemble: TreeEnsemble,
    n_targets: usize,
    aggregate_function: Aggregate,
    post_transform: PostTransform,
    base_values: Vec<f32>
}

impl TreeEnsembleRegressor {
    pub fn new(
        name: Option<String>,
        input: Arc<dyn Tensor>,
        ensemble: TreeEnsemble,
        n_targets: usize,
        aggregate_function: Aggregate,
        base_values: Vec<f32>
    ) -> Result<Arc<NodeOutput>, Error> {
        let width = validate_feature_input(input.as_ref())?;
        if n_targets == 0 || (!base_values.is_empty() && base_values.len() != n_targets) {
            return Err(Error::InvalidInputError);
        }
        ensemble.validate(width, n_targets)?;
        let shape = Shape::new(vec![batch_dimension(input.as_ref()), Arc::new(Dimension::from(n_targets))]);
        let node: Arc<dyn Node> = Arc::new(Self {
            name,
            input,
            ensemble,
            n_targets,
            aggregate_function,
            post_transform: PostTransform::None,
            base_values
        });
        Ok(NodeOutput::new(node, 0, DType::F32, shape))
    }
}

impl Node for TreeEnsembleRegressor {
    fn get_input_tensors(&self) -> Vec<&dyn Tensor> {
        vec![self.input.as_ref()]
    }
    fn get_name(&self) -> Option<&str> {
        self.name.as_deref()
    }
    fn get_onnx_type(&self) -> &str {
        "TreeEnsembleRegressor"
    }
    fn get_onnx_domain(&self) -> &str {
        ML_DOMAIN
    }
    fn get_onnx_attributes(&self) -> Vec<AttributeProto> {
        let mut attributes = vec![attr_string("aggregate_function", &self.aggregate_function.to_string())];
        if !self.base_values.is_empty() {
            attributes.push(attr_floats("base_values", self.base_values.clone()));
        }
        attributes.push(attr_int("n_targets", self.n_targets as i64));
        attributes.extend(self.ensemble.node_attributes());
        attributes.push(attr_string("post_transform", &self.post_transform.to_string()));
        attributes.extend(self.ensemble.weight_attributes("target"));
        attributes
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ClassLabels {
    Int64(Vec<i64>),
    Strings(Vec<String>)
}

impl ClassLabels {
    pub fn len(&self) -> usize {
        match self {
            ClassLabels::Int64(v) => v.len(),
            ClassLabels::Strings(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dtype(&self) -> DType {
        match self {
            ClassLabels::Int64(_) => DType::I64,
            ClassLabels::Strings(_) => DType::String,
        }
    }

    fn to_attribute(&self) -> AttributeProto {
        match self {
            ClassLabels::Int64(v) => attr_ints("classlabels_int64s", v.clone()),
            ClassLabels::Strings(v) => attr_strings("classlabels_strings", v),
        }
    }
}

pub struct TreeEnsembleClassifier {
    name: Option<String>,
    input: Arc<dyn Tensor>,
    ensemble: TreeEnsemble,
    labels: ClassLabels,
    post_transform: PostTransform
}

impl TreeEnsembleClassifier {
    /// Returns the `(label, probabilities)` outputs.
    pub fn new(
        name: Option<String>,
        input: Arc<dyn Tensor>,
        ensemble: TreeEnsemble,
        labels: ClassLabels
    ) -> Result<(Arc<NodeOutput>, Arc<NodeOutput>), Error> {
        let width = validate_feature_input(input.as_ref())?;
        if labels.is_empty() {
            return Err(Error::InvalidInputError);
        }
        ensemble.validate(width, labels.len())?;
        let batch = batch_dimension(input.as_ref());
        let label_dtype = labels.dtype();
        let num_classes = labels.len();
        let node: Arc<dyn Node> = Arc::new(Self {
            name,
            input,
            ensemble,
            labels,
            post_transform: PostTransform::None
        });
        let label = NodeOutput::new(node.clone(), 0, label_dtype, Shape::new(vec![batch.clone()]));
        let probabilities = NodeOutput::new(node, 1, DType::F32, Shape::new(vec![batch, Arc::new(Dimension::from(num_classes))]));
        Ok((label, probabilities))
    }
}

impl Node for TreeEnsembleClassifier {
    fn get_input_tensors(&self) -> Vec<&dyn Tensor> {
        vec![self.input.as_ref()]
    }
    fn num_outputs(&self) -> usize {
        2
    }
    fn get_name(&self) -> Option<&str> {
        self.name.as_deref()
    }
    fn get_onnx_type(&self) -> &str {
        "TreeEnsembleClassifier"
    }
    fn get_onnx_domain(&self) -> &str {
        ML_DOMAIN
    }
    fn get_onnx_attributes(&self) -> Vec<AttributeProto> {
        let mut attributes = self.ensemble.weight_attributes("class");
        attributes.push(self.labels.to_attribute());
        attributes.extend(self.ensemble.node_attributes());
        attributes.push(attr_string("post_transform", &self.post_transform.to_string()));
        attributes
    }
}

pub struct LinearRegressor {
    name: Option<String>,
    input: Arc<dyn Tensor>,
    coefficients: Vec<f32>,
    intercepts: Vec<f32>,
    post_transform: PostTransform
}

impl LinearRegressor {
    /// `coefficients` is row-major `[targets, features]`, one intercept per target.
    pub fn new(name: Option<String>, input: Arc<dyn Tensor>, coefficients: Vec<f32>, intercepts: Vec<f32>) -> Result<Arc<NodeOutput>, Error> {
        let width = validate_feature_input(input.as_ref())?;
        let targets = intercepts.len();
        if targets == 0 {
            return Err(Error::InvalidInputError);
        }
        if let Some(width) = width {
            if coefficients.len() != width * targets {
                return Err(Error::InputShapeError);
            }
        }
        let shape = Shape::new(vec![batch_dimension(input.as_ref()), Arc::new(Dimension::from(targets))]);
        let node: Arc<dyn Node> = Arc::new(Self {
            name,
            input,
            coefficients,
            intercepts,
            post_transform: PostTransform::None
        });
        Ok(NodeOutput::new(node, 0, DType::F32, shape))
    }
}

impl Node for LinearRegressor {
    fn get_input_tensors(&self) -> Vec<&dyn Tensor> {
        vec![self.input.as_ref()]
    }
    fn get_name(&self) -> Option<&str> {
        self.name.as_deref()
    }
    fn get_onnx_type(&self) -> &str {
        "LinearRegressor"
    }
    fn get_onnx_domain(&self) -> &str {
        ML_DOMAIN
    }
    fn get_onnx_attributes(&self) -> Vec<AttributeProto> {
        vec![
            attr_floats("coefficients", self.coefficients.clone()),
            attr_floats("intercepts", self.intercepts.clone()),
            attr_string("post_transform", &self.post_transform.to_string()),
            attr_int("targets", self.intercepts.len() as i64),
        ]
    }
}
