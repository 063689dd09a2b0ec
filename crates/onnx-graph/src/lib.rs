pub mod onnx;
pub mod operators;
pub mod tensor;
mod node;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
pub use node::Node;
use tensor::*;

pub const ML_DOMAIN: &str = "ai.onnx.ml";
pub const DEFAULT_OPSET: i64 = 13;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Input shape error")]
    InputShapeError,
    #[error("DType mismatch")]
    DTypeMismatchError,
    #[error("Invalid input")]
    InvalidInputError,
    #[error("Tensor name used twice: {0}")]
    NameConflictError(String),
    #[error("Graph consumes input {0} which was not declared")]
    UndeclaredInputError(String),
    #[error("Unsupported opset version: {0}")]
    UnsupportedOpsetError(i64),
    #[error("Invalid tree ensemble: {0}")]
    InvalidTreeEnsembleError(String)
}

/// Converter compatibility table: the lowest default-domain opset each `ai.onnx.ml` version is paired with.
const ML_OPSET_PAIRINGS: [(i64, i64); 5] = [(1, 11), (2, 15), (3, 18), (4, 20), (5, 21)];

/// IR version paired with each default-domain opset release, starting at opset 7.
const OPSET_IR_VERSIONS: [i64; 15] = [
    onnx::IR_VERSION_2017_10_30,
    onnx::IR_VERSION_2017_10_30,
    onnx::IR_VERSION_2019_1_22,
    onnx::IR_VERSION_2019_3_18,
    onnx::IR_VERSION_2019_9_19,
    onnx::IR_VERSION_2020_5_8,
    onnx::IR_VERSION_2020_5_8,
    onnx::IR_VERSION_2020_5_8,
    onnx::IR_VERSION_2021_7_30,
    onnx::IR_VERSION_2021_7_30,
    onnx::IR_VERSION_2021_7_30,
    onnx::IR_VERSION_2021_7_30,
    onnx::IR_VERSION_2023_5_5,
    onnx::IR_VERSION_2023_5_5,
    onnx::IR_VERSION_2024_3_25,
];

const MIN_OPSET: i64 = 7;

pub fn ir_version_for(opset: i64) -> Result<i64, Error> {
    if opset < MIN_OPSET {
        return Err(Error::UnsupportedOpsetError(opset));
    }
    OPSET_IR_VERSIONS.get((opset - MIN_OPSET) as usize).copied().ok_or(Error::UnsupportedOpsetError(opset))
}

/// The newest `ai.onnx.ml` version paired with an opset no later than `opset`.
pub fn ml_opset_for(opset: i64) -> Result<i64, Error> {
    ir_version_for(opset)?;
    Ok(ML_OPSET_PAIRINGS.iter()
        .filter(|(_, paired_with)| *paired_with <= opset)
        .map(|(ml, _)| *ml)
        .max()
        .unwrap_or(1))
}

#[derive(Clone, Debug)]
pub struct ModelOptions {
    pub graph_name: String,
    pub target_opset: i64,
    pub producer_name: String,
    pub producer_version: String,
    pub doc_string: String,
    pub metadata: Vec<(String, String)>
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            graph_name: String::new(),
            target_opset: DEFAULT_OPSET,
            producer_name: env!("CARGO_PKG_NAME").to_string(),
            producer_version: env!("CARGO_PKG_VERSION").to_string(),
            doc_string: String::new(),
            metadata: vec![]
        }
    }
}

struct NameTable {
    chosen: HashSet<String>,
    next_id: usize
}

impl NameTable {
    fn claim(&mut self, name: &str) -> Result<String, Error> {
        if !self.chosen.insert(name.to_string()) {
            return Err(Error::NameConflictError(name.to_string()));
        }
        Ok(name.to_string())
    }

    fn fresh(&mut self) -> String {
        loop {
            let name = format!("tensor_{}", self.next_id);
            self.next_id += 1;
            if self.chosen.insert(name.clone()) {
                break name;
            }
        }
    }
}

/// Depth-first walk from the graph outputs. Nodes come out in topological order.
#[derive(Default)]
struct GraphWalk<'a> {
    nodes: Vec<&'a dyn Node>,
    visited_nodes: HashSet<&'a dyn Node>,
    tensors: Vec<&'a dyn Tensor>,
    visited_tensors: HashSet<&'a dyn Tensor>
}

impl<'a> GraphWalk<'a> {
    fn visit_tensor(&mut self, tensor: &'a dyn Tensor) {
        if !self.visited_tensors.insert(tensor) {
            return;
        }
        if let Some((node, _)) = tensor.source() {
            self.visit_node(node);
        }
        self.tensors.push(tensor);
    }

    fn visit_node(&mut self, node: &'a dyn Node) {
        if !self.visited_nodes.insert(node) {
            return;
        }
        for input in node.get_input_tensors() {
            self.visit_tensor(input);
        }
        self.nodes.push(node);
    }
}

pub fn build_proto(
    inputs: &[Arc<InputTensor>],
    outputs: &[(&str, Arc<dyn Tensor>)],
    options: &ModelOptions,
) -> Result<onnx::ModelProto, Error> {
    let ir_version = ir_version_for(options.target_opset)?;

    let mut walk = GraphWalk::default();
    for (_, tensor) in outputs {
        walk.visit_tensor(tensor.as_ref());
    }

    let mut names = NameTable { chosen: HashSet::new(), next_id: 0 };
    let mut tensor_names: HashMap<&dyn Tensor, String> = HashMap::new();

    let declared_inputs: Vec<&dyn Tensor> = inputs.iter().map(|t| t.as_ref() as &dyn Tensor).collect();
    for input in &declared_inputs {
        let name = match input.get_name() {
            Some(name) => names.claim(name)?,
            None => names.fresh()
        };
        tensor_names.insert(*input, name);
    }
    for (name, tensor) in outputs {
        tensor_names.insert(tensor.as_ref(), names.claim(name)?);
    }
    for tensor in &walk.tensors {
        if tensor_names.contains_key(tensor) {
            continue;
        }
        if tensor.is_input() {
            return Err(Error::UndeclaredInputError(tensor.get_name().unwrap_or("?").to_string()));
        }
        let name = match tensor.get_name() {
            Some(name) => names.claim(name)?,
            None => names.fresh()
        };
        tensor_names.insert(*tensor, name);
    }

    // Output slot names per node; slots nobody consumes still need a name.
    let mut slot_names: HashMap<(&dyn Node, usize), String> = HashMap::new();
    for tensor in &walk.tensors {
        if let Some((node, slot)) = tensor.source() {
            slot_names.insert((node, slot), tensor_names[tensor].clone());
        }
    }

    let mut node_protos = vec![];
    let mut domains = BTreeSet::new();
    for node in &walk.nodes {
        let input_names = node.get_input_tensors().iter().map(|t| tensor_names[t].clone()).collect();
        let output_names = (0..node.num_outputs())
            .map(|slot| slot_names.get(&(*node, slot)).cloned().unwrap_or_else(|| names.fresh()))
            .collect();
        let domain = node.get_onnx_domain();
        if !domain.is_empty() {
            domains.insert(domain.to_string());
        }
        node_protos.push(node.to_node_proto(node.get_name().map(|x| x.to_string()), input_names, output_names));
    }

    let value_info = walk.tensors.iter()
        .filter(|t| !t.is_input() && !outputs.iter().any(|(_, o)| o.as_ref() == **t))
        .map(|t| t.to_value_info_proto(tensor_names[t].clone()))
        .collect();

    let graph = onnx::GraphProto {
        name: options.graph_name.clone(),
        node: node_protos,
        doc_string: String::new(),
        input: declared_inputs.iter().map(|t| t.to_value_info_proto(tensor_names[t].clone())).collect(),
        output: outputs.iter().map(|(name, tensor)| tensor.to_value_info_proto(name.to_string())).collect(),
        value_info
    };

    let mut opset_import = vec![onnx::OperatorSetIdProto { domain: String::new(), version: options.target_opset }];
    for domain in domains {
        let version = if domain == ML_DOMAIN {
            ml_opset_for(options.target_opset)?
        } else {
            1
        };
        opset_import.push(onnx::OperatorSetIdProto { domain, version });
    }

    Ok(onnx::ModelProto {
        ir_version,
        opset_import,
        producer_name: options.producer_name.clone(),
        producer_version: options.producer_version.clone(),
        domain: String::new(),
        model_version: 0,
        doc_string: options.doc_string.clone(),
        graph: Some(graph),
        metadata_props: options.metadata.iter()
            .map(|(key, value)| onnx::StringStringEntryProto { key: key.clone(), value: value.clone() })
            .collect()
    })
}
