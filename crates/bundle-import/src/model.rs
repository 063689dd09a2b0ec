use serde::{Deserialize, Serialize};
use onnx_graph::operators::{ClassLabels, NodeMode, TreeEnsemble, TreeNode, TreeWeight};
use crate::Error;

/// Child index marking a leaf in the flat tree layout.
pub const TREE_LEAF: i64 = -1;

/// A fitted decision tree in flat parallel-array layout, one entry per node.
///
/// Node `i` sends a row to `children_left[i]` when `x[feature[i]] <= threshold[i]`
/// and to `children_right[i]` otherwise. `value[i]` holds one column per regression
/// target, or one per class (counts or fractions) for classifiers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    pub children_left: Vec<i64>,
    pub children_right: Vec<i64>,
    pub feature: Vec<i64>,
    pub threshold: Vec<f64>,
    pub value: Vec<Vec<f64>>
}

impl Tree {
    pub fn node_count(&self) -> usize {
        self.children_left.len()
    }

    pub fn is_leaf(&self, node: usize) -> bool {
        self.children_left[node] == TREE_LEAF
    }

    /// Width of the per-node value rows.
    pub fn value_width(&self) -> usize {
        self.value.first().map(|row| row.len()).unwrap_or(0)
    }

    fn validate(&self, tree_id: usize) -> Result<(), Error> {
        let count = self.node_count();
        if count == 0 {
            return Err(Error::InvalidModel(format!("tree {tree_id} has no nodes")));
        }
        let lengths = [self.children_right.len(), self.feature.len(), self.threshold.len(), self.value.len()];
        if lengths.iter().any(|len| *len != count) {
            return Err(Error::InvalidModel(format!("tree {tree_id} has ragged node arrays")));
        }
        let width = self.value_width();
        if width == 0 || self.value.iter().any(|row| row.len() != width) {
            return Err(Error::InvalidModel(format!("tree {tree_id} has ragged value rows")));
        }
        // Walk from the root: every node must be reached exactly once.
        let mut visited = vec![false; count];
        let mut pending = vec![0usize];
        while let Some(node) = pending.pop() {
            if std::mem::replace(&mut visited[node], true) {
                return Err(Error::InvalidModel(format!("tree {tree_id} node {node} is reachable more than once")));
            }
            let (left, right) = (self.children_left[node], self.children_right[node]);
            if left == TREE_LEAF {
                if right != TREE_LEAF {
                    return Err(Error::InvalidModel(format!("tree {tree_id} node {node} has a right child but no left child")));
                }
                continue;
            }
            for child in [right, left] {
                if child < 0 || child as usize >= count {
                    return Err(Error::InvalidModel(format!("tree {tree_id} node {node} points at invalid child {child}")));
                }
                pending.push(child as usize);
            }
        }
        if let Some(orphan) = visited.iter().position(|seen| !seen) {
            return Err(Error::InvalidModel(format!("tree {tree_id} node {orphan} is unreachable from the root")));
        }
        Ok(())
    }

    /// Appends this tree to `ensemble`, turning each leaf row into weights with `leaf_weights`.
    fn append_to<F>(&self, tree_id: usize, ensemble: &mut TreeEnsemble, leaf_weights: &F) -> Result<(), Error>
    where
        F: Fn(&[f64]) -> Vec<f64>
    {
        self.validate(tree_id)?;
        let tree_id = tree_id as i64;
        for node in 0..self.node_count() {
            let node_id = node as i64;
            if self.is_leaf(node) {
                ensemble.nodes.push(TreeNode {
                    tree_id,
                    node_id,
                    feature_id: 0,
                    mode: NodeMode::Leaf,
                    value: 0.0,
                    true_node_id: 0,
                    false_node_id: 0
                });
                for (target_id, weight) in leaf_weights(&self.value[node]).into_iter().enumerate() {
                    ensemble.weights.push(TreeWeight { tree_id, node_id, target_id: target_id as i64, weight: weight as f32 });
                }
            }
            else {
                ensemble.nodes.push(TreeNode {
                    tree_id,
                    node_id,
                    feature_id: self.feature[node],
                    mode: NodeMode::BranchLeq,
                    value: self.threshold[node] as f32,
                    true_node_id: self.children_left[node],
                    false_node_id: self.children_right[node]
                });
            }
        }
        Ok(())
    }
}

/// Builds one ensemble out of `trees`, checking they all agree on the value width.
pub(crate) fn flatten_trees<F>(trees: &[Tree], leaf_weights: F) -> Result<(TreeEnsemble, usize), Error>
where
    F: Fn(&[f64]) -> Vec<f64>
{
    let Some(first) = trees.first() else {
        return Err(Error::InvalidModel("ensemble has no trees".to_string()));
    };
    let width = first.value_width();
    let mut ensemble = TreeEnsemble::default();
    for (tree_id, tree) in trees.iter().enumerate() {
        if tree.value_width() != width {
            return Err(Error::InvalidModel(format!("tree {tree_id} has {} value columns, expected {width}", tree.value_width())));
        }
        tree.append_to(tree_id, &mut ensemble, &leaf_weights)?;
    }
    log::debug!("Flattened {} trees into {} nodes", ensemble.num_trees(), ensemble.nodes.len());
    Ok((ensemble, width))
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Classes {
    Int64(Vec<i64>),
    Strings(Vec<String>)
}

impl Classes {
    pub fn len(&self) -> usize {
        match self {
            Classes::Int64(v) => v.len(),
            Classes::Strings(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<&Classes> for ClassLabels {
    fn from(value: &Classes) -> Self {
        match value {
            Classes::Int64(v) => ClassLabels::Int64(v.clone()),
            Classes::Strings(v) => ClassLabels::Strings(v.clone()),
        }
    }
}

/// The trained estimator stored in a bundle, tagged by its `type` key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, strum_macros::Display, strum_macros::VariantNames)]
#[serde(tag = "type", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BundledModel {
    RandomForestRegressor {
        trees: Vec<Tree>
    },
    RandomForestClassifier {
        classes: Classes,
        trees: Vec<Tree>
    },
    DecisionTreeRegressor {
        tree: Tree
    },
    DecisionTreeClassifier {
        classes: Classes,
        tree: Tree
    },
    GradientBoostingRegressor {
        init: f64,
        learning_rate: f64,
        trees: Vec<Tree>
    },
    LinearRegression {
        coefficients: Vec<f64>,
        intercept: f64
    },
    /// Any other `type`, or a known `type` whose fields did not parse.
    #[serde(untagged)]
    Unsupported {
        #[serde(rename = "type")]
        model_type: String
    }
}

impl BundledModel {
    /// Whether `tag` is the `type` of one of the supported models.
    pub fn is_known_type(tag: &str) -> bool {
        tag != "unsupported" && <Self as strum::VariantNames>::VARIANTS.iter().any(|name| *name == tag)
    }


    pub fn is_classifier(&self) -> bool {
        matches!(self, BundledModel::RandomForestClassifier { .. } | BundledModel::DecisionTreeClassifier { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stump(feature: i64, threshold: f64, left: Vec<f64>, right: Vec<f64>) -> Tree {
        Tree {
            children_left: vec![1, TREE_LEAF, TREE_LEAF],
            children_right: vec![2, TREE_LEAF, TREE_LEAF],
            feature: vec![feature, -2, -2],
            threshold: vec![threshold, -2.0, -2.0],
            value: vec![vec![0.0; left.len()], left, right]
        }
    }

    #[test]
    fn flatten_maps_leaves_and_branches() {
        let (ensemble, width) = flatten_trees(&[stump(1, 2.5, vec![1.0], vec![5.0])], |v| v.to_vec()).unwrap();
        assert_eq!(width, 1);
        assert_eq!(ensemble.nodes.len(), 3);
        assert_eq!(ensemble.nodes[0].mode, NodeMode::BranchLeq);
        assert_eq!(ensemble.nodes[0].feature_id, 1);
        assert_eq!(ensemble.nodes[0].value, 2.5);
        assert_eq!((ensemble.nodes[0].true_node_id, ensemble.nodes[0].false_node_id), (1, 2));
        assert_eq!(ensemble.nodes[1].mode, NodeMode::Leaf);
        assert_eq!(ensemble.weights.iter().map(|w| (w.node_id, w.weight)).collect::<Vec<_>>(), vec![(1, 1.0), (2, 5.0)]);
    }

    #[test]
    fn flatten_numbers_trees_in_order() {
        let trees = vec![stump(0, 0.0, vec![1.0], vec![2.0]), stump(0, 1.0, vec![3.0], vec![4.0])];
        let (ensemble, _) = flatten_trees(&trees, |v| v.to_vec()).unwrap();
        assert_eq!(ensemble.num_trees(), 2);
        assert_eq!(ensemble.nodes[3].tree_id, 1);
        assert_eq!(ensemble.weights[3].tree_id, 1);
    }

    #[test]
    fn ragged_arrays_are_rejected() {
        let mut tree = stump(0, 0.0, vec![1.0], vec![2.0]);
        tree.threshold.pop();
        assert!(matches!(flatten_trees(&[tree], |v| v.to_vec()), Err(Error::InvalidModel(_))));
    }

    #[test]
    fn child_out_of_range_is_rejected() {
        let mut tree = stump(0, 0.0, vec![1.0], vec![2.0]);
        tree.children_right[0] = 3;
        assert!(matches!(flatten_trees(&[tree], |v| v.to_vec()), Err(Error::InvalidModel(_))));
    }

    #[test]
    fn cyclic_tree_is_rejected() {
        let tree = Tree {
            children_left: vec![1, 0, TREE_LEAF],
            children_right: vec![2, 2, TREE_LEAF],
            feature: vec![0, 0, -2],
            threshold: vec![0.5, 0.5, -2.0],
            value: vec![vec![0.0], vec![0.0], vec![1.0]]
        };
        let err = flatten_trees(&[tree], |v| v.to_vec()).unwrap_err();
        assert!(matches!(&err, Error::InvalidModel(msg) if msg.contains("more than once")), "{err}");
    }

    #[test]
    fn self_loop_is_rejected() {
        let mut tree = stump(0, 0.0, vec![1.0], vec![2.0]);
        tree.children_left[0] = 0;
        assert!(matches!(flatten_trees(&[tree], |v| v.to_vec()), Err(Error::InvalidModel(_))));
    }

    #[test]
    fn unreachable_node_is_rejected() {
        let mut tree = stump(0, 0.0, vec![1.0], vec![2.0]);
        tree.children_left.push(TREE_LEAF);
        tree.children_right.push(TREE_LEAF);
        tree.feature.push(-2);
        tree.threshold.push(-2.0);
        tree.value.push(vec![3.0]);
        let err = flatten_trees(&[tree], |v| v.to_vec()).unwrap_err();
        assert!(matches!(&err, Error::InvalidModel(msg) if msg.contains("unreachable")), "{err}");
    }

    #[test]
    fn mismatched_value_widths_are_rejected() {
        let trees = vec![stump(0, 0.0, vec![1.0], vec![2.0]), stump(0, 0.0, vec![1.0, 1.0], vec![2.0, 2.0])];
        assert!(matches!(flatten_trees(&trees, |v| v.to_vec()), Err(Error::InvalidModel(_))));
    }

    #[test]
    fn empty_ensemble_is_rejected() {
        assert!(matches!(flatten_trees(&[], |v: &[f64]| v.to_vec()), Err(Error::InvalidModel(_))));
    }

    #[test]
    fn model_type_tag_round_trips_through_json() {
        let model = BundledModel::LinearRegression { coefficients: vec![1.0, 2.0], intercept: 0.5 };
        let json = serde_json::to_value(&model).unwrap();
        assert_eq!(json["type"], "linear_regression");
        assert_eq!(model.to_string(), "linear_regression");
        assert_eq!(serde_json::from_value::<BundledModel>(json).unwrap(), model);
    }

    #[test]
    fn unknown_model_type_keeps_its_tag() {
        let model: BundledModel = serde_json::from_str(r#"{"type": "svc", "support_vectors": [[1.0]]}"#).unwrap();
        assert_eq!(model, BundledModel::Unsupported { model_type: "svc".to_string() });
        assert!(!BundledModel::is_known_type("svc"));
        assert!(!BundledModel::is_known_type("unsupported"));
        assert!(BundledModel::is_known_type("gradient_boosting_regressor"));
    }

    #[test]
    fn classes_accept_ints_and_strings() {
        let ints: Classes = serde_json::from_str("[0, 1, 2]").unwrap();
        let strings: Classes = serde_json::from_str(r#"["low", "high"]"#).unwrap();
        assert_eq!(ClassLabels::from(&ints), ClassLabels::Int64(vec![0, 1, 2]));
        assert_eq!(strings.len(), 2);
        assert!(matches!(ClassLabels::from(&strings), ClassLabels::Strings(_)));
    }
}
