use std::hash::{Hash, Hasher};
use std::sync::Arc;
use core::fmt;
use crate::onnx;
use crate::node::Node;
use crate::onnx::ValueInfoProto;

#[derive(Clone, Debug)]
pub struct Dimension {
    pub value: Option<usize>,
    pub name: Option<String>,
    pub denotation: Option<String>
}

impl Dimension {
    pub fn new(value: Option<usize>, name: Option<String>, denotation: Option<String>) -> Arc<Self> {
        Arc::new(Dimension { value, name, denotation })
    }

    /// A dimension whose extent is only known at inference time.
    pub fn dynamic() -> Arc<Self> {
        Self::new(None, None, None)
    }
}

impl From<&Dimension> for onnx::tensor_shape_proto::Dimension {
    fn from(value: &Dimension) -> Self {
        Self {
            value: match value.value {
                Some(value) => Some(onnx::tensor_shape_proto::dimension::Value::DimValue(value as i64)),
                None => value.name.as_ref().map(|name| onnx::tensor_shape_proto::dimension::Value::DimParam(name.clone()))
            },
            denotation: value.denotation.clone().unwrap_or_default()
        }
    }
}

impl From<usize> for Dimension {
    fn from(value: usize) -> Self {
        Self { value: Some(value), name: None, denotation: None }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(value) = self.value {
            write!(f, "{}", value)
        }
        else if let Some(name) = &self.name {
            write!(f, "{}", name)
        }
        else {
            write!(f, "?")
        }
    }
}

#[derive(Clone, Debug)]
pub struct Shape {
    pub dims: Vec<Arc<Dimension>>
}

impl Shape {
    pub fn new(dims: Vec<Arc<Dimension>>) -> Self {
        Self { dims }
    }

    /// `[?, width]`, the layout of a batch of feature rows.
    pub fn batch_of(width: usize) -> Self {
        Self::new(vec![Dimension::dynamic(), Arc::new(Dimension::from(width))])
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn dim(&self, index: isize) -> &Arc<Dimension> {
        let rank = self.rank();
        let index = if index < 0 {
            rank - (-index) as usize
        }
        else {
            index as usize
        };
        &self.dims[index]
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.dims.iter().map(|x| x.to_string()).collect::<Vec<_>>().join("x"))
    }
}

impl From<&Shape> for onnx::TensorShapeProto {
    fn from(value: &Shape) -> Self {
        Self {
            dim: value.dims.iter().map(|x| x.as_ref().into()).collect()
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DType {
    F32,
    F64,
    I64,
    String
}

impl From<DType> for onnx::tensor_proto::DataType {
    fn from(value: DType) -> Self {
        match value {
            DType::F32 => onnx::tensor_proto::DataType::Float,
            DType::F64 => onnx::tensor_proto::DataType::Double,
            DType::I64 => onnx::tensor_proto::DataType::Int64,
            DType::String => onnx::tensor_proto::DataType::String,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

pub trait Tensor {
    fn dtype(&self) -> DType;
    fn shape(&self) -> &Shape;
    fn rank(&self) -> usize {
        self.shape().rank()
    }

    fn to_value_info_proto(&self, name: String) -> ValueInfoProto {
        ValueInfoProto {
            name,
            r#type: Some(
                onnx::TypeProto {
                    value: Some(
                        onnx::type_proto::Value::TensorType(onnx::type_proto::Tensor {
                            elem_type: onnx::tensor_proto::DataType::from(self.dtype()) as i32,
                            shape: Some(self.shape().into())
                        })
                    ),
                    denotation: String::new()
                }
            ),
            .. Default::default()
        }
    }

    /// The node producing this tensor and the output slot it occupies.
    fn source(&self) -> Option<(&dyn Node, usize)> {
        None
    }

    fn get_name(&self) -> Option<&str> {
        None
    }

    fn is_input(&self) -> bool;
}

impl<'a> PartialEq for &'a dyn Tensor {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(*self, *other)
    }
}

impl<'a> Eq for &'a dyn Tensor {}

impl<'a> Hash for &'a dyn Tensor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let a: *const _ = *self;
        let address: *const u8 = a.cast();
        state.write_usize(address.addr());
    }
}

pub struct InputTensor {
    data_type: DType,
    name: String,
    shape: Shape
}

impl InputTensor {
    pub fn new(name: String, data_type: DType, shape: Shape) -> Arc<Self> {
        Arc::new(Self {name, data_type, shape })
    }
}

impl Tensor for InputTensor {
    fn dtype(&self) -> DType {
        self.data_type
    }

    fn shape(&self) -> &Shape {
        &self.shape
    }

    fn get_name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn is_input(&self) -> bool {
        true
    }
}

/// One output slot of a node. Multi-output operators hand out one of these per slot.
pub struct NodeOutput {
    node: Arc<dyn Node>,
    index: usize,
    dtype: DType,
    shape: Shape
}

impl NodeOutput {
    pub(crate) fn new(node: Arc<dyn Node>, index: usize, dtype: DType, shape: Shape) -> Arc<Self> {
        Arc::new(Self { node, index, dtype, shape })
    }
}

impl Tensor for NodeOutput {
    fn dtype(&self) -> DType {
        self.dtype
    }

    fn shape(&self) -> &Shape {
        &self.shape
    }

    fn source(&self) -> Option<(&dyn Node, usize)> {
        Some((self.node.as_ref(), self.index))
    }

    fn is_input(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_shape_has_dynamic_leading_dim() {
        let shape = Shape::batch_of(7);
        assert_eq!(shape.rank(), 2);
        assert_eq!(shape.dim(0).value, None);
        assert_eq!(shape.dim(-1).value, Some(7));
        assert_eq!(shape.to_string(), "?x7");

        let proto = onnx::TensorShapeProto::from(&shape);
        assert_eq!(proto.dim[0].value, None);
        assert_eq!(proto.dim[1].value, Some(onnx::tensor_shape_proto::dimension::Value::DimValue(7)));
    }

    #[test]
    fn input_value_info_carries_float_type() {
        let input = InputTensor::new("input".to_string(), DType::F32, Shape::batch_of(4));
        let info = input.to_value_info_proto("input".to_string());
        let Some(onnx::TypeProto { value: Some(onnx::type_proto::Value::TensorType(tensor)), .. }) = info.r#type else {
            panic!("expected tensor type");
        };
        assert_eq!(tensor.elem_type, onnx::tensor_proto::DataType::Float as i32);
        assert_eq!(tensor.shape.unwrap().dim.len(), 2);
    }
}
