use std::hash::{Hash, Hasher};
use crate::onnx::{attribute_proto::AttributeType, AttributeProto, NodeProto};
use crate::tensor::Tensor;

pub trait Node {
    fn get_input_tensors(&self) -> Vec<&dyn Tensor>;

    fn num_outputs(&self) -> usize {
        1
    }

    fn get_name(&self) -> Option<&str> {
        None
    }

    fn get_onnx_type(&self) -> &str;
    fn get_onnx_domain(&self) -> &str {
        ""
    }

    fn get_onnx_attributes(&self) -> Vec<AttributeProto> {
        vec![]
    }

    fn to_node_proto(&self, name: Option<String>, inputs: Vec<String>, outputs: Vec<String>) -> NodeProto {
        NodeProto {
            name: name.unwrap_or_default(),
            input: inputs,
            output: outputs,
            op_type: self.get_onnx_type().to_string(),
            domain: self.get_onnx_domain().to_string(),
            attribute: self.get_onnx_attributes(),
            .. Default::default()
        }
    }
}

impl<'a> PartialEq for &'a dyn Node {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(*self, *other)
    }
}

impl<'a> Eq for &'a dyn Node {}

impl<'a> Hash for &'a dyn Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let a: *const _ = *self;
        let address: *const u8 = a.cast();
        state.write_usize(address.addr());
    }
}

fn attribute(name: &str, r#type: AttributeType) -> AttributeProto {
    AttributeProto {
        name: name.to_string(),
        r#type: r#type as i32,
        .. Default::default()
    }
}

pub(crate) fn attr_int(name: &str, value: i64) -> AttributeProto {
    AttributeProto { i: value, .. attribute(name, AttributeType::Int) }
}

pub(crate) fn attr_string(name: &str, value: &str) -> AttributeProto {
    AttributeProto { s: value.as_bytes().to_vec(), .. attribute(name, AttributeType::String) }
}

pub(crate) fn attr_ints(name: &str, values: Vec<i64>) -> AttributeProto {
    AttributeProto { ints: values, .. attribute(name, AttributeType::Ints) }
}

pub(crate) fn attr_floats(name: &str, values: Vec<f32>) -> AttributeProto {
    AttributeProto { floats: values, .. attribute(name, AttributeType::Floats) }
}

pub(crate) fn attr_strings<S: AsRef<str>>(name: &str, values: &[S]) -> AttributeProto {
    AttributeProto {
        strings: values.iter().map(|x| x.as_ref().as_bytes().to_vec()).collect(),
        .. attribute(name, AttributeType::Strings)
    }
}
