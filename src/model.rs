use std::collections::HashMap;

use prost::Message;

use crate::error::{Error, Result};
use crate::proto::TensorProto;

/// ONNX data types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Undefined,
    Float,
    Double,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    String,
    Bool,
    Float16,
    Complex64,
    Complex128,
    BFloat16,
}

impl DataType {
    pub fn from_proto(proto_type: i32) -> Self {
        match proto_type {
            1 => DataType::Float,
            2 => DataType::Uint8,
            3 => DataType::Int8,
            4 => DataType::Uint16,
            5 => DataType::Int16,
            6 => DataType::Int32,
            7 => DataType::Int64,
            8 => DataType::String,
            9 => DataType::Bool,
            10 => DataType::Float16,
            11 => DataType::Double,
            12 => DataType::Uint32,
            13 => DataType::Uint64,
            14 => DataType::Complex64,
            15 => DataType::Complex128,
            16 => DataType::BFloat16,
            _ => DataType::Undefined,
        }
    }

    pub fn to_proto(self) -> i32 {
        match self {
            DataType::Undefined => 0,
            DataType::Float => 1,
            DataType::Uint8 => 2,
            DataType::Int8 => 3,
            DataType::Uint16 => 4,
            DataType::Int16 => 5,
            DataType::Int32 => 6,
            DataType::Int64 => 7,
            DataType::String => 8,
            DataType::Bool => 9,
            DataType::Float16 => 10,
            DataType::Double => 11,
            DataType::Uint32 => 12,
            DataType::Uint64 => 13,
            DataType::Complex64 => 14,
            DataType::Complex128 => 15,
            DataType::BFloat16 => 16,
        }
    }

    /// Size in bytes of one element in a raw payload, `None` for variable-width types
    pub fn element_size(&self) -> Option<usize> {
        match self {
            DataType::Bool | DataType::Int8 | DataType::Uint8 => Some(1),
            DataType::Int16 | DataType::Uint16 | DataType::Float16 | DataType::BFloat16 => Some(2),
            DataType::Float | DataType::Int32 | DataType::Uint32 => Some(4),
            DataType::Double | DataType::Int64 | DataType::Uint64 | DataType::Complex64 => Some(8),
            DataType::Complex128 => Some(16),
            DataType::String | DataType::Undefined => None,
        }
    }
}

/// Dimension information for tensor shapes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dimension {
    Value(i64),
    Param(String),
}

impl Dimension {
    /// The static extent of this dimension, if known
    pub fn value(&self) -> Option<i64> {
        match self {
            Dimension::Value(v) => Some(*v),
            Dimension::Param(_) => None,
        }
    }
}

/// Build a fully static shape from a dimension list
pub fn static_shape(dims: &[i64]) -> Vec<Dimension> {
    dims.iter().map(|&d| Dimension::Value(d)).collect()
}

/// Information about a graph input or output
#[derive(Debug, Clone)]
pub struct TensorInfo {
    pub name: String,
    pub data_type: DataType,
    /// `None` when the rank is unknown
    pub shape: Option<Vec<Dimension>>,
    pub doc_string: String,
}

impl TensorInfo {
    pub fn new(name: &str, data_type: DataType, dims: &[i64]) -> Self {
        Self {
            name: name.to_string(),
            data_type,
            shape: Some(static_shape(dims)),
            doc_string: String::new(),
        }
    }
}

/// Raw constant tensor, the payload of a graph initializer
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub name: String,
    pub data_type: DataType,
    pub dims: Vec<i64>,
    /// Little-endian element bytes
    pub data: Vec<u8>,
    pub doc_string: String,
}

impl Tensor {
    /// Create an f32 tensor from values
    pub fn from_f32(name: &str, dims: &[i64], values: &[f32]) -> Self {
        Self {
            name: name.to_string(),
            data_type: DataType::Float,
            dims: dims.to_vec(),
            data: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
            doc_string: String::new(),
        }
    }

    /// Create an f64 tensor from values
    pub fn from_f64(name: &str, dims: &[i64], values: &[f64]) -> Self {
        Self {
            name: name.to_string(),
            data_type: DataType::Double,
            dims: dims.to_vec(),
            data: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
            doc_string: String::new(),
        }
    }

    /// Create an i64 tensor from values
    pub fn from_i64(name: &str, dims: &[i64], values: &[i64]) -> Self {
        Self {
            name: name.to_string(),
            data_type: DataType::Int64,
            dims: dims.to_vec(),
            data: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
            doc_string: String::new(),
        }
    }

    /// Number of elements implied by the dimension list
    pub fn element_count(&self) -> Result<usize> {
        self.dims.iter().try_fold(1usize, |acc, &d| {
            if d < 0 {
                return Err(self.corrupt(format!("negative dimension {}", d)));
            }
            usize::try_from(d)
                .ok()
                .and_then(|d| acc.checked_mul(d))
                .ok_or_else(|| self.corrupt(format!("element count of dims {:?} overflows", self.dims)))
        })
    }

    /// Check that the payload length agrees with the dimensions and element type
    pub fn validate_payload(&self) -> Result<()> {
        let count = self.element_count()?;
        let element_size = self.data_type.element_size().ok_or_else(|| {
            Error::UnsupportedDataType(format!("{:?} in tensor '{}'", self.data_type, self.name))
        })?;

        let expected = count
            .checked_mul(element_size)
            .ok_or_else(|| self.corrupt(format!("byte size of dims {:?} overflows", self.dims)))?;
        if self.data.len() != expected {
            return Err(self.corrupt(format!(
                "payload of {} bytes does not match dims {:?} of {:?}",
                self.data.len(),
                self.dims,
                self.data_type
            )));
        }

        Ok(())
    }

    /// Decode integer contents, widening int32 to i64
    pub fn int64_values(&self) -> Result<Vec<i64>> {
        self.validate_payload()?;

        match self.data_type {
            DataType::Int64 => Ok(self
                .data
                .chunks_exact(8)
                .map(|c| i64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                .collect()),
            DataType::Int32 => Ok(self
                .data
                .chunks_exact(4)
                .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]) as i64)
                .collect()),
            other => Err(Error::UnsupportedDataType(format!(
                "{:?} in tensor '{}', expected an integer tensor",
                other, self.name
            ))),
        }
    }

    /// Decode a serialized `TensorProto`
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let proto = TensorProto::decode(bytes)?;
        Self::from_proto(&proto)
    }

    /// Convert a TensorProto to internal Tensor representation
    pub fn from_proto(tensor_proto: &TensorProto) -> Result<Self> {
        let data_type = tensor_proto
            .data_type
            .map(DataType::from_proto)
            .unwrap_or(DataType::Undefined);

        if tensor_proto.name.is_empty() {
            return Err(Error::MissingField("Initializer is missing a name".to_string()));
        }

        let data = if !tensor_proto.raw_data.is_empty() {
            tensor_proto.raw_data.clone()
        } else {
            // Typed fields are only consulted when raw_data is absent
            match data_type {
                DataType::Float => tensor_proto.float_data.iter().flat_map(|v| v.to_le_bytes()).collect(),
                DataType::Double => tensor_proto.double_data.iter().flat_map(|v| v.to_le_bytes()).collect(),
                DataType::Int64 => tensor_proto.int64_data.iter().flat_map(|v| v.to_le_bytes()).collect(),
                DataType::Int32 => tensor_proto.int32_data.iter().flat_map(|v| v.to_le_bytes()).collect(),
                _ => Vec::new(),
            }
        };

        let tensor = Tensor {
            name: tensor_proto.name.clone(),
            data_type,
            dims: tensor_proto.dims.clone(),
            data,
            doc_string: tensor_proto.doc_string.clone(),
        };
        tensor.validate_payload()?;

        Ok(tensor)
    }

    /// Convert back to the wire message, always using raw_data
    pub fn to_proto(&self) -> TensorProto {
        TensorProto {
            dims: self.dims.clone(),
            data_type: Some(self.data_type.to_proto()),
            name: self.name.clone(),
            raw_data: self.data.clone(),
            doc_string: self.doc_string.clone(),
            ..Default::default()
        }
    }

    fn corrupt(&self, reason: String) -> Error {
        Error::CorruptInitializer {
            name: self.name.clone(),
            reason,
        }
    }
}

/// Node attribute
#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    Float(f32),
    Int(i64),
    String(String),
    Tensor(Tensor),
    Floats(Vec<f32>),
    Ints(Vec<i64>),
    Strings(Vec<String>),
}

/// Node as handed over by the model loader, wired by tensor names
#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub op_type: String,
    pub domain: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub attributes: HashMap<String, Attribute>,
    pub doc_string: String,
}

impl Node {
    pub fn new(name: &str, op_type: &str, inputs: &[&str], outputs: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            op_type: op_type.to_string(),
            domain: String::new(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
            attributes: HashMap::new(),
            doc_string: String::new(),
        }
    }

    pub fn with_attribute(mut self, name: &str, value: Attribute) -> Self {
        self.attributes.insert(name.to_string(), value);
        self
    }
}

/// Loader-side graph description consumed by the graph builder
#[derive(Debug, Clone, Default)]
pub struct Graph {
    pub name: String,
    pub nodes: Vec<Node>,
    pub inputs: Vec<TensorInfo>,
    pub outputs: Vec<TensorInfo>,
    pub initializers: Vec<Tensor>,
    /// Intermediate values with known type information
    pub value_info: Vec<TensorInfo>,
    pub opset_imports: HashMap<String, i64>,
    pub doc_string: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tensor_proto_round_trip_through_bytes() {
        let tensor = Tensor::from_f32("bias", &[2], &[1.0, 2.0]);
        let bytes = tensor.to_proto().encode_to_vec();

        let decoded = Tensor::decode(&bytes).unwrap();
        assert_eq!(decoded, tensor);
    }

    #[test]
    fn test_typed_fields_are_used_without_raw_data() {
        let proto = TensorProto {
            dims: vec![3],
            data_type: Some(DataType::Int64.to_proto()),
            int64_data: vec![0, -1, i64::MAX],
            name: "starts".to_string(),
            ..Default::default()
        };

        let tensor = Tensor::from_proto(&proto).unwrap();
        assert_eq!(tensor.int64_values().unwrap(), vec![0, -1, i64::MAX]);
    }

    #[test]
    fn test_payload_length_mismatch_is_corruption() {
        let mut tensor = Tensor::from_f32("w", &[2, 2], &[1.0, 2.0, 3.0, 4.0]);
        tensor.data.truncate(12);

        assert!(matches!(
            tensor.validate_payload(),
            Err(Error::CorruptInitializer { .. })
        ));
    }

    #[test]
    fn test_oversized_dims_are_corruption() {
        let proto = TensorProto {
            dims: vec![i64::MAX, 4],
            data_type: Some(DataType::Float.to_proto()),
            name: "huge".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            Tensor::from_proto(&proto),
            Err(Error::CorruptInitializer { .. })
        ));

        // The element count fits, the byte size does not
        let tensor = Tensor {
            dims: vec![(usize::MAX / 2) as i64],
            ..Tensor::from_f32("wide", &[0], &[])
        };
        assert!(matches!(
            tensor.validate_payload(),
            Err(Error::CorruptInitializer { .. })
        ));
    }

    #[test]
    fn test_unnamed_proto_is_rejected() {
        let proto = TensorProto {
            dims: vec![1],
            data_type: Some(DataType::Float.to_proto()),
            float_data: vec![1.0],
            ..Default::default()
        };

        assert!(matches!(Tensor::from_proto(&proto), Err(Error::MissingField(_))));
    }
}
