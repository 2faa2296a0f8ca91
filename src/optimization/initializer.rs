use ndarray::{ArrayD, IxDyn};
use num_traits::Float;

use crate::error::{Error, Result};
use crate::model::{DataType, Tensor};

/// Decoded element storage of an initializer
#[derive(Debug, Clone, PartialEq)]
pub enum InitializerData {
    Float(ArrayD<f32>),
    Double(ArrayD<f64>),
}

/// Typed, mutable view over a constant tensor
///
/// Only single and double precision payloads are accepted. Element-wise
/// operations require equal element counts and never broadcast; shape
/// legality is the calling rule's business.
#[derive(Debug, Clone, PartialEq)]
pub struct Initializer {
    name: String,
    dims: Vec<i64>,
    doc_string: String,
    data: InitializerData,
}

impl Initializer {
    /// Cheap type gate used by rule predicates before decoding anything
    pub fn is_supported_data_type(tensor: &Tensor) -> bool {
        matches!(tensor.data_type, DataType::Float | DataType::Double)
    }

    /// Decode a raw tensor, validating its type and payload length
    pub fn new(tensor: &Tensor) -> Result<Self> {
        if !Self::is_supported_data_type(tensor) {
            return Err(Error::UnsupportedDataType(format!(
                "{:?} in initializer '{}'",
                tensor.data_type, tensor.name
            )));
        }
        tensor.validate_payload()?;

        let shape: Vec<usize> = tensor.dims.iter().map(|&d| d as usize).collect();
        let data = match tensor.data_type {
            DataType::Float => {
                let values: Vec<f32> = tensor
                    .data
                    .chunks_exact(4)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect();
                InitializerData::Float(Self::array(tensor, &shape, values)?)
            }
            _ => {
                let values: Vec<f64> = tensor
                    .data
                    .chunks_exact(8)
                    .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                    .collect();
                InitializerData::Double(Self::array(tensor, &shape, values)?)
            }
        };

        Ok(Self {
            name: tensor.name.clone(),
            dims: tensor.dims.clone(),
            doc_string: tensor.doc_string.clone(),
            data,
        })
    }

    fn array<T>(tensor: &Tensor, shape: &[usize], values: Vec<T>) -> Result<ArrayD<T>> {
        ArrayD::from_shape_vec(IxDyn(shape), values).map_err(|e| Error::CorruptInitializer {
            name: tensor.name.clone(),
            reason: e.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dims(&self) -> &[i64] {
        &self.dims
    }

    pub fn data(&self) -> &InitializerData {
        &self.data
    }

    pub fn data_type(&self) -> DataType {
        match self.data {
            InitializerData::Float(_) => DataType::Float,
            InitializerData::Double(_) => DataType::Double,
        }
    }

    /// Number of elements
    pub fn size(&self) -> usize {
        match &self.data {
            InitializerData::Float(a) => a.len(),
            InitializerData::Double(a) => a.len(),
        }
    }

    /// Element-wise `self += other`
    pub fn add(&mut self, other: &Initializer) -> Result<&mut Self> {
        self.combine(other, "add", |a, b| a + b, |a, b| a + b)
    }

    /// Element-wise `self *= other`
    pub fn mul(&mut self, other: &Initializer) -> Result<&mut Self> {
        self.combine(other, "mul", |a, b| a * b, |a, b| a * b)
    }

    /// Multiply each slice starting at `axis` by one scaler
    ///
    /// The leading `dims[..axis]` elements index into `scalers`; a single
    /// scaler is applied to every slice.
    pub fn scale_by_axis(&mut self, scalers: &Initializer, axis: usize) -> Result<&mut Self> {
        if axis > self.dims.len() {
            return Err(Error::ShapeMismatch(format!(
                "axis {} out of range for '{}' with rank {}",
                axis,
                self.name,
                self.dims.len()
            )));
        }
        let outer: usize = self.dims[..axis].iter().map(|&d| d as usize).product();
        if scalers.size() != 1 && scalers.size() != outer {
            return Err(Error::ShapeMismatch(format!(
                "'{}' has {} scalers for {} slices of '{}'",
                scalers.name,
                scalers.size(),
                outer,
                self.name
            )));
        }

        let applied = match (&mut self.data, &scalers.data) {
            (InitializerData::Float(lhs), InitializerData::Float(rhs)) => {
                scale_slices(lhs, rhs, outer);
                true
            }
            (InitializerData::Double(lhs), InitializerData::Double(rhs)) => {
                scale_slices(lhs, rhs, outer);
                true
            }
            _ => false,
        };
        if !applied {
            return Err(self.type_mismatch(scalers));
        }
        Ok(self)
    }

    /// Replace the dimension list, keeping the element order
    pub fn reshape(&mut self, dims: Vec<i64>) -> Result<()> {
        if dims.iter().any(|&d| d < 0) {
            return Err(Error::ShapeMismatch(format!("negative dimension in {:?}", dims)));
        }
        let shape: Vec<usize> = dims.iter().map(|&d| d as usize).collect();
        let mismatch = |e: ndarray::ShapeError| {
            Error::ShapeMismatch(format!("cannot reshape '{}' to {:?}: {}", self.name, dims, e))
        };

        let data = match &self.data {
            InitializerData::Float(a) => {
                InitializerData::Float(a.clone().into_shape(IxDyn(&shape)).map_err(mismatch)?)
            }
            InitializerData::Double(a) => {
                InitializerData::Double(a.clone().into_shape(IxDyn(&shape)).map_err(mismatch)?)
            }
        };

        self.data = data;
        self.dims = dims;
        Ok(())
    }

    /// Serialize back into a raw tensor under the same name
    pub fn to_tensor(&self) -> Tensor {
        let (data_type, data) = match &self.data {
            InitializerData::Float(a) => (DataType::Float, a.iter().flat_map(|v| v.to_le_bytes()).collect()),
            InitializerData::Double(a) => (DataType::Double, a.iter().flat_map(|v| v.to_le_bytes()).collect()),
        };

        Tensor {
            name: self.name.clone(),
            data_type,
            dims: self.dims.clone(),
            data,
            doc_string: self.doc_string.clone(),
        }
    }

    fn combine(
        &mut self,
        other: &Initializer,
        op: &str,
        f32_op: impl Fn(f32, f32) -> f32,
        f64_op: impl Fn(f64, f64) -> f64,
    ) -> Result<&mut Self> {
        if self.size() != other.size() {
            return Err(Error::ShapeMismatch(format!(
                "cannot {} '{}' ({} elements) and '{}' ({} elements)",
                op,
                self.name,
                self.size(),
                other.name,
                other.size()
            )));
        }

        let applied = match (&mut self.data, &other.data) {
            (InitializerData::Float(lhs), InitializerData::Float(rhs)) => {
                zip_apply(lhs, rhs, f32_op);
                true
            }
            (InitializerData::Double(lhs), InitializerData::Double(rhs)) => {
                zip_apply(lhs, rhs, f64_op);
                true
            }
            _ => false,
        };
        if !applied {
            return Err(self.type_mismatch(other));
        }
        Ok(self)
    }

    fn type_mismatch(&self, other: &Initializer) -> Error {
        Error::UnsupportedDataType(format!(
            "'{}' is {:?} but '{}' is {:?}",
            self.name,
            self.data_type(),
            other.name,
            other.data_type()
        ))
    }
}

// Pairs elements in logical order, so [C] and [C,1,1] line up
fn zip_apply<T: Float>(lhs: &mut ArrayD<T>, rhs: &ArrayD<T>, op: impl Fn(T, T) -> T) {
    for (a, &b) in lhs.iter_mut().zip(rhs.iter()) {
        *a = op(*a, b);
    }
}

fn scale_slices<T: Float>(data: &mut ArrayD<T>, scalers: &ArrayD<T>, outer: usize) {
    let inner = if outer == 0 { 0 } else { data.len() / outer };
    let scalers: Vec<T> = scalers.iter().copied().collect();

    for (i, value) in data.iter_mut().enumerate() {
        let scaler = if scalers.len() == 1 { scalers[0] } else { scalers[i / inner] };
        *value = *value * scaler;
    }
}
