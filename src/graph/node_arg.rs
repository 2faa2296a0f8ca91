use crate::model::{DataType, Dimension};

/// Where the value carried by a NodeArg comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeArgRole {
    /// Fed by the caller at run time
    GraphInput,
    /// Exposed to the caller; its producer must survive rewriting
    GraphOutput,
    /// Backed by an entry in the graph's initializer registry
    Initializer,
    /// Produced and consumed inside the graph
    Intermediate,
}

/// Named, typed tensor slot shared between a producer and its consumers
#[derive(Debug, Clone, PartialEq)]
pub struct NodeArg {
    name: String,
    data_type: DataType,
    shape: Option<Vec<Dimension>>,
    role: NodeArgRole,
}

impl NodeArg {
    /// Create a new NodeArg with unknown shape
    pub fn new(name: &str, data_type: DataType, role: NodeArgRole) -> Self {
        Self {
            name: name.to_string(),
            data_type,
            shape: None,
            role,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Declared shape; `None` when even the rank is unknown
    pub fn shape(&self) -> Option<&[Dimension]> {
        self.shape.as_deref()
    }

    /// Shape as plain extents, if every dimension is static
    pub fn static_dims(&self) -> Option<Vec<i64>> {
        self.shape
            .as_ref()?
            .iter()
            .map(Dimension::value)
            .collect()
    }

    pub fn role(&self) -> NodeArgRole {
        self.role
    }

    pub fn set_shape(&mut self, shape: Vec<Dimension>) {
        self.shape = Some(shape);
    }

    pub fn clear_shape(&mut self) {
        self.shape = None;
    }

    pub(crate) fn set_data_type(&mut self, data_type: DataType) {
        self.data_type = data_type;
    }

    pub(crate) fn set_role(&mut self, role: NodeArgRole) {
        self.role = role;
    }
}
