//! Element type and device tags shared by real and fake tensors.

use std::fmt;

/// Scalar element type of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataType {
    Bool,
    U8,
    I8,
    I16,
    I32,
    I64,
    F16,
    F32,
    F64,
}

impl DataType {
    /// Every data type, in declaration order.
    pub const ALL: [DataType; 9] = [
        DataType::Bool,
        DataType::U8,
        DataType::I8,
        DataType::I16,
        DataType::I32,
        DataType::I64,
        DataType::F16,
        DataType::F32,
        DataType::F64,
    ];

    /// The standard numeric set: unsigned/signed integers plus single and double floats.
    pub const STANDARD: [DataType; 7] = [
        DataType::U8,
        DataType::I8,
        DataType::I16,
        DataType::I32,
        DataType::I64,
        DataType::F32,
        DataType::F64,
    ];

    /// Size of this data type in bytes.
    pub fn size(&self) -> usize {
        match self {
            DataType::Bool | DataType::U8 | DataType::I8 => 1,
            DataType::I16 | DataType::F16 => 2,
            DataType::I32 | DataType::F32 => 4,
            DataType::I64 | DataType::F64 => 8,
        }
    }

    pub fn is_floating_point(&self) -> bool {
        matches!(self, DataType::F16 | DataType::F32 | DataType::F64)
    }

    /// Long-form name, e.g. `float32` or `int64`.
    pub fn name(&self) -> &'static str {
        match self {
            DataType::Bool => "bool",
            DataType::U8 => "uint8",
            DataType::I8 => "int8",
            DataType::I16 => "int16",
            DataType::I32 => "int32",
            DataType::I64 => "int64",
            DataType::F16 => "float16",
            DataType::F32 => "float32",
            DataType::F64 => "float64",
        }
    }

    /// Parse either the long form (`float32`) or the short form (`f32`).
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        DataType::ALL
            .into_iter()
            .find(|dtype| dtype.name() == name || dtype.short_name() == name)
    }

    fn short_name(&self) -> &'static str {
        match self {
            DataType::Bool => "bool",
            DataType::U8 => "u8",
            DataType::I8 => "i8",
            DataType::I16 => "i16",
            DataType::I32 => "i32",
            DataType::I64 => "i64",
            DataType::F16 => "f16",
            DataType::F32 => "f32",
            DataType::F64 => "f64",
        }
    }

    /// The standard numeric set extended with `extra`, sorted and deduplicated.
    ///
    /// ```
    /// use opfixture_core::DataType;
    ///
    /// let dtypes = DataType::all_types_and(&[DataType::Bool, DataType::F16]);
    /// assert_eq!(dtypes.len(), 9);
    /// assert!(dtypes.contains(&DataType::Bool));
    /// ```
    pub fn all_types_and(extra: &[DataType]) -> Vec<DataType> {
        let mut dtypes: Vec<DataType> = DataType::STANDARD.to_vec();
        dtypes.extend_from_slice(extra);
        dtypes.sort();
        dtypes.dedup();
        dtypes
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Placement tag carried by every tensor.
///
/// Numeric work always happens on host arrays; the device only records where
/// a result claims to live so operators can preserve the caller's placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Device {
    #[default]
    Cpu,
    Cuda(u32),
}

impl Device {
    /// Parse `cpu`, `cuda` or `cuda:N`.
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        match name.as_str() {
            "cpu" => Some(Device::Cpu),
            "cuda" => Some(Device::Cuda(0)),
            other => other
                .strip_prefix("cuda:")
                .and_then(|index| index.parse().ok())
                .map(Device::Cuda),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => f.write_str("cpu"),
            Device::Cuda(index) => write!(f, "cuda:{}", index),
        }
    }
}
