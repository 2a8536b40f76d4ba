//! Scalar element trait implemented by every tensor storage type.

use std::cmp::Ordering;
use std::fmt::Debug;

use half::f16;
use ndarray::ArrayD;

use crate::tensor::TensorData;
use crate::types::DataType;

/// Numeric behaviour required by the host array kernels.
///
/// Integer arithmetic wraps, boolean arithmetic is logical (`add` is or, `mul`
/// is and), and the sort order places NaN after every other value.
pub trait Element: Copy + Debug + PartialEq + Send + Sync + 'static {
    /// Data type tag for this element type.
    const DTYPE: DataType;

    fn zero() -> Self;
    fn from_f64(value: f64) -> Self;
    fn to_f64(self) -> f64;
    fn elem_add(self, rhs: Self) -> Self;
    fn elem_mul(self, rhs: Self) -> Self;
    /// Total order used by sorting kernels.
    fn sort_cmp(&self, other: &Self) -> Ordering;

    fn is_zero(self) -> bool {
        self == Self::zero()
    }

    /// Wrap an owned array in the matching `TensorData` variant.
    fn into_data(array: ArrayD<Self>) -> TensorData;
    /// Borrow the array if `data` stores this element type.
    fn from_data(data: &TensorData) -> Option<&ArrayD<Self>>;
}

macro_rules! impl_int_element {
    ($t:ty, $variant:ident) => {
        impl Element for $t {
            const DTYPE: DataType = DataType::$variant;

            fn zero() -> Self {
                0
            }

            fn from_f64(value: f64) -> Self {
                value as $t
            }

            fn to_f64(self) -> f64 {
                self as f64
            }

            fn elem_add(self, rhs: Self) -> Self {
                self.wrapping_add(rhs)
            }

            fn elem_mul(self, rhs: Self) -> Self {
                self.wrapping_mul(rhs)
            }

            fn sort_cmp(&self, other: &Self) -> Ordering {
                self.cmp(other)
            }

            fn into_data(array: ArrayD<Self>) -> TensorData {
                TensorData::$variant(array)
            }

            fn from_data(data: &TensorData) -> Option<&ArrayD<Self>> {
                match data {
                    TensorData::$variant(array) => Some(array),
                    _ => None,
                }
            }
        }
    };
}

impl_int_element!(u8, U8);
impl_int_element!(i8, I8);
impl_int_element!(i16, I16);
impl_int_element!(i32, I32);
impl_int_element!(i64, I64);

fn nan_last<T: PartialOrd>(a: &T, a_nan: bool, b: &T, b_nan: bool) -> Ordering {
    match (a_nan, b_nan) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
    }
}

macro_rules! impl_float_element {
    ($t:ty, $variant:ident) => {
        impl Element for $t {
            const DTYPE: DataType = DataType::$variant;

            fn zero() -> Self {
                0.0
            }

            fn from_f64(value: f64) -> Self {
                value as $t
            }

            fn to_f64(self) -> f64 {
                self as f64
            }

            fn elem_add(self, rhs: Self) -> Self {
                self + rhs
            }

            fn elem_mul(self, rhs: Self) -> Self {
                self * rhs
            }

            fn sort_cmp(&self, other: &Self) -> Ordering {
                nan_last(self, self.is_nan(), other, other.is_nan())
            }

            fn into_data(array: ArrayD<Self>) -> TensorData {
                TensorData::$variant(array)
            }

            fn from_data(data: &TensorData) -> Option<&ArrayD<Self>> {
                match data {
                    TensorData::$variant(array) => Some(array),
                    _ => None,
                }
            }
        }
    };
}

impl_float_element!(f32, F32);
impl_float_element!(f64, F64);

impl Element for f16 {
    const DTYPE: DataType = DataType::F16;

    fn zero() -> Self {
        f16::ZERO
    }

    fn from_f64(value: f64) -> Self {
        f16::from_f64(value)
    }

    fn to_f64(self) -> f64 {
        f16::to_f64(self)
    }

    fn elem_add(self, rhs: Self) -> Self {
        self + rhs
    }

    fn elem_mul(self, rhs: Self) -> Self {
        self * rhs
    }

    fn sort_cmp(&self, other: &Self) -> Ordering {
        nan_last(self, self.is_nan(), other, other.is_nan())
    }

    fn into_data(array: ArrayD<Self>) -> TensorData {
        TensorData::F16(array)
    }

    fn from_data(data: &TensorData) -> Option<&ArrayD<Self>> {
        match data {
            TensorData::F16(array) => Some(array),
            _ => None,
        }
    }
}

impl Element for bool {
    const DTYPE: DataType = DataType::Bool;

    fn zero() -> Self {
        false
    }

    fn from_f64(value: f64) -> Self {
        value != 0.0
    }

    fn to_f64(self) -> f64 {
        if self { 1.0 } else { 0.0 }
    }

    fn elem_add(self, rhs: Self) -> Self {
        self || rhs
    }

    fn elem_mul(self, rhs: Self) -> Self {
        self && rhs
    }

    fn sort_cmp(&self, other: &Self) -> Ordering {
        self.cmp(other)
    }

    fn into_data(array: ArrayD<Self>) -> TensorData {
        TensorData::Bool(array)
    }

    fn from_data(data: &TensorData) -> Option<&ArrayD<Self>> {
        match data {
            TensorData::Bool(array) => Some(array),
            _ => None,
        }
    }
}

/// Run `$body` with `$t` bound to the Rust element type of `$dtype`.
///
/// ```
/// use opfixture_core::{with_dtype, DataType, Element};
///
/// let bytes = with_dtype!(DataType::I16, T => std::mem::size_of::<T>());
/// assert_eq!(bytes, 2);
/// let zero = with_dtype!(DataType::F64, T => T::zero().to_f64());
/// assert_eq!(zero, 0.0);
/// ```
#[macro_export]
macro_rules! with_dtype {
    ($dtype:expr, $t:ident => $body:expr) => {
        match $dtype {
            $crate::DataType::Bool => {
                #[allow(dead_code)]
                type $t = bool;
                $body
            }
            $crate::DataType::U8 => {
                #[allow(dead_code)]
                type $t = u8;
                $body
            }
            $crate::DataType::I8 => {
                #[allow(dead_code)]
                type $t = i8;
                $body
            }
            $crate::DataType::I16 => {
                #[allow(dead_code)]
                type $t = i16;
                $body
            }
            $crate::DataType::I32 => {
                #[allow(dead_code)]
                type $t = i32;
                $body
            }
            $crate::DataType::I64 => {
                #[allow(dead_code)]
                type $t = i64;
                $body
            }
            $crate::DataType::F16 => {
                #[allow(dead_code)]
                type $t = $crate::half::f16;
                $body
            }
            $crate::DataType::F32 => {
                #[allow(dead_code)]
                type $t = f32;
                $body
            }
            $crate::DataType::F64 => {
                #[allow(dead_code)]
                type $t = f64;
                $body
            }
        }
    };
}

/// Match every `TensorData` variant, binding the typed array to `$arr`.
#[macro_export]
macro_rules! match_data {
    ($data:expr, $arr:ident => $body:expr) => {
        match $data {
            $crate::TensorData::Bool($arr) => $body,
            $crate::TensorData::U8($arr) => $body,
            $crate::TensorData::I8($arr) => $body,
            $crate::TensorData::I16($arr) => $body,
            $crate::TensorData::I32($arr) => $body,
            $crate::TensorData::I64($arr) => $body,
            $crate::TensorData::F16($arr) => $body,
            $crate::TensorData::F32($arr) => $body,
            $crate::TensorData::F64($arr) => $body,
        }
    };
}
