//! Seeded sample-input generators for the fixture catalog.

use std::fmt;

use ndarray::{ArrayD, IxDyn};
use opfixture_core::{DataType, Device, Element, Result, Tensor, Value, with_dtype};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::operators::{numpy_cat, numpy_sort};

/// One call's worth of arguments: the primary input plus the rest.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleInput {
    pub input: Value,
    pub args: Vec<Value>,
}

impl SampleInput {
    pub fn new(input: impl Into<Value>, args: Vec<Value>) -> Self {
        Self {
            input: input.into(),
            args,
        }
    }

    /// Positional arguments `[input, args...]`.
    pub fn arguments(&self) -> Vec<Value> {
        let mut arguments = Vec::with_capacity(self.args.len() + 1);
        arguments.push(self.input.clone());
        arguments.extend(self.args.iter().cloned());
        arguments
    }
}

impl fmt::Display for SampleInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SampleInput(input={}", self.input)?;
        for arg in &self.args {
            write!(f, ", {}", arg)?;
        }
        write!(f, ")")
    }
}

/// Parameters shared by every sample generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleConfig {
    pub dtype: DataType,
    pub device: Device,
    /// Applied to floating-point sample tensors only.
    pub requires_grad: bool,
    pub seed: u64,
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self {
            dtype: DataType::F32,
            device: Device::Cpu,
            requires_grad: false,
            seed: 0,
        }
    }
}

/// Signature of a catalog sample generator.
pub type SampleFn = fn(&SampleConfig) -> Result<Vec<SampleInput>>;

/// Draw a tensor of `shape` with values uniform in `[low, high)`.
///
/// Without bounds, integers default to `[-9, 10)` and floats to `[-9, 9)`.
/// Integer bounds are clamped to the dtype's range, rounded inwards
/// (`ceil(low)`, `floor(high)`) and widened to hold at least one value.
/// Booleans ignore the bounds and are a fair coin.
pub fn make_tensor(
    rng: &mut impl Rng,
    shape: &[usize],
    dtype: DataType,
    device: Device,
    low: Option<f64>,
    high: Option<f64>,
) -> Tensor {
    let mut draw: Box<dyn FnMut() -> f64 + '_> = match dtype {
        DataType::Bool => Box::new(|| if rng.random_bool(0.5) { 1.0 } else { 0.0 }),
        dtype if dtype.is_floating_point() => {
            let low = low.unwrap_or(-9.0);
            let high = high.unwrap_or(9.0);
            Box::new(move || {
                if high > low {
                    rng.random_range(low..high)
                } else {
                    low
                }
            })
        }
        dtype => {
            let (min, max) = integer_bounds(dtype);
            let low = low.unwrap_or(-9.0).max(min).ceil() as i64;
            let high = (high.unwrap_or(10.0).min(max).floor() as i64).max(low + 1);
            Box::new(move || rng.random_range(low..high) as f64)
        }
    };

    with_dtype!(dtype, T => {
        let array: ArrayD<T> = ArrayD::from_shape_fn(IxDyn(shape), |_| T::from_f64(draw()));
        Tensor::from_array(array).on(device)
    })
}

fn integer_bounds(dtype: DataType) -> (f64, f64) {
    match dtype {
        DataType::U8 => (u8::MIN as f64, u8::MAX as f64),
        DataType::I8 => (i8::MIN as f64, i8::MAX as f64),
        DataType::I16 => (i16::MIN as f64, i16::MAX as f64),
        DataType::I32 => (i32::MIN as f64, i32::MAX as f64),
        _ => (i64::MIN as f64, i64::MAX as f64),
    }
}

/// Draws tensors for one generator run with a shared seeded RNG.
struct Maker {
    rng: StdRng,
    config: SampleConfig,
}

impl Maker {
    fn new(config: &SampleConfig) -> Self {
        Self {
            rng: StdRng::seed_from_u64(config.seed),
            config: *config,
        }
    }

    /// Sample tensor honouring the config's `requires_grad`.
    fn arg(&mut self, shape: &[usize], low: Option<f64>, high: Option<f64>) -> Tensor {
        let requires_grad = self.config.requires_grad && self.config.dtype.is_floating_point();
        self.plain(shape, low, high).with_requires_grad(requires_grad)
    }

    fn plain(&mut self, shape: &[usize], low: Option<f64>, high: Option<f64>) -> Tensor {
        make_tensor(
            &mut self.rng,
            shape,
            self.config.dtype,
            self.config.device,
            low,
            high,
        )
    }
}

pub fn sample_inputs_numpy_cube(config: &SampleConfig) -> Result<Vec<SampleInput>> {
    let mut make = Maker::new(config);
    let x = make.arg(&[1], Some(0.8), Some(2.0));
    Ok(vec![SampleInput::new(x, vec![])])
}

pub fn sample_inputs_numpy_mul(config: &SampleConfig) -> Result<Vec<SampleInput>> {
    let mut make = Maker::new(config);
    let x = make.arg(&[4], Some(0.9), Some(2.0));
    let y = make.arg(&[4], Some(0.9), Some(2.0));
    Ok(vec![SampleInput::new(x, vec![y.into()])])
}

pub fn sample_inputs_numpy_sort(config: &SampleConfig) -> Result<Vec<SampleInput>> {
    let mut make = Maker::new(config);
    let x = make.arg(&[3, 5], None, None);
    Ok(vec![SampleInput::new(x, vec![Value::Int(1)])])
}

pub fn sample_inputs_numpy_take(config: &SampleConfig) -> Result<Vec<SampleInput>> {
    let mut make = Maker::new(config);
    let x = make.arg(&[3, 5], None, None);
    let dim = 1;
    let (_, ind, ind_inv) = numpy_sort(&x.detach(), dim)?;
    Ok(vec![SampleInput::new(
        x,
        vec![ind.into(), ind_inv.into(), Value::Int(dim)],
    )])
}

pub fn sample_inputs_numpy_nonzero(config: &SampleConfig) -> Result<Vec<SampleInput>> {
    let mut make = Maker::new(config);
    let values = make.plain(&[10], Some(0.9), Some(2.0));
    let mask = make_tensor(
        &mut make.rng,
        &[10],
        DataType::I64,
        config.device,
        Some(0.0),
        Some(2.0),
    );
    let x = values.mul(&mask.cast(config.dtype))?;
    let requires_grad = config.requires_grad && config.dtype.is_floating_point();
    Ok(vec![SampleInput::new(x.with_requires_grad(requires_grad), vec![])])
}

pub fn sample_inputs_numpy_nms(config: &SampleConfig) -> Result<Vec<SampleInput>> {
    const N: usize = 64;
    let mut make = Maker::new(config);
    let xs = make.plain(&[N], Some(0.0), Some(28.0));
    let dx = make.plain(&[N], Some(0.0), Some(4.0));
    let ys = make.plain(&[N], Some(0.0), Some(28.0));
    let dy = make.plain(&[N], Some(0.0), Some(4.0));

    let columns = [xs.clone(), ys.clone(), xs.add(&dx)?, ys.add(&dy)?]
        .iter()
        .map(|column| column.reshape(&[N, 1]))
        .collect::<Result<Vec<_>>>()?;
    let requires_grad = config.requires_grad && config.dtype.is_floating_point();
    let boxes = numpy_cat(&columns, 1)?.with_requires_grad(requires_grad);

    let scores = make.arg(&[N], Some(0.0), Some(1.0));
    let threshold = make.plain(&[], Some(0.0), Some(1.0)).to_f64_vec()[0];

    Ok(vec![SampleInput::new(
        boxes,
        vec![scores.into(), Value::Float(threshold)],
    )])
}

pub fn sample_inputs_numpy_view_copy(config: &SampleConfig) -> Result<Vec<SampleInput>> {
    let mut make = Maker::new(config);
    let x = make.arg(&[2, 3, 4], Some(0.9), Some(2.0));
    Ok(vec![SampleInput::new(x, vec![Value::IntList(vec![2, 12])])])
}

pub fn sample_inputs_numpy_cat(config: &SampleConfig) -> Result<Vec<SampleInput>> {
    let mut make = Maker::new(config);
    let r0 = make.arg(&[2, 3, 4], Some(0.9), Some(2.0));
    let r1 = make.arg(&[4, 3, 4], Some(0.9), Some(2.0));
    let r2 = make.arg(&[5, 3, 4], Some(0.9), Some(2.0));
    Ok(vec![SampleInput::new(vec![r0, r1, r2], vec![Value::Int(0)])])
}

pub fn sample_inputs_numpy_split_copy(config: &SampleConfig) -> Result<Vec<SampleInput>> {
    let mut make = Maker::new(config);
    let x = make.arg(&[2, 9], Some(0.9), Some(2.0));
    Ok(vec![SampleInput::new(
        x,
        vec![Value::IntList(vec![1, 3, 6]), Value::Int(1)],
    )])
}
