//! Element-wise operators: cube and broadcasting multiply.

use ndarray::{ArrayD, IxDyn, Zip};
use opfixture_core::{
    CustomOp, Element, Error, FakeArgs, FakeValue, OpSchema, ParamKind, Result, ReturnKind,
    ShapeEnv, SymbolicDim, Tensor, Value, ValueArgs, match_data,
};

use crate::NAMESPACE;
use crate::helpers::{broadcast_shapes, check_same_device, check_same_dtype, grad_tensor};

/// Returns `(x³, 3x²)`.
pub fn numpy_cube(x: &Tensor) -> Result<(Tensor, Tensor)> {
    let (cube, dx) = match_data!(x.data(), array => {
        let (cube, dx) = cube_typed(array);
        (Element::into_data(cube), Element::into_data(dx))
    });
    Ok((
        Tensor::from_data(cube).on(x.device()),
        Tensor::from_data(dx).on(x.device()),
    ))
}

fn cube_typed<T: Element>(array: &ArrayD<T>) -> (ArrayD<T>, ArrayD<T>) {
    let three = T::from_f64(3.0);
    let cube = array.mapv(|v| v.elem_mul(v).elem_mul(v));
    let dx = array.mapv(|v| three.elem_mul(v.elem_mul(v)));
    (cube, dx)
}

/// Broadcasting element-wise product.
///
/// # Errors
/// `Error::Precondition` if the tensors are on different devices or have
/// different dtypes; `Error::Shape` if the shapes do not broadcast.
pub fn numpy_mul(x: &Tensor, y: &Tensor) -> Result<Tensor> {
    let device = check_same_device("numpy_mul", &[x.device(), y.device()])?;
    check_same_dtype("numpy_mul", &[x.dtype(), y.dtype()])?;
    let shape = broadcast_shapes(&[x.shape(), y.shape()])?;

    let data = match_data!(x.data(), lhs => Element::into_data(mul_typed(lhs, y, &shape)?));
    Ok(Tensor::from_data(data).on(device))
}

fn mul_typed<T: Element>(lhs: &ArrayD<T>, rhs: &Tensor, shape: &[usize]) -> Result<ArrayD<T>> {
    let rhs = rhs.array::<T>()?;
    let broadcast_error = |from: &[usize]| {
        Error::Shape(format!("cannot broadcast {:?} to {:?}", from, shape))
    };
    let lhs = lhs
        .broadcast(IxDyn(shape))
        .ok_or_else(|| broadcast_error(lhs.shape()))?;
    let rhs = rhs
        .broadcast(IxDyn(shape))
        .ok_or_else(|| broadcast_error(rhs.shape()))?;
    Ok(Zip::from(lhs).and(rhs).map_collect(|&a, &b| a.elem_mul(b)))
}

/// `numpy_cube(Tensor x) -> (Tensor, Tensor)`.
pub struct NumpyCube;

pub struct CubeCtx {
    x: Tensor,
    dx: Tensor,
}

impl CustomOp for NumpyCube {
    type Ctx = CubeCtx;

    fn schema(&self) -> OpSchema {
        OpSchema::new(NAMESPACE, "numpy_cube")
            .param("x", ParamKind::Tensor)
            .returns(&[ReturnKind::Tensor, ReturnKind::Tensor])
    }

    fn forward(&self, args: &[Value]) -> Result<Vec<Value>> {
        let (cube, dx) = numpy_cube(args.tensor(0)?)?;
        Ok(vec![cube.into(), dx.into()])
    }

    fn fake(&self, args: &[FakeValue], _env: &mut ShapeEnv) -> Result<Vec<FakeValue>> {
        let x = args.tensor(0)?;
        Ok(vec![x.empty_like().into(), x.empty_like().into()])
    }

    fn supports_autograd(&self) -> bool {
        true
    }

    fn setup_context(&self, args: &[Value], outputs: &[Value]) -> Result<CubeCtx> {
        Ok(CubeCtx {
            x: args.tensor(0)?.detach(),
            dx: outputs.tensor(1)?.detach(),
        })
    }

    fn backward(
        &self,
        ctx: CubeCtx,
        grad_outputs: &[Option<Value>],
        needs_input_grad: &[bool],
    ) -> Result<Vec<Option<Value>>> {
        if !needs_input_grad[0] {
            return Ok(vec![None]);
        }
        let grad_out = grad_tensor(grad_outputs, 0)?;
        let grad_dx = grad_tensor(grad_outputs, 1)?;
        let grad_x = numpy_mul(grad_out, &ctx.dx)?.add(&numpy_mul(grad_dx, &ctx.x)?.scale(6.0))?;
        Ok(vec![Some(grad_x.into())])
    }
}

/// `numpy_mul(Tensor x, Tensor y) -> Tensor`.
pub struct NumpyMul;

pub struct MulCtx {
    x: Tensor,
    y: Tensor,
}

impl CustomOp for NumpyMul {
    type Ctx = MulCtx;

    fn schema(&self) -> OpSchema {
        OpSchema::new(NAMESPACE, "numpy_mul")
            .param("x", ParamKind::Tensor)
            .param("y", ParamKind::Tensor)
            .returns(&[ReturnKind::Tensor])
    }

    fn forward(&self, args: &[Value]) -> Result<Vec<Value>> {
        Ok(vec![numpy_mul(args.tensor(0)?, args.tensor(1)?)?.into()])
    }

    fn fake(&self, args: &[FakeValue], _env: &mut ShapeEnv) -> Result<Vec<FakeValue>> {
        let x = args.tensor(0)?;
        let y = args.tensor(1)?;
        check_same_device("numpy_mul", &[x.device, y.device])?;
        check_same_dtype("numpy_mul", &[x.dtype, y.dtype])?;

        let shape = match (x.static_shape(), y.static_shape()) {
            (Some(xs), Some(ys)) => broadcast_shapes(&[&xs, &ys])?
                .into_iter()
                .map(SymbolicDim::Fixed)
                .collect(),
            _ if x.shape == y.shape => x.shape.clone(),
            _ => {
                return Err(Error::Shape(format!(
                    "numpy_mul: cannot broadcast {} with {}",
                    x, y
                )));
            }
        };
        Ok(vec![x.new_empty(shape, x.dtype).into()])
    }

    fn supports_autograd(&self) -> bool {
        true
    }

    fn setup_context(&self, args: &[Value], _outputs: &[Value]) -> Result<MulCtx> {
        Ok(MulCtx {
            x: args.tensor(0)?.detach(),
            y: args.tensor(1)?.detach(),
        })
    }

    fn backward(
        &self,
        ctx: MulCtx,
        grad_outputs: &[Option<Value>],
        needs_input_grad: &[bool],
    ) -> Result<Vec<Option<Value>>> {
        let grad_out = grad_tensor(grad_outputs, 0)?;
        let grad_x = if needs_input_grad[0] {
            let grad = numpy_mul(grad_out, &ctx.y)?.sum_to_shape(ctx.x.shape())?;
            Some(grad.into())
        } else {
            None
        };
        let grad_y = if needs_input_grad[1] {
            let grad = numpy_mul(grad_out, &ctx.x)?.sum_to_shape(ctx.y.shape())?;
            Some(grad.into())
        } else {
            None
        };
        Ok(vec![grad_x, grad_y])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opfixture_core::{DataType, Device};

    #[test]
    fn test_cube_values() {
        let x = Tensor::from_vec(vec![1.0f64, -2.0, 0.5], &[3]).unwrap();
        let (cube, dx) = numpy_cube(&x).unwrap();

        assert_eq!(cube.to_vec::<f64>().unwrap(), vec![1.0, -8.0, 0.125]);
        assert_eq!(dx.to_vec::<f64>().unwrap(), vec![3.0, 12.0, 0.75]);
    }

    #[test]
    fn test_cube_keeps_integer_dtype() {
        let x = Tensor::from_vec(vec![2i32, -3], &[2]).unwrap().on(Device::Cuda(0));
        let (cube, dx) = numpy_cube(&x).unwrap();

        assert_eq!(cube.dtype(), DataType::I32);
        assert_eq!(cube.device(), Device::Cuda(0));
        assert_eq!(cube.to_vec::<i32>().unwrap(), vec![8, -27]);
        assert_eq!(dx.to_vec::<i32>().unwrap(), vec![12, 27]);
    }

    #[test]
    fn test_mul_broadcasts() {
        let x = Tensor::from_vec(vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]).unwrap();
        let y = Tensor::from_vec(vec![10.0f32, 100.0, 1000.0], &[3]).unwrap();
        let out = numpy_mul(&x, &y).unwrap();

        assert_eq!(out.shape(), &[2, 3]);
        assert_eq!(
            out.to_vec::<f32>().unwrap(),
            vec![10.0, 200.0, 3000.0, 40.0, 500.0, 6000.0]
        );
    }

    #[test]
    fn test_mul_preconditions() {
        let x = Tensor::from_vec(vec![1.0f32, 2.0], &[2]).unwrap();
        let on_cuda = x.clone().on(Device::Cuda(0));
        let doubles = Tensor::from_vec(vec![1.0f64, 2.0], &[2]).unwrap();
        let wrong_shape = Tensor::from_vec(vec![1.0f32, 2.0, 3.0], &[3]).unwrap();

        assert!(matches!(numpy_mul(&x, &on_cuda), Err(Error::Precondition(_))));
        assert!(matches!(numpy_mul(&x, &doubles), Err(Error::Precondition(_))));
        assert!(matches!(numpy_mul(&x, &wrong_shape), Err(Error::Shape(_))));
    }

    #[test]
    fn test_mul_fake_broadcast_shape() {
        let mut env = ShapeEnv::new();
        let x = Tensor::zeros(&[4, 1], DataType::F32).meta();
        let y = Tensor::zeros(&[3], DataType::F32).meta();
        let out = NumpyMul.fake(&[x.into(), y.into()], &mut env).unwrap();

        assert_eq!(out[0].as_tensor().unwrap().static_shape(), Some(vec![4, 3]));
    }
}
