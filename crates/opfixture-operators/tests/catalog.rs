//! Runs every catalog entry's sample inputs through its operator.

mod common;

use common::{DataType, Device, Value, run_and_check_fake};
use opfixture_operators::{SampleConfig, call_sample, custom_op_db, fixture_registry};

#[test]
fn test_catalog_matches_registry() {
    let registry = fixture_registry();
    let db = custom_op_db();
    assert_eq!(registry.len(), db.len());

    for info in &db {
        let name = info.op.name();
        assert!(registry.contains(&name), "{} not registered", name);
        assert!(name.starts_with("_opfixture::"));
    }
}

#[test]
fn test_samples_run_for_every_dtype() {
    for info in custom_op_db() {
        for &dtype in &info.dtypes {
            for seed in 0..3 {
                let config = SampleConfig {
                    dtype,
                    device: Device::Cuda(0),
                    seed,
                    ..Default::default()
                };
                let samples = info.samples(&config).unwrap();
                assert!(!samples.is_empty());

                for sample in &samples {
                    match call_sample(&info, sample) {
                        Ok(_) => {
                            run_and_check_fake(info.op.as_ref(), &sample.arguments());
                        }
                        Err(err) if err.is_unsupported() => {}
                        Err(err) => panic!("{} failed on {} ({}): {}", info.name, sample, dtype, err),
                    }
                }
            }
        }
    }
}

#[test]
fn test_samples_record_backward_for_float_inputs() {
    for info in custom_op_db().into_iter().filter(|info| info.supports_autograd) {
        let config = SampleConfig {
            dtype: DataType::F64,
            requires_grad: true,
            ..Default::default()
        };
        for sample in info.samples(&config).unwrap() {
            let call = info.op.call_with_grad(&sample.arguments()).unwrap();
            assert!(call.grad_fn.is_some(), "{} recorded no backward", info.name);

            let differentiable = call
                .outputs
                .iter()
                .enumerate()
                .filter(|(_, output)| output.requires_grad())
                .count();
            assert!(differentiable >= 1, "{}", info.name);

            let grads: Vec<Option<Value>> = vec![None; call.outputs.len()];
            let input_grads = call.backward(grads).unwrap();
            assert_eq!(input_grads.len(), sample.arguments().len());
            assert!(input_grads[0].is_some(), "{} has no input gradient", info.name);
        }
    }
}

#[test]
fn test_integer_samples_never_require_grad() {
    for info in custom_op_db() {
        let config = SampleConfig {
            dtype: DataType::I32,
            requires_grad: true,
            ..Default::default()
        };
        for sample in info.samples(&config).unwrap() {
            assert!(
                sample.arguments().iter().all(|arg| !arg.requires_grad()),
                "{}",
                info.name
            );
        }
    }
}
