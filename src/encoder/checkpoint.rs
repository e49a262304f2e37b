//! Shape-checked record loading.
//!
//! burn replaces parameter tensors from a record without looking at their
//! shapes, so a file written for another head or input width would load
//! silently. Loading goes through [`load_checked`] instead.

use std::path::Path;

use burn::{
    module::{Module, ModuleVisitor, ParamId},
    tensor::{backend::Backend, Tensor},
};

use crate::error::Error;

#[derive(Default)]
struct ShapeCollector {
    shapes: Vec<Vec<usize>>,
}

impl<B: Backend> ModuleVisitor<B> for ShapeCollector {
    fn visit_float<const D: usize>(&mut self, _id: ParamId, tensor: &Tensor<B, D>) {
        self.shapes.push(tensor.dims().to_vec());
    }
}

/// Shapes of every float tensor in `module`, in visiting order.
pub(crate) fn param_shapes<B: Backend, M: Module<B>>(module: &M) -> Vec<Vec<usize>> {
    let mut collector = ShapeCollector::default();
    module.visit(&mut collector);
    collector.shapes
}

/// Load `record` into `module`, failing unless every tensor keeps its shape.
///
/// Containers must already agree in length: burn asserts on `Vec` records of
/// the wrong length. Optional sub-modules missing from the record show up
/// here as a tensor count mismatch.
pub(crate) fn load_checked<B: Backend, M: Module<B>>(
    module: M,
    record: M::Record,
    path: &Path,
) -> crate::Result<M> {
    let expected = param_shapes(&module);
    let loaded = module.load_record(record);
    let found = param_shapes(&loaded);

    let mismatch = |reason: String| Error::Weights {
        path: path.to_path_buf(),
        reason,
    };

    if expected.len() != found.len() {
        return Err(mismatch(format!(
            "file has {} tensors, the model has {}",
            found.len(),
            expected.len()
        )));
    }
    for (index, (expected, found)) in expected.iter().zip(&found).enumerate() {
        if expected != found {
            return Err(mismatch(format!(
                "tensor {index} has shape {found:?}, the model expects {expected:?}"
            )));
        }
    }

    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use burn::{backend::NdArray, nn::LinearConfig};

    use super::*;

    type TestBackend = NdArray;

    #[test]
    fn matching_record_loads() {
        let device = Default::default();
        let source = LinearConfig::new(4, 3).init::<TestBackend>(&device);
        let target = LinearConfig::new(4, 3).init::<TestBackend>(&device);
        let weight = source.weight.val();

        let loaded = load_checked(target, source.into_record(), Path::new("linear.mpk")).unwrap();

        loaded
            .weight
            .val()
            .into_data()
            .assert_eq(&weight.into_data(), true);
    }

    #[test]
    fn wider_record_is_rejected() {
        let device = Default::default();
        let source = LinearConfig::new(4, 7).init::<TestBackend>(&device);
        let target = LinearConfig::new(4, 3).init::<TestBackend>(&device);

        let result = load_checked(target, source.into_record(), Path::new("linear.mpk"));

        assert!(matches!(result, Err(Error::Weights { .. })));
    }

    #[test]
    fn missing_bias_is_rejected() {
        let device = Default::default();
        let source = LinearConfig::new(4, 3)
            .with_bias(false)
            .init::<TestBackend>(&device);
        let target = LinearConfig::new(4, 3).init::<TestBackend>(&device);

        let result = load_checked(target, source.into_record(), Path::new("linear.mpk"));

        assert!(matches!(result, Err(Error::Weights { reason, .. }) if reason.contains("tensors")));
    }
}
