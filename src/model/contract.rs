use crate::data::batch::Proportions;
use crate::error::{Error, Result};
use crate::math::map_batch::MaskBatch;
use crate::math::tensor::Tensor;
use crate::network::unet::UnetModel;

/// What the trainer needs from a segmentation architecture.
///
/// A variant supplies at least `get_name`, `get_model`, `get_loss` and
/// `get_loss_gradient`; the provided implementations of those four fail with
/// [`Error::NotImplemented`]. `predict` and `backpropagate` work for any
/// model whose first output channel is the target-class probability.
pub trait ModelContract {
    /// Stable identifier, used as the run name prefix.
    fn get_name(&self) -> Result<String> {
        Err(Error::NotImplemented("get_name"))
    }

    /// Builds a fresh trainable model. Called once per run.
    fn get_model(&self) -> Result<UnetModel> {
        Err(Error::NotImplemented("get_model"))
    }

    /// Scalar loss of `prediction` against the normalized `labels`.
    /// `proportions` are passed through from the batch for losses that use them.
    fn get_loss(
        &self,
        prediction: &MaskBatch,
        proportions: &Proportions,
        labels: &MaskBatch,
    ) -> Result<f64> {
        let _ = (prediction, proportions, labels);
        Err(Error::NotImplemented("get_loss"))
    }

    /// ∂loss/∂prediction, same dimensions as `prediction`.
    fn get_loss_gradient(
        &self,
        prediction: &MaskBatch,
        proportions: &Proportions,
        labels: &MaskBatch,
    ) -> Result<MaskBatch> {
        let _ = (prediction, proportions, labels);
        Err(Error::NotImplemented("get_loss_gradient"))
    }

    /// Forward pass keeping only the first output channel.
    fn predict(&self, model: &mut UnetModel, images: &Tensor) -> Result<MaskBatch> {
        model.forward(images)?.channel(0)
    }

    /// Routes a gradient w.r.t. the output of `predict` back through the
    /// model. Must follow a `predict` on the same batch.
    fn backpropagate(&self, model: &mut UnetModel, grad: &MaskBatch) -> Result<()> {
        let grad = Tensor::from_channel(grad, model.output_channels(), 0)?;
        model.backward(&grad)
    }
}

/// The bare contract with no architecture behind it.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericUnet;

impl ModelContract for GenericUnet {}

/// Checks that a prediction and its labels line up before a loss touches them.
pub(crate) fn check_pair(prediction: &MaskBatch, labels: &MaskBatch) -> Result<()> {
    if !prediction.same_dims(labels) {
        return Err(Error::Shape(format!(
            "prediction {}x{}x{} does not match labels {}x{}x{}",
            prediction.batch,
            prediction.height,
            prediction.width,
            labels.batch,
            labels.height,
            labels.width
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_contract_is_not_implemented() {
        let mask = MaskBatch::filled(1, 2, 2, 0.0);
        let base = GenericUnet;
        assert!(matches!(base.get_name(), Err(Error::NotImplemented("get_name"))));
        assert!(matches!(base.get_model(), Err(Error::NotImplemented("get_model"))));
        assert!(matches!(
            base.get_loss(&mask, &Vec::new(), &mask),
            Err(Error::NotImplemented("get_loss"))
        ));
        assert!(base.get_loss_gradient(&mask, &Vec::new(), &mask).is_err());
    }
}
