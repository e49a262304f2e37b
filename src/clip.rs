//! Frame stacking and the batch/time reshapes shared by every model.

use burn::prelude::*;

use crate::{
    encoder::Encoder,
    error::{Error, Result},
};

/// Stack `T` frames of `[batch, channels, height, width]` into a
/// `[batch, T, channels, height, width]` clip.
pub fn stack_frames<B: Backend>(frames: Vec<Tensor<B, 4>>) -> Result<Tensor<B, 5>> {
    let expected = frames.first().ok_or(Error::EmptyClip)?.dims();
    if let Some((index, found)) = frames
        .iter()
        .map(|frame| frame.dims())
        .enumerate()
        .find(|(_, dims)| *dims != expected)
    {
        return Err(Error::FrameShape {
            index,
            expected,
            found,
        });
    }

    Ok(Tensor::stack(frames, 1))
}

/// Fold time into the batch axis so every frame is encoded independently.
pub(crate) fn merge_time<B: Backend>(clip: Tensor<B, 5>) -> Tensor<B, 4> {
    let [batch, time, channels, height, width] = clip.dims();
    clip.reshape([batch * time, channels, height, width])
}

/// Encode each frame with the shared encoder, giving `[batch, time, features]`.
pub(crate) fn encode_frames<B: Backend>(encoder: &Encoder<B>, clip: Tensor<B, 5>) -> Tensor<B, 3> {
    let [batch, time, ..] = clip.dims();
    let features = encoder.forward(merge_time(clip));
    tracing::trace!(dims = ?features.dims(), "encoded frames");
    let [_, width] = features.dims();
    features.reshape([batch, time, width])
}

#[cfg(test)]
mod tests {
    use burn::backend::NdArray;

    use super::*;

    type TestBackend = NdArray;

    #[test]
    fn frames_stack_on_the_time_axis() {
        let device = Default::default();
        let frames = (0..4)
            .map(|idx| Tensor::<TestBackend, 4>::full([2, 3, 8, 8], idx as f32, &device))
            .collect();

        let clip = stack_frames(frames).unwrap();
        assert_eq!(clip.dims(), [2, 4, 3, 8, 8]);

        let third = clip.slice([0..2, 2..3, 0..3, 0..8, 0..8]);
        let expected = Tensor::<TestBackend, 5>::full([2, 1, 3, 8, 8], 2.0, &device);
        third
            .into_data()
            .assert_approx_eq(&expected.into_data(), 5);
    }

    #[test]
    fn empty_clip_is_rejected() {
        let frames: Vec<Tensor<TestBackend, 4>> = Vec::new();
        assert!(matches!(stack_frames(frames), Err(Error::EmptyClip)));
    }

    #[test]
    fn mismatched_frame_is_reported() {
        let device = Default::default();
        let frames = vec![
            Tensor::<TestBackend, 4>::zeros([1, 3, 8, 8], &device),
            Tensor::<TestBackend, 4>::zeros([1, 3, 8, 8], &device),
            Tensor::<TestBackend, 4>::zeros([1, 3, 8, 4], &device),
        ];

        match stack_frames(frames) {
            Err(Error::FrameShape { index, found, .. }) => {
                assert_eq!(index, 2);
                assert_eq!(found, [1, 3, 8, 4]);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn merge_time_keeps_frame_order() {
        let device = Default::default();
        let clip = Tensor::<TestBackend, 1, Int>::arange(0..8, &device)
            .float()
            .reshape([2, 4, 1, 1, 1]);

        let merged = merge_time(clip);
        assert_eq!(merged.dims(), [8, 1, 1, 1]);
        merged.reshape([8]).into_data().assert_approx_eq(
            &Tensor::<TestBackend, 1, Int>::arange(0..8, &device)
                .float()
                .into_data(),
            5,
        );
    }
}
