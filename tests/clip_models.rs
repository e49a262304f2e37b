use action_recognition_burn::{
    clip::stack_frames,
    encoder::resnet::{Pretrained, ResNetArch, ResNetPreset},
    ConvLstmConfig, DetrConfig, SimpleModelConfig,
};
use burn::{
    backend::{Autodiff, NdArray},
    tensor::{Distribution, Tensor},
};

type Backend = NdArray;
type AutodiffBackend = Autodiff<NdArray>;

fn random(arch: ResNetArch) -> ResNetPreset {
    ResNetPreset::new(arch).with_weights(Pretrained::Random)
}

fn frames<B: burn::tensor::backend::Backend>(
    count: usize,
    batch: usize,
    size: usize,
    device: &B::Device,
) -> Vec<Tensor<B, 4>> {
    (0..count)
        .map(|_| Tensor::random([batch, 3, size, size], Distribution::Default, device))
        .collect()
}

fn check_simple_model(size: usize) {
    let device = Default::default();
    let model = SimpleModelConfig::new()
        .with_backbone(random(ResNetArch::ResNet34))
        .with_num_classes(10)
        .init::<Backend>(&device)
        .unwrap();

    let clip = stack_frames(frames::<Backend>(8, 2, size, &device)).unwrap();
    let (logits, weights) = model.forward_with_attention(clip);

    assert_eq!(logits.dims(), [2, 10]);
    assert_eq!(weights.dims(), [2, 8]);
    weights
        .sum_dim(1)
        .into_data()
        .assert_approx_eq(&Tensor::<Backend, 2>::ones([2, 1], &device).into_data(), 4);
}

#[test]
fn simple_model_eight_frame_clip() {
    check_simple_model(32);
}

#[test]
#[ignore = "full-resolution ResNet-34 is slow on the ndarray backend"]
fn simple_model_eight_frame_clip_full_resolution() {
    check_simple_model(224);
}

#[test]
fn conv_lstm_streams_batches_and_trains() {
    let device = Default::default();
    let mut model = ConvLstmConfig::new()
        .with_backbone(random(ResNetArch::ResNet18))
        .with_num_classes(3)
        .with_hidden_dim(8)
        .with_lstm_layers(2)
        .init::<AutodiffBackend>(&device)
        .unwrap();

    // Consecutive batches of one long stream, each backpropagated separately.
    for _ in 0..3 {
        let logits = model
            .forward_frames(frames::<AutodiffBackend>(2, 2, 32, &device))
            .unwrap();
        assert_eq!(logits.dims(), [2, 3]);

        let grads = logits.sum().backward();
        assert!(model.classifier.weight.grad(&grads).is_some());
    }
    assert_eq!(model.state().map(|state| state.dims()), Some([4, 2, 8]));

    // Last, smaller batch of the epoch.
    let logits = model
        .forward_frames(frames::<AutodiffBackend>(2, 1, 32, &device))
        .unwrap();
    assert_eq!(logits.dims(), [1, 3]);

    model.reset();
    assert!(model.state().is_none());
}

#[test]
fn detr_classifies_frame_lists() {
    let device = Default::default();
    let detr = DetrConfig::new()
        .with_backbone(random(ResNetArch::ResNet18))
        .with_n_classes(5)
        .with_hidden_dim(16)
        .with_n_heads(2)
        .with_d_ff(32)
        .with_num_encoder_layers(1)
        .with_num_decoder_layers(1)
        .init::<Backend>(&device)
        .unwrap();

    let logits = detr
        .forward_frames(frames::<Backend>(4, 3, 64, &device))
        .unwrap();
    assert_eq!(logits.dims(), [3, 5]);
}
