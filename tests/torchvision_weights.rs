//! Loading torchvision `state_dict` files through `EncoderConfig::weights_file`.
//!
//! The files are written here in the zip + pickle layout `torch.save` uses, with
//! torchvision's ResNet-18 key names, so no Python is needed.

use std::{fs::File, io::Write, path::Path};

use action_recognition_burn::{
    encoder::{
        resnet::{Pretrained, ResNetArch, ResNetPreset},
        EncoderConfig,
    },
    Error,
};
use burn::{
    backend::NdArray,
    module::{Module, ModuleVisitor, ParamId},
    tensor::Tensor,
};
use zip::{write::SimpleFileOptions, CompressionMethod, ZipWriter};

type Backend = NdArray;

/// One `state_dict` entry: name, shape and whether it is an int64 counter.
struct Entry {
    name: String,
    shape: Vec<usize>,
    counter: bool,
}

impl Entry {
    fn float(name: String, shape: Vec<usize>) -> Self {
        Self {
            name,
            shape,
            counter: false,
        }
    }

    fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    /// Entries that land in the body: everything but `fc.*` and batch counters.
    fn is_body_tensor(&self) -> bool {
        !self.counter && !self.name.starts_with("fc.")
    }
}

fn batch_norm(entries: &mut Vec<Entry>, prefix: &str, channels: usize) {
    for param in ["weight", "bias", "running_mean", "running_var"] {
        entries.push(Entry::float(format!("{prefix}.{param}"), vec![channels]));
    }
    entries.push(Entry {
        name: format!("{prefix}.num_batches_tracked"),
        shape: vec![],
        counter: true,
    });
}

/// torchvision's `resnet18().state_dict()` layout.
fn resnet18_state_dict() -> Vec<Entry> {
    let mut entries = vec![Entry::float("conv1.weight".into(), vec![64, 3, 7, 7])];
    batch_norm(&mut entries, "bn1", 64);

    let mut in_channels = 64;
    for (layer, channels) in [(1, 64), (2, 128), (3, 256), (4, 512)] {
        for block in 0..2 {
            let prefix = format!("layer{layer}.{block}");
            let block_in = if block == 0 { in_channels } else { channels };

            entries.push(Entry::float(
                format!("{prefix}.conv1.weight"),
                vec![channels, block_in, 3, 3],
            ));
            batch_norm(&mut entries, &format!("{prefix}.bn1"), channels);
            entries.push(Entry::float(
                format!("{prefix}.conv2.weight"),
                vec![channels, channels, 3, 3],
            ));
            batch_norm(&mut entries, &format!("{prefix}.bn2"), channels);

            if block == 0 && layer > 1 {
                entries.push(Entry::float(
                    format!("{prefix}.downsample.0.weight"),
                    vec![channels, block_in, 1, 1],
                ));
                batch_norm(&mut entries, &format!("{prefix}.downsample.1"), channels);
            }
        }
        in_channels = channels;
    }

    entries.push(Entry::float("fc.weight".into(), vec![1000, 512]));
    entries.push(Entry::float("fc.bias".into(), vec![1000]));
    entries
}

/// Constant fill of the `index`-th float entry; distinct per tensor.
fn fill_value(index: usize) -> f32 {
    (index + 1) as f32 / 1024.0
}

/// Minimal protocol-2 pickle writer covering what `torch.save` emits for a
/// flat `state_dict`.
#[derive(Default)]
struct Pickle {
    bytes: Vec<u8>,
}

impl Pickle {
    fn op(&mut self, op: u8) {
        self.bytes.push(op);
    }

    fn unicode(&mut self, value: &str) {
        self.op(b'X');
        self.bytes.extend_from_slice(&(value.len() as u32).to_le_bytes());
        self.bytes.extend_from_slice(value.as_bytes());
    }

    fn int(&mut self, value: usize) {
        self.op(b'J');
        self.bytes.extend_from_slice(&(value as i32).to_le_bytes());
    }

    fn global(&mut self, module: &str, name: &str) {
        self.op(b'c');
        self.bytes.extend_from_slice(format!("{module}\n{name}\n").as_bytes());
    }

    fn int_tuple(&mut self, values: &[usize]) {
        self.op(b'(');
        for &value in values {
            self.int(value);
        }
        self.op(b't');
    }

    /// `_rebuild_tensor_v2(storage, 0, shape, stride, False, OrderedDict())`
    fn tensor(&mut self, storage_key: &str, entry: &Entry) {
        let storage = if entry.counter {
            "LongStorage"
        } else {
            "FloatStorage"
        };
        let mut stride = vec![1; entry.shape.len()];
        for dim in (0..entry.shape.len().saturating_sub(1)).rev() {
            stride[dim] = stride[dim + 1] * entry.shape[dim + 1];
        }

        self.global("torch._utils", "_rebuild_tensor_v2");
        self.op(b'(');
        self.op(b'(');
        self.unicode("storage");
        self.global("torch", storage);
        self.unicode(storage_key);
        self.unicode("cpu");
        self.int(entry.numel());
        self.op(b't');
        self.op(b'Q');
        self.int(0);
        self.int_tuple(&entry.shape);
        self.int_tuple(&stride);
        self.op(0x89);
        self.global("collections", "OrderedDict");
        self.op(b')');
        self.op(b'R');
        self.op(b't');
        self.op(b'R');
    }
}

fn write_state_dict(path: &Path, entries: &[Entry]) {
    let mut pickle = Pickle::default();
    pickle.op(0x80);
    pickle.op(2);
    pickle.op(b'}');
    pickle.op(b'(');
    for (index, entry) in entries.iter().enumerate() {
        pickle.unicode(&entry.name);
        pickle.tensor(&index.to_string(), entry);
    }
    pickle.op(b'u');
    pickle.op(b'.');

    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    let mut zip = ZipWriter::new(File::create(path).unwrap());
    zip.start_file("archive/data.pkl", options).unwrap();
    zip.write_all(&pickle.bytes).unwrap();

    for (index, entry) in entries.iter().enumerate() {
        let bytes: Vec<u8> = if entry.counter {
            (0..entry.numel()).flat_map(|_| 100i64.to_le_bytes()).collect()
        } else {
            let value = fill_value(index);
            (0..entry.numel()).flat_map(|_| value.to_le_bytes()).collect()
        };
        zip.start_file(format!("archive/data/{index}"), options).unwrap();
        zip.write_all(&bytes).unwrap();
    }
    zip.finish().unwrap();
}

/// Shape and value of every float tensor a module holds, for constant fills.
#[derive(Default)]
struct TensorFills {
    fills: Vec<(Vec<usize>, f32)>,
}

impl ModuleVisitor<Backend> for TensorFills {
    fn visit_float<const D: usize>(&mut self, _id: ParamId, tensor: &Tensor<Backend, D>) {
        let min: f32 = tensor.clone().min().into_scalar();
        let max: f32 = tensor.clone().max().into_scalar();
        assert_eq!(min, max, "tensor of shape {:?} is not a constant fill", tensor.dims());
        self.fills.push((tensor.dims().to_vec(), max));
    }
}

fn sorted_by_value(mut fills: Vec<(Vec<usize>, f32)>) -> Vec<(Vec<usize>, u32)> {
    fills.sort_by(|a, b| a.1.total_cmp(&b.1));
    fills
        .into_iter()
        .map(|(shape, value)| (shape, (value * 1024.0).round() as u32))
        .collect()
}

fn random_backbone(arch: ResNetArch) -> ResNetPreset {
    ResNetPreset::new(arch).with_weights(Pretrained::Random)
}

#[test]
fn torchvision_state_dict_fills_every_body_tensor() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("resnet18.pth");
    let entries = resnet18_state_dict();
    write_state_dict(&path, &entries);

    let device = Default::default();
    let body = EncoderConfig::new()
        .with_backbone(random_backbone(ResNetArch::ResNet18))
        .with_head(false)
        .with_weights_file(Some(path))
        .init_body::<Backend>(&device)
        .unwrap();

    let mut visitor = TensorFills::default();
    body.visit(&mut visitor);

    let expected = entries
        .iter()
        .enumerate()
        .filter(|(_, entry)| entry.is_body_tensor())
        .map(|(index, entry)| (entry.shape.clone(), fill_value(index)))
        .collect();
    assert_eq!(
        sorted_by_value(visitor.fills),
        sorted_by_value(expected)
    );
}

#[test]
fn torchvision_weights_for_another_depth_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("resnet18.pth");
    write_state_dict(&path, &resnet18_state_dict());

    let device = Default::default();
    let result = EncoderConfig::new()
        .with_backbone(random_backbone(ResNetArch::ResNet34))
        .with_weights_file(Some(path))
        .init::<Backend>(&device);

    assert!(matches!(result, Err(Error::Weights { .. })));
}

#[test]
fn torchvision_weights_must_match_the_input_channels() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("resnet18.pth");
    write_state_dict(&path, &resnet18_state_dict());

    let device = Default::default();
    let result = EncoderConfig::new()
        .with_backbone(random_backbone(ResNetArch::ResNet18))
        .with_n_in(1)
        .with_weights_file(Some(path))
        .init::<Backend>(&device);

    assert!(matches!(result, Err(Error::Weights { reason, .. }) if reason.contains("shape")));
}
