//! Network definitions for the sunflower leaf classifier.
//!
//! `classifier` rebuilds the architecture the artifact was trained with:
//! a DenseNet-121 backbone followed by a pooled 1024 -> 512 -> 4 head.
//! `fallback_cnn` is the minimal last-resort network served when no load
//! strategy can make sense of the artifact.

use shared::CLASS_LABELS;
use tch::nn::{self, ConvConfig, FuncT, SequentialT};
use tch::Tensor;

pub const NUM_CLASSES: i64 = CLASS_LABELS.len() as i64;

const GROWTH_RATE: i64 = 32;
const BN_SIZE: i64 = 4;
const BLOCK_LAYERS: [i64; 4] = [6, 12, 24, 16];

fn dense_layer(p: &nn::Path, c_in: i64) -> FuncT<'static> {
    let bottleneck = BN_SIZE * GROWTH_RATE;
    let cfg1 = ConvConfig { bias: false, ..Default::default() };
    let cfg3 = ConvConfig { padding: 1, bias: false, ..Default::default() };
    let norm1 = nn::batch_norm2d(p / "norm1", c_in, Default::default());
    let conv1 = nn::conv2d(p / "conv1", c_in, bottleneck, 1, cfg1);
    let norm2 = nn::batch_norm2d(p / "norm2", bottleneck, Default::default());
    let conv2 = nn::conv2d(p / "conv2", bottleneck, GROWTH_RATE, 3, cfg3);
    nn::func_t(move |xs, train| {
        let ys = xs
            .apply_t(&norm1, train)
            .relu()
            .apply(&conv1)
            .apply_t(&norm2, train)
            .relu()
            .apply(&conv2);
        Tensor::cat(&[xs, &ys], 1)
    })
}

fn dense_block(p: &nn::Path, c_in: i64, nlayers: i64) -> SequentialT {
    let mut seq = nn::seq_t();
    for i in 0..nlayers {
        let layer = dense_layer(&(p / format!("denselayer{}", i + 1)), c_in + i * GROWTH_RATE);
        seq = seq.add(layer);
    }
    seq
}

fn transition(p: &nn::Path, c_in: i64, c_out: i64) -> SequentialT {
    let cfg = ConvConfig { bias: false, ..Default::default() };
    nn::seq_t()
        .add(nn::batch_norm2d(p / "norm", c_in, Default::default()))
        .add_fn(|xs| xs.relu())
        .add(nn::conv2d(p / "conv", c_in, c_out, 1, cfg))
        .add_fn(|xs| xs.avg_pool2d_default(2))
}

/// DenseNet-121 features plus the custom classification head. Output is
/// raw logits; callers apply softmax.
pub fn classifier(p: &nn::Path) -> SequentialT {
    let fp = p / "features";
    let stem_cfg = ConvConfig { stride: 2, padding: 3, bias: false, ..Default::default() };
    let mut seq = nn::seq_t()
        .add(nn::conv2d(&fp / "conv0", 3, 64, 7, stem_cfg))
        .add(nn::batch_norm2d(&fp / "norm0", 64, Default::default()))
        .add_fn(|xs| xs.relu().max_pool2d([3, 3], [2, 2], [1, 1], [1, 1], false));

    let mut c_in = 64;
    for (i, &nlayers) in BLOCK_LAYERS.iter().enumerate() {
        seq = seq.add(dense_block(&(&fp / format!("denseblock{}", i + 1)), c_in, nlayers));
        c_in += nlayers * GROWTH_RATE;
        if i + 1 != BLOCK_LAYERS.len() {
            seq = seq.add(transition(&(&fp / format!("transition{}", i + 1)), c_in, c_in / 2));
            c_in /= 2;
        }
    }

    let hp = p / "head";
    seq.add(nn::batch_norm2d(&fp / "norm5", c_in, Default::default()))
        .add_fn(|xs| xs.relu().adaptive_avg_pool2d([1, 1]).flat_view())
        .add(nn::linear(&hp / "fc1", c_in, 1024, Default::default()))
        .add_fn(|xs| xs.relu())
        .add(nn::linear(&hp / "fc2", 1024, 512, Default::default()))
        .add_fn(|xs| xs.relu())
        .add(nn::linear(&hp / "fc3", 512, NUM_CLASSES, Default::default()))
}

/// Minimal untrained classifier used when every load strategy has failed.
/// Keeps the service callable with structurally valid predictions.
pub fn fallback_cnn(p: &nn::Path) -> SequentialT {
    let cfg = ConvConfig { stride: 2, padding: 1, ..Default::default() };
    nn::seq_t()
        .add(nn::conv2d(p / "conv1", 3, 32, 3, cfg))
        .add_fn(|xs| xs.relu())
        .add(nn::conv2d(p / "conv2", 32, 64, 3, cfg))
        .add_fn(|xs| xs.relu())
        .add_fn(|xs| xs.adaptive_avg_pool2d([1, 1]).flat_view())
        .add(nn::linear(p / "fc", 64, NUM_CLASSES, Default::default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{Device, Kind};

    #[test]
    fn fallback_cnn_outputs_one_logit_per_class() {
        let vs = nn::VarStore::new(Device::Cpu);
        let net = fallback_cnn(&vs.root());
        let input = Tensor::zeros([1, 3, 64, 64], (Kind::Float, Device::Cpu));
        let output = tch::no_grad(|| input.apply_t(&net, false));
        assert_eq!(output.size(), vec![1, NUM_CLASSES]);
    }
}
