// ============================================================
// Layer 5 — INT8 Quantization Arithmetic
// ============================================================
// Linear quantization maps a real value x to an integer code
//
//   q = clamp(round(x / scale) + zero_point, qmin, qmax)
//   x ≈ (q - zero_point) * scale
//
// round() sends halfway values to the even integer, on the host and
// on the backend alike.
//
// Two schemes are used:
//
//   weights      symmetric INT8, codes [-127, 127], zero_point 0,
//                one scale per tensor or per output feature
//   activations  affine UINT8, codes [0, 255], the range is widened
//                to contain 0 so that padding and ReLU zeros are exact
//
// Execution stays on the float backend: a quantized tensor is held
// as its dequantized values, which lie exactly on the INT8 grid.
//
// Reference: Jacob et al. (2018) "Quantization and Training of Neural
//            Networks for Efficient Integer-Arithmetic-Only Inference"

use burn::prelude::*;
use burn::tensor::ElementConversion;
use serde::{Deserialize, Serialize};

use crate::domain::quantization::WeightGranularity;

const INT8_MAX: i32 = 127;
const UINT8_MAX: i32 = 255;

/// Smallest scale handed out, so constant tensors stay representable.
const MIN_SCALE: f32 = 1e-8;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuantParams {
    pub scale: f32,
    pub zero_point: i32,
    pub qmin: i32,
    pub qmax: i32,
}

impl QuantParams {
    /// Symmetric INT8 parameters covering [-abs_max, abs_max].
    pub fn symmetric(abs_max: f32) -> Self {
        let abs_max = abs_max.abs();
        let scale = if abs_max > 0.0 { (abs_max / INT8_MAX as f32).max(MIN_SCALE) } else { 1.0 };
        Self { scale, zero_point: 0, qmin: -INT8_MAX, qmax: INT8_MAX }
    }

    /// Affine UINT8 parameters covering [min, max] ∪ {0}.
    pub fn affine(min: f32, max: f32) -> Self {
        let min = min.min(0.0);
        let max = max.max(0.0);
        let range = max - min;
        let scale = if range > 0.0 { (range / UINT8_MAX as f32).max(MIN_SCALE) } else { 1.0 };
        let zero_point = ((-min / scale).round_ties_even() as i32).clamp(0, UINT8_MAX);
        Self { scale, zero_point, qmin: 0, qmax: UINT8_MAX }
    }

    pub fn quantize(&self, x: f32) -> i32 {
        ((x / self.scale).round_ties_even() as i32 + self.zero_point).clamp(self.qmin, self.qmax)
    }

    pub fn dequantize(&self, q: i32) -> f32 {
        (q - self.zero_point) as f32 * self.scale
    }

    pub fn fake_quantize(&self, x: f32) -> f32 {
        self.dequantize(self.quantize(x))
    }

    /// Element-wise fake quantization of a tensor.
    pub fn fake_quantize_tensor<B: Backend, const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        let lo = (self.qmin - self.zero_point) as f32;
        let hi = (self.qmax - self.zero_point) as f32;
        x.div_scalar(self.scale).round().clamp(lo, hi).mul_scalar(self.scale)
    }
}

/// Affine parameters from the live range of `x`.
pub fn dynamic_params<B: Backend, const D: usize>(x: &Tensor<B, D>) -> QuantParams {
    let min: f32 = x.clone().min().into_scalar().elem();
    let max: f32 = x.clone().max().into_scalar().elem();
    QuantParams::affine(min, max)
}

/// Quantization of one [d_input, d_output] weight matrix.
///
/// `axis` is `Some(1)` for one scale per output feature and `None` for a
/// single scale over the whole tensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightQuant {
    pub axis: Option<usize>,
    pub params: Vec<QuantParams>,
}

impl WeightQuant {
    pub fn compute<B: Backend>(weight: &Tensor<B, 2>, granularity: WeightGranularity) -> Self {
        let [d_in, d_out] = weight.dims();
        let values = tensor_values(weight.clone());

        match granularity {
            WeightGranularity::PerTensor => {
                let abs_max = values.iter().fold(0.0f32, |m, v| m.max(v.abs()));
                Self { axis: None, params: vec![QuantParams::symmetric(abs_max)] }
            }
            WeightGranularity::PerChannel => {
                let mut abs_max = vec![0.0f32; d_out];
                for row in 0..d_in {
                    for (col, m) in abs_max.iter_mut().enumerate() {
                        *m = m.max(values[row * d_out + col].abs());
                    }
                }
                Self {
                    axis: Some(1),
                    params: abs_max.into_iter().map(QuantParams::symmetric).collect(),
                }
            }
        }
    }

    fn params_for(&self, col: usize) -> &QuantParams {
        match self.axis {
            Some(_) => &self.params[col],
            None => &self.params[0],
        }
    }

    /// Weight with every element replaced by its nearest INT8 grid value.
    pub fn fake_quantize<B: Backend>(&self, weight: Tensor<B, 2>) -> Tensor<B, 2> {
        let [d_in, d_out] = weight.dims();
        let device = weight.device();
        let values: Vec<f32> = tensor_values(weight)
            .iter()
            .enumerate()
            .map(|(i, &v)| self.params_for(i % d_out).fake_quantize(v))
            .collect();
        Tensor::from_data(TensorData::new(values, [d_in, d_out]), &device)
    }

    /// Bytes needed for the INT8 codes plus one f32 scale per parameter set.
    pub fn storage_bytes(&self, elements: usize) -> usize {
        elements + self.params.len() * std::mem::size_of::<f32>()
    }
}

/// Differentiable fake quantization of a weight, used during QAT.
/// Scales are taken from the current weight values.
pub fn fake_quantize_weight<B: Backend>(weight: Tensor<B, 2>, granularity: WeightGranularity) -> Tensor<B, 2> {
    let dims = weight.dims();
    let abs = weight.clone().abs();
    let abs_max = match granularity {
        WeightGranularity::PerChannel => abs.max_dim(0),
        WeightGranularity::PerTensor => abs.max().reshape([1, 1]),
    };
    let scale = abs_max
        .clamp_min(MIN_SCALE)
        .div_scalar(INT8_MAX as f32)
        .expand(dims);
    (weight / scale.clone())
        .round()
        .clamp(-INT8_MAX as f32, INT8_MAX as f32)
        * scale
}

pub(crate) fn tensor_values<B: Backend, const D: usize>(x: Tensor<B, D>) -> Vec<f32> {
    x.into_data().iter::<f32>().collect()
}
