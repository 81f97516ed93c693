#![allow(dead_code)]

use candle_core::{Result, Tensor};
use candle_nn::{Activation, BatchNorm, Dropout, Linear, Module, ModuleT, VarBuilder};

/// Configuration shared by every dense stack in the crate.
#[derive(Clone, Debug)]
pub struct DenseStackArgs<'a> {
    /// Width of each hidden layer, in order
    pub hidden_units: &'a [usize],
    pub dropout_rate: f32,
    pub batchnorm: bool,
    /// L1 penalty strength on the dense weights (0 disables)
    pub l1: f64,
    /// L2 penalty strength on the dense weights (0 disables)
    pub l2: f64,
    pub activation: Activation,
}

impl Default for DenseStackArgs<'static> {
    fn default() -> Self {
        Self {
            hidden_units: &[128, 128],
            dropout_rate: 0.1,
            batchnorm: true,
            l1: 0.,
            l2: 0.,
            activation: Activation::LeakyRelu(0.01),
        }
    }
}

/// One dense block: linear -> optional batchnorm -> activation -> optional dropout
pub struct DenseBlock {
    fc: Linear,
    bn: Option<BatchNorm>,
    activation: Activation,
    dropout: Option<Dropout>,
}

impl DenseBlock {
    pub fn new(
        in_dim: usize,
        out_dim: usize,
        args: &DenseStackArgs,
        vb: VarBuilder,
    ) -> Result<Self> {
        let bn_config = candle_nn::BatchNormConfig {
            eps: 1e-4,
            remove_mean: true,
            affine: true,
            momentum: 0.1,
        };

        let bn = if args.batchnorm {
            Some(candle_nn::batch_norm(out_dim, bn_config, vb.pp("bn"))?)
        } else {
            None
        };
        let fc = candle_nn::linear(in_dim, out_dim, vb)?;

        let dropout = if args.dropout_rate > 0. {
            Some(Dropout::new(args.dropout_rate))
        } else {
            None
        };

        Ok(Self {
            fc,
            bn,
            activation: args.activation,
            dropout,
        })
    }

    pub fn weight(&self) -> &Tensor {
        self.fc.weight()
    }
}

impl ModuleT for DenseBlock {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let mut h = self.fc.forward(xs)?;
        if let Some(bn) = &self.bn {
            h = bn.forward_t(&h, train)?;
        }
        h = self.activation.forward(&h)?;
        match &self.dropout {
            Some(dropout) => dropout.forward_t(&h, train),
            None => Ok(h),
        }
    }
}

/// Core dense stack of the encoder and decoder backbones.
///
/// Built from `hidden_units`, one `DenseBlock` per width. Candle has no
/// per-layer kernel regularizer, so the L1/L2 penalty is exposed as an
/// explicit tensor via [`DenseStack::penalty`] for the training harness
/// to add to its loss.
pub struct DenseStack {
    blocks: Vec<DenseBlock>,
    out_dim: usize,
    l1: f64,
    l2: f64,
}

impl DenseStack {
    pub fn new(in_dim: usize, args: &DenseStackArgs, vb: VarBuilder) -> Result<Self> {
        if args.hidden_units.is_empty() {
            candle_core::bail!("dense stack needs at least one hidden layer");
        }

        let mut blocks = Vec::with_capacity(args.hidden_units.len());
        let mut prev_dim = in_dim;
        for (j, &next_dim) in args.hidden_units.iter().enumerate() {
            let name = format!("fc.{}", j);
            blocks.push(DenseBlock::new(prev_dim, next_dim, args, vb.pp(name))?);
            prev_dim = next_dim;
        }

        Ok(Self {
            blocks,
            out_dim: prev_dim,
            l1: args.l1,
            l2: args.l2,
        })
    }

    pub fn out_dim(&self) -> usize {
        self.out_dim
    }

    /// L1/L2 weight penalty over all dense weights as a scalar tensor.
    pub fn penalty(&self) -> Result<Tensor> {
        let device = self.blocks[0].weight().device();
        let mut total = Tensor::zeros((), candle_core::DType::F32, device)?;
        if self.l1 == 0. && self.l2 == 0. {
            return Ok(total);
        }
        for block in self.blocks.iter() {
            let w = block.weight();
            if self.l1 > 0. {
                total = (total + (w.abs()?.sum_all()? * self.l1)?)?;
            }
            if self.l2 > 0. {
                total = (total + (w.sqr()?.sum_all()? * self.l2)?)?;
            }
        }
        Ok(total)
    }
}

impl ModuleT for DenseStack {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let mut h = xs.clone();
        for block in self.blocks.iter() {
            h = block.forward_t(&h, train)?;
        }
        Ok(h)
    }
}

/// Rescales each row of a mean matrix by a per-sample scalar size factor.
pub struct ColwiseMult;

impl ColwiseMult {
    /// `out[i, :] = mean_nd[i, :] * size_factor[i]`
    ///
    /// The size factor may come in as `(n,)` or `(n, 1)`.
    pub fn forward(&self, mean_nd: &Tensor, size_factor: &Tensor) -> Result<Tensor> {
        let (n, _d) = mean_nd.dims2()?;
        let sf_n1 = match size_factor.dims() {
            [rows] if *rows == n => size_factor.reshape((n, 1))?,
            [rows, 1] if *rows == n => size_factor.clone(),
            dims => candle_core::bail!(
                "size factor shape {:?} does not match {} rows of the mean",
                dims,
                n
            ),
        };
        mean_nd.broadcast_mul(&sf_n1)
    }
}

/// Linear layer whose weight is elementwise-gated by a fixed binary mask.
///
/// The mask encodes autoregressive structure (MADE); it is a constant,
/// not a trainable variable.
pub struct MaskedLinear {
    weight: Tensor,
    bias: Tensor,
    mask: Tensor,
}

impl MaskedLinear {
    pub fn new(weight: Tensor, bias: Tensor, mask: Tensor) -> Self {
        Self { weight, bias, mask }
    }
}

pub fn masked_linear(
    in_dim: usize,
    out_dim: usize,
    mask: Tensor,
    vb: VarBuilder,
) -> Result<MaskedLinear> {
    let init_ws = candle_nn::init::DEFAULT_KAIMING_NORMAL;
    let ws = vb.get_with_hints((out_dim, in_dim), "weight", init_ws)?;
    let bs = vb.get_with_hints(out_dim, "bias", candle_nn::init::ZERO)?;
    Ok(MaskedLinear::new(ws, bs, mask))
}

impl Module for MaskedLinear {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let w = self.weight.mul(&self.mask)?;
        xs.matmul(&w.t()?)?.broadcast_add(&self.bias)
    }
}
