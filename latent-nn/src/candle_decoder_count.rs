#![allow(dead_code)]

use crate::candle_activations::{clipped_exp, clipped_softplus};
use crate::candle_aux_layers::{ColwiseMult, DenseStack, DenseStackArgs};
use crate::candle_model_traits::*;
use candle_core::{Result, Tensor};
use candle_nn::{ops, Linear, Module, ModuleT, VarBuilder};
use log::debug;
use std::str::FromStr;

/// Count-generating model of a [`CountDecoder`]. Adding a model means
/// adding a variant here and a head set in [`OutputHeads::new`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CountModel {
    Poisson,
    NegativeBinomial,
    ZeroInflatedNegativeBinomial,
}

impl CountModel {
    fn has_dispersion(&self) -> bool {
        !matches!(self, CountModel::Poisson)
    }

    fn has_dropout(&self) -> bool {
        matches!(self, CountModel::ZeroInflatedNegativeBinomial)
    }
}

impl FromStr for CountModel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "poisson" => Ok(CountModel::Poisson),
            "nb" | "negative_binomial" => Ok(CountModel::NegativeBinomial),
            "zinb" => Ok(CountModel::ZeroInflatedNegativeBinomial),
            other => anyhow::bail!(
                "unknown count model '{}', expected poisson, nb, or zinb",
                other
            ),
        }
    }
}

/// Dispersion head: a per-sample linear map, or a single dispersion
/// estimate per feature shared across the batch.
enum DispersionHead {
    PerCell(Linear),
    /// [1, D] learnable parameter, broadcast over rows
    Shared(Tensor),
}

impl DispersionHead {
    fn forward(&self, h_nl: &Tensor) -> Result<Tensor> {
        match self {
            DispersionHead::PerCell(fc) => clipped_softplus(&fc.forward(h_nl)?),
            DispersionHead::Shared(raw_1d) => {
                let n = h_nl.dim(0)?;
                let d = raw_1d.dim(1)?;
                clipped_softplus(&raw_1d.broadcast_as((n, d))?)
            }
        }
    }
}

/// Per-variant output heads, built once at construction.
struct OutputHeads {
    mean: Linear,
    dispersion: Option<DispersionHead>,
    dropout: Option<Linear>,
}

impl OutputHeads {
    fn new(
        model: CountModel,
        shared_dispersion: bool,
        in_dim: usize,
        n_features: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let mean = candle_nn::linear(in_dim, n_features, vb.pp("mean"))?;

        let dispersion = if model.has_dispersion() {
            Some(if shared_dispersion {
                let raw = vb.get_with_hints(
                    (1, n_features),
                    "dispersion",
                    candle_nn::Init::Const(0.0),
                )?;
                DispersionHead::Shared(raw)
            } else {
                DispersionHead::PerCell(candle_nn::linear(
                    in_dim,
                    n_features,
                    vb.pp("dispersion"),
                )?)
            })
        } else {
            None
        };

        let dropout = if model.has_dropout() {
            Some(candle_nn::linear(in_dim, n_features, vb.pp("dropout"))?)
        } else {
            None
        };

        Ok(Self {
            mean,
            dispersion,
            dropout,
        })
    }
}

pub struct CountDecoderArgs<'a> {
    pub n_features: usize,
    pub n_latent: usize,
    pub model: CountModel,
    /// Share one dispersion estimate per feature across the batch
    pub shared_dispersion: bool,
    pub stack: DenseStackArgs<'a>,
}

/// Count-data decoder in the style of the Deep Count Autoencoder
/// (Eraslan et al. 2019): a shared dense backbone with per-variant output
/// heads. The mean passes through a clipped exponential link and is
/// rescaled row-wise by the observed size factor; dispersion and
/// zero-inflation heads are never rescaled.
pub struct CountDecoder {
    n_features: usize,
    n_latent: usize,
    model: CountModel,
    fc: DenseStack,
    heads: OutputHeads,
    norm: ColwiseMult,
}

impl CountDecoder {
    /// Will create a new count decoder module with these variables:
    ///
    /// * `nn.dec.fc.{}.weight` where {} is the layer index
    /// * `nn.dec.mean.weight`
    /// * `nn.dec.dispersion[.weight]` (negative binomial family)
    /// * `nn.dec.dropout.weight` (ZINB)
    pub fn new(args: CountDecoderArgs, vb: VarBuilder) -> Result<Self> {
        if args.n_features < 1 || args.n_latent < 1 {
            candle_core::bail!(
                "count decoder dims must be positive, got x_dim {} latent_dim {}",
                args.n_features,
                args.n_latent
            );
        }

        let fc = DenseStack::new(args.n_latent, &args.stack, vb.pp("nn.dec"))?;
        let heads = OutputHeads::new(
            args.model,
            args.shared_dispersion,
            fc.out_dim(),
            args.n_features,
            vb.pp("nn.dec"),
        )?;

        debug!(
            "count decoder ({:?}): {} latent -> {} features",
            args.model, args.n_latent, args.n_features
        );

        Ok(Self {
            n_features: args.n_features,
            n_latent: args.n_latent,
            model: args.model,
            fc,
            heads,
            norm: ColwiseMult,
        })
    }

    pub fn count_model(&self) -> CountModel {
        self.model
    }
}

impl CountDecoderModuleT for CountDecoder {
    fn forward_t(
        &self,
        z_nk: &Tensor,
        size_factor_n: &Tensor,
        train: bool,
    ) -> Result<CountParams> {
        let (_n, k) = z_nk.dims2()?;
        if k != self.n_latent {
            candle_core::bail!(
                "count decoder expects latent dim {}, got {}",
                self.n_latent,
                k
            );
        }

        let h_nl = self.fc.forward_t(z_nk, train)?;

        let mean_nd = clipped_exp(&self.heads.mean.forward(&h_nl)?)?;
        let mean_nd = self.norm.forward(&mean_nd, size_factor_n)?;

        let dispersion = match &self.heads.dispersion {
            Some(head) => Some(head.forward(&h_nl)?),
            None => None,
        };

        let dropout = match &self.heads.dropout {
            Some(fc) => Some(ops::sigmoid(&fc.forward(&h_nl)?)?),
            None => None,
        };

        Ok(CountParams {
            mean: mean_nd,
            dispersion,
            dropout,
        })
    }

    fn forward_with_llik<LlikFn>(
        &self,
        z_nk: &Tensor,
        size_factor_n: &Tensor,
        x_nd: &Tensor,
        llik: &LlikFn,
        train: bool,
    ) -> Result<(CountParams, Tensor)>
    where
        LlikFn: Fn(&Tensor, &CountParams) -> Result<Tensor>,
    {
        let params = self.forward_t(z_nk, size_factor_n, train)?;
        let llik_n = llik(x_nd, &params)?;
        Ok((params, llik_n))
    }

    fn dim_obs(&self) -> usize {
        self.n_features
    }

    fn dim_latent(&self) -> usize {
        self.n_latent
    }
}
