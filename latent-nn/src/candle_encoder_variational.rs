#![allow(dead_code)]

use crate::candle_aux_layers::{DenseStack, DenseStackArgs};
use crate::candle_flow::MaskedAutoregressiveFlow;
use crate::candle_loss_functions::{mvn_log_prob_of_sample, standard_normal_kl};
use crate::candle_model_traits::*;
use candle_core::{DType, Result, Tensor};
use candle_nn::{Linear, Module, ModuleT, VarBuilder};
use log::debug;

// Raw triangular-factor entries and posterior means are clamped before
// use; same ranges the log-variance clamping of a diagonal posterior
// would allow.
const MIN_RAW: f64 = -8.;
const MAX_RAW: f64 = 8.;

// Softplus shift keeping the factor diagonal strictly positive.
const DIAG_SHIFT: f64 = 1e-5;

/// Latent prior of the variational encoder, fixed at construction.
pub enum LatentPrior {
    /// Independent standard Gaussian per latent dimension
    StandardNormal,
    /// Gaussian base through a masked autoregressive flow
    Iaf(MaskedAutoregressiveFlow),
}

pub struct VariationalEncoderArgs<'a> {
    pub n_features: usize,
    pub n_latent: usize,
    pub stack: DenseStackArgs<'a>,
    /// Weight on the KL term returned by `forward_t`
    pub kld_weight: f64,
    /// `"normal"` or `"iaf"`; anything else fails at construction
    pub prior: &'a str,
    /// Hidden widths of the flow conditioner (`prior = "iaf"` only)
    pub iaf_units: &'a [usize],
}

impl Default for VariationalEncoderArgs<'static> {
    fn default() -> Self {
        Self {
            n_features: 0,
            n_latent: 50,
            stack: DenseStackArgs::default(),
            kld_weight: 1e-5,
            prior: "normal",
            iaf_units: &[128, 128],
        }
    }
}

/// Variational encoder with a full lower-triangular covariance posterior.
///
/// The head emits `k + k(k+1)/2` values per sample: the posterior mean and
/// the packed rows of the scale factor L. The latent sample is drawn by
/// reparameterization, `z = mean + L eps`, and `forward_t` returns the
/// KL term explicitly next to the sample instead of accumulating it into
/// an ambient loss.
pub struct VariationalEncoder {
    n_features: usize,
    n_latent: usize,
    kld_weight: f64,
    fc: DenseStack,
    mu_sigma: Linear,
    prior: LatentPrior,
    // constant (k(k+1)/2) -> (k*k) scatter for unpacking L, plus masks
    scatter_mq: Tensor,
    eye_kk: Tensor,
    strict_lower_kk: Tensor,
}

impl VariationalEncoder {
    /// Number of head outputs for a k-dimensional TriL posterior
    pub fn params_size(n_latent: usize) -> usize {
        n_latent + n_latent * (n_latent + 1) / 2
    }

    /// Will create a new variational encoder module with these variables:
    ///
    /// * `nn.enc.fc.{}.weight` where {} is the layer index
    /// * `nn.enc.mu_sigma.weight`
    /// * `prior.made.*` when the flow prior is selected
    pub fn new(args: VariationalEncoderArgs, vb: VarBuilder) -> Result<Self> {
        if args.n_features < 1 || args.n_latent < 1 {
            candle_core::bail!(
                "variational encoder dims must be positive, got x_dim {} latent_dim {}",
                args.n_features,
                args.n_latent
            );
        }

        let k = args.n_latent;

        let prior = match args.prior {
            "normal" => LatentPrior::StandardNormal,
            "iaf" => LatentPrior::Iaf(MaskedAutoregressiveFlow::new(
                k,
                args.iaf_units,
                vb.pp("prior"),
            )?),
            other => candle_core::bail!(
                "unknown prior '{}', expected 'normal' or 'iaf'",
                other
            ),
        };

        let fc = DenseStack::new(args.n_features, &args.stack, vb.pp("nn.enc"))?;
        let mu_sigma = candle_nn::linear(
            fc.out_dim(),
            Self::params_size(k),
            vb.pp("nn.enc.mu_sigma"),
        )?;

        let device = vb.device();
        let scatter_mq = tril_scatter(k, device)?;
        let eye_kk = Tensor::eye(k, DType::F32, device)?;
        let strict_lower_kk =
            Tensor::from_vec(lower_triangle_flags(k, true), (k, k), device)?;

        debug!(
            "variational encoder: {} features -> {} latent, prior '{}'",
            args.n_features, k, args.prior
        );

        Ok(Self {
            n_features: args.n_features,
            n_latent: k,
            kld_weight: args.kld_weight,
            fc,
            mu_sigma,
            prior,
            scatter_mq,
            eye_kk,
            strict_lower_kk,
        })
    }

    pub fn prior(&self) -> &LatentPrior {
        &self.prior
    }

    /// Posterior mean (n x k) and triangular scale factor (n x k x k)
    pub fn posterior_params(&self, x_nd: &Tensor, train: bool) -> Result<(Tensor, Tensor)> {
        let (_n, d) = x_nd.dims2()?;
        if d != self.n_features {
            candle_core::bail!(
                "variational encoder expects {} features, got {}",
                self.n_features,
                d
            );
        }

        let k = self.n_latent;
        let m = k * (k + 1) / 2;

        let h_nl = self.fc.forward_t(x_nd, train)?;
        let params = self.mu_sigma.forward(&h_nl)?;

        let mean_nk = params.narrow(1, 0, k)?.clamp(MIN_RAW, MAX_RAW)?;
        let packed_nm = params.narrow(1, k, m)?.clamp(MIN_RAW, MAX_RAW)?;

        let l_nkk = self.scale_tril(&packed_nm)?;
        Ok((mean_nk, l_nkk))
    }

    /// Unpack row-major lower-triangular entries into (n x k x k) and make
    /// the diagonal strictly positive through a shifted softplus.
    fn scale_tril(&self, packed_nm: &Tensor) -> Result<Tensor> {
        let n = packed_nm.dim(0)?;
        let k = self.n_latent;

        let raw_nkk = packed_nm.matmul(&self.scatter_mq)?.reshape((n, k, k))?;

        let softplus_nkk = (raw_nkk.relu()? + (raw_nkk.abs()?.neg()?.exp()? + 1.)?.log()?)?;
        let diag_nkk = (softplus_nkk + DIAG_SHIFT)?.broadcast_mul(&self.eye_kk)?;
        let off_nkk = raw_nkk.broadcast_mul(&self.strict_lower_kk)?;

        off_nkk + diag_nkk
    }

    /// z = mean + L eps, eps ~ N(0, I); eval mode returns the mean.
    fn reparameterize(
        &self,
        mean_nk: &Tensor,
        l_nkk: &Tensor,
        train: bool,
    ) -> Result<(Tensor, Tensor)> {
        let eps_nk = if train {
            Tensor::randn_like(mean_nk, 0., 1.)?
        } else {
            Tensor::zeros_like(mean_nk)?
        };
        let scaled_nk = l_nkk.matmul(&eps_nk.unsqueeze(2)?)?.squeeze(2)?;
        Ok(((mean_nk + scaled_nk)?, eps_nk))
    }

    fn kl_term(
        &self,
        mean_nk: &Tensor,
        l_nkk: &Tensor,
        z_nk: &Tensor,
        eps_nk: &Tensor,
    ) -> Result<Tensor> {
        let kl_n = match &self.prior {
            LatentPrior::StandardNormal => standard_normal_kl(mean_nk, l_nkk)?,
            LatentPrior::Iaf(flow) => {
                // single-sample Monte-Carlo: log q(z|x) - log p(z)
                let log_q_n = mvn_log_prob_of_sample(eps_nk, l_nkk)?;
                let log_p_n = flow.log_prob(z_nk)?;
                (log_q_n - log_p_n)?
            }
        };
        kl_n * self.kld_weight
    }
}

impl EncoderModuleT for VariationalEncoder {
    fn forward_t(&self, x_nd: &Tensor, train: bool) -> Result<(Tensor, Tensor)> {
        let (mean_nk, l_nkk) = self.posterior_params(x_nd, train)?;
        let (z_nk, eps_nk) = self.reparameterize(&mean_nk, &l_nkk, train)?;
        let kl_n = self.kl_term(&mean_nk, &l_nkk, &z_nk, &eps_nk)?;
        Ok((z_nk, kl_n))
    }

    fn dim_obs(&self) -> usize {
        self.n_features
    }

    fn dim_latent(&self) -> usize {
        self.n_latent
    }
}

/// Constant 0/1 matrix mapping packed lower-triangular entries (row-major,
/// length k(k+1)/2) onto a flattened k x k matrix.
fn tril_scatter(k: usize, device: &candle_core::Device) -> Result<Tensor> {
    let m = k * (k + 1) / 2;
    let mut data = vec![0f32; m * k * k];
    let mut p = 0;
    for i in 0..k {
        for j in 0..=i {
            data[p * k * k + i * k + j] = 1.;
            p += 1;
        }
    }
    Tensor::from_vec(data, (m, k * k), device)
}

fn lower_triangle_flags(k: usize, strict: bool) -> Vec<f32> {
    let mut data = vec![0f32; k * k];
    for i in 0..k {
        let last = if strict { i } else { i + 1 };
        for j in 0..last {
            data[i * k + j] = 1.;
        }
    }
    data
}
