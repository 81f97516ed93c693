#![allow(dead_code)]

use candle_core::{Result, Tensor};

pub trait EncoderModuleT {
    /// An encoder that spits out two results (latent inference, KL loss)
    ///
    /// # Arguments
    /// * `x_nd` - input data (n x d)
    /// * `train` - whether to use dropout/batchnorm and stochastic sampling
    ///
    /// # Returns `(z_nk, kl_n)`
    /// * `z_nk` - latent inference (n x k)
    /// * `kl_n` - KL loss per sample (n), zero for deterministic encoders
    fn forward_t(&self, x_nd: &Tensor, train: bool) -> Result<(Tensor, Tensor)>;

    fn dim_obs(&self) -> usize;

    fn dim_latent(&self) -> usize;
}

pub trait DecoderModuleT {
    /// A decoder that spits out reconstruction (n x d)
    fn forward_t(&self, z_nk: &Tensor, train: bool) -> Result<Tensor>;

    /// A decoder that spits out reconstruction and log-likelihood
    /// * `z_nk` - latent states
    /// * `x_nd` - observed data to validate with
    /// * `llik` - fn (observed, reconstruction) -> log-likelihood
    fn forward_with_llik<LlikFn>(
        &self,
        z_nk: &Tensor,
        x_nd: &Tensor,
        llik: &LlikFn,
        train: bool,
    ) -> Result<(Tensor, Tensor)>
    where
        LlikFn: Fn(&Tensor, &Tensor) -> Result<Tensor>;

    fn dim_obs(&self) -> usize;

    fn dim_latent(&self) -> usize;
}

/// Count distribution parameters emitted by a count decoder, each of
/// shape (n x d). Which optional fields are populated depends on the
/// decoder's count model.
pub struct CountParams {
    /// Size-factor-scaled mean (all models)
    pub mean: Tensor,
    /// Dispersion (negative binomial family)
    pub dispersion: Option<Tensor>,
    /// Zero-inflation probability in [0, 1] (ZINB)
    pub dropout: Option<Tensor>,
}

pub trait CountDecoderModuleT {
    /// A decoder over count data, conditioned on a per-sample size factor
    ///
    /// # Arguments
    /// * `z_nk` - latent states (n x k)
    /// * `size_factor_n` - size factors, (n) or (n x 1)
    /// * `train` - whether to use dropout/batchnorm
    fn forward_t(&self, z_nk: &Tensor, size_factor_n: &Tensor, train: bool)
        -> Result<CountParams>;

    /// A decoder that spits out parameters and log-likelihood
    /// * `llik` - fn (observed, parameters) -> log-likelihood
    fn forward_with_llik<LlikFn>(
        &self,
        z_nk: &Tensor,
        size_factor_n: &Tensor,
        x_nd: &Tensor,
        llik: &LlikFn,
        train: bool,
    ) -> Result<(CountParams, Tensor)>
    where
        LlikFn: Fn(&Tensor, &CountParams) -> Result<Tensor>;

    fn dim_obs(&self) -> usize;

    fn dim_latent(&self) -> usize;
}
