#![allow(dead_code)]

use crate::candle_aux_layers::{DenseStack, DenseStackArgs};
use crate::candle_model_traits::*;
use candle_core::{Result, Tensor};
use candle_nn::{Linear, Module, ModuleT, VarBuilder};
use log::debug;

pub struct DecoderArgs<'a> {
    pub n_features: usize,
    pub n_latent: usize,
    pub stack: DenseStackArgs<'a>,
}

/// Continuous-output decoder: dense stack -> linear projection with an
/// identity link, for Gaussian/MSE-style reconstruction targets.
pub struct Decoder {
    n_features: usize,
    n_latent: usize,
    fc: DenseStack,
    recon: Linear,
}

impl Decoder {
    /// Will create a new decoder module with these variables:
    ///
    /// * `nn.dec.fc.{}.weight` where {} is the layer index
    /// * `nn.dec.recon.weight`
    pub fn new(args: DecoderArgs, vb: VarBuilder) -> Result<Self> {
        if args.n_features < 1 || args.n_latent < 1 {
            candle_core::bail!(
                "decoder dims must be positive, got x_dim {} latent_dim {}",
                args.n_features,
                args.n_latent
            );
        }

        let fc = DenseStack::new(args.n_latent, &args.stack, vb.pp("nn.dec"))?;
        let recon = candle_nn::linear(fc.out_dim(), args.n_features, vb.pp("nn.dec.recon"))?;

        debug!(
            "decoder: {} latent -> {} features, hidden {:?}",
            args.n_latent, args.n_features, args.stack.hidden_units
        );

        Ok(Self {
            n_features: args.n_features,
            n_latent: args.n_latent,
            fc,
            recon,
        })
    }

    pub(crate) fn check_latent(n_latent: usize, z_nk: &Tensor) -> Result<()> {
        let (_n, k) = z_nk.dims2()?;
        if k != n_latent {
            candle_core::bail!("decoder expects latent dim {}, got {}", n_latent, k);
        }
        Ok(())
    }
}

impl DecoderModuleT for Decoder {
    fn forward_t(&self, z_nk: &Tensor, train: bool) -> Result<Tensor> {
        Self::check_latent(self.n_latent, z_nk)?;
        let h_nl = self.fc.forward_t(z_nk, train)?;
        self.recon.forward(&h_nl)
    }

    fn forward_with_llik<LlikFn>(
        &self,
        z_nk: &Tensor,
        x_nd: &Tensor,
        llik: &LlikFn,
        train: bool,
    ) -> Result<(Tensor, Tensor)>
    where
        LlikFn: Fn(&Tensor, &Tensor) -> Result<Tensor>,
    {
        let hat_nd = self.forward_t(z_nk, train)?;
        let llik_n = llik(x_nd, &hat_nd)?;
        Ok((hat_nd, llik_n))
    }

    fn dim_obs(&self) -> usize {
        self.n_features
    }

    fn dim_latent(&self) -> usize {
        self.n_latent
    }
}
