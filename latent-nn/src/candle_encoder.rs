#![allow(dead_code)]

use crate::candle_aux_layers::{DenseStack, DenseStackArgs};
use crate::candle_model_traits::*;
use candle_core::{DType, Result, Tensor};
use candle_nn::{Linear, Module, ModuleT, VarBuilder};
use log::debug;

pub struct EncoderArgs<'a> {
    pub n_features: usize,
    pub n_latent: usize,
    pub stack: DenseStackArgs<'a>,
}

/// Classical deterministic encoder: dense stack -> linear projection.
pub struct Encoder {
    n_features: usize,
    n_latent: usize,
    fc: DenseStack,
    z_out: Linear,
}

impl Encoder {
    /// Will create a new encoder module with these variables:
    ///
    /// * `nn.enc.fc.{}.weight` where {} is the layer index
    /// * `nn.enc.z.weight`
    pub fn new(args: EncoderArgs, vb: VarBuilder) -> Result<Self> {
        if args.n_features < 1 || args.n_latent < 1 {
            candle_core::bail!(
                "encoder dims must be positive, got x_dim {} latent_dim {}",
                args.n_features,
                args.n_latent
            );
        }

        let fc = DenseStack::new(args.n_features, &args.stack, vb.pp("nn.enc"))?;
        let z_out = candle_nn::linear(fc.out_dim(), args.n_latent, vb.pp("nn.enc.z"))?;

        debug!(
            "encoder: {} features -> {} latent, hidden {:?}",
            args.n_features, args.n_latent, args.stack.hidden_units
        );

        Ok(Self {
            n_features: args.n_features,
            n_latent: args.n_latent,
            fc,
            z_out,
        })
    }

    pub(crate) fn check_input(&self, x_nd: &Tensor) -> Result<()> {
        let (_n, d) = x_nd.dims2()?;
        if d != self.n_features {
            candle_core::bail!(
                "encoder expects {} features, got {}",
                self.n_features,
                d
            );
        }
        Ok(())
    }
}

impl EncoderModuleT for Encoder {
    fn forward_t(&self, x_nd: &Tensor, train: bool) -> Result<(Tensor, Tensor)> {
        self.check_input(x_nd)?;
        let h_nl = self.fc.forward_t(x_nd, train)?;
        let z_nk = self.z_out.forward(&h_nl)?;
        let n = x_nd.dim(0)?;
        let kl_n = Tensor::zeros(n, DType::F32, x_nd.device())?;
        Ok((z_nk, kl_n))
    }

    fn dim_obs(&self) -> usize {
        self.n_features
    }

    fn dim_latent(&self) -> usize {
        self.n_latent
    }
}
