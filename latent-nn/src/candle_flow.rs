#![allow(dead_code)]

use crate::candle_aux_layers::{masked_linear, MaskedLinear};
use crate::candle_loss_functions::LN_2PI;
use candle_core::{Result, Tensor};
use candle_nn::{Module, VarBuilder};

const MIN_LOG_SCALE: f64 = -8.;
const MAX_LOG_SCALE: f64 = 8.;

/// Standard Gaussian base distribution transformed by a masked
/// autoregressive flow, used as a trainable latent prior.
///
/// The conditioner is a MADE network: masks constrain unit `i` of the
/// shift/log-scale outputs to depend only on inputs `z_{<i}`, so the
/// whitening map `u_i = (z_i - shift_i(z_{<i})) * exp(-log_scale_i(z_{<i}))`
/// is triangular and its log-determinant is `-sum_i log_scale_i`. Only the
/// density direction is ever needed here (the prior is evaluated at
/// posterior samples, never sampled from), which this map computes in a
/// single pass.
pub struct MaskedAutoregressiveFlow {
    n_latent: usize,
    hidden: Vec<MaskedLinear>,
    shift: MaskedLinear,
    log_scale: MaskedLinear,
}

impl MaskedAutoregressiveFlow {
    /// Will create a new flow prior with these variables:
    ///
    /// * `made.fc.{}.weight` / `.bias` where {} is the layer index
    /// * `made.shift.weight` / `.bias`
    /// * `made.log_scale.weight` / `.bias`
    ///
    /// # Arguments
    /// * `n_latent` - latent dimensionality
    /// * `hidden_units` - widths of the MADE hidden layers
    /// * `vb` - variable builder
    pub fn new(n_latent: usize, hidden_units: &[usize], vb: VarBuilder) -> Result<Self> {
        if n_latent < 1 {
            candle_core::bail!("flow prior needs a positive latent dimension");
        }
        if hidden_units.is_empty() {
            candle_core::bail!("flow prior needs at least one hidden layer");
        }

        let device = vb.device();

        // MADE degrees: inputs get 1..=k, hidden units cycle 1..k, and the
        // output masks are strict so unit i never sees z_i itself.
        let input_degrees: Vec<usize> = (1..=n_latent).collect();
        let degree_period = n_latent.saturating_sub(1).max(1);

        let mut hidden = Vec::with_capacity(hidden_units.len());
        let mut prev_degrees = input_degrees.clone();
        let mut prev_dim = n_latent;

        for (j, &next_dim) in hidden_units.iter().enumerate() {
            let degrees: Vec<usize> = (0..next_dim).map(|u| (u % degree_period) + 1).collect();
            let mask = degree_mask(&degrees, &prev_degrees, false, device)?;
            let name = format!("made.fc.{}", j);
            hidden.push(masked_linear(prev_dim, next_dim, mask, vb.pp(name))?);
            prev_degrees = degrees;
            prev_dim = next_dim;
        }

        let out_mask = degree_mask(&input_degrees, &prev_degrees, true, device)?;
        let shift = masked_linear(prev_dim, n_latent, out_mask.clone(), vb.pp("made.shift"))?;
        let log_scale = masked_linear(prev_dim, n_latent, out_mask, vb.pp("made.log_scale"))?;

        Ok(Self {
            n_latent,
            hidden,
            shift,
            log_scale,
        })
    }

    pub fn dim_latent(&self) -> usize {
        self.n_latent
    }

    /// Autoregressive shift and log-scale at z (both n x k)
    pub fn conditioner(&self, z_nk: &Tensor) -> Result<(Tensor, Tensor)> {
        let mut h = z_nk.clone();
        for layer in self.hidden.iter() {
            h = layer.forward(&h)?.relu()?;
        }
        let shift_nk = self.shift.forward(&h)?;
        let log_scale_nk = self
            .log_scale
            .forward(&h)?
            .clamp(MIN_LOG_SCALE, MAX_LOG_SCALE)?;
        Ok((shift_nk, log_scale_nk))
    }

    /// Prior log-density, (n x k) -> (n)
    ///
    /// log p(z) = log N(u; 0, I) - sum_i log_scale_i(z)
    pub fn log_prob(&self, z_nk: &Tensor) -> Result<Tensor> {
        let (_n, k) = z_nk.dims2()?;
        if k != self.n_latent {
            candle_core::bail!(
                "flow prior expects latent dim {}, got {}",
                self.n_latent,
                k
            );
        }

        let (shift_nk, log_scale_nk) = self.conditioner(z_nk)?;
        let u_nk = z_nk.sub(&shift_nk)?.mul(&log_scale_nk.neg()?.exp()?)?;

        let base_n = ((u_nk.sqr()?.sum(1)? + (k as f64) * LN_2PI)? * (-0.5))?;
        base_n - log_scale_nk.sum(1)?
    }
}

/// Binary MADE mask, out x in. Strict masks (`out_degree > in_degree`)
/// are used on the output layer so the map stays autoregressive.
fn degree_mask(
    out_degrees: &[usize],
    in_degrees: &[usize],
    strict: bool,
    device: &candle_core::Device,
) -> Result<Tensor> {
    let mut data = Vec::with_capacity(out_degrees.len() * in_degrees.len());
    for &out_deg in out_degrees {
        for &in_deg in in_degrees {
            let connected = if strict {
                out_deg > in_deg
            } else {
                out_deg >= in_deg
            };
            data.push(if connected { 1f32 } else { 0f32 });
        }
    }
    Tensor::from_vec(data, (out_degrees.len(), in_degrees.len()), device)
}
