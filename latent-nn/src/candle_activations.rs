#![allow(dead_code)]

use candle_core::{Result, Tensor};

// Mean activations live in [1e-5, 1e6]; exp is clamped on the input side
// so gradients survive at the boundaries.
const LN_MEAN_MIN: f64 = -11.512925464970229; // ln(1e-5)
const LN_MEAN_MAX: f64 = 13.815510557964274; // ln(1e6)

// Dispersion activations live in [1e-4, 1e4].
const DISP_MIN: f64 = 1e-4;
const DISP_MAX: f64 = 1e4;

/// Exponential link with clamped input: `exp(clamp(x, ln(1e-5), ln(1e6)))`.
///
/// Strictly positive and bounded, so a Poisson/NB mean head can never
/// overflow or collapse to an exact zero rate.
pub fn clipped_exp(x: &Tensor) -> Result<Tensor> {
    x.clamp(LN_MEAN_MIN, LN_MEAN_MAX)?.exp()
}

/// Softplus link clamped to `[1e-4, 1e4]`.
///
/// Uses the stable form `max(x, 0) + ln(1 + exp(-|x|))`, then clamps the
/// output range, keeping NB dispersion estimates strictly positive.
pub fn clipped_softplus(x: &Tensor) -> Result<Tensor> {
    let sp = (x.relu()? + (x.abs()?.neg()?.exp()? + 1.)?.log()?)?;
    sp.clamp(DISP_MIN, DISP_MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn clipped_exp_is_positive_and_bounded() -> Result<()> {
        let x = Tensor::from_vec(
            vec![-1e4f32, -3., 0., 3., 1e4],
            (1, 5),
            &Device::Cpu,
        )?
        .to_dtype(DType::F32)?;
        let y = clipped_exp(&x)?;
        assert!(y.min_all()?.to_scalar::<f32>()? >= 1e-5 * 0.99);
        assert!(y.max_all()?.to_scalar::<f32>()? <= 1e6 * 1.01);
        Ok(())
    }

    #[test]
    fn clipped_softplus_is_positive_and_bounded() -> Result<()> {
        let x = Tensor::from_vec(vec![-1e4f32, -1., 0., 1., 1e4], (1, 5), &Device::Cpu)?;
        let y = clipped_softplus(&x)?;
        assert!(y.min_all()?.to_scalar::<f32>()? >= 1e-4 * 0.99);
        assert!(y.max_all()?.to_scalar::<f32>()? <= 1e4 * 1.01);
        Ok(())
    }
}
