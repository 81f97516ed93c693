#![allow(dead_code)]

use core::f64;

use candle_core::{Result, Tensor};

pub const LN_2PI: f64 = 1.8378770664093453;

const EPS: f64 = 1e-8;

/// KL divergence from a full-covariance Gaussian posterior to N(0, I)
///
/// 0.5 * ( tr(L L^T) + |mu|^2 - k ) - sum_i log L_ii
///
/// * `mean_nk` - posterior means (n x k)
/// * `scale_tril_nkk` - lower-triangular covariance factors (n x k x k)
///   with strictly positive diagonals
pub fn standard_normal_kl(mean_nk: &Tensor, scale_tril_nkk: &Tensor) -> Result<Tensor> {
    let (_n, k, _) = scale_tril_nkk.dims3()?;
    let trace_n = scale_tril_nkk.sqr()?.sum(2)?.sum(1)?;
    let msq_n = mean_nk.sqr()?.sum(1)?;
    let log_diag_n = tril_log_diag(scale_tril_nkk)?.sum(1)?;
    let half_n = (((trace_n + msq_n)? - k as f64)? * 0.5)?;
    half_n - log_diag_n
}

/// Log-density of z under the posterior N(mean, L L^T), evaluated at the
/// reparameterized sample z = mean + L eps.
///
/// log q(z) = -0.5 k ln(2 pi) - 0.5 |eps|^2 - sum_i log L_ii
pub fn mvn_log_prob_of_sample(eps_nk: &Tensor, scale_tril_nkk: &Tensor) -> Result<Tensor> {
    let (_n, k, _) = scale_tril_nkk.dims3()?;
    let quad_n = (eps_nk.sqr()?.sum(1)? * 0.5)?;
    let log_diag_n = tril_log_diag(scale_tril_nkk)?.sum(1)?;
    (quad_n + log_diag_n)?.neg()? - 0.5 * (k as f64) * LN_2PI
}

/// Per-sample log of the diagonal of a batch of triangular factors (n x k)
pub fn tril_log_diag(scale_tril_nkk: &Tensor) -> Result<Tensor> {
    let (_n, k, _) = scale_tril_nkk.dims3()?;
    let eye_kk = Tensor::eye(k, scale_tril_nkk.dtype(), scale_tril_nkk.device())?;
    scale_tril_nkk.broadcast_mul(&eye_kk)?.sum(2)?.log()
}

/// Gaussian log-likelihood of continuous reconstruction
///
/// llik(i) = -0.5 * sum_w [ x(i,w) - xhat(i,w) ]^2
pub fn gaussian_likelihood(x_nd: &Tensor, hat_nd: &Tensor) -> Result<Tensor> {
    x_nd.sub(hat_nd)?.powf(2.)?.sum(x_nd.rank() - 1)? * (-0.5)
}

/// Poisson log-likelihood of count data (dropping the x! constant)
///
/// llik(i) = sum_w x(i,w) * log(rate(i,w)) - rate(i,w)
pub fn poisson_likelihood(x_nd: &Tensor, rate_nd: &Tensor) -> Result<Tensor> {
    let rate_nd = rate_nd.clamp(EPS, f64::INFINITY)?;
    x_nd.mul(&rate_nd.log()?)?
        .sub(&rate_nd)?
        .sum(x_nd.rank() - 1)
}

/// Negative binomial log-likelihood with mean/dispersion parameterization
///
/// llik(i) = sum_w lgamma(x + theta) - lgamma(theta) - lgamma(x + 1)
///           + theta * log(theta / (theta + mu))
///           + x * log(mu / (theta + mu))
///
/// * `mu_nd` - mean (n x d), strictly positive
/// * `theta_nd` - dispersion (n x d), strictly positive
pub fn nb_likelihood(x_nd: &Tensor, mu_nd: &Tensor, theta_nd: &Tensor) -> Result<Tensor> {
    nb_likelihood_elementwise(x_nd, mu_nd, theta_nd)?.sum(x_nd.rank() - 1)
}

fn nb_likelihood_elementwise(x_nd: &Tensor, mu_nd: &Tensor, theta_nd: &Tensor) -> Result<Tensor> {
    let total_nd = (mu_nd + theta_nd)?;
    let log_theta_frac = (theta_nd.log()? - total_nd.log()?)?;
    let log_mu_frac = ((mu_nd + EPS)?.log()? - total_nd.log()?)?;

    let gamma_terms = approx_lgamma(&x_nd.add(theta_nd)?)?
        .sub(&approx_lgamma(theta_nd)?)?
        .sub(&approx_lgamma(&(x_nd + 1.)?)?)?;

    gamma_terms
        .add(&theta_nd.mul(&log_theta_frac)?)?
        .add(&x_nd.mul(&log_mu_frac)?)
}

/// Zero-inflated negative binomial log-likelihood
///
/// Zero counts mix a structural-zero component of weight pi with the NB
/// mass at zero; positive counts pay log(1 - pi) plus the NB term.
///
/// * `pi_nd` - zero-inflation probabilities in [0, 1]
pub fn zinb_likelihood(
    x_nd: &Tensor,
    mu_nd: &Tensor,
    theta_nd: &Tensor,
    pi_nd: &Tensor,
) -> Result<Tensor> {
    let nb_nd = nb_likelihood_elementwise(x_nd, mu_nd, theta_nd)?;

    // NB log-mass at zero, evaluated through the same lgamma
    // approximation so the two branches stay consistent
    let zeros_nd = Tensor::zeros_like(x_nd)?;
    let nb_zero_nd = nb_likelihood_elementwise(&zeros_nd, mu_nd, theta_nd)?;

    // the zero-count mixture stays in log space so it tracks the NB
    // zero-mass even when exp(nb_zero) would underflow
    let log_pi_nd = pi_nd.log()?;
    let log_one_minus_pi_nd = (pi_nd.neg()? + 1.)?.log()?;
    let zero_case = logaddexp(&log_pi_nd, &(&log_one_minus_pi_nd + &nb_zero_nd)?)?;
    let pos_case = (&log_one_minus_pi_nd + &nb_nd)?;

    x_nd.gt(0.0)?
        .where_cond(&pos_case, &zero_case)?
        .sum(x_nd.rank() - 1)
}

/// Elementwise log(exp(a) + exp(b)), max-shifted. Safe when one side is
/// -inf (a log of an exactly-zero mixture weight).
fn logaddexp(a_nd: &Tensor, b_nd: &Tensor) -> Result<Tensor> {
    let max_nd = a_nd.maximum(b_nd)?;
    let sum_nd = ((a_nd - &max_nd)?.exp()? + (b_nd - &max_nd)?.exp()?)?;
    sum_nd.log()? + max_nd
}

/// -0.0810614667f - x - log(x) + (0.5f + x) * log(1.0f + x);
fn approx_lgamma(x: &Tensor) -> Result<Tensor> {
    let term1 = (x.neg()? - 0.0810614667)?;
    let term2 = x.log()?.neg()?;
    let term3 = (x + 0.5)?.mul(&(x + 1.0)?.log()?)?;
    term1.add(&term2)?.add(&term3)
}
