use approx::assert_abs_diff_eq;
use candle_core::{DType, Device, Result, Tensor};
use candle_nn::{ModuleT, VarBuilder, VarMap};

use latent_nn::candle_aux_layers::{ColwiseMult, DenseStack, DenseStackArgs};
use latent_nn::candle_flow::MaskedAutoregressiveFlow;
use latent_nn::candle_loss_functions as loss;

fn test_vb() -> (VarMap, VarBuilder<'static>) {
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    (varmap, vb)
}

#[test]
fn colwise_mult_scales_each_row_by_its_size_factor() -> Result<()> {
    let dev = Device::Cpu;
    let mean = Tensor::from_vec(vec![1f32, 2., 3., 4., 5., 6.], (2, 3), &dev)?;
    let sf = Tensor::from_vec(vec![2f32, 10.], (2,), &dev)?;

    let out = ColwiseMult.forward(&mean, &sf)?;
    assert_eq!(
        out.to_vec2::<f32>()?,
        vec![vec![2f32, 4., 6.], vec![50., 100., 150.]]
    );

    // (n, 1) shaped size factors behave the same
    let sf_col = sf.reshape((2, 1))?;
    let out_col = ColwiseMult.forward(&mean, &sf_col)?;
    assert_eq!(out.to_vec2::<f32>()?, out_col.to_vec2::<f32>()?);
    Ok(())
}

#[test]
fn colwise_mult_rejects_mismatched_rows() -> Result<()> {
    let dev = Device::Cpu;
    let mean = Tensor::zeros((4, 3), DType::F32, &dev)?;
    let sf = Tensor::ones((5,), DType::F32, &dev)?;
    assert!(ColwiseMult.forward(&mean, &sf).is_err());
    Ok(())
}

#[test]
fn dense_stack_maps_to_last_hidden_width() -> Result<()> {
    let (_vm, vb) = test_vb();
    let args = DenseStackArgs {
        hidden_units: &[32, 16],
        ..DenseStackArgs::default()
    };
    let stack = DenseStack::new(10, &args, vb)?;
    assert_eq!(stack.out_dim(), 16);

    let x = Tensor::randn(0f32, 1f32, (7, 10), &Device::Cpu)?;
    let h = stack.forward_t(&x, true)?;
    assert_eq!(h.dims(), &[7, 16]);
    Ok(())
}

#[test]
fn dense_stack_rejects_empty_hidden_units() {
    let (_vm, vb) = test_vb();
    let args = DenseStackArgs {
        hidden_units: &[],
        ..DenseStackArgs::default()
    };
    assert!(DenseStack::new(10, &args, vb).is_err());
}

#[test]
fn dense_stack_penalty_tracks_regularization_strength() -> Result<()> {
    let (_vm, vb) = test_vb();
    let free = DenseStack::new(
        6,
        &DenseStackArgs {
            hidden_units: &[8],
            ..DenseStackArgs::default()
        },
        vb.pp("free"),
    )?;
    assert_abs_diff_eq!(free.penalty()?.to_scalar::<f32>()?, 0f32);

    let penalized = DenseStack::new(
        6,
        &DenseStackArgs {
            hidden_units: &[8],
            l1: 0.1,
            l2: 0.01,
            ..DenseStackArgs::default()
        },
        vb.pp("penalized"),
    )?;
    assert!(penalized.penalty()?.to_scalar::<f32>()? > 0f32);
    Ok(())
}

#[test]
fn flow_conditioner_is_autoregressive() -> Result<()> {
    let (_vm, vb) = test_vb();
    let flow = MaskedAutoregressiveFlow::new(4, &[8, 8], vb)?;

    let z = Tensor::from_vec(vec![0.3f32, -1.2, 0.7, 2.0], (1, 4), &Device::Cpu)?;
    let mut bumped = z.to_vec2::<f32>()?;
    bumped[0][2] += 5.0;
    let z_bumped = Tensor::from_vec(bumped.concat(), (1, 4), &Device::Cpu)?;

    let (shift_a, scale_a) = flow.conditioner(&z)?;
    let (shift_b, scale_b) = flow.conditioner(&z_bumped)?;

    let shift_a = shift_a.to_vec2::<f32>()?;
    let shift_b = shift_b.to_vec2::<f32>()?;
    let scale_a = scale_a.to_vec2::<f32>()?;
    let scale_b = scale_b.to_vec2::<f32>()?;

    // perturbing z[2] may only move outputs for dims > 2
    for i in 0..=2 {
        assert_abs_diff_eq!(shift_a[0][i], shift_b[0][i], epsilon = 1e-6);
        assert_abs_diff_eq!(scale_a[0][i], scale_b[0][i], epsilon = 1e-6);
    }
    Ok(())
}

#[test]
fn flow_log_density_is_finite() -> Result<()> {
    let (_vm, vb) = test_vb();
    let flow = MaskedAutoregressiveFlow::new(5, &[16], vb)?;
    let z = Tensor::randn(0f32, 1f32, (9, 5), &Device::Cpu)?;
    let lp = flow.log_prob(&z)?;
    assert_eq!(lp.dims(), &[9]);
    assert!(lp.to_vec1::<f32>()?.iter().all(|v| v.is_finite()));
    Ok(())
}

#[test]
fn flow_rejects_degenerate_configuration() {
    let (_vm, vb) = test_vb();
    assert!(MaskedAutoregressiveFlow::new(0, &[8], vb.pp("a")).is_err());
    assert!(MaskedAutoregressiveFlow::new(4, &[], vb.pp("b")).is_err());
}

#[test]
fn standard_normal_kl_vanishes_when_posterior_matches_prior() -> Result<()> {
    let dev = Device::Cpu;
    let mean = Tensor::zeros((2, 3), DType::F32, &dev)?;
    let eye = Tensor::eye(3, DType::F32, &dev)?
        .unsqueeze(0)?
        .broadcast_as((2, 3, 3))?;

    let kl = loss::standard_normal_kl(&mean, &eye)?;
    for v in kl.to_vec1::<f32>()? {
        assert_abs_diff_eq!(v, 0f32, epsilon = 1e-5);
    }

    // shifting the mean away from the prior costs 0.5 * |mu|^2
    let mean_one = Tensor::ones((2, 3), DType::F32, &dev)?;
    let kl_shifted = loss::standard_normal_kl(&mean_one, &eye)?;
    for v in kl_shifted.to_vec1::<f32>()? {
        assert_abs_diff_eq!(v, 1.5f32, epsilon = 1e-5);
    }
    Ok(())
}

#[test]
fn gaussian_likelihood_is_zero_at_perfect_reconstruction() -> Result<()> {
    let x = Tensor::randn(0f32, 1f32, (3, 6), &Device::Cpu)?;
    let llik = loss::gaussian_likelihood(&x, &x)?;
    for v in llik.to_vec1::<f32>()? {
        assert_abs_diff_eq!(v, 0f32, epsilon = 1e-6);
    }
    Ok(())
}

#[test]
fn zinb_likelihood_without_inflation_matches_nb() -> Result<()> {
    let dev = Device::Cpu;
    let x = Tensor::from_vec(vec![0f32, 1., 4., 0., 7., 2.], (2, 3), &dev)?;
    let mu = Tensor::from_vec(vec![0.5f32, 2., 3., 1., 6., 0.8], (2, 3), &dev)?;
    let theta = Tensor::from_vec(vec![1.5f32, 0.7, 2., 1., 3., 0.9], (2, 3), &dev)?;
    let pi = Tensor::zeros((2, 3), DType::F32, &dev)?;

    let nb = loss::nb_likelihood(&x, &mu, &theta)?.to_vec1::<f32>()?;
    let zinb = loss::zinb_likelihood(&x, &mu, &theta, &pi)?.to_vec1::<f32>()?;
    for (a, b) in nb.iter().zip(zinb.iter()) {
        assert_abs_diff_eq!(*a, *b, epsilon = 1e-4);
    }
    Ok(())
}

#[test]
fn zinb_zero_branch_tracks_the_nb_tail() -> Result<()> {
    let dev = Device::Cpu;
    // a zero count with a large mean: the NB zero-mass is tiny, and the
    // mixture at pi = 0 must still reproduce it in log space
    let x = Tensor::zeros((1, 1), DType::F32, &dev)?;
    let mu = (Tensor::ones((1, 1), DType::F32, &dev)? * 1e4)?;
    let theta = (Tensor::ones((1, 1), DType::F32, &dev)? * 3.)?;
    let pi = Tensor::zeros((1, 1), DType::F32, &dev)?;

    let nb = loss::nb_likelihood(&x, &mu, &theta)?.to_vec1::<f32>()?[0];
    let zinb = loss::zinb_likelihood(&x, &mu, &theta, &pi)?.to_vec1::<f32>()?[0];
    assert!(nb < -20f32, "this zero-mass should be deep in the tail");
    assert_abs_diff_eq!(zinb, nb, epsilon = 1e-3);
    Ok(())
}

#[test]
fn nb_likelihood_matches_poisson_ordering_at_large_dispersion() -> Result<()> {
    let dev = Device::Cpu;
    let x = Tensor::from_vec(vec![3f32, 5., 1., 0.], (1, 4), &dev)?;
    let good = Tensor::from_vec(vec![3f32, 5., 1., 0.1], (1, 4), &dev)?;
    let bad = Tensor::from_vec(vec![30f32, 50., 10., 5.], (1, 4), &dev)?;
    // NB converges to Poisson as the dispersion grows
    let theta = (Tensor::ones((1, 4), DType::F32, &dev)? * 1e4)?;

    let nb_good = loss::nb_likelihood(&x, &good, &theta)?.to_vec1::<f32>()?[0];
    let nb_bad = loss::nb_likelihood(&x, &bad, &theta)?.to_vec1::<f32>()?[0];
    assert!(nb_good > nb_bad);

    let pois_good = loss::poisson_likelihood(&x, &good)?.to_vec1::<f32>()?[0];
    let pois_bad = loss::poisson_likelihood(&x, &bad)?.to_vec1::<f32>()?[0];
    assert!(pois_good > pois_bad);
    Ok(())
}

#[test]
fn poisson_likelihood_prefers_the_true_rate() -> Result<()> {
    let dev = Device::Cpu;
    let x = Tensor::from_vec(vec![3f32, 5., 1., 0.], (1, 4), &dev)?;
    let good = Tensor::from_vec(vec![3f32, 5., 1., 0.1], (1, 4), &dev)?;
    let bad = Tensor::from_vec(vec![30f32, 50., 10., 5.], (1, 4), &dev)?;

    let llik_good = loss::poisson_likelihood(&x, &good)?.to_vec1::<f32>()?[0];
    let llik_bad = loss::poisson_likelihood(&x, &bad)?.to_vec1::<f32>()?[0];
    assert!(llik_good > llik_bad);
    Ok(())
}
