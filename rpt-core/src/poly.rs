//! Rational-polynomial evaluation for the RPC sensor model.
//!
//! The 20 cubic monomial terms are computed in a fixed order shared by the
//! scalar and SSE2 paths. Both paths accumulate even- and odd-indexed
//! products in separate running sums, so their results agree bit for bit.

use crate::rpc::RpcModel;

/// Number of coefficients per polynomial.
pub const COEFF_COUNT: usize = 20;

/// Compute the 20 monomial terms for a normalized (long, lat, height) triple.
pub fn compute_terms(long: f64, lat: f64, height: f64) -> [f64; COEFF_COUNT] {
    [
        1.0,
        long,
        lat,
        height,
        long * lat,
        long * height,
        lat * height,
        long * long,
        lat * lat,
        height * height,
        long * lat * height,
        long * long * long,
        long * lat * lat,
        long * height * height,
        long * long * lat,
        lat * lat * lat,
        lat * height * height,
        long * long * height,
        lat * lat * height,
        height * height * height,
    ]
}

/// The four polynomial sums for one term vector, in packed order:
/// line-numerator, line-denominator, sample-numerator, sample-denominator.
pub type PolySums = [f64; 4];

/// Coefficients of the four RPC polynomials packed back to back.
#[derive(Debug, Clone)]
pub struct CoefficientBlock {
    packed: [f64; COEFF_COUNT * 4],
}

impl CoefficientBlock {
    pub fn new(model: &RpcModel) -> Self {
        let mut packed = [0.0; COEFF_COUNT * 4];
        packed[..20].copy_from_slice(&model.line_num_coeff);
        packed[20..40].copy_from_slice(&model.line_den_coeff);
        packed[40..60].copy_from_slice(&model.samp_num_coeff);
        packed[60..].copy_from_slice(&model.samp_den_coeff);
        Self { packed }
    }
}

/// Polynomial evaluation strategy, selected once per transformer by
/// capability detection.
#[derive(Debug, Clone)]
pub enum RpcEvaluator {
    Scalar(CoefficientBlock),
    #[cfg(target_arch = "x86_64")]
    Sse2(CoefficientBlock),
}

impl RpcEvaluator {
    /// Pick the fastest evaluator available on this machine.
    pub fn new(model: &RpcModel) -> Self {
        let block = CoefficientBlock::new(model);
        #[cfg(target_arch = "x86_64")]
        {
            if is_x86_feature_detected!("sse2") {
                return RpcEvaluator::Sse2(block);
            }
        }
        RpcEvaluator::Scalar(block)
    }

    /// Force the scalar path, whatever the machine supports.
    pub fn scalar(model: &RpcModel) -> Self {
        RpcEvaluator::Scalar(CoefficientBlock::new(model))
    }

    /// Evaluate the four polynomials against one term vector.
    pub fn evaluate(&self, terms: &[f64; COEFF_COUNT]) -> PolySums {
        match self {
            RpcEvaluator::Scalar(block) => evaluate_scalar(terms, &block.packed),
            #[cfg(target_arch = "x86_64")]
            RpcEvaluator::Sse2(block) => unsafe { evaluate_sse2(terms, &block.packed) },
        }
    }
}

fn evaluate_scalar(terms: &[f64; COEFF_COUNT], packed: &[f64; COEFF_COUNT * 4]) -> PolySums {
    let mut sums = [0.0; 4];
    for (k, sum) in sums.iter_mut().enumerate() {
        let coeffs = &packed[k * COEFF_COUNT..(k + 1) * COEFF_COUNT];
        let mut even = 0.0;
        let mut odd = 0.0;
        for i in (0..COEFF_COUNT).step_by(2) {
            even += terms[i] * coeffs[i];
            odd += terms[i + 1] * coeffs[i + 1];
        }
        *sum = even + odd;
    }
    sums
}

/// # Safety
/// Caller must ensure SSE2 is available.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "sse2")]
unsafe fn evaluate_sse2(terms: &[f64; COEFF_COUNT], packed: &[f64; COEFF_COUNT * 4]) -> PolySums {
    use std::arch::x86_64::*;

    unsafe {
        let mut acc = [_mm_setzero_pd(); 4];
        for i in (0..COEFF_COUNT).step_by(2) {
            let t = _mm_loadu_pd(terms.as_ptr().add(i));
            for (k, sum) in acc.iter_mut().enumerate() {
                let c = _mm_loadu_pd(packed.as_ptr().add(k * COEFF_COUNT + i));
                *sum = _mm_add_pd(*sum, _mm_mul_pd(t, c));
            }
        }

        let mut sums = [0.0; 4];
        for (k, out) in sums.iter_mut().enumerate() {
            // Lane 0 holds the even-index sum, lane 1 the odd-index sum.
            let odd = _mm_unpackhi_pd(acc[k], acc[k]);
            *out = _mm_cvtsd_f64(_mm_add_sd(acc[k], odd));
        }
        sums
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::tests::identity_model;

    #[test]
    fn test_term_order() {
        let terms = compute_terms(2.0, 3.0, 5.0);
        let expected = [
            1.0, 2.0, 3.0, 5.0, 6.0, 10.0, 15.0, 4.0, 9.0, 25.0, 30.0, 8.0, 18.0, 50.0, 12.0,
            27.0, 75.0, 20.0, 45.0, 125.0,
        ];
        assert_eq!(terms, expected);
    }

    #[test]
    fn test_constant_term_only() {
        let mut model = identity_model();
        model.line_num_coeff = std::array::from_fn(|i| (i + 1) as f64);
        let evaluator = RpcEvaluator::scalar(&model);

        let sums = evaluator.evaluate(&compute_terms(0.0, 0.0, 0.0));
        assert_eq!(sums[0], 1.0);
        assert_eq!(sums[1], 1.0);
    }

    #[test]
    fn test_scalar_and_detected_paths_identical() {
        let mut model = identity_model();
        model.line_num_coeff = std::array::from_fn(|i| 0.31 * (i as f64) - 2.7);
        model.line_den_coeff = std::array::from_fn(|i| 1.0 + 0.013 * (i as f64));
        model.samp_num_coeff = std::array::from_fn(|i| (-1.0f64).powi(i as i32) * 0.17 * (i as f64 + 1.0));
        model.samp_den_coeff = std::array::from_fn(|i| 1.0 - 0.004 * (i as f64));

        let scalar = RpcEvaluator::scalar(&model);
        let detected = RpcEvaluator::new(&model);

        for &(p, l, h) in &[
            (0.0, 0.0, 0.0),
            (0.5, -0.25, 0.125),
            (-1.0, 1.0, -1.0),
            (0.9999, -0.0001, 0.3333),
            (1.4, 1.2, -1.3),
        ] {
            let terms = compute_terms(p, l, h);
            let a = scalar.evaluate(&terms);
            let b = detected.evaluate(&terms);
            // The two strategies stripe their accumulators the same way, so
            // results must match exactly, not just approximately.
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_idempotent_evaluation() {
        let model = identity_model();
        let evaluator = RpcEvaluator::new(&model);
        let terms = compute_terms(0.25, -0.75, 0.5);
        assert_eq!(evaluator.evaluate(&terms), evaluator.evaluate(&terms));
    }
}
