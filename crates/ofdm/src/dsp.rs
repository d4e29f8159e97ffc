use num::complex::Complex32;

/// Average L1 norm of a block of samples, used for null symbol power
/// detection.
pub fn calculate_l1_average(block: &[Complex32]) -> f32 {
    let l1_sum: f32 = block.iter().map(|x| x.l1_norm()).sum();
    l1_sum / (block.len() as f32)
}

/// Replaces each sample with the complex difference to its successor,
/// `arg(~z0*z1) = arg(z1)-arg(z0)`. The final sample becomes zero.
pub fn calculate_relative_phase(x: &mut [Complex32]) {
    let length = x.len();
    for i in 0..(length - 1) {
        let delta = x[i].conj() * x[i + 1];
        x[i] = delta;
    }
    x[length - 1] = Complex32 { re: 0.0, im: 0.0 };
}

/// Writes the fft-shifted magnitude spectrum in decibels.
pub fn calculate_magnitude_spectrum(x: &[Complex32], y: &mut [f32]) {
    assert!(x.len() == y.len());
    let n = x.len();
    let m = n / 2;
    for i in 0..n {
        let j = (i + m) % n;
        let mag: f32 = 20.0 * x[j].norm().log10();
        y[i] = mag;
    }
}

/// Correlates the cyclic prefix of a symbol against the end of its FFT
/// portion. The argument of the sum measures the fractional frequency
/// offset accumulated over one FFT duration.
pub fn calculate_cyclic_phase_error(x: &[Complex32], prefix_length: usize) -> f32 {
    let length = x.len();
    assert!(length >= prefix_length);

    let prefix = &x[0..prefix_length];
    let suffix = &x[(length - prefix_length)..];

    let conjugate_sum: Complex32 = (0..prefix_length)
        .map(|i| suffix[i] * prefix[i].conj())
        .sum();

    conjugate_sum.im.atan2(conjugate_sum.re)
}

// SOURCE: https://mooooo.ooo/chebyshev-sine-approximation
//         Chebyshev polynomial that approximates f(x) = sin(2*pi*x) accurately within [-0.75,+0.75]
#[inline(always)]
fn fast_sine(x: f32) -> f32 {
    const A0: f32 = -25.1327419281005859375;
    const A1: f32 = 64.83582305908203125;
    const A2: f32 = -67.076629638671875;
    const A3: f32 = 38.495880126953125;
    const A4: f32 = -14.049663543701171875;
    const A5: f32 = 3.161602020263671875;

    // Calculate g(x) = a5*x^10 + a4*x^8 + a3*x^6 + a2*x^4 + a1*x^2 + a0
    let z = x * x;
    let b5 = A5;
    let b4 = b5 * z + A4;
    let b3 = b4 * z + A3;
    let b2 = b3 * z + A2;
    let b1 = b2 * z + A1;
    let b0 = b1 * z + A0;

    // f(x) = g(x) * (x^2 - 0.25) * x
    b0 * (z - 0.25) * x
}

#[inline(always)]
fn pll_sample(dt: f32) -> Complex32 {
    // translate to [-0.5,+0.5] without the cost of f32::round()
    let dt_offset = dt.abs() - 0.5;
    let dt_offset = dt_offset.ceil();
    let dt_offset = dt_offset * dt.signum();
    let dt = dt - dt_offset;
    let sin = fast_sine(dt); // occupies [-0.5,+0.5]
    let cos = fast_sine(dt + 0.25); // occupies [-0.25,+0.75]
    Complex32::new(cos, sin)
}

/// Mixes a buffer with a numerically controlled oscillator.
///
/// `freq_offset_normalised` is cycles per sample; `dt0` is the absolute
/// sample index of the first entry so disjoint slices of one frame can be
/// corrected independently with a continuous oscillator phase.
pub fn apply_pll(x: &mut [Complex32], freq_offset_normalised: f32, dt0: usize) {
    match select_pll_kernel() {
        PllKernel::Block4 => apply_pll_block4(x, freq_offset_normalised, dt0),
        PllKernel::Scalar => apply_pll_scalar(x, freq_offset_normalised, dt0),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PllKernel {
    Scalar,
    Block4,
}

fn select_pll_kernel() -> PllKernel {
    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("sse4.1") {
            return PllKernel::Block4;
        }
    }
    PllKernel::Scalar
}

/// Scalar reference oscillator, the behavioural oracle for the block kernel.
pub fn apply_pll_scalar(x: &mut [Complex32], freq_offset_normalised: f32, dt0: usize) {
    x.iter_mut().enumerate().for_each(|(i, x)| {
        let dt = ((dt0 + i) as f32) * freq_offset_normalised;
        *x *= pll_sample(dt);
    });
}

/// Four lane unrolled oscillator. Each lane performs exactly the scalar
/// operation sequence so the output is bit identical to the reference.
pub fn apply_pll_block4(x: &mut [Complex32], freq_offset_normalised: f32, dt0: usize) {
    const LANES: usize = 4;
    let mut chunks = x.chunks_exact_mut(LANES);
    let mut base = dt0;
    for chunk in &mut chunks {
        let mut pll = [Complex32::default(); LANES];
        for (lane, value) in pll.iter_mut().enumerate() {
            let dt = ((base + lane) as f32) * freq_offset_normalised;
            *value = pll_sample(dt);
        }
        for (sample, value) in chunk.iter_mut().zip(pll.iter()) {
            *sample *= *value;
        }
        base += LANES;
    }
    apply_pll_scalar(chunks.into_remainder(), freq_offset_normalised, base);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn make_tone(nb_samples: usize, freq_normalised: f32) -> Vec<Complex32> {
        (0..nb_samples)
            .map(|i| Complex32::cis(2.0 * PI * freq_normalised * (i as f32)))
            .collect()
    }

    #[test]
    fn fast_sine_tracks_reference_sine() {
        for i in -64..=64 {
            let x = (i as f32) / 128.0 * 0.75;
            let reference = (2.0 * PI * x).sin();
            assert!((fast_sine(x) - reference).abs() < 1e-4, "x={}", x);
        }
    }

    #[test]
    fn pll_cancels_a_frequency_offset() {
        let offset = 0.003;
        let mut samples = make_tone(1024, offset);
        apply_pll_scalar(&mut samples, -offset, 0);
        for sample in &samples {
            assert!((sample.re - 1.0).abs() < 0.02);
            assert!(sample.im.abs() < 0.02);
        }
    }

    #[test]
    fn block_kernel_matches_scalar_reference() {
        let offset = -0.0123;
        let mut scalar = make_tone(1001, 0.004);
        let mut block = scalar.clone();
        apply_pll_scalar(&mut scalar, offset, 17);
        apply_pll_block4(&mut block, offset, 17);
        assert_eq!(scalar, block);
    }

    #[test]
    fn cyclic_phase_error_measures_offset_over_fft_duration() {
        let nb_fft = 256;
        let nb_prefix = 32;
        let offset = 0.25 / (nb_fft as f32);
        // A symbol whose prefix repeats the end of the fft portion
        let fft_portion = make_tone(nb_fft + nb_prefix, offset);
        let error = calculate_cyclic_phase_error(&fft_portion, nb_prefix);
        let expected = 2.0 * PI * offset * (nb_fft as f32);
        assert!((error - expected).abs() < 1e-3);
    }

    #[test]
    fn l1_average_of_unit_samples_is_two() {
        let samples = vec![Complex32::new(1.0, -1.0); 64];
        assert!((calculate_l1_average(&samples) - 2.0).abs() < 1e-6);
    }
}
