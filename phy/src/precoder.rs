//! Channel Precoder Kernels
//!
//! Pluggable implementations of the layers-to-ports precoding arithmetic.
//! The kernel is injected once at grid construction time, which keeps the
//! dynamic dispatch outside the per-RE inner loops.

use crate::precoding::PrecodingWeightMatrix;
use crate::re_buffer::{ReBuffer, ReBufferReader};
use num_complex::Complex32;
use tracing::debug;

/// Applies a precoding weight matrix to blocks of resource elements.
///
/// Implementations are pure and stateless: the output depends only on the
/// inputs of each call.
pub trait ChannelPrecoder: Send + Sync {
    /// Precode `input` (one slice per layer) onto a single port given that
    /// port's per-layer coefficients.
    fn apply_precoding_port(
        &self,
        output: &mut [Complex32],
        input: &dyn ReBufferReader,
        port_coefficients: &[Complex32],
    );

    /// Precode `input` (one slice per layer) into `output` (one slice per
    /// port), writing `input.nof_re()` elements per port at `out_offset`.
    fn apply_precoding(
        &self,
        output: &mut ReBuffer,
        out_offset: usize,
        input: &dyn ReBufferReader,
        weights: &PrecodingWeightMatrix,
    ) {
        let nof_re = input.nof_re();
        assert_eq!(
            input.nof_slices(),
            weights.nof_layers(),
            "The input number of layers (i.e., {}) and the weight number of layers (i.e., {}) are different.",
            input.nof_slices(),
            weights.nof_layers()
        );
        assert_eq!(
            output.nof_slices(),
            weights.nof_ports(),
            "The output number of ports (i.e., {}) and the weight number of ports (i.e., {}) are different.",
            output.nof_slices(),
            weights.nof_ports()
        );
        assert!(
            out_offset + nof_re <= output.nof_re(),
            "The output range (i.e., {}..{}) exceeds the output buffer size (i.e., {}).",
            out_offset,
            out_offset + nof_re,
            output.nof_re()
        );
        for i_port in 0..weights.nof_ports() {
            let port_out = &mut output.slice_mut(i_port)[out_offset..out_offset + nof_re];
            self.apply_precoding_port(port_out, input, weights.port_coefficients(i_port));
        }
    }
}

/// Portable scalar precoder implementation.
#[derive(Debug, Default)]
pub struct GenericChannelPrecoder;

impl ChannelPrecoder for GenericChannelPrecoder {
    fn apply_precoding_port(
        &self,
        output: &mut [Complex32],
        input: &dyn ReBufferReader,
        port_coefficients: &[Complex32],
    ) {
        check_port_dimensions(output, input, port_coefficients);
        let weight = port_coefficients[0];
        for (out, re) in output.iter_mut().zip(input.slice(0)) {
            *out = re * weight;
        }
        for i_layer in 1..input.nof_slices() {
            let weight = port_coefficients[i_layer];
            for (out, re) in output.iter_mut().zip(input.slice(i_layer)) {
                *out += re * weight;
            }
        }
    }
}

/// AVX-accelerated precoder for x86-64, processing four complex REs per
/// vector operation.
///
/// Requires AVX support; obtain instances through
/// [`make_channel_precoder`], which checks the CPU feature at runtime.
#[cfg(target_arch = "x86_64")]
#[derive(Debug, Default)]
pub struct AvxChannelPrecoder;

#[cfg(target_arch = "x86_64")]
impl ChannelPrecoder for AvxChannelPrecoder {
    fn apply_precoding_port(
        &self,
        output: &mut [Complex32],
        input: &dyn ReBufferReader,
        port_coefficients: &[Complex32],
    ) {
        check_port_dimensions(output, input, port_coefficients);
        // Safety: instances are only created after runtime AVX detection.
        unsafe { apply_precoding_port_avx(output, input, port_coefficients) }
    }
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx")]
unsafe fn apply_precoding_port_avx(
    output: &mut [Complex32],
    input: &dyn ReBufferReader,
    port_coefficients: &[Complex32],
) {
    use std::arch::x86_64::*;

    let nof_re = output.len();
    let nof_re_simd = nof_re - (nof_re % 4);
    for i_layer in 0..input.nof_slices() {
        let weight = port_coefficients[i_layer];
        let weight_re = _mm256_set1_ps(weight.re);
        let weight_im = _mm256_set1_ps(weight.im);
        let layer = input.slice(i_layer);

        let mut i_re = 0;
        while i_re != nof_re_simd {
            let x = _mm256_loadu_ps(layer.as_ptr().add(i_re) as *const f32);
            // Swap the real and imaginary parts of each RE, then combine the
            // partial products so even lanes carry re*re - im*im and odd
            // lanes carry re*im + im*re.
            let x_swapped = _mm256_permute_ps(x, 0b1011_0001);
            let product = _mm256_addsub_ps(
                _mm256_mul_ps(weight_re, x),
                _mm256_mul_ps(weight_im, x_swapped),
            );
            let out_ptr = output.as_mut_ptr().add(i_re) as *mut f32;
            let result = if i_layer == 0 {
                product
            } else {
                _mm256_add_ps(_mm256_loadu_ps(out_ptr), product)
            };
            _mm256_storeu_ps(out_ptr, result);
            i_re += 4;
        }

        for i_re in nof_re_simd..nof_re {
            let product = layer[i_re] * weight;
            if i_layer == 0 {
                output[i_re] = product;
            } else {
                output[i_re] += product;
            }
        }
    }
}

fn check_port_dimensions(
    output: &[Complex32],
    input: &dyn ReBufferReader,
    port_coefficients: &[Complex32],
) {
    assert!(
        input.nof_slices() >= 1,
        "At least one input layer is required."
    );
    assert_eq!(
        port_coefficients.len(),
        input.nof_slices(),
        "The number of port coefficients (i.e., {}) and the input number of layers (i.e., {}) are different.",
        port_coefficients.len(),
        input.nof_slices()
    );
    assert_eq!(
        output.len(),
        input.nof_re(),
        "The output size (i.e., {}) and the input number of RE (i.e., {}) are different.",
        output.len(),
        input.nof_re()
    );
}

/// Select the best precoder implementation available on this machine.
pub fn make_channel_precoder() -> Box<dyn ChannelPrecoder> {
    #[cfg(target_arch = "x86_64")]
    if is_x86_feature_detected!("avx") {
        debug!("Using AVX channel precoder");
        return Box::new(AvxChannelPrecoder);
    }
    debug!("Using generic channel precoder");
    Box::new(GenericChannelPrecoder)
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::Zero;

    fn make_input(nof_layers: usize, nof_re: usize) -> ReBuffer {
        let mut input = ReBuffer::new(nof_layers, nof_re);
        for i_layer in 0..nof_layers {
            for (i_re, value) in input.slice_mut(i_layer).iter_mut().enumerate() {
                *value = Complex32::new(
                    (i_layer * nof_re + i_re + 1) as f32,
                    (i_re as f32) - (i_layer as f32),
                );
            }
        }
        input
    }

    #[test]
    fn test_generic_precoder_combines_layers() {
        let mut input = ReBuffer::new(2, 2);
        input.slice_mut(0).copy_from_slice(&[
            Complex32::new(1.0, 0.0),
            Complex32::new(0.0, 1.0),
        ]);
        input.slice_mut(1).copy_from_slice(&[
            Complex32::new(2.0, 0.0),
            Complex32::new(0.0, -2.0),
        ]);

        let mut weights = PrecodingWeightMatrix::new(2, 2);
        weights.set_coefficient(0, 0, Complex32::new(1.0, 0.0));
        weights.set_coefficient(1, 0, Complex32::new(0.0, 1.0));
        weights.set_coefficient(0, 1, Complex32::new(0.5, 0.0));
        weights.set_coefficient(1, 1, Complex32::new(-1.0, 0.0));

        let mut output = ReBuffer::new(2, 2);
        GenericChannelPrecoder.apply_precoding(&mut output, 0, &input, &weights);

        // Port 0: layer0 * 1 + layer1 * j.
        assert_eq!(output.slice(0)[0], Complex32::new(1.0, 2.0));
        assert_eq!(output.slice(0)[1], Complex32::new(2.0, 1.0));
        // Port 1: layer0 * 0.5 + layer1 * -1.
        assert_eq!(output.slice(1)[0], Complex32::new(-1.5, 0.0));
        assert_eq!(output.slice(1)[1], Complex32::new(0.0, 2.5));
    }

    #[test]
    fn test_apply_precoding_honors_offset() {
        let input = make_input(1, 3);
        let weights = PrecodingWeightMatrix::make_identity(1);

        let mut output = ReBuffer::new(1, 8);
        GenericChannelPrecoder.apply_precoding(&mut output, 4, &input, &weights);

        assert_eq!(output.slice(0)[3], Complex32::zero());
        assert_eq!(output.slice(0)[4], input.slice(0)[0]);
        assert_eq!(output.slice(0)[6], input.slice(0)[2]);
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn test_avx_matches_generic() {
        if !is_x86_feature_detected!("avx") {
            return;
        }
        // 13 REs exercises both the vector body and the scalar tail.
        let input = make_input(3, 13);
        let coefficients = [
            Complex32::new(0.25, -0.75),
            Complex32::new(-1.0, 0.5),
            Complex32::new(0.0, 2.0),
        ];

        let mut reference = vec![Complex32::zero(); 13];
        GenericChannelPrecoder.apply_precoding_port(&mut reference, &input, &coefficients);

        let mut accelerated = vec![Complex32::zero(); 13];
        AvxChannelPrecoder.apply_precoding_port(&mut accelerated, &input, &coefficients);

        assert_eq!(reference, accelerated);
    }
}
