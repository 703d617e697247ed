//! Dequantization and inverse DCT of 8x8 blocks.

use std::{f32::consts::PI, sync::OnceLock};

/// Maps a coefficient's position in zig-zag scan order to its row-major position in the block.
#[rustfmt::skip]
pub const ZIGZAG: [u8; 64] = [
     0,  1,  8, 16,  9,  2,  3, 10,
    17, 24, 32, 25, 18, 11,  4,  5,
    12, 19, 26, 33, 40, 48, 41, 34,
    27, 20, 13,  6,  7, 14, 21, 28,
    35, 42, 49, 56, 57, 50, 43, 36,
    29, 22, 15, 23, 30, 37, 44, 51,
    58, 59, 52, 45, 38, 31, 39, 46,
    53, 60, 61, 54, 47, 55, 62, 63,
];

/// The inverse DCT algorithm used to reconstruct samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DctMethod {
    /// Arai-Agui-Nakajima integer approximation with 8-bit multiplier precision. Fast, but loses
    /// accuracy at very small quantizers.
    #[default]
    IntegerFast,
    /// Separable floating-point IDCT.
    Float,
}

/// `round(aan[row] * aan[col] * 2^14)`, where `aan[0] = 1` and `aan[k] = cos(k*PI/16) * sqrt(2)`.
#[rustfmt::skip]
const AAN_SCALES: [i32; 64] = [
    16384, 22725, 21407, 19266, 16384, 12873,  8867,  4520,
    22725, 31521, 29692, 26722, 22725, 17855, 12299,  6270,
    21407, 29692, 27969, 25172, 21407, 16819, 11585,  5906,
    19266, 26722, 25172, 22654, 19266, 15137, 10426,  5315,
    16384, 22725, 21407, 19266, 16384, 12873,  8867,  4520,
    12873, 17855, 16819, 15137, 12873, 10114,  6967,  3552,
     8867, 12299, 11585, 10426,  8867,  6967,  4799,  2446,
     4520,  6270,  5906,  5315,  4520,  3552,  2446,  1247,
];

/// Fractional bits carried by the fast path's dequantized coefficients.
const IFAST_SCALE_BITS: u32 = 2;
/// Fractional bits of the fast path's multiplication constants.
const CONST_BITS: u32 = 8;

const FIX_1_082392200: i32 = 277;
const FIX_1_414213562: i32 = 362;
const FIX_1_847759065: i32 = 473;
const FIX_2_613125930: i32 = 669;

#[inline(always)]
fn mul(x: i32, c: i32) -> i32 {
    (x * c) >> CONST_BITS
}

/// Dequantizes and transforms the blocks of one component.
pub(crate) enum BlockTransform {
    IntegerFast { multipliers: [i32; 64] },
    Float { multipliers: [f32; 64] },
}

impl BlockTransform {
    /// `qtable` is in row-major order.
    pub fn new(method: DctMethod, qtable: &[u16; 64]) -> Self {
        match method {
            DctMethod::IntegerFast => Self::IntegerFast {
                multipliers: std::array::from_fn(|i| {
                    let shift = 14 - IFAST_SCALE_BITS;
                    (i32::from(qtable[i]) * AAN_SCALES[i] + (1 << (shift - 1))) >> shift
                }),
            },
            DctMethod::Float => Self::Float {
                multipliers: qtable.map(f32::from),
            },
        }
    }

    /// Reconstructs the block with row-major quantized coefficients `coefs` into `out`, whose
    /// rows are `stride` bytes apart.
    pub fn transform(&self, coefs: &[i32; 64], out: &mut [u8], stride: usize) {
        match self {
            Self::IntegerFast { multipliers } => idct_fast(coefs, multipliers, out, stride),
            Self::Float { multipliers } => idct_float(coefs, multipliers, out, stride),
        }
    }
}

/// One 8-point AAN butterfly, shared by both passes.
#[inline(always)]
fn aan_1d(s: [i32; 8]) -> [i32; 8] {
    // Even part
    let tmp10 = s[0] + s[4];
    let tmp11 = s[0] - s[4];
    let tmp13 = s[2] + s[6];
    let tmp12 = mul(s[2] - s[6], FIX_1_414213562) - tmp13;

    let tmp0 = tmp10 + tmp13;
    let tmp3 = tmp10 - tmp13;
    let tmp1 = tmp11 + tmp12;
    let tmp2 = tmp11 - tmp12;

    // Odd part
    let z13 = s[5] + s[3];
    let z10 = s[5] - s[3];
    let z11 = s[1] + s[7];
    let z12 = s[1] - s[7];

    let tmp7 = z11 + z13;
    let tmp11 = mul(z11 - z13, FIX_1_414213562);

    let z5 = mul(z10 + z12, FIX_1_847759065);
    let tmp10 = mul(z12, FIX_1_082392200) - z5;
    let tmp12 = mul(z10, -FIX_2_613125930) + z5;

    let tmp6 = tmp12 - tmp7;
    let tmp5 = tmp11 - tmp6;
    let tmp4 = tmp10 + tmp5;

    [
        tmp0 + tmp7,
        tmp1 + tmp6,
        tmp2 + tmp5,
        tmp3 - tmp4,
        tmp3 + tmp4,
        tmp2 - tmp5,
        tmp1 - tmp6,
        tmp0 - tmp7,
    ]
}

fn idct_fast(coefs: &[i32; 64], multipliers: &[i32; 64], out: &mut [u8], stride: usize) {
    let mut ws = [0i32; 64];

    // Columns, dequantizing on the way in.
    for col in 0..8 {
        let s: [i32; 8] = std::array::from_fn(|row| coefs[row * 8 + col] * multipliers[row * 8 + col]);
        let res = if s[1..].iter().all(|&c| c == 0) {
            [s[0]; 8]
        } else {
            aan_1d(s)
        };
        for (row, value) in res.into_iter().enumerate() {
            ws[row * 8 + col] = value;
        }
    }

    // Rows, descaling by the fractional bits plus the 1/8 normalization.
    const SHIFT: u32 = IFAST_SCALE_BITS + 3;
    for (row, line) in ws.chunks_exact(8).enumerate() {
        let res = aan_1d(std::array::from_fn(|i| line[i]));
        let dst = &mut out[row * stride..][..8];
        for (px, value) in dst.iter_mut().zip(res) {
            *px = (((value + (1 << (SHIFT - 1))) >> SHIFT) + 128).clamp(0, 255) as u8;
        }
    }
}

/// `BASIS[x][u] = C(u) / 2 * cos((2x + 1) * u * PI / 16)`, with `C(0) = 1/sqrt(2)`, `C(u) = 1`.
fn basis() -> &'static [[f32; 8]; 8] {
    static BASIS: OnceLock<[[f32; 8]; 8]> = OnceLock::new();
    BASIS.get_or_init(|| {
        std::array::from_fn(|x| {
            std::array::from_fn(|u| {
                let c = if u == 0 { std::f32::consts::FRAC_1_SQRT_2 } else { 1.0 };
                c / 2.0 * ((2 * x + 1) as f32 * u as f32 * PI / 16.0).cos()
            })
        })
    })
}

fn idct_float(coefs: &[i32; 64], multipliers: &[f32; 64], out: &mut [u8], stride: usize) {
    let basis = basis();
    let f: [f32; 64] = std::array::from_fn(|i| coefs[i] as f32 * multipliers[i]);

    // Rows: tmp[v][x] = sum_u f[v][u] * basis[x][u]
    let mut tmp = [0f32; 64];
    for v in 0..8 {
        for x in 0..8 {
            tmp[v * 8 + x] = (0..8).map(|u| f[v * 8 + u] * basis[x][u]).sum();
        }
    }

    // Columns: out[y][x] = sum_v basis[y][v] * tmp[v][x]
    for y in 0..8 {
        let dst = &mut out[y * stride..][..8];
        for (x, px) in dst.iter_mut().enumerate() {
            let value: f32 = (0..8).map(|v| basis[y][v] * tmp[v * 8 + x]).sum();
            *px = (value + 128.0).round().clamp(0.0, 255.0) as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(method: DctMethod, coefs: &[i32; 64], qtable: &[u16; 64]) -> [u8; 64] {
        let mut out = [0; 64];
        BlockTransform::new(method, qtable).transform(coefs, &mut out, 8);
        out
    }

    #[test]
    fn zigzag_is_a_permutation() {
        let mut seen = [false; 64];
        for &i in &ZIGZAG {
            assert!(!seen[usize::from(i)]);
            seen[usize::from(i)] = true;
        }
        assert_eq!(ZIGZAG[2], 8); // second coefficient steps down
    }

    #[test]
    fn dc_only() {
        let mut coefs = [0; 64];
        for dc in [-128, -50, -1, 0, 3, 99] {
            coefs[0] = dc;
            // DC * q / 8 + 128, for q = 8: DC + 128
            let expected = (dc + 128).clamp(0, 255) as u8;
            assert_eq!(run(DctMethod::IntegerFast, &coefs, &[8; 64]), [expected; 64]);
            assert_eq!(run(DctMethod::Float, &coefs, &[8; 64]), [expected; 64]);
        }
    }

    #[test]
    fn clamps() {
        let mut coefs = [0; 64];
        coefs[0] = 1000;
        assert_eq!(run(DctMethod::IntegerFast, &coefs, &[16; 64]), [255; 64]);
        coefs[0] = -1000;
        assert_eq!(run(DctMethod::Float, &coefs, &[16; 64]), [0; 64]);
    }

    #[test]
    fn strided_output() {
        let mut coefs = [0; 64];
        coefs[0] = 16;
        let mut out = [7u8; 8 * 12];
        BlockTransform::new(DctMethod::IntegerFast, &[1; 64]).transform(&coefs, &mut out, 12);
        for row in out.chunks_exact(12) {
            assert_eq!(row[..8], [130; 8]);
            assert_eq!(row[8..], [7; 4]);
        }
    }

    #[test]
    fn fast_matches_float() {
        let mut rng = fastrand::Rng::with_seed(0x1d_c7);
        for _ in 0..200 {
            let qtable: [u16; 64] = std::array::from_fn(|_| rng.u16(8..=16));
            let mut coefs: [i32; 64] =
                std::array::from_fn(|_| if rng.u8(0..10) < 3 { rng.i32(-6..=6) } else { 0 });
            coefs[0] = rng.i32(-60..=60);

            let fast = run(DctMethod::IntegerFast, &coefs, &qtable);
            let float = run(DctMethod::Float, &coefs, &qtable);
            for (i, (a, b)) in fast.iter().zip(&float).enumerate() {
                assert!(
                    a.abs_diff(*b) <= 4,
                    "sample {i}: fast {a} vs float {b} for {coefs:?} / {qtable:?}"
                );
            }
        }
    }
}
