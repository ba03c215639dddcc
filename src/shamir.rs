//! threshold secret sharing over GF(256)
//!
//! byte-wise shamir scheme: each secret byte is the constant term of a
//! degree k-1 polynomial evaluated at x = 1..=n, and reconstruction is
//! lagrange interpolation at x = 0. polynomial coefficients come from the
//! caller's rng; the recovery manager derives that rng from aggregated
//! entropy, never from a default generator.

use rand::{CryptoRng, RngCore};
use zeroize::Zeroizing;

use crate::sensitive::SecretVec;
use crate::{Error, Result};

/// one plaintext share (index, evaluation bytes)
pub struct ShamirShare {
    /// evaluation point, 1-indexed and never zero
    pub index: u8,
    pub data: SecretVec,
}

/// GF(256) multiplication using the AES polynomial (x^8 + x^4 + x^3 + x + 1)
fn gf_mul(a: u8, b: u8) -> u8 {
    let mut result = 0u8;
    let mut a = a;
    let mut b = b;

    while b != 0 {
        if b & 1 != 0 {
            result ^= a;
        }
        let hi = a & 0x80;
        a <<= 1;
        if hi != 0 {
            a ^= 0x1b;
        }
        b >>= 1;
    }
    result
}

/// GF(256) multiplicative inverse via a^254
fn gf_inv(a: u8) -> u8 {
    if a == 0 {
        return 0;
    }
    let mut result = a;
    for _ in 0..6 {
        result = gf_mul(result, result);
        result = gf_mul(result, a);
    }
    gf_mul(result, result)
}

fn gf_div(a: u8, b: u8) -> u8 {
    gf_mul(a, gf_inv(b))
}

/// evaluate a polynomial (coefficients low-order first) at x
fn poly_eval(coeffs: &[u8], x: u8) -> u8 {
    let mut result = 0u8;
    let mut x_power = 1u8;

    for &coeff in coeffs {
        result ^= gf_mul(coeff, x_power);
        x_power = gf_mul(x_power, x);
    }
    result
}

/// lagrange interpolation at x = 0
fn lagrange_at_zero(points: &[(u8, u8)]) -> u8 {
    let mut result = 0u8;

    for (i, &(xi, yi)) in points.iter().enumerate() {
        let mut num = 1u8;
        let mut den = 1u8;

        for (j, &(xj, _)) in points.iter().enumerate() {
            if i != j {
                num = gf_mul(num, xj); // (0 - xj) = xj in GF(256)
                den = gf_mul(den, xi ^ xj); // (xi - xj)
            }
        }

        result ^= gf_mul(yi, gf_div(num, den));
    }

    result
}

/// split `secret` into n shares with threshold k
pub fn split(
    secret: &[u8],
    n: u8,
    k: u8,
    rng: &mut (impl RngCore + CryptoRng),
) -> Result<Vec<ShamirShare>> {
    if n == 0 || k == 0 || k > n {
        return Err(Error::InvalidThreshold { n, k });
    }

    let mut buffers: Vec<Vec<u8>> = vec![vec![0u8; secret.len()]; n as usize];
    let mut coeffs = Zeroizing::new(vec![0u8; k as usize]);

    for (pos, &secret_byte) in secret.iter().enumerate() {
        coeffs[0] = secret_byte;
        rng.fill_bytes(&mut coeffs[1..]);

        for (share, buffer) in buffers.iter_mut().enumerate() {
            buffer[pos] = poly_eval(&coeffs, share as u8 + 1);
        }
    }

    Ok(buffers
        .into_iter()
        .enumerate()
        .map(|(i, data)| ShamirShare {
            index: i as u8 + 1,
            data: SecretVec::new(data),
        })
        .collect())
}

/// reconstruct the secret from at least k shares
///
/// shares past the first k are ignored; duplicate indices, a zero index, or
/// mismatched lengths are malformed input, not a threshold failure
pub fn combine(shares: &[ShamirShare], k: usize) -> Result<SecretVec> {
    if k == 0 {
        return Err(Error::InvalidThreshold { n: 0, k: 0 });
    }
    if shares.len() < k {
        return Err(Error::ThresholdNotMet {
            valid: shares.len(),
            required: k,
        });
    }

    let used = &shares[..k];
    let secret_len = used[0].data.len();
    for (i, share) in used.iter().enumerate() {
        if share.index == 0 || share.data.len() != secret_len {
            return Err(Error::InvalidShareFormat);
        }
        if used[..i].iter().any(|other| other.index == share.index) {
            return Err(Error::InvalidShareFormat);
        }
    }

    let mut secret = Zeroizing::new(vec![0u8; secret_len]);
    let mut points = Zeroizing::new(vec![(0u8, 0u8); k]);

    for pos in 0..secret_len {
        for (point, share) in points.iter_mut().zip(used.iter()) {
            *point = (share.index, share.data.as_bytes()[pos]);
        }
        secret[pos] = lagrange_at_zero(&points);
    }

    Ok(SecretVec::new(secret.to_vec()))
}
