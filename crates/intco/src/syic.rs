//! Symmetry internal coordinates

use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::{DMat, IntcoError, siic::Siic};

/// A normalized linear combination of simple internal coordinates. Each term
/// is a signed, 1-based index into the simple internal list, and every term
/// carries the same weight 1/√n for n terms
#[derive(Debug, Default, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct Syic(pub Vec<isize>);

impl Syic {
    pub fn new(terms: Vec<isize>) -> Self {
        Self(terms)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// weight shared by every term
    pub fn weight(&self) -> f64 {
        1.0 / (self.len() as f64).sqrt()
    }

    /// check that every term references one of `nsic` simple internals and no
    /// simple internal appears twice. `coord` is the 0-based index of `self`,
    /// used only for the error
    pub fn validate(&self, coord: usize, nsic: usize) -> Result<(), IntcoError> {
        let err = |term| IntcoError::InvalidSymmetryReference {
            coord: coord + 1,
            term,
        };
        if self.is_empty() {
            return Err(err(0));
        }
        let mut seen = vec![false; nsic];
        for &t in &self.0 {
            let i = t.unsigned_abs();
            if i == 0 || i > nsic || seen[i - 1] {
                return Err(err(t));
            }
            seen[i - 1] = true;
        }
        Ok(())
    }

    /// iterate over (0-based simple internal index, signed weight) pairs. a
    /// zero term is skipped
    pub fn terms(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        let w = self.weight();
        self.0
            .iter()
            .filter(|&&t| t != 0)
            .map(move |&t| (t.unsigned_abs() - 1, (t.signum() as f64) * w))
    }

    /// the value of this coordinate given the values of the simple internals.
    /// the result is NaN if a term is out of range, see [Syic::validate]
    pub fn value(&self, sics: &[f64]) -> f64 {
        self.terms()
            .map(|(i, w)| w * sics.get(i).copied().unwrap_or(f64::NAN))
            .sum()
    }

    /// this coordinate as a dense row of length `nsic`. out of range terms
    /// are dropped
    pub fn row(&self, nsic: usize) -> Vec<f64> {
        let mut ret = vec![0.0; nsic];
        for (i, w) in self.terms() {
            if let Some(r) = ret.get_mut(i) {
                *r = w;
            }
        }
        ret
    }

    /// format `self` as an input line, with `i` as its 0-based index
    pub fn to_line(&self, i: usize) -> String {
        let mut s = format!("{:5}", i + 1);
        for t in &self.0 {
            s.push_str(&format!(
                "{:4}{:14.9}",
                t.unsigned_abs(),
                t.signum() as f64
            ));
        }
        s
    }

    /// a labelled sum like `r(1-2) - r(2-3)`
    pub fn describe(&self, siics: &[Siic]) -> String {
        let mut s = String::new();
        for (n, t) in self.0.iter().enumerate() {
            let sign = if *t < 0 { "-" } else { "+" };
            if n > 0 {
                s.push_str(&format!(" {sign} "));
            } else if *t < 0 {
                s.push('-');
            }
            match siics.get(t.unsigned_abs().wrapping_sub(1)) {
                Some(siic) => s.push_str(&siic.to_string()),
                None => s.push_str(&format!("#{}", t.unsigned_abs())),
            }
        }
        s
    }
}

impl Display for Syic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (n, t) in self.0.iter().enumerate() {
            if n > 0 {
                write!(f, " ")?;
            }
            write!(f, "{t:+}")?;
        }
        Ok(())
    }
}

/// evaluate `syics` from the simple internal values `sics`, checking every
/// reference first
pub fn evaluate(syics: &[Syic], sics: &[f64]) -> Result<Vec<f64>, IntcoError> {
    syics
        .iter()
        .enumerate()
        .map(|(i, s)| {
            s.validate(i, sics.len())?;
            Ok(s.value(sics))
        })
        .collect()
}

/// return the U matrix, used for converting from simple internals to symmetry
/// internals, with dimensions (number of symmetry internals) x (number of
/// simple internals). with no symmetry internals, U is the identity and the
/// simple internals are used directly
pub fn u_mat(syics: &[Syic], nsic: usize) -> DMat {
    if syics.is_empty() {
        return DMat::identity(nsic, nsic);
    }
    DMat::from_row_iterator(
        syics.len(),
        nsic,
        syics.iter().flat_map(|s| s.row(nsic)),
    )
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    const SICS: [f64; 3] = [0.9586143064, 0.9486143064, 1.8221415519];

    #[test]
    fn single_term() {
        assert_eq!(Syic(vec![3]).value(&SICS), SICS[2]);
        assert_eq!(Syic(vec![-1]).value(&SICS), -SICS[0]);
    }

    #[test]
    fn two_terms() {
        let got = Syic(vec![1, -2]).value(&SICS);
        let want = (SICS[0] - SICS[1]) / 2f64.sqrt();
        assert_abs_diff_eq!(got, want, epsilon = 1e-15);
    }

    #[test]
    fn normalized() {
        for s in [
            Syic(vec![2]),
            Syic(vec![1, -3]),
            Syic(vec![1, 2, -3]),
            Syic(vec![-4, 1, 3, 2, 6]),
        ] {
            let norm: f64 = s.row(6).iter().map(|w| w * w).sum();
            assert_abs_diff_eq!(norm, 1.0, epsilon = 1e-15);
        }
        let got = Syic(vec![1, 2, -3]).value(&SICS);
        let want = (SICS[0] + SICS[1] - SICS[2]) / 3f64.sqrt();
        assert_abs_diff_eq!(got, want, epsilon = 1e-15);
    }

    #[test]
    fn bad_reference() {
        let err = |coord, term| {
            Err(IntcoError::InvalidSymmetryReference { coord, term })
        };
        assert_eq!(Syic(vec![1, 4]).validate(1, 3), err(2, 4));
        assert_eq!(Syic(vec![-4]).validate(0, 3), err(1, -4));
        assert_eq!(Syic(vec![0]).validate(0, 3), err(1, 0));
        assert_eq!(Syic(vec![2, -2]).validate(0, 3), err(1, -2));
        assert_eq!(Syic(vec![]).validate(0, 3), err(1, 0));
        assert!(evaluate(&[Syic(vec![1]), Syic(vec![5])], &SICS).is_err());
    }

    #[test]
    fn umat() {
        let s = std::f64::consts::FRAC_1_SQRT_2;
        let syics = [Syic(vec![1, 2]), Syic(vec![3]), Syic(vec![1, -2])];
        let want = DMat::from_row_slice(
            3,
            3,
            &[s, s, 0.0, 0.0, 0.0, 1.0, s, -s, 0.0],
        );
        assert_abs_diff_eq!(u_mat(&syics, 3), want, epsilon = 1e-15);
        assert_eq!(u_mat(&[], 2), DMat::identity(2, 2));
    }

    #[test]
    fn formatting() {
        let siics = [Siic::Stretch(0, 1), Siic::Stretch(1, 2)];
        let s = Syic(vec![1, -2]);
        assert_eq!(s.describe(&siics), "r(1-2) - r(2-3)");
        assert_eq!(Syic(vec![-2]).describe(&siics), "-r(2-3)");
        assert_eq!(s.to_string(), "+1 -2");
        assert_eq!(
            s.to_line(2),
            "    3   1   1.000000000   2  -1.000000000"
        );
    }
}
