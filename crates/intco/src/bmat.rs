//! Wilson B matrix and its generalized inverse

use log::{debug, warn};
use nalgebra as na;

use crate::{ANGBOHR, DMat, DVec, IntcoError, geom::Geom, siic::Siic};

/// return the B matrix in simple internal coordinates. rows are the
/// coordinates in `siics` and columns the Cartesian components of `geom`,
/// with derivatives taken per Ångstrom
pub fn b_matrix(siics: &[Siic], geom: &Geom) -> Result<DMat, IntcoError> {
    let cols = 3 * geom.len();
    let mut b = DMat::zeros(siics.len(), cols);
    for (row, ic) in siics.iter().enumerate() {
        for (atom, g) in ic.grad(geom)? {
            for k in 0..3 {
                b[(row, 3 * atom + k)] += g[k];
            }
        }
    }
    Ok(b)
}

/// the B matrix from central finite differences of the coordinate values, with
/// `step` in bohr
pub fn numerical_b_matrix(
    siics: &[Siic],
    geom: &Geom,
    step: f64,
) -> Result<DMat, IntcoError> {
    let x0 = DVec::from(geom);
    let mut b = DMat::zeros(siics.len(), x0.len());
    for col in 0..x0.len() {
        let mut xp = x0.clone();
        xp[col] += step;
        let mut xm = x0.clone();
        xm[col] -= step;
        let (gp, gm) = (Geom::from(&xp), Geom::from(&xm));
        for (row, ic) in siics.iter().enumerate() {
            b[(row, col)] = (ic.value(&gp)? - ic.value(&gm)?)
                / (2.0 * step * ANGBOHR);
        }
    }
    Ok(b)
}

/// return the B matrix in symmetry internal coordinates, U·B
pub fn sym_b_matrix(u: &DMat, b: &DMat) -> DMat {
    u * b
}

/// Return a generalized inverse A of `b`, so that B·A = I on the row space of
/// B. When B has full row rank, let D = BBᵀ and return A = BᵀD⁻¹. Otherwise
/// return the Moore-Penrose pseudo-inverse, treating singular values below
/// `tol` times the largest one as zero.
pub fn a_matrix(b: &DMat, tol: f64) -> Result<DMat, IntcoError> {
    let svd = na::SVD::new(b.clone(), true, true);
    let smax = svd.singular_values.max();
    if !smax.is_finite() || smax == 0.0 {
        return Err(IntcoError::DegenerateGeometry(
            "B matrix has no nonzero singular values".to_owned(),
        ));
    }
    let cutoff = tol * smax;
    let rank = svd.singular_values.iter().filter(|&&s| s > cutoff).count();
    if rank == b.nrows() {
        let d = b * b.transpose();
        debug!("determinant of B*BT = {:.4e}", d.determinant());
        if let Some(c) = na::Cholesky::new(d) {
            return Ok(b.transpose() * c.inverse());
        }
        warn!("cholesky decomposition of B*BT failed, using SVD");
    } else {
        warn!(
            "B matrix is rank deficient: rank {rank} with {} rows",
            b.nrows()
        );
    }
    svd.pseudo_inverse(cutoff)
        .map_err(|e| IntcoError::DegenerateGeometry(e.to_owned()))
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    fn water() -> Geom {
        Geom::from(vec![
            0.000000000,
            1.431390207,
            0.986041184,
            0.000000000,
            0.000000000,
            -0.124238453,
            0.000000000,
            -1.431390207,
            0.986041184,
        ])
    }

    fn water_sics() -> Vec<Siic> {
        vec![
            Siic::Stretch(0, 1),
            Siic::Stretch(1, 2),
            Siic::Bend(0, 1, 2),
        ]
    }

    #[test]
    fn stretch_rows() {
        let geom = water();
        let b = b_matrix(&water_sics(), &geom).unwrap();
        assert_eq!(b.shape(), (3, 9));
        let e = geom.unit(0, 1);
        for k in 0..3 {
            assert_abs_diff_eq!(b[(0, k)], -e[k], epsilon = 1e-15);
            assert_abs_diff_eq!(b[(0, 3 + k)], e[k], epsilon = 1e-15);
            assert_eq!(b[(0, 6 + k)], 0.0);
        }
        // no x motion in the yz plane
        assert_eq!(b.column(0).amax(), 0.0);
    }

    #[test]
    fn numerical_agrees() {
        let geom = water();
        let want = numerical_b_matrix(&water_sics(), &geom, 1e-5).unwrap();
        let got = b_matrix(&water_sics(), &geom).unwrap();
        assert_abs_diff_eq!(got, want, epsilon = 1e-8);
    }

    #[test]
    fn full_rank_inverse() {
        let b = b_matrix(&water_sics(), &water()).unwrap();
        let a = a_matrix(&b, 1e-10).unwrap();
        assert_eq!(a.shape(), (9, 3));
        assert_abs_diff_eq!(&b * &a, DMat::identity(3, 3), epsilon = 1e-12);
    }

    #[test]
    fn redundant_inverse() {
        let mut sics = water_sics();
        sics.push(Siic::Stretch(0, 2));
        let b = b_matrix(&sics, &water()).unwrap();
        let a = a_matrix(&b, 1e-10).unwrap();
        let ba = &b * &a;
        let ab = &a * &b;
        assert_abs_diff_eq!(&ba * &b, b, epsilon = 1e-10);
        assert_abs_diff_eq!(&ab * &a, a, epsilon = 1e-10);
        assert_abs_diff_eq!(ba.transpose(), ba, epsilon = 1e-10);
        assert_abs_diff_eq!(ab.transpose(), ab, epsilon = 1e-10);
        // projector onto a 3-dimensional space
        assert_abs_diff_eq!(ba.trace(), 3.0, epsilon = 1e-10);
    }

    #[test]
    fn degenerate() {
        assert!(matches!(
            a_matrix(&DMat::zeros(2, 6), 1e-10),
            Err(IntcoError::DegenerateGeometry(_))
        ));
        let coincident = Geom::from(vec![0.0; 9]);
        assert!(b_matrix(&water_sics(), &coincident).is_err());
    }
}
