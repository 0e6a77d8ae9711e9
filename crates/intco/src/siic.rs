//! Simple internal coordinates: the keyword table used by the parser, and one
//! value and one gradient function per coordinate kind. Gradients are taken
//! with respect to Cartesian displacements in Ångstroms

use std::f64::consts::PI;
use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::{ANGBOHR, IntcoError, Vec3, geom::Geom};

/// sparse gradient of a coordinate, as (atom, ∂q/∂r_atom) blocks. an atom may
/// appear more than once, in which case its blocks add
pub type Grad = Vec<(usize, Vec3)>;

/// a contiguous, inclusive range of atoms and their masses, one side of an
/// [Siic::Rcom]
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Fragment {
    pub first: usize,
    pub last: usize,
    pub masses: Vec<f64>,
}

impl Fragment {
    /// a fragment of unit masses
    pub fn new(first: usize, last: usize) -> Self {
        Self {
            first,
            last,
            masses: vec![1.0; last.saturating_sub(first) + 1],
        }
    }

    pub fn atoms(&self) -> Vec<usize> {
        (self.first..=self.last).collect()
    }

    pub fn mass(&self) -> f64 {
        self.masses.iter().sum()
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub enum Siic {
    /// bond stretch between two atoms
    Stretch(usize, usize),

    /// central atom is second like normal people would expect
    Bend(usize, usize, usize),

    /// angle between planes formed by i, j, k and j, k, l
    Torsion(usize, usize, usize, usize),

    /// linear bend of atoms `i`, `j`, and `k`, about the direction of the
    /// position of `l`, a dummy atom
    Lin1(usize, usize, usize, usize),

    /// bend of atom `i` out of the plane formed by atoms `j`, `k`, and `l`,
    /// with `j` central
    Out(usize, usize, usize, usize),

    /// the x component of the c → d unit vector in the local coordinate system
    /// in which the b → c vector defines the +z axis and the a atom lies in the
    /// xz plane in the +x direction
    Linx(usize, usize, usize, usize),

    /// the y component of the c → d unit vector in the same frame as
    /// [Siic::Linx]
    Liny(usize, usize, usize, usize),

    /// Simons-Parr-Finlan coordinate 1 - r₀/r for the i-j bond. r₀ is in
    /// Ångstroms, and zero means take it from the reference geometry
    Spf(usize, usize, f64),

    /// distance between the centers of mass of two fragments
    Rcom(Fragment, Fragment),

    /// a coordinate keyword recognized in the input but without a formula
    Unsupported(String, Vec<usize>),
}

/// one row of the keyword table
pub struct Kind {
    pub keyword: &'static str,
    /// number of atom index fields after the keyword
    pub natoms: usize,
    /// number of optional real-valued fields after the atoms
    pub nreal: usize,
    build: fn(&[usize], &[f64]) -> Siic,
}

impl Kind {
    /// build the coordinate from 0-based atom indices and any real fields
    pub fn build(&self, atoms: &[usize], reals: &[f64]) -> Siic {
        (self.build)(atoms, reals)
    }
}

pub static KINDS: [Kind; 9] = [
    Kind {
        keyword: "STRE",
        natoms: 2,
        nreal: 0,
        build: |a, _| Siic::Stretch(a[0], a[1]),
    },
    Kind {
        keyword: "BEND",
        natoms: 3,
        nreal: 0,
        build: |a, _| Siic::Bend(a[0], a[1], a[2]),
    },
    Kind {
        keyword: "TORS",
        natoms: 4,
        nreal: 0,
        build: |a, _| Siic::Torsion(a[0], a[1], a[2], a[3]),
    },
    Kind {
        keyword: "LIN1",
        natoms: 4,
        nreal: 0,
        build: |a, _| Siic::Lin1(a[0], a[1], a[2], a[3]),
    },
    Kind {
        keyword: "OUT",
        natoms: 4,
        nreal: 0,
        build: |a, _| Siic::Out(a[0], a[1], a[2], a[3]),
    },
    Kind {
        keyword: "LINX",
        natoms: 4,
        nreal: 0,
        build: |a, _| Siic::Linx(a[0], a[1], a[2], a[3]),
    },
    Kind {
        keyword: "LINY",
        natoms: 4,
        nreal: 0,
        build: |a, _| Siic::Liny(a[0], a[1], a[2], a[3]),
    },
    Kind {
        keyword: "SPF",
        natoms: 2,
        nreal: 1,
        build: |a, r| Siic::Spf(a[0], a[1], r.first().copied().unwrap_or(0.0)),
    },
    Kind {
        keyword: "RCOM",
        natoms: 4,
        nreal: 0,
        build: |a, _| {
            Siic::Rcom(Fragment::new(a[0], a[1]), Fragment::new(a[2], a[3]))
        },
    },
];

/// coordinate families. a keyword starting with one of these is treated as a
/// simple internal even if it has no entry in [KINDS]
const FAMILIES: [&str; 7] = ["STRE", "BEND", "TORS", "OUT", "LIN", "SPF", "RCOM"];

/// look up the table entry for `keyword`
pub fn lookup(keyword: &str) -> Option<&'static Kind> {
    KINDS.iter().find(|k| k.keyword == keyword)
}

/// report whether `token` names a simple internal coordinate type, whether or
/// not it is implemented
pub fn is_keyword(token: &str) -> bool {
    lookup(token).is_some()
        || (FAMILIES.iter().any(|f| token.starts_with(f))
            && token
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()))
}

impl Siic {
    pub fn keyword(&self) -> &str {
        use Siic::*;
        match self {
            Stretch(..) => "STRE",
            Bend(..) => "BEND",
            Torsion(..) => "TORS",
            Lin1(..) => "LIN1",
            Out(..) => "OUT",
            Linx(..) => "LINX",
            Liny(..) => "LINY",
            Spf(..) => "SPF",
            Rcom(..) => "RCOM",
            Unsupported(k, _) => k,
        }
    }

    /// every atom the coordinate depends on
    pub fn atoms(&self) -> Vec<usize> {
        use Siic::*;
        match self {
            Stretch(a, b) | Spf(a, b, _) => vec![*a, *b],
            Bend(a, b, c) => vec![*a, *b, *c],
            Torsion(a, b, c, d)
            | Lin1(a, b, c, d)
            | Out(a, b, c, d)
            | Linx(a, b, c, d)
            | Liny(a, b, c, d) => vec![*a, *b, *c, *d],
            Rcom(f, g) => {
                let mut v = f.atoms();
                v.extend(g.atoms());
                v
            }
            Unsupported(_, v) => v.clone(),
        }
    }

    /// whether the value is an angle in radians, as opposed to a length or a
    /// unitless quantity
    pub fn is_angle(&self) -> bool {
        matches!(
            self,
            Siic::Bend(..)
                | Siic::Torsion(..)
                | Siic::Lin1(..)
                | Siic::Out(..)
        )
    }

    /// the value of the coordinate at `geom` in Ångstroms or radians
    pub fn value(&self, geom: &Geom) -> Result<f64, IntcoError> {
        use Siic::*;
        let v = match self {
            &Stretch(a, b) => geom.dist(a, b),
            &Bend(a, b, c) => geom.angle(a, b, c),
            &Torsion(a, b, c, d) => torsion(geom, a, b, c, d),
            &Lin1(a, b, c, d) => lin1(geom, a, b, c, d),
            &Out(a, b, c, d) => out(geom, a, b, c, d),
            &Linx(a, b, c, d) => linx(geom, a, b, c, d),
            &Liny(a, b, c, d) => -out(geom, d, c, b, a).sin(),
            &Spf(a, b, r0) => 1.0 - r0 / geom.dist(a, b),
            Rcom(f, g) => {
                ANGBOHR
                    * (geom.center(&g.atoms(), &g.masses)
                        - geom.center(&f.atoms(), &f.masses))
                    .norm()
            }
            Unsupported(k, _) => {
                return Err(IntcoError::UnsupportedCoordinateKind(k.clone()));
            }
        };
        if v.is_finite() {
            Ok(v)
        } else {
            Err(IntcoError::DegenerateGeometry(format!(
                "{self} is undefined at this geometry"
            )))
        }
    }

    /// the analytic gradient of the coordinate at `geom`, one block per atom
    /// the coordinate depends on
    pub fn grad(&self, geom: &Geom) -> Result<Grad, IntcoError> {
        use Siic::*;
        let g = match self {
            &Stretch(a, b) => {
                let e = geom.unit(a, b);
                vec![(a, -e), (b, e)]
            }
            &Bend(a, b, c) => bend_grad(geom, a, b, c),
            &Torsion(a, b, c, d) => torsion_grad(geom, a, b, c, d),
            &Lin1(a, b, c, d) => lin1_grad(geom, a, b, c, d),
            &Out(a, b, c, d) => out_grad(geom, a, b, c, d),
            &Linx(a, b, c, d) => linx_grad(geom, a, b, c, d),
            &Liny(a, b, c, d) => {
                let cosy = out(geom, d, c, b, a).cos();
                out_grad(geom, d, c, b, a)
                    .into_iter()
                    .map(|(i, v)| (i, -cosy * v))
                    .collect()
            }
            &Spf(a, b, r0) => {
                let e = geom.unit(a, b);
                let r = geom.dist(a, b);
                let f = r0 / (r * r);
                vec![(a, -f * e), (b, f * e)]
            }
            Rcom(f, g) => rcom_grad(geom, f, g),
            Unsupported(k, _) => {
                return Err(IntcoError::UnsupportedCoordinateKind(k.clone()));
            }
        };
        if g.iter().all(|(_, v)| v.iter().all(|x| x.is_finite())) {
            Ok(g)
        } else {
            Err(IntcoError::DegenerateGeometry(format!(
                "derivative of {self} is undefined at this geometry"
            )))
        }
    }

    /// format `self` as a line of the input file
    pub fn to_line(&self) -> String {
        let fields = match self {
            Siic::Rcom(f, g) => vec![f.first, f.last, g.first, g.last],
            _ => self.atoms(),
        };
        let mut s = format!("{:>5}", self.keyword());
        for a in fields {
            s.push_str(&format!("{:5}", a + 1));
        }
        if let Siic::Spf(_, _, r0) = self
            && *r0 != 0.0
        {
            s.push_str(&format!("{r0:15.10}"));
        }
        s
    }
}

impl Display for Siic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let join = |v: &[usize]| {
            v.iter()
                .map(|a| (a + 1).to_string())
                .collect::<Vec<_>>()
                .join("-")
        };
        match self {
            Siic::Stretch(..) => write!(f, "r({})", join(&self.atoms())),
            Siic::Bend(..) => write!(f, "∠({})", join(&self.atoms())),
            Siic::Torsion(..) => write!(f, "τ({})", join(&self.atoms())),
            Siic::Rcom(a, b) => write!(
                f,
                "RCOM({}..{}-{}..{})",
                a.first + 1,
                a.last + 1,
                b.first + 1,
                b.last + 1
            ),
            _ => write!(f, "{}({})", self.keyword(), join(&self.atoms())),
        }
    }
}

fn bend_grad(geom: &Geom, a: usize, b: usize, c: usize) -> Grad {
    let e21 = geom.unit(b, a);
    let e23 = geom.unit(b, c);
    let t21 = geom.dist(b, a);
    let t23 = geom.dist(b, c);
    let w = e21.dot(&e23);
    let sp = (1.0 - w * w).sqrt();
    let ga = (w * e21 - e23) / (t21 * sp);
    let gc = (w * e23 - e21) / (t23 * sp);
    vec![(a, ga), (b, -ga - gc), (c, gc)]
}

// vect6
fn torsion(geom: &Geom, a: usize, b: usize, c: usize, d: usize) -> f64 {
    let e21 = geom.unit(b, a);
    let e32 = geom.unit(c, b);
    let e43 = geom.unit(d, c);
    let v5 = e21.cross(&e32);
    let v6 = e43.cross(&e32);
    let sp2 = (1.0 - e21.dot(&e32).powi(2)).sqrt();
    let sp3 = (1.0 - e43.dot(&e32).powi(2)).sqrt();
    let w = (e21.dot(&v6) / (sp2 * sp3)).clamp(-1.0, 1.0).asin();
    if v5.dot(&v6) > 0.0 { PI - w } else { w }
}

fn torsion_grad(geom: &Geom, a: usize, b: usize, c: usize, d: usize) -> Grad {
    let e21 = geom.unit(b, a);
    let e32 = geom.unit(c, b);
    let e43 = geom.unit(d, c);
    let t21 = geom.dist(b, a);
    let t32 = geom.dist(c, b);
    let t43 = geom.dist(d, c);
    let v5 = e21.cross(&e32);
    let v6 = e43.cross(&e32);
    let cp2 = -e21.dot(&e32);
    let cp3 = -e43.dot(&e32);
    let sp2 = 1.0 - cp2 * cp2;
    let sp3 = 1.0 - cp3 * cp3;
    // terminal atoms
    let w1 = 1.0 / (t21 * sp2);
    let w2 = 1.0 / (t43 * sp3);
    // central atoms
    let w3 = (t32 - t21 * cp2) * w1 / t32;
    let w4 = cp3 / (t32 * sp3);
    let w5 = (t32 - t43 * cp3) * w2 / t32;
    let w6 = cp2 / (t32 * sp2);
    vec![
        (a, -w1 * v5),
        (b, w3 * v5 + w4 * v6),
        (c, w5 * v6 + w6 * v5),
        (d, -w2 * v6),
    ]
}

/// direction of the dummy atom `d` used by [Siic::Lin1], and its distance from
/// the origin in Ångstroms
fn dummy_axis(geom: &Geom, d: usize) -> (Vec3, f64) {
    let p = geom[d];
    (p / p.norm(), ANGBOHR * p.norm())
}

// vect3
fn lin1(geom: &Geom, a: usize, b: usize, c: usize, d: usize) -> f64 {
    let (ea, _) = dummy_axis(geom, d);
    let e23 = geom.unit(b, c);
    let e21 = geom.unit(b, a);
    ea.dot(&e23.cross(&e21)).clamp(-1.0, 1.0).asin()
}

fn lin1_grad(geom: &Geom, a: usize, b: usize, c: usize, d: usize) -> Grad {
    let (ea, td) = dummy_axis(geom, d);
    let e23 = geom.unit(b, c);
    let e21 = geom.unit(b, a);
    let t23 = geom.dist(b, c);
    let t21 = geom.dist(b, a);
    let ctheta = lin1(geom, a, b, c, d).cos();
    let perp = |e: &Vec3, v: Vec3| v - e.dot(&v) * e;
    let gc = perp(&e23, e21.cross(&ea)) / (t23 * ctheta);
    let ga = perp(&e21, ea.cross(&e23)) / (t21 * ctheta);
    let gd = perp(&ea, e23.cross(&e21)) / (td * ctheta);
    vec![(a, ga), (b, -ga - gc), (c, gc), (d, gd)]
}

// vect5
fn out(geom: &Geom, a: usize, b: usize, c: usize, d: usize) -> f64 {
    let e21 = geom.unit(b, a);
    let e23 = geom.unit(b, c);
    let e24 = geom.unit(b, d);
    let sphi = geom.angle(c, b, d).sin();
    let w = (e21.dot(&e23.cross(&e24)) / sphi).clamp(-1.0, 1.0).asin();
    if e21.dot(&e23) + e21.dot(&e24) > 0.0 {
        PI.copysign(w) - w
    } else {
        w
    }
}

fn out_grad(geom: &Geom, a: usize, b: usize, c: usize, d: usize) -> Grad {
    let e21 = geom.unit(b, a);
    let e23 = geom.unit(b, c);
    let e24 = geom.unit(b, d);
    let t21 = geom.dist(b, a);
    let t23 = geom.dist(b, c);
    let t24 = geom.dist(b, d);
    let phi = geom.angle(c, b, d);
    let (sphi, cphi) = phi.sin_cos();
    let gamma = out(geom, a, b, c, d);
    let w = 1.0 / (gamma.cos() * sphi);
    let tg = gamma.tan();
    let ts = tg / (sphi * sphi);
    let ga = (w * e23.cross(&e24) - tg * e21) / t21;
    let gc = (w * e24.cross(&e21) - ts * (e23 - cphi * e24)) / t23;
    let gd = (w * e21.cross(&e23) - ts * (e24 - cphi * e23)) / t24;
    vec![(a, ga), (b, -ga - gc - gd), (c, gc), (d, gd)]
}

/// the +z axis of the LINX/LINY frame, the in-plane offset of atom `a` from
/// that axis in Ångstroms, and the vector from `b` to `a` in Ångstroms
fn lin_frame(geom: &Geom, a: usize, b: usize, c: usize) -> (Vec3, Vec3, Vec3) {
    let z = geom.unit(b, c);
    let p = geom.vec(b, a);
    let q = p - p.dot(&z) * z;
    (z, q, p)
}

// vect8
fn linx(geom: &Geom, a: usize, b: usize, c: usize, d: usize) -> f64 {
    let (_, q, _) = lin_frame(geom, a, b, c);
    geom.unit(c, d).dot(&q.normalize())
}

fn linx_grad(geom: &Geom, a: usize, b: usize, c: usize, d: usize) -> Grad {
    let (z, q, p) = lin_frame(geom, a, b, c);
    let tq = q.norm();
    let x = q / tq;
    let e34 = geom.unit(c, d);
    let t34 = geom.dist(c, d);
    let t23 = geom.dist(b, c);
    let gd = (x - e34.dot(&x) * e34) / t34;
    // derivative with respect to the unnormalized in-plane offset
    let gq = (e34 - x.dot(&e34) * x) / tq;
    let ga = gq - gq.dot(&z) * z;
    // contribution through the rotation of the z axis
    let m = -(gq.dot(&z) * p + p.dot(&z) * gq);
    let gz = (m - m.dot(&z) * z) / t23;
    vec![(a, ga), (b, -ga - gz), (c, gz - gd), (d, gd)]
}

fn rcom_grad(geom: &Geom, f: &Fragment, g: &Fragment) -> Grad {
    let ra = geom.center(&f.atoms(), &f.masses);
    let rb = geom.center(&g.atoms(), &g.masses);
    let e = (rb - ra).normalize();
    let (ma, mb) = (f.mass(), g.mass());
    let mut ret: Grad = f
        .atoms()
        .into_iter()
        .zip(&f.masses)
        .map(|(i, m)| (i, -(m / ma) * e))
        .collect();
    ret.extend(
        g.atoms()
            .into_iter()
            .zip(&g.masses)
            .map(|(i, m)| (i, (m / mb) * e)),
    );
    ret
}
