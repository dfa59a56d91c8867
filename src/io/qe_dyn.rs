//! Dynamical-matrix files in the format written by the `ph.x` phonon code of Quantum ESPRESSO.
//!
//! A set of wavevectors is stored as one file per star, named `{prefix}1` to `{prefix}N`. Each
//! file repeats the crystal header, then holds one `Dynamical  Matrix in cartesian axes` block
//! per member of the star, and ends with the normal modes at the first member.
//!
//! Lengths are in units of `alat` (`celldm(1)`, Bohr), wavevectors in units of
//! $`2\pi/\mathrm{alat}`$, masses in Rydberg mass units and force constants in
//! $`\mathrm{Ry}/\mathrm{bohr}^2`$. Internally, lengths are converted to Ångström and
//! wavevectors to $`\mathrm{Å}^{-1}`$ without the $`2\pi`$ factor. Force constants and masses are
//! kept as they are.

use std::ffi::OsString;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{self, format_err, Context};
use indexmap::IndexMap;
use itertools::Itertools;
use lazy_static::lazy_static;
use log;
use nalgebra::{Matrix3, Point3, Vector3};
use ndarray::Array2;
use num_complex::Complex;
use regex::Regex;

use crate::auxiliary::structure::Structure;
use crate::auxiliary::units::{BOHR_TO_ANGSTROM, RY_TO_CM, RY_TO_THZ};
use crate::errors::validation_bail;
use crate::phonons::{DynamicalMatrixSet, QStar, StarMember};

#[cfg(test)]
#[path = "qe_dyn_tests.rs"]
mod qe_dyn_tests;

const DYNAMICAL_MATRIX_HEADER: &str = "Dynamical  Matrix in cartesian axes";
const DIAGONALISATION_HEADER: &str = "Diagonalizing the dynamical matrix";

lazy_static! {
    static ref Q_RE: Regex = Regex::new(r"q\s*=\s*\(\s*(\S+)\s+(\S+)\s+(\S+)\s*\)")
        .expect("Regex pattern invalid.");
    static ref SPECIES_RE: Regex = Regex::new(r"^\s*(\d+)\s+'\s*([^']*?)\s*'\s+(\S+)\s*$")
        .expect("Regex pattern invalid.");
}

// =======
// Parsing
// =======

/// Parses a Fortran real, which may use `D` as its exponent marker.
fn parse_real(token: &str) -> Result<f64, anyhow::Error> {
    token
        .replace(['D', 'd'], "E")
        .parse::<f64>()
        .map_err(|err| format_err!("Unable to parse `{token}` as a real number: {err}."))
}

fn parse_reals(line: &str) -> Result<Vec<f64>, anyhow::Error> {
    line.split_whitespace().map(parse_real).collect()
}

fn parse_index(token: &str) -> Result<usize, anyhow::Error> {
    token
        .parse::<usize>()
        .map_err(|err| format_err!("Unable to parse `{token}` as an index: {err}."))
}

/// The lattice vectors, in units of `alat`, of the Bravais lattices that can be given by an
/// index instead of explicit vectors.
fn bravais_vectors(ibrav: i32) -> Result<Matrix3<f64>, anyhow::Error> {
    match ibrav {
        1 => Ok(Matrix3::identity()),
        2 => Ok(Matrix3::new(-0.5, 0.0, 0.5, 0.0, 0.5, 0.5, -0.5, 0.5, 0.0)),
        3 => Ok(Matrix3::new(0.5, 0.5, 0.5, -0.5, 0.5, 0.5, -0.5, -0.5, 0.5)),
        _ => validation_bail!("Bravais lattice index ibrav = {ibrav} is not supported."),
    }
}

/// A cursor over the lines of a file that skips blank lines.
struct Lines<'a> {
    lines: std::str::Lines<'a>,
    source: &'a str,
}

impl<'a> Lines<'a> {
    fn new(contents: &'a str, source: &'a str) -> Self {
        Self {
            lines: contents.lines(),
            source,
        }
    }

    fn next_line(&mut self) -> Result<&'a str, anyhow::Error> {
        self.lines
            .by_ref()
            .find(|line| !line.trim().is_empty())
            .ok_or_else(|| format_err!("Unexpected end of file `{}`.", self.source))
    }
}

/// The contents of one dynamical-matrix file.
struct QeDynFile {
    structure: Structure,
    blocks: Vec<(Vector3<f64>, Array2<Complex<f64>>)>,
}

/// Parses the contents of one dynamical-matrix file.
fn parse_qe_dyn(contents: &str, source: &str) -> Result<QeDynFile, anyhow::Error> {
    let mut lines = Lines::new(contents, source);

    // Two title lines.
    lines.next_line()?;
    lines.next_line()?;

    let header = lines.next_line()?.split_whitespace().collect_vec();
    if header.len() < 4 {
        validation_bail!("Malformed header `{}` in `{source}`.", header.join(" "));
    }
    let ntyp = parse_index(header[0])?;
    let nat = parse_index(header[1])?;
    let ibrav = header[2]
        .parse::<i32>()
        .map_err(|err| format_err!("Unable to parse ibrav `{}`: {err}.", header[2]))?;
    let alat = parse_real(header[3])? * BOHR_TO_ANGSTROM;
    if nat == 0 || alat <= 0.0 {
        validation_bail!("Invalid header in `{source}`: nat = {nat}, alat = {alat} Å.");
    }

    let vectors = if ibrav == 0 {
        let line = lines.next_line()?;
        if !line.trim().starts_with("Basis vectors") {
            validation_bail!("Expected `Basis vectors` in `{source}`, found `{line}`.");
        }
        let rows = (0..3)
            .map(|_| {
                let row = parse_reals(lines.next_line()?)?;
                if row.len() != 3 {
                    validation_bail!("Malformed lattice vector in `{source}`.");
                }
                Ok(Vector3::new(row[0], row[1], row[2]).transpose())
            })
            .collect::<Result<Vec<_>, anyhow::Error>>()?;
        Matrix3::from_rows(&rows)
    } else {
        bravais_vectors(ibrav)?
    };
    let lattice = vectors * alat;

    let mut type_labels = Vec::with_capacity(ntyp);
    let mut masses = IndexMap::new();
    for _ in 0..ntyp {
        let line = lines.next_line()?;
        let caps = SPECIES_RE
            .captures(line)
            .ok_or_else(|| format_err!("Malformed species line `{line}` in `{source}`."))?;
        let label = caps[2].to_string();
        masses.insert(label.clone(), parse_real(&caps[3])?);
        type_labels.push(label);
    }

    let mut species = Vec::with_capacity(nat);
    let mut positions = Vec::with_capacity(nat);
    for _ in 0..nat {
        let line = lines.next_line()?;
        let tokens = line.split_whitespace().collect_vec();
        if tokens.len() < 5 {
            validation_bail!("Malformed atom line `{line}` in `{source}`.");
        }
        let ityp = parse_index(tokens[1])?;
        let label = type_labels
            .get(ityp.wrapping_sub(1))
            .ok_or_else(|| format_err!("Atom line `{line}` refers to an unknown species."))?;
        species.push(label.clone());
        positions.push(Point3::new(
            parse_real(tokens[2])? * alat,
            parse_real(tokens[3])? * alat,
            parse_real(tokens[4])? * alat,
        ));
    }
    let structure = Structure::new(&species, positions, Some(lattice))?.with_masses(&masses)?;

    let mut blocks = vec![];
    while let Ok(line) = lines.next_line() {
        if line.contains(DIAGONALISATION_HEADER) {
            break;
        }
        if !line.contains(DYNAMICAL_MATRIX_HEADER) {
            continue;
        }
        let q_line = lines.next_line()?;
        let caps = Q_RE
            .captures(q_line)
            .ok_or_else(|| format_err!("Expected a wavevector in `{source}`, found `{q_line}`."))?;
        let q = Vector3::new(
            parse_real(&caps[1])?,
            parse_real(&caps[2])?,
            parse_real(&caps[3])?,
        ) / alat;

        let mut dynmat = Array2::<Complex<f64>>::zeros((3 * nat, 3 * nat));
        for _ in 0..nat * nat {
            let pair = lines.next_line()?;
            let indices = pair
                .split_whitespace()
                .map(parse_index)
                .collect::<Result<Vec<_>, _>>()?;
            let (a, b) = match indices.as_slice() {
                [a, b] if (1..=nat).contains(a) && (1..=nat).contains(b) => (a - 1, b - 1),
                _ => validation_bail!("Malformed atom pair `{pair}` in `{source}`."),
            };
            for i in 0..3 {
                let row = parse_reals(lines.next_line()?)?;
                if row.len() != 6 {
                    validation_bail!("Malformed matrix row for atoms {a}, {b} in `{source}`.");
                }
                for j in 0..3 {
                    dynmat[(3 * a + i, 3 * b + j)] = Complex::new(row[2 * j], row[2 * j + 1]);
                }
            }
        }
        blocks.push((q, dynmat));
    }
    if blocks.is_empty() {
        validation_bail!("No dynamical matrix found in `{source}`.");
    }
    Ok(QeDynFile { structure, blocks })
}

/// The name of the `i`-th file (one-based) of a set.
fn star_file_name(prefix: &Path, i: usize) -> PathBuf {
    let mut name = OsString::from(prefix.as_os_str());
    name.push(i.to_string());
    PathBuf::from(name)
}

/// Reads a set of dynamical matrices from the files `{prefix}1` to `{prefix}{nqirr}`, one per
/// star of wavevectors.
///
/// The structure is taken from the first file. Each file becomes one star whose representative
/// is its first wavevector; the operations relating the members are not known until
/// [`DynamicalMatrixSet::adjust_q_star`] is called.
///
/// # Arguments
///
/// * `prefix` - The common prefix of the file names.
/// * `nqirr` - The number of files, one per irreducible wavevector.
///
/// # Errors
///
/// Errors if a file cannot be read or is malformed, or if the files describe different
/// numbers of atoms.
pub fn load_qe<P: AsRef<Path>>(prefix: P, nqirr: usize) -> Result<DynamicalMatrixSet, anyhow::Error> {
    if nqirr == 0 {
        validation_bail!("At least one dynamical-matrix file must be read.");
    }
    let mut structure: Option<Structure> = None;
    let mut q_tot = vec![];
    let mut dynmats = vec![];
    let mut q_stars = vec![];
    for i in 1..=nqirr {
        let path = star_file_name(prefix.as_ref(), i);
        let source = path.display().to_string();
        let contents =
            fs::read_to_string(&path).with_context(|| format!("Unable to read `{source}`."))?;
        let file = parse_qe_dyn(&contents, &source)?;
        match structure {
            None => structure = Some(file.structure),
            Some(ref first) if first.n_atoms() != file.structure.n_atoms() => {
                validation_bail!(
                    "`{source}` has {} atoms but the first file has {}.",
                    file.structure.n_atoms(),
                    first.n_atoms()
                );
            }
            Some(_) => {}
        }
        let start = q_tot.len();
        let members = (start..start + file.blocks.len())
            .map(|q_index| StarMember {
                q_index,
                operation: None,
                time_reversed: false,
            })
            .collect_vec();
        q_stars.push(QStar {
            representative: start,
            members,
        });
        for (q, dynmat) in file.blocks {
            q_tot.push(q);
            dynmats.push(dynmat);
        }
        log::debug!("Read {} wavevector(s) from `{source}`.", q_tot.len() - start);
    }
    let structure = structure.ok_or_else(|| format_err!("No structure read."))?;
    DynamicalMatrixSet::new(Arc::new(structure), q_tot, dynmats)?.with_stars(q_stars)
}

// =======
// Writing
// =======

fn write_header(out: &mut String, structure: &Structure) -> Result<(), anyhow::Error> {
    let lattice = structure.cell()?;
    let alat = lattice.row(0).norm();
    let types = structure.species_types();
    writeln!(out, "Dynamical matrix file")?;
    writeln!(out, "File generated with PhonSym")?;
    let celldm = [alat / BOHR_TO_ANGSTROM, 0.0, 0.0, 0.0, 0.0, 0.0];
    writeln!(
        out,
        "{:>3} {:>4} {:>3}{}",
        types.len(),
        structure.n_atoms(),
        0,
        celldm.iter().map(|x| format!(" {x:>15.10}")).join("")
    )?;
    writeln!(out, "Basis vectors")?;
    for row in lattice.row_iter() {
        writeln!(
            out,
            "{}",
            row.iter().map(|x| format!(" {:>15.10}", x / alat)).join("")
        )?;
    }
    for (i, label) in types.iter().enumerate() {
        let mass = structure
            .masses()
            .get(label)
            .ok_or_else(|| format_err!("Species `{label}` has no mass."))?;
        writeln!(out, "{:>12}  '{label:<3}'  {mass:>20.10}", i + 1)?;
    }
    for (i, (label, position)) in structure
        .species()
        .iter()
        .zip(structure.positions().iter())
        .enumerate()
    {
        let ityp = types
            .iter()
            .position(|t| t == label)
            .ok_or_else(|| format_err!("Species `{label}` not found."))?;
        writeln!(
            out,
            "{:>5}{:>5}{}",
            i + 1,
            ityp + 1,
            position
                .iter()
                .map(|x| format!(" {:>17.10}", x / alat))
                .join("")
        )?;
    }
    Ok(())
}

fn write_q_line(out: &mut String, q: &Vector3<f64>, alat: f64) -> Result<(), anyhow::Error> {
    writeln!(
        out,
        "     q = ( {} ) ",
        q.iter().map(|x| format!("{:>14.9}", x * alat)).join(" ")
    )?;
    Ok(())
}

fn write_dynamical_matrix(
    out: &mut String,
    q: &Vector3<f64>,
    dynmat: &Array2<Complex<f64>>,
    nat: usize,
    alat: f64,
) -> Result<(), anyhow::Error> {
    writeln!(out)?;
    writeln!(out, "     {DYNAMICAL_MATRIX_HEADER}")?;
    writeln!(out)?;
    write_q_line(out, q, alat)?;
    writeln!(out)?;
    for (a, b) in itertools::iproduct!(0..nat, 0..nat) {
        writeln!(out, "{:>5}{:>5}", a + 1, b + 1)?;
        for i in 0..3 {
            writeln!(
                out,
                "{}",
                (0..3)
                    .map(|j| {
                        let x = dynmat[(3 * a + i, 3 * b + j)];
                        format!(" {:>19.12} {:>19.12}", x.re, x.im)
                    })
                    .join("  ")
            )?;
        }
    }
    Ok(())
}

fn write_modes(
    out: &mut String,
    set: &DynamicalMatrixSet,
    iq: usize,
    alat: f64,
) -> Result<(), anyhow::Error> {
    let modes = set.diagonalise(iq)?;
    let nat = set.n_atoms();
    writeln!(out)?;
    writeln!(out, "     {DIAGONALISATION_HEADER}")?;
    writeln!(out)?;
    write_q_line(out, &set.q_tot()[iq], alat)?;
    writeln!(out)?;
    writeln!(out, " {}", "*".repeat(74))?;
    for (nu, omega) in modes.frequencies.iter().enumerate() {
        writeln!(
            out,
            "     freq ({:>5}) = {:>15.6} [THz] = {:>15.6} [cm-1]",
            nu + 1,
            omega * RY_TO_THZ,
            omega * RY_TO_CM
        )?;
        for a in 0..nat {
            writeln!(
                out,
                " ( {} ) ",
                (0..3)
                    .map(|i| {
                        let x = modes.polarisations[(3 * a + i, nu)];
                        format!(" {:>10.6} {:>10.6}", x.re, x.im)
                    })
                    .join(" ")
            )?;
        }
    }
    writeln!(out, " {}", "*".repeat(74))?;
    Ok(())
}

/// Writes a set of dynamical matrices as the files `{prefix}1` to `{prefix}N`, one per star.
///
/// # Arguments
///
/// * `set` - The set to be written.
/// * `prefix` - The common prefix of the file names.
///
/// # Returns
///
/// The paths of the files written.
pub fn save_qe<P: AsRef<Path>>(
    set: &DynamicalMatrixSet,
    prefix: P,
) -> Result<Vec<PathBuf>, anyhow::Error> {
    let structure = set.structure();
    let alat = structure.cell()?.row(0).norm();
    let nat = set.n_atoms();
    set.q_stars()
        .iter()
        .enumerate()
        .map(|(istar, star)| {
            let mut out = String::new();
            write_header(&mut out, structure)?;
            for iq in star.indices() {
                write_dynamical_matrix(&mut out, &set.q_tot()[iq], &set.dynmats()[iq], nat, alat)?;
            }
            write_modes(&mut out, set, star.representative, alat)?;
            let path = star_file_name(prefix.as_ref(), istar + 1);
            fs::write(&path, out)
                .with_context(|| format!("Unable to write `{}`.", path.display()))?;
            Ok(path)
        })
        .collect()
}
