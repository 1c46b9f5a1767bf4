use std::sync::Arc;

use emviz_core::types::AggregateKind;
use emviz_store::BlobStore;
use serde::{Deserialize, Serialize};

use crate::aggregate::{load_all, AggregateError, Aggregator};
use crate::catalog::ArtifactSet;
use crate::npy;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Body of `coordinates.json`. `points[i]` belongs to the i-th artifact in
/// catalog order; the front end relies on that correspondence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub points: Vec<Point>,
}

/// Reduces equal-length rows to one 3-D point per row, preserving row order.
///
/// Implementations must be deterministic in their input.
pub trait Projection: Send + Sync + 'static {
    fn project(&self, rows: &[Vec<f64>]) -> Result<Vec<Point>, AggregateError>;
}

/// Principal-component projection onto the top three axes.
///
/// Works on the Gram matrix of the centred rows, so the cost depends on the
/// number of photos rather than the embedding width.
#[derive(Debug, Clone, Copy)]
pub struct PcaProjection {
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for PcaProjection {
    fn default() -> Self {
        Self {
            max_iterations: 500,
            tolerance: 1e-12,
        }
    }
}

const COMPONENTS: usize = 3;

impl PcaProjection {
    fn gram(rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
        let n = rows.len();
        let dim = rows[0].len();
        let mut mean = vec![0.0; dim];
        for row in rows {
            for (m, v) in mean.iter_mut().zip(row) {
                *m += v;
            }
        }
        for m in &mut mean {
            *m /= n as f64;
        }
        let centred: Vec<Vec<f64>> = rows
            .iter()
            .map(|row| row.iter().zip(&mean).map(|(v, m)| v - m).collect())
            .collect();

        let mut g = vec![vec![0.0; n]; n];
        for i in 0..n {
            for j in i..n {
                let d = dot(&centred[i], &centred[j]);
                g[i][j] = d;
                g[j][i] = d;
            }
        }
        g
    }

    // Power iteration, re-orthogonalised against earlier components every step.
    fn top_eigenpairs(&self, g: &[Vec<f64>]) -> Vec<(f64, Vec<f64>)> {
        let n = g.len();
        let trace: f64 = (0..n).map(|i| g[i][i]).sum();
        let floor = trace.abs() * 1e-12;
        let mut found: Vec<(f64, Vec<f64>)> = Vec::new();

        for k in 0..COMPONENTS.min(n) {
            let mut v: Vec<f64> = (0..n)
                .map(|i| 1.0 / (1.0 + ((i * 7 + k * 3) % 11) as f64))
                .collect();
            if !orthonormalise(&mut v, &found, 1e-12) {
                break;
            }
            for _ in 0..self.max_iterations {
                let mut w = mat_vec(g, &v);
                // |Gv| approximates the eigenvalue; below the floor nothing is left.
                if !orthonormalise(&mut w, &found, floor) {
                    return found;
                }
                let delta: f64 = w.iter().zip(&v).map(|(a, b)| (a - b).abs()).sum();
                v = w;
                if delta < self.tolerance {
                    break;
                }
            }
            let lambda = dot(&v, &mat_vec(g, &v));
            if lambda <= floor {
                break;
            }
            fix_sign(&mut v);
            found.push((lambda, v));
        }
        found
    }
}

impl Projection for PcaProjection {
    fn project(&self, rows: &[Vec<f64>]) -> Result<Vec<Point>, AggregateError> {
        let n = rows.len();
        if n == 0 {
            return Err(AggregateError::EmptyInput);
        }
        let mut coords = vec![[0.0f64; COMPONENTS]; n];
        if n > 1 {
            let g = Self::gram(rows);
            for (k, (lambda, v)) in self.top_eigenpairs(&g).into_iter().enumerate() {
                let scale = lambda.sqrt();
                for (c, vi) in coords.iter_mut().zip(&v) {
                    c[k] = vi * scale;
                }
            }
        }
        Ok(coords
            .into_iter()
            .map(|[x, y, z]| Point { x, y, z })
            .collect())
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn mat_vec(m: &[Vec<f64>], v: &[f64]) -> Vec<f64> {
    m.iter().map(|row| dot(row, v)).collect()
}

// Gram-Schmidt against `basis` (two passes), then unit length. False when the
// remainder is no longer than `min_norm`.
fn orthonormalise(v: &mut [f64], basis: &[(f64, Vec<f64>)], min_norm: f64) -> bool {
    for _ in 0..2 {
        for (_, b) in basis {
            let p = dot(v, b);
            for (x, bx) in v.iter_mut().zip(b) {
                *x -= p * bx;
            }
        }
    }
    let norm = dot(v, v).sqrt();
    if norm <= min_norm || norm < f64::MIN_POSITIVE || !norm.is_finite() {
        return false;
    }
    v.iter_mut().for_each(|x| *x /= norm);
    true
}

// Eigenvectors are defined up to sign; pin it so the largest entry is positive.
fn fix_sign(v: &mut [f64]) {
    let mut pivot = 0.0f64;
    for &x in v.iter() {
        if x.abs() > pivot.abs() {
            pivot = x;
        }
    }
    if pivot < 0.0 {
        v.iter_mut().for_each(|x| *x = -*x);
    }
}

/// Stacks every embedding of a dataset and writes their 3-D projection.
#[derive(Clone)]
pub struct EmbeddingProjector {
    projection: Arc<dyn Projection>,
}

impl EmbeddingProjector {
    pub fn new(projection: Arc<dyn Projection>) -> Self {
        Self { projection }
    }

    fn decode(key: &str, bytes: Vec<u8>) -> Result<Vec<f64>, AggregateError> {
        npy::decode_vector(&bytes).map_err(|e| AggregateError::Decode {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }

    pub fn coordinates(
        &self,
        store: &dyn BlobStore,
        set: &ArtifactSet,
    ) -> Result<Coordinates, AggregateError> {
        let rows = load_all(store, set, Self::decode)?;
        let width = rows.first().map(Vec::len).ok_or(AggregateError::EmptyInput)?;
        for (key, row) in set.keys().iter().zip(&rows) {
            if row.len() != width {
                return Err(AggregateError::DimensionMismatch {
                    key: key.clone(),
                    expected: width.to_string(),
                    found: row.len().to_string(),
                });
            }
        }
        if width == 0 {
            return Err(AggregateError::Decode {
                key: set.keys()[0].clone(),
                reason: "empty embedding".to_string(),
            });
        }

        let points = self.projection.project(&rows)?;
        if points.len() != rows.len() {
            return Err(AggregateError::Projection(format!(
                "projection returned {} points for {} rows",
                points.len(),
                rows.len()
            )));
        }
        Ok(Coordinates { points })
    }
}

impl Aggregator for EmbeddingProjector {
    fn kind(&self) -> AggregateKind {
        AggregateKind::Projection
    }

    fn aggregate(
        &self,
        store: &dyn BlobStore,
        set: &ArtifactSet,
    ) -> Result<Vec<u8>, AggregateError> {
        let coords = self.coordinates(store, set)?;
        serde_json::to_vec(&coords).map_err(|e| AggregateError::Encode(e.to_string()))
    }
}
