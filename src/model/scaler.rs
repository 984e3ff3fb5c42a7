// 📏 Standard Scaler - per-column standardization

use serde::{Deserialize, Serialize};

/// Per-column standardization (zero mean, unit population variance)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl StandardScaler {
    pub fn fit(rows: &[Vec<f64>], width: usize) -> Self {
        let n = rows.len().max(1) as f64;
        let mut mean = vec![0.0; width];
        for row in rows {
            for (m, v) in mean.iter_mut().zip(row) {
                *m += v;
            }
        }
        mean.iter_mut().for_each(|m| *m /= n);

        let mut var = vec![0.0; width];
        for row in rows {
            for ((acc, v), m) in var.iter_mut().zip(row).zip(&mean) {
                *acc += (v - m).powi(2);
            }
        }

        // Constant columns are left unscaled
        let scale = var
            .into_iter()
            .map(|v| {
                let sd = (v / n).sqrt();
                if sd > f64::EPSILON { sd } else { 1.0 }
            })
            .collect();

        Self { mean, scale }
    }

    pub fn transform_row(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(v, (m, s))| (v - m) / s)
            .collect()
    }

    pub fn transform(&self, rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
        rows.iter().map(|row| self.transform_row(row)).collect()
    }
}
