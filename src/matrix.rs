/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::errors::MatrixError;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::{fs, path::Path};
use tracing::debug;

/// Transfer volumes between shards. `cells[i][j]` is the number of bytes shard `i` sends to
/// shard `j`. Always non-empty with rows of equal length; rows and columns may differ in number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Matrix {
    cells: Vec<Vec<u64>>,
}
impl Matrix {
    pub fn new(cells: Vec<Vec<u64>>) -> Result<Self, MatrixError> {
        let rows = cells.len();
        if rows == 0 {
            return Err(MatrixError::Empty);
        }

        let cols = cells[0].len();
        for (row, cells) in cells.iter().enumerate() {
            if cells.len() != cols {
                return Err(MatrixError::Ragged {
                    row,
                    expected: cols,
                    found: cells.len(),
                });
            }
        }

        if cols == 0 {
            return Err(MatrixError::Empty);
        }

        Ok(Matrix { cells })
    }

    /// `(rows, columns)`
    pub fn shape(&self) -> (usize, usize) {
        (self.cells.len(), self.cells.first().map_or(0, Vec::len))
    }

    /// Number of shards taking part. A rectangular matrix spans as many shards as its longer side.
    pub fn dim(&self) -> usize {
        let (rows, cols) = self.shape();
        rows.max(cols)
    }

    pub fn get(&self, src: usize, dst: usize) -> Option<u64> {
        self.cells.get(src).and_then(|row| row.get(dst)).copied()
    }

    pub fn rows(&self) -> &[Vec<u64>] {
        &self.cells
    }

    /// Every `(src, dst, bytes)` with a non-zero volume, in row-major order.
    pub fn non_zero_cells(&self) -> impl Iterator<Item = (usize, usize, u64)> + '_ {
        self.cells.iter().enumerate().flat_map(|(src, row)| {
            row.iter()
                .enumerate()
                .filter(|(_, bytes)| **bytes > 0)
                .map(move |(dst, bytes)| (src, dst, *bytes))
        })
    }

    pub fn total_bytes(&self) -> u64 {
        self.cells.iter().flatten().sum()
    }
}

/// Source of transfer matrices. The pattern builder calls `load` once per traffic pattern record.
pub trait MatrixLoader {
    fn load(&self, path: &Path) -> Result<Matrix, MatrixError>;
}

/// Loads matrices from the filesystem using [`load_matrix`].
#[derive(Debug, Default, Clone, Copy)]
pub struct FileMatrixLoader;
impl MatrixLoader for FileMatrixLoader {
    fn load(&self, path: &Path) -> Result<Matrix, MatrixError> {
        load_matrix(path)
    }
}

/// Reads a transfer matrix from disk.
///
/// Files ending in `.yaml` or `.yml` hold a list of rows. Anything else is read as plain text with
/// one row per line and whitespace separated cells; blank lines and `#` comments are skipped.
/// Cells are byte counts and may carry a binary size suffix (`K`, `M`, `G`).
///
/// # Arguments
/// * path - location of the matrix file
///
/// # Returns
/// The validated matrix or the first problem found in the file.
pub fn load_matrix(path: &Path) -> Result<Matrix, MatrixError> {
    let contents = fs::read_to_string(path)?;
    let is_yaml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"));

    let matrix = if is_yaml {
        parse_yaml_matrix(&contents)?
    } else {
        parse_text_matrix(&contents)?
    };
    let (rows, cols) = matrix.shape();
    debug!("Loaded {}x{} matrix from {}", rows, cols, path.display());

    Ok(matrix)
}

pub fn parse_text_matrix(contents: &str) -> Result<Matrix, MatrixError> {
    let mut cells = vec![];
    for (idx, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let row = line
            .split_whitespace()
            .map(|token| parse_size(token).ok_or_else(|| invalid_cell(idx + 1, token)))
            .collect::<Result<Vec<_>, _>>()?;
        cells.push(row);
    }

    Matrix::new(cells)
}

pub fn parse_yaml_matrix(contents: &str) -> Result<Matrix, MatrixError> {
    let rows: Vec<Vec<Value>> = serde_yaml::from_str(contents)?;

    let mut cells = vec![];
    for (idx, row) in rows.iter().enumerate() {
        let row = row
            .iter()
            .map(|value| match value {
                Value::Number(num) => num
                    .as_u64()
                    .ok_or_else(|| invalid_cell(idx + 1, &num.to_string())),
                Value::String(token) => {
                    parse_size(token).ok_or_else(|| invalid_cell(idx + 1, token))
                }
                other => Err(invalid_cell(idx + 1, &format!("{:?}", other))),
            })
            .collect::<Result<Vec<_>, _>>()?;
        cells.push(row);
    }

    Matrix::new(cells)
}

fn invalid_cell(line: usize, token: &str) -> MatrixError {
    MatrixError::InvalidCell {
        line,
        token: token.to_string(),
    }
}

/// Parses a byte count such as `4096`, `64K`, `1MiB` or `2g`.
pub fn parse_size(token: &str) -> Option<u64> {
    let token = token.trim();
    let upper = token.to_ascii_uppercase();
    let without_unit = upper
        .strip_suffix("IB")
        .or_else(|| upper.strip_suffix('B'))
        .unwrap_or(&upper);

    let (digits, multiplier) = match without_unit.chars().last()? {
        'K' => (&without_unit[..without_unit.len() - 1], 1u64 << 10),
        'M' => (&without_unit[..without_unit.len() - 1], 1u64 << 20),
        'G' => (&without_unit[..without_unit.len() - 1], 1u64 << 30),
        _ => (without_unit, 1),
    };

    // a bare "B" is not a size
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    digits.parse::<u64>().ok()?.checked_mul(multiplier)
}
