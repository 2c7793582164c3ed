//! Filter descriptors.
//!
//! A [`FilterDescriptor`] is an ordered weight sequence with a designated
//! center tap. A [`MatrixDescriptor`] is the banded-matrix form used by
//! generalized filters: `rows` weight rows sharing one center column.
//! Both are validated once and immutable afterwards.
//!
//! The halo widths follow from the center:
//!
//! ```text
//! weights:  w[0] .. w[c-1]  w[c]  w[c+1] .. w[L-1]
//!           |-- left_halo --|     |--- right_halo --|
//! left_halo = c, right_halo = L - 1 - c
//! ```

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Weights and center of a plain stencil.
///
/// # Example
///
/// ```rust
/// use haloconv::FilterDescriptor;
///
/// let laplace = FilterDescriptor::new(vec![1.0, -2.0, 1.0], 1).unwrap();
/// assert_eq!(laplace.left_halo(), 1);
/// assert_eq!(laplace.right_halo(), 1);
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FilterDescriptor<T> {
    weights: Vec<T>,
    center: usize,
}

impl<T> FilterDescriptor<T> {
    /// Validates and creates a descriptor.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::EmptyWeights`] if `weights` is empty.
    /// - [`ConfigError::CenterOutOfRange`] if `center >= weights.len()`.
    pub fn new(weights: Vec<T>, center: usize) -> Result<Self, ConfigError> {
        if weights.is_empty() {
            return Err(ConfigError::EmptyWeights);
        }
        if center >= weights.len() {
            return Err(ConfigError::CenterOutOfRange {
                center,
                width: weights.len(),
            });
        }
        Ok(Self { weights, center })
    }

    /// Creates a descriptor from any sequence of weights.
    pub fn from_iter<I: IntoIterator<Item = T>>(weights: I, center: usize) -> Result<Self, ConfigError> {
        Self::new(weights.into_iter().collect(), center)
    }

    /// Filter weights in tap order.
    #[inline]
    pub fn weights(&self) -> &[T] {
        &self.weights
    }

    /// Index of the center tap.
    #[inline]
    pub fn center(&self) -> usize {
        self.center
    }

    /// Number of taps.
    #[inline]
    pub fn width(&self) -> usize {
        self.weights.len()
    }

    /// Number of taps left of the center.
    #[inline]
    pub fn left_halo(&self) -> usize {
        self.center
    }

    /// Number of taps right of the center.
    #[inline]
    pub fn right_halo(&self) -> usize {
        self.weights.len() - 1 - self.center
    }

    /// Returns `true` if the filter reads outside the current element.
    #[inline]
    pub fn has_halo(&self) -> bool {
        self.weights.len() > 1
    }
}

/// Row-major weight matrix of a generalized filter.
///
/// Output `i` is `sum_k f(sum_j S[k][j] * x[i + j - center])` for the
/// selected transform `f`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MatrixDescriptor<T> {
    rows: usize,
    cols: usize,
    center: usize,
    data: Vec<T>,
}

impl<T> MatrixDescriptor<T> {
    /// Validates and creates a matrix descriptor.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::EmptyWeights`] if `rows` or `cols` is zero.
    /// - [`ConfigError::MatrixShape`] if `rows * cols != data.len()`.
    /// - [`ConfigError::CenterOutOfRange`] if `center >= cols`.
    pub fn new(rows: usize, cols: usize, center: usize, data: Vec<T>) -> Result<Self, ConfigError> {
        if rows == 0 || cols == 0 {
            return Err(ConfigError::EmptyWeights);
        }
        if rows.checked_mul(cols) != Some(data.len()) {
            return Err(ConfigError::MatrixShape {
                rows,
                cols,
                len: data.len(),
            });
        }
        if center >= cols {
            return Err(ConfigError::CenterOutOfRange { center, width: cols });
        }
        Ok(Self {
            rows,
            cols,
            center,
            data,
        })
    }

    /// Number of rows.
    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns (taps per row).
    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Shared center column.
    #[inline]
    pub fn center(&self) -> usize {
        self.center
    }

    /// Matrix values in row-major order.
    #[inline]
    pub fn data(&self) -> &[T] {
        &self.data
    }

    /// Number of columns left of the center.
    #[inline]
    pub fn left_halo(&self) -> usize {
        self.center
    }

    /// Number of columns right of the center.
    #[inline]
    pub fn right_halo(&self) -> usize {
        self.cols - 1 - self.center
    }
}
