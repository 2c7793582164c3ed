//! Vector expressions built from convolutions.
//!
//! An [`Expr`] is a small tree of vector leaves, convolution terms and
//! `+`/`-` nodes. [`DeviceVector::assign`] flattens it into signed terms and
//! evaluates it with the blend parameters of the convolution kernels:
//!
//! | Expression | Evaluation |
//! |------------|------------|
//! | `S * x` | `convolve(x, y, 0, 1)` |
//! | `-(S * x)` term first | `convolve(x, y, 0, -1)` |
//! | `z + S * x` | copy `z` into `y`, then `convolve(x, y, 1, 1)` |
//! | `z - S * x` | copy `z` into `y`, then `convolve(x, y, 1, -1)` |
//!
//! At most one plain vector term is supported, and it must not be negated.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use haloconv::config::PlatformOptions;
//! use haloconv::device::Platform;
//! use haloconv::{CompilationService, DeviceVector, Stencil};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let platform = Platform::init(PlatformOptions::uniform(1))?;
//! let service = Arc::new(CompilationService::new());
//! let diff = Stencil::from_weights(service, platform.queues(), &[-1.0f32, 1.0], 0)?;
//!
//! let x = DeviceVector::from_slice(platform.queues(), &[1.0, 2.0, 4.0])?;
//! let z = DeviceVector::from_slice(platform.queues(), &[10.0, 10.0, 10.0])?;
//! let y = x.like()?;
//!
//! y.assign(&z - &diff * &x)?;
//! assert_eq!(y.to_vec()?, vec![9.0, 8.0, 10.0]);
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::ops::{Add, Mul, Sub};

use crate::error::{StencilError, StencilResult};
use crate::gstencil::GeneralizedStencil;
use crate::scalar::{Real, Scalar};
use crate::stencil::{Convolve, Stencil};
use crate::transform::Transform;
use crate::vector::DeviceVector;

/// Binary expression operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `lhs + rhs`
    Add,
    /// `lhs - rhs`
    Sub,
}

/// Expression tree over distributed vectors.
pub enum Expr<'a, T: Scalar> {
    /// A vector.
    Leaf(&'a DeviceVector<T>),
    /// A filter applied to a vector.
    Convolution {
        /// The filter.
        filter: Box<dyn Convolve<T> + 'a>,
        /// The filter input.
        input: &'a DeviceVector<T>,
    },
    /// Sum or difference of two expressions.
    Binary {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        lhs: Box<Expr<'a, T>>,
        /// Right operand.
        rhs: Box<Expr<'a, T>>,
    },
}

impl<'a, T: Scalar> Expr<'a, T> {
    /// Convolution term `filter * input`.
    pub fn convolution<C: Convolve<T> + 'a>(filter: C, input: &'a DeviceVector<T>) -> Self {
        Expr::Convolution {
            filter: Box::new(filter),
            input,
        }
    }

    fn binary(op: BinaryOp, lhs: Self, rhs: Self) -> Self {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// Flattens the tree into `(positive, term)` pairs in evaluation order.
    fn flatten(self, positive: bool, out: &mut Vec<(bool, Term<'a, T>)>) {
        match self {
            Expr::Leaf(v) => out.push((positive, Term::Vector(v))),
            Expr::Convolution { filter, input } => out.push((positive, Term::Convolution(filter, input))),
            Expr::Binary { op, lhs, rhs } => {
                lhs.flatten(positive, out);
                rhs.flatten(positive == (op == BinaryOp::Add), out);
            }
        }
    }
}

enum Term<'a, T: Scalar> {
    Vector(&'a DeviceVector<T>),
    Convolution(Box<dyn Convolve<T> + 'a>, &'a DeviceVector<T>),
}

impl<T: Scalar> fmt::Debug for Expr<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Leaf(v) => write!(f, "{:?}", v),
            Expr::Convolution { input, .. } => write!(f, "Convolution({:?})", input),
            Expr::Binary { op, lhs, rhs } => f
                .debug_struct("Binary")
                .field("op", op)
                .field("lhs", lhs)
                .field("rhs", rhs)
                .finish(),
        }
    }
}

impl<'a, T: Scalar> From<&'a DeviceVector<T>> for Expr<'a, T> {
    fn from(v: &'a DeviceVector<T>) -> Self {
        Expr::Leaf(v)
    }
}

impl<'a, T: Scalar> Mul<&'a DeviceVector<T>> for &'a Stencil<T> {
    type Output = Expr<'a, T>;

    fn mul(self, x: &'a DeviceVector<T>) -> Expr<'a, T> {
        Expr::convolution(self, x)
    }
}

impl<T: Real> GeneralizedStencil<T> {
    /// Term applying the filter with `transform` to `x`.
    pub fn apply<'a>(&'a self, transform: Transform, x: &'a DeviceVector<T>) -> Expr<'a, T> {
        Expr::convolution(self.with_transform(transform), x)
    }
}

macro_rules! impl_binary_ops {
    ($trait:ident, $method:ident, $op:expr) => {
        impl<'a, T: Scalar> $trait for Expr<'a, T> {
            type Output = Expr<'a, T>;

            fn $method(self, rhs: Self) -> Expr<'a, T> {
                Expr::binary($op, self, rhs)
            }
        }

        impl<'a, T: Scalar> $trait<&'a DeviceVector<T>> for Expr<'a, T> {
            type Output = Expr<'a, T>;

            fn $method(self, rhs: &'a DeviceVector<T>) -> Expr<'a, T> {
                Expr::binary($op, self, Expr::Leaf(rhs))
            }
        }

        impl<'a, T: Scalar> $trait<Expr<'a, T>> for &'a DeviceVector<T> {
            type Output = Expr<'a, T>;

            fn $method(self, rhs: Expr<'a, T>) -> Expr<'a, T> {
                Expr::binary($op, Expr::Leaf(self), rhs)
            }
        }
    };
}

impl_binary_ops!(Add, add, BinaryOp::Add);
impl_binary_ops!(Sub, sub, BinaryOp::Sub);

impl<T: Scalar> DeviceVector<T> {
    /// Evaluates `expr` into `self`.
    ///
    /// # Errors
    ///
    /// - [`StencilError::UnsupportedExpression`] for more than one vector
    ///   term or a negated vector term.
    /// - Any error of the convolutions involved.
    pub fn assign<'a>(&self, expr: Expr<'a, T>) -> StencilResult<()> {
        let mut terms = Vec::new();
        expr.flatten(true, &mut terms);

        let mut vectors = terms.iter().filter(|(_, t)| matches!(t, Term::Vector(_)));
        let base = vectors.next();
        if vectors.next().is_some() {
            return Err(StencilError::unsupported(
                "at most one vector term can be combined with convolutions",
            ));
        }

        if let Some((false, Term::Vector(_))) = base {
            return Err(StencilError::unsupported("negated vector term"));
        }

        // Nothing may be written into `self` before every input is known to fit.
        for (_, term) in &terms {
            match term {
                Term::Vector(v) => self.check_layout(*v)?,
                Term::Convolution(_, input) => {
                    self.check_layout(*input)?;
                    if self.shares_buffers(*input) {
                        return Err(StencilError::device(
                            "Mem copy overlap: input and output vectors share memory",
                        ));
                    }
                }
            }
        }

        let mut accumulate = false;
        if let Some((_, Term::Vector(v))) = base {
            if !self.shares_buffers(*v) {
                self.copy_from(*v)?;
            }
            accumulate = true;
        }

        for (positive, term) in &terms {
            if let Term::Convolution(filter, input) = term {
                let alpha = if accumulate { T::one() } else { T::zero() };
                let beta = if *positive { T::one() } else { -T::one() };
                filter.convolve(*input, self, alpha, beta)?;
                accumulate = true;
            }
        }
        Ok(())
    }
}
