//! Propensity structure functions.
//!
//! A propensity here is only the state-dependent half of a reaction rate:
//! the [`Reaction`](crate::Reaction) multiplies the evaluated value by its
//! rate constant. Keeping the two apart lets growing voxels rescale diffusion
//! rates without touching the structure function.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use meval::{Context, ContextProvider, Expr};

use crate::error::SimError;

/// A species consumed by a mass-action channel, with its molecularity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reactant {
    pub species: usize,
    pub count: u64,
}

/// Signature of a caller-supplied structure function: molecule counts and the
/// current voxel size in, a non-negative value out.
pub type PropensityFn = Arc<dyn Fn(&[u64], f64) -> f64 + Send + Sync>;

/// Structure function of a reaction channel.
#[derive(Clone)]
pub enum Propensity {
    /// Identically 1. Zeroth-order kinetics and the extrande pseudo-reaction.
    Constant,
    /// `molecules[species]`. First-order decay and diffusion jumps.
    Linear { species: usize },
    /// The voxel size itself. Production proportional to geometry.
    PerSize,
    /// Product of falling factorials over the reactant counts, divided by
    /// `size^(order - 1)`. Collisions of two or more molecules become rarer
    /// as the voxel grows.
    MassAction { reactants: Vec<Reactant> },
    /// A `meval` expression over the variables `s0`..`sN` (molecule counts)
    /// and `size` (the voxel size).
    Expression(ExpressionPropensity),
    /// Arbitrary caller-supplied function. Must be pure and deterministic.
    Custom(PropensityFn),
}

impl Propensity {
    /// Builds an expression propensity from its textual form.
    ///
    /// Species are referenced as `s0`, `s1`, ... and the voxel size as
    /// `size`. Referenced species indices are recorded so that
    /// [`Voxel::add_reaction`](crate::Voxel::add_reaction) can bounds-check
    /// them against the voxel's species count.
    pub fn expression(text: &str) -> Result<Self, SimError> {
        let expr = Expr::from_str(text).map_err(|err| {
            SimError::InvalidArgument(format!("propensity expression parse error: {err}"))
        })?;
        let species_refs = collect_species_refs(text);
        Ok(Self::Expression(ExpressionPropensity { expr, species_refs }))
    }

    /// Wraps a caller-supplied closure.
    pub fn custom(f: impl Fn(&[u64], f64) -> f64 + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(f))
    }

    /// Evaluates the structure function. The reaction rate is never applied
    /// here.
    pub fn evaluate(&self, molecules: &[u64], voxel_size: f64) -> f64 {
        match self {
            Self::Constant => 1.0,
            Self::Linear { species } => molecules[*species] as f64,
            Self::PerSize => voxel_size,
            Self::MassAction { reactants } => {
                let mut value = 1.0;
                let mut order = 0u64;
                for reactant in reactants {
                    let available = molecules[reactant.species];
                    if available < reactant.count {
                        return 0.0;
                    }
                    value *= falling_factorial(available, reactant.count);
                    order += reactant.count;
                }
                if order > 1 {
                    value /= voxel_size.powi(order as i32 - 1);
                }
                value
            }
            Self::Expression(expression) => expression.evaluate(molecules, voxel_size),
            Self::Custom(f) => f(molecules, voxel_size),
        }
    }

    /// Largest species index this propensity reads, when statically known.
    /// `Custom` closures are opaque and return `None`.
    pub(crate) fn max_species_ref(&self) -> Option<usize> {
        match self {
            Self::Constant | Self::PerSize | Self::Custom(_) => None,
            Self::Linear { species } => Some(*species),
            Self::MassAction { reactants } => reactants.iter().map(|r| r.species).max(),
            Self::Expression(expression) => expression.species_refs.iter().copied().max(),
        }
    }
}

impl fmt::Debug for Propensity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant => f.write_str("Constant"),
            Self::Linear { species } => f.debug_struct("Linear").field("species", species).finish(),
            Self::PerSize => f.write_str("PerSize"),
            Self::MassAction { reactants } => f
                .debug_struct("MassAction")
                .field("reactants", reactants)
                .finish(),
            Self::Expression(expression) => {
                f.debug_tuple("Expression").field(expression).finish()
            }
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Compiled expression propensity together with the species it references.
#[derive(Clone, Debug)]
pub struct ExpressionPropensity {
    expr: Expr,
    species_refs: Vec<usize>,
}

impl ExpressionPropensity {
    fn evaluate(&self, molecules: &[u64], voxel_size: f64) -> f64 {
        let ctx = (
            VoxelContext {
                molecules,
                voxel_size,
            },
            Context::new(),
        );
        self.expr.eval_with_context(ctx).unwrap_or(0.0)
    }
}

struct VoxelContext<'a> {
    molecules: &'a [u64],
    voxel_size: f64,
}

impl ContextProvider for VoxelContext<'_> {
    fn get_var(&self, name: &str) -> Option<f64> {
        if name == "size" {
            return Some(self.voxel_size);
        }
        parse_species_variable(name).and_then(|idx| self.molecules.get(idx).map(|&m| m as f64))
    }
}

fn parse_species_variable(name: &str) -> Option<usize> {
    let digits = name.strip_prefix('s').or_else(|| name.strip_prefix('S'))?;
    if digits.is_empty() {
        return None;
    }
    digits.parse::<usize>().ok()
}

/// Scans an expression for `s<digits>` tokens and returns the distinct
/// species indices it references.
fn collect_species_refs(text: &str) -> Vec<usize> {
    let mut refs = Vec::new();
    let bytes = text.as_bytes();
    let mut idx = 0;
    while idx < bytes.len() {
        let ch = bytes[idx];
        if ch == b's' || ch == b'S' {
            let mut end = idx + 1;
            while end < bytes.len() && bytes[end].is_ascii_digit() {
                end += 1;
            }
            if end > idx + 1 {
                if let Ok(species) = text[idx + 1..end].parse::<usize>() {
                    if !refs.contains(&species) {
                        refs.push(species);
                    }
                }
                idx = end;
                continue;
            }
        }
        idx += 1;
    }
    refs
}

#[inline]
pub(crate) fn falling_factorial(value: u64, count: u64) -> f64 {
    match count {
        0 => 1.0,
        1 => value as f64,
        2 if value >= 2 => (value * (value - 1)) as f64,
        _ if value < count => 0.0,
        _ => {
            let mut acc = 1.0;
            for i in 0..count {
                acc *= (value - i) as f64;
            }
            acc
        }
    }
}
