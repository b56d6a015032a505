//! A single reaction channel.

use crate::propensity::Propensity;

/// One reaction channel: a rate constant, a structure function and a
/// stoichiometry vector, optionally tagged with a diffusion target.
///
/// A diffusion channel applies its stoichiometry to the voxel it fires in
/// and the negated stoichiometry to the target voxel, so a molecule hop is
/// written as stoichiometry `[-1]` with the neighbour's index as target.
#[derive(Clone, Debug)]
pub struct Reaction {
    /// Rate set at construction; the reference point for growth rescaling.
    base_rate: f64,
    /// Rate in effect right now. Differs from `base_rate` only after a
    /// growth factor has rescaled a diffusion channel.
    current_rate: f64,
    kind: Propensity,
    stoichiometry: Vec<i64>,
    diffusion_target: Option<usize>,
}

impl Reaction {
    /// A purely local channel.
    pub fn new(rate: f64, kind: Propensity, stoichiometry: Vec<i64>) -> Self {
        Self {
            base_rate: rate,
            current_rate: rate,
            kind,
            stoichiometry,
            diffusion_target: None,
        }
    }

    /// A diffusion jump into the voxel at `target`.
    pub fn diffusion(rate: f64, kind: Propensity, stoichiometry: Vec<i64>, target: usize) -> Self {
        Self {
            base_rate: rate,
            current_rate: rate,
            kind,
            stoichiometry,
            diffusion_target: Some(target),
        }
    }

    pub fn rate(&self) -> f64 {
        self.current_rate
    }

    pub fn set_rate(&mut self, rate: f64) {
        self.current_rate = rate;
    }

    pub fn base_rate(&self) -> f64 {
        self.base_rate
    }

    pub fn stoichiometry(&self) -> &[i64] {
        &self.stoichiometry
    }

    pub fn diffusion_target(&self) -> Option<usize> {
        self.diffusion_target
    }

    /// Rate times structure function. The multiplication by the current rate
    /// happens here and nowhere else.
    pub fn propensity(&self, molecules: &[u64], voxel_size: f64) -> f64 {
        self.current_rate * self.kind.evaluate(molecules, voxel_size)
    }

    /// Rescales the channel after a change of voxel geometry. Only diffusion
    /// rates depend on geometry, so local channels ignore the call.
    pub fn update_properties(&mut self, factor: f64) {
        if self.diffusion_target.is_some() {
            self.current_rate = factor * self.base_rate;
        }
    }

    /// Largest species index the channel touches, counting both the
    /// stoichiometry vector and the structure function (where statically
    /// known).
    pub(crate) fn max_species_ref(&self) -> Option<usize> {
        let from_stoichiometry = self.stoichiometry.len().checked_sub(1);
        match (from_stoichiometry, self.kind.max_species_ref()) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }
}

/// Structure functions are never compared; two channels are equal when their
/// rates, diffusion targets and stoichiometries agree.
impl PartialEq for Reaction {
    fn eq(&self, other: &Self) -> bool {
        self.current_rate == other.current_rate
            && self.diffusion_target == other.diffusion_target
            && self.stoichiometry == other.stoichiometry
    }
}
