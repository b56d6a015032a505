//! A spatial subdomain holding local molecule counts and its reaction
//! catalog.

use std::fmt;
use std::sync::Arc;

use log::warn;

use crate::error::SimError;
use crate::propensity::Propensity;
use crate::reaction::Reaction;

/// Growth of one spatial dimension as a function of simulation time. The
/// value is a dimensionless factor applied to the initial voxel size.
pub type GrowthFn = Arc<dyn Fn(f64) -> f64 + Send + Sync>;

/// Multiplier applied to the total propensity of a growing voxel to obtain
/// the sampling bound used by the extrande pseudo-reaction.
pub const DEFAULT_EXTRANDE_RATIO: f64 = 2.0;

/// One simulation cell: integer molecule counts, a reaction list and a
/// cached total propensity. Growing voxels additionally carry growth
/// functions and an extrande pseudo-reaction that soaks up the headroom
/// between the true total propensity and its sampling bound.
#[derive(Clone)]
pub struct Voxel {
    molecules: Vec<u64>,
    voxel_size: f64,
    initial_size: f64,
    reactions: Vec<Reaction>,
    /// Cached total propensity, inflated to the extrande bound when the
    /// voxel is growing.
    a_0: f64,
    growth_fns: Vec<GrowthFn>,
    extrande_ratio: f64,
    extrande: Option<Reaction>,
    clamped_updates: u64,
}

impl Voxel {
    /// A static voxel of fixed size.
    pub fn new(molecules: Vec<u64>, voxel_size: f64) -> Self {
        Self {
            molecules,
            voxel_size,
            initial_size: voxel_size,
            reactions: Vec::new(),
            a_0: 0.0,
            growth_fns: Vec::new(),
            extrande_ratio: DEFAULT_EXTRANDE_RATIO,
            extrande: None,
            clamped_updates: 0,
        }
    }

    /// A voxel growing along a single dimension, with the default extrande
    /// ratio.
    pub fn with_growth(
        molecules: Vec<u64>,
        voxel_size: f64,
        growth: impl Fn(f64) -> f64 + Send + Sync + 'static,
    ) -> Self {
        let mut voxel = Self::new(molecules, voxel_size);
        voxel.growth_fns = vec![Arc::new(growth) as GrowthFn];
        voxel.add_extrande();
        voxel
    }

    /// A voxel growing along one or more dimensions. The product of the
    /// growth functions is the factor applied to the initial size.
    pub fn growing(
        molecules: Vec<u64>,
        voxel_size: f64,
        growth_fns: Vec<GrowthFn>,
        extrande_ratio: f64,
    ) -> Result<Self, SimError> {
        if growth_fns.is_empty() {
            return Err(SimError::InvalidArgument(
                "a growing voxel needs at least one growth function".into(),
            ));
        }
        if !(extrande_ratio >= 1.0) {
            return Err(SimError::InvalidExtrandeRatio(extrande_ratio));
        }
        let mut voxel = Self::new(molecules, voxel_size);
        voxel.growth_fns = growth_fns;
        voxel.extrande_ratio = extrande_ratio;
        voxel.add_extrande();
        Ok(voxel)
    }

    pub fn molecules(&self) -> &[u64] {
        &self.molecules
    }

    pub fn voxel_size(&self) -> f64 {
        self.voxel_size
    }

    pub fn is_growing(&self) -> bool {
        !self.growth_fns.is_empty()
    }

    pub fn extrande_ratio(&self) -> f64 {
        self.extrande_ratio
    }

    pub fn reactions(&self) -> &[Reaction] {
        &self.reactions
    }

    /// How often a component update was skipped because it would have driven
    /// a count negative. Stays at zero in a consistent model; a nonzero
    /// value points at a reaction definition that fires from empty voxels.
    pub fn clamped_updates(&self) -> u64 {
        self.clamped_updates
    }

    /// Installs a reaction channel.
    ///
    /// Channels whose stoichiometry length disagrees with the species count,
    /// or whose structure function reads a species this voxel does not have,
    /// are rejected. Channels with a non-positive rate are inert and are
    /// silently dropped to keep them out of the sampling loop.
    pub fn add_reaction(&mut self, reaction: Reaction) -> Result<(), SimError> {
        if reaction.stoichiometry().len() != self.molecules.len() {
            return Err(SimError::ShapeMismatch(format!(
                "stoichiometry length {} does not match species count {}",
                reaction.stoichiometry().len(),
                self.molecules.len()
            )));
        }
        if let Some(species) = reaction.max_species_ref() {
            if species >= self.molecules.len() {
                return Err(SimError::ShapeMismatch(format!(
                    "propensity reads species {species} but the voxel has {} species",
                    self.molecules.len()
                )));
            }
        }
        if reaction.rate() > 0.0 {
            self.reactions.push(reaction);
        }
        Ok(())
    }

    /// Empties the reaction list. The extrande pseudo-reaction is untouched.
    pub fn clear_reactions(&mut self) {
        self.reactions.clear();
    }

    /// Installs the extrande pseudo-reaction if none is present: a zero-rate
    /// channel with unit structure function and all-zero stoichiometry, so a
    /// sampled extrande event only advances time.
    pub fn add_extrande(&mut self) {
        if self.extrande.is_none() {
            self.extrande = Some(Reaction::new(
                0.0,
                Propensity::Constant,
                vec![0; self.molecules.len()],
            ));
        }
    }

    /// The plain sum of per-channel propensities in stored order. Pure
    /// query: no extrande inflation, no cache update.
    pub fn total_propensity(&self) -> f64 {
        self.reactions
            .iter()
            .map(|r| r.propensity(&self.molecules, self.voxel_size))
            .sum()
    }

    /// Recomputes and caches the value used for sampling. For a growing
    /// voxel this is the extrande bound (ratio times the plain sum) and the
    /// pseudo-reaction's rate is retuned to it; otherwise it is the plain
    /// sum itself.
    pub fn update_total_propensity(&mut self) -> f64 {
        let total = self.total_propensity();
        let bound = match &mut self.extrande {
            Some(extrande) => {
                let bound = self.extrande_ratio * total;
                extrande.set_rate(bound);
                bound
            }
            None => total,
        };
        self.a_0 = bound;
        bound
    }

    /// Selects a channel proportionally to its propensity.
    ///
    /// `u` is a uniform draw from [0, 1) and is scaled by the cached total.
    /// In a growing voxel the scan can legitimately fall off the end of the
    /// reaction list; the extrande pseudo-reaction is returned in that case
    /// and the caller sees a null event. Falling off the end without an
    /// extrande channel means the cache and the reaction list disagree.
    pub fn pick_reaction(&self, u: f64) -> Result<&Reaction, SimError> {
        let target = u * self.a_0;

        if self.extrande.is_some() {
            let total = self.total_propensity();
            if self.a_0 - total < 0.0 {
                return Err(SimError::ExtrandeBoundExceeded {
                    bound: self.a_0,
                    total,
                });
            }
        }

        let mut lower = 0.0;
        for reaction in &self.reactions {
            let propensity = reaction.propensity(&self.molecules, self.voxel_size);
            if target > lower && target < lower + propensity {
                return Ok(reaction);
            }
            lower += propensity;
        }

        self.extrande.as_ref().ok_or(SimError::SamplingOverflow)
    }

    /// Applies a stoichiometry vector component-wise.
    pub fn add_vector(&mut self, stoichiometry: &[i64]) {
        self.apply_stoichiometry(stoichiometry, 1);
    }

    /// Applies a negated stoichiometry vector component-wise. Diffusion
    /// hands the firing voxel's stoichiometry here so the molecules lost on
    /// one side appear on the other.
    pub fn subtract_vector(&mut self, stoichiometry: &[i64]) {
        self.apply_stoichiometry(stoichiometry, -1);
    }

    fn apply_stoichiometry(&mut self, stoichiometry: &[i64], sign: i64) {
        for (species, (count, &delta)) in
            self.molecules.iter_mut().zip(stoichiometry).enumerate()
        {
            let updated = *count as i128 + (sign * delta) as i128;
            if updated >= 0 {
                *count = updated as u64;
            } else {
                // A triggered clamp means some channel fires from an empty
                // voxel; keep the count so callers can notice.
                self.clamped_updates += 1;
                warn!(
                    "clamped species {species}: applying {:+} to a count of {} would go negative",
                    sign * delta,
                    *count
                );
            }
        }
    }

    /// Re-evaluates time-dependent geometry. The voxel size becomes the
    /// product of the growth functions times the initial size, and diffusion
    /// rates are rescaled accordingly.
    ///
    /// The rescale exponent is deliberately asymmetric: a single growth
    /// function describes linear extension of an interval, where the jump
    /// rate D/h^2 picks up two powers of the factor, while multi-dimensional
    /// growth already multiplies one factor per dimension and rescales
    /// linearly.
    pub fn update_properties(&mut self, time: f64) {
        if self.growth_fns.is_empty() {
            return;
        }
        let factor: f64 = self.growth_fns.iter().map(|growth| growth(time)).product();
        self.voxel_size = factor * self.initial_size;

        let diff_factor = if self.growth_fns.len() == 1 {
            1.0 / (factor * factor)
        } else {
            1.0 / factor
        };
        for reaction in &mut self.reactions {
            reaction.update_properties(diff_factor);
        }
    }
}

impl fmt::Debug for Voxel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Voxel")
            .field("molecules", &self.molecules)
            .field("voxel_size", &self.voxel_size)
            .field("reactions", &self.reactions.len())
            .field("growing", &self.is_growing())
            .field("a_0", &self.a_0)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decay(rate: f64) -> Reaction {
        Reaction::new(rate, Propensity::Linear { species: 0 }, vec![-1])
    }

    #[test]
    fn constructor_stores_counts_and_size() {
        let v = Voxel::new(vec![10], 1.0);
        assert_eq!(v.molecules(), &[10]);
        assert_eq!(v.voxel_size(), 1.0);
        assert!(!v.is_growing());
    }

    #[test]
    fn add_reaction_appends_live_channels() {
        let mut v = Voxel::new(vec![10], 1.0);
        v.add_reaction(decay(1.5)).unwrap();
        assert_eq!(v.reactions().len(), 1);
        assert_eq!(v.total_propensity(), 15.0);
    }

    #[test]
    fn zero_rate_channels_are_dropped() {
        let mut v = Voxel::new(vec![10], 1.0);
        v.add_reaction(decay(0.0)).unwrap();
        assert!(v.reactions().is_empty());
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let mut v = Voxel::new(vec![10, 20], 1.0);
        let err = v.add_reaction(decay(1.0)).unwrap_err();
        assert!(matches!(err, SimError::ShapeMismatch(_)));
    }

    #[test]
    fn out_of_range_species_reference_is_rejected() {
        let mut v = Voxel::new(vec![10], 1.0);
        let r = Reaction::new(1.0, Propensity::Linear { species: 3 }, vec![-1]);
        assert!(matches!(
            v.add_reaction(r),
            Err(SimError::ShapeMismatch(_))
        ));

        let expr = Propensity::expression("s2 + 1").unwrap();
        let r = Reaction::new(1.0, expr, vec![-1]);
        assert!(matches!(
            v.add_reaction(r),
            Err(SimError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn clear_reactions_empties_the_catalog() {
        let mut v = Voxel::new(vec![10], 1.0);
        v.add_reaction(decay(1.5)).unwrap();
        v.clear_reactions();
        assert!(v.reactions().is_empty());
        assert_eq!(v.total_propensity(), 0.0);
    }

    #[test]
    fn update_caches_the_plain_sum_for_static_voxels() {
        let mut v = Voxel::new(vec![10], 1.0);
        v.add_reaction(decay(1.5)).unwrap();
        assert_eq!(v.update_total_propensity(), 15.0);
        // The pure query agrees and stays pure.
        assert_eq!(v.total_propensity(), 15.0);
        assert_eq!(v.total_propensity(), 15.0);
    }

    #[test]
    fn growing_voxels_report_the_inflated_bound() {
        let mut v = Voxel::with_growth(vec![10], 1.0, |_| 1.0);
        v.add_reaction(decay(1.5)).unwrap();
        assert_eq!(v.update_total_propensity(), 30.0);
        // No extrande multiplier on the pure query.
        assert_eq!(v.total_propensity(), 15.0);
    }

    #[test]
    fn pick_reaction_walks_cumulative_ranges() {
        let mut v = Voxel::new(vec![1, 1], 1.0);
        let slow = Reaction::new(1.0, Propensity::Constant, vec![-1, 0]);
        let fast = Reaction::new(9.0, Propensity::Constant, vec![0, -1]);
        v.add_reaction(slow.clone()).unwrap();
        v.add_reaction(fast.clone()).unwrap();
        v.update_total_propensity();

        assert_eq!(v.pick_reaction(0.05).unwrap(), &slow);
        assert_eq!(v.pick_reaction(0.5).unwrap(), &fast);
        assert_eq!(v.pick_reaction(0.99).unwrap(), &fast);
    }

    #[test]
    fn pick_reaction_falls_back_to_extrande() {
        let mut v = Voxel::with_growth(vec![10], 1.0, |_| 1.0);
        v.add_reaction(decay(1.5)).unwrap();
        v.update_total_propensity();

        // The bound doubles the true total, so the upper half of the unit
        // interval maps to the null event.
        let null = v.pick_reaction(0.9).unwrap();
        assert!(null.stoichiometry().iter().all(|&s| s == 0));
        assert_eq!(null.diffusion_target(), None);
    }

    #[test]
    fn stale_bound_is_detected() {
        let mut v = Voxel::with_growth(vec![1], 1.0, |_| 1.0);
        v.add_reaction(decay(1.0)).unwrap();
        v.update_total_propensity();
        v.add_vector(&[5]);
        assert!(matches!(
            v.pick_reaction(0.5),
            Err(SimError::ExtrandeBoundExceeded { .. })
        ));
    }

    #[test]
    fn overflow_without_extrande_is_an_error() {
        let mut v = Voxel::new(vec![10], 1.0);
        v.add_reaction(decay(1.5)).unwrap();
        v.update_total_propensity();
        // Clearing after caching leaves the scan with nothing to select.
        v.clear_reactions();
        assert!(matches!(
            v.pick_reaction(0.5),
            Err(SimError::SamplingOverflow)
        ));
    }

    #[test]
    fn vectors_apply_componentwise() {
        let mut v = Voxel::new(vec![10, 5], 1.0);
        v.add_vector(&[-1, 2]);
        assert_eq!(v.molecules(), &[9, 7]);
        v.subtract_vector(&[-1, 2]);
        assert_eq!(v.molecules(), &[10, 5]);
        assert_eq!(v.clamped_updates(), 0);
    }

    #[test]
    fn underflowing_components_are_skipped_and_counted() {
        let mut v = Voxel::new(vec![0, 5], 1.0);
        v.add_vector(&[-1, -2]);
        assert_eq!(v.molecules(), &[0, 3]);
        assert_eq!(v.clamped_updates(), 1);
    }

    #[test]
    fn growth_rescales_size_and_diffusion_rates() {
        let mut v = Voxel::with_growth(vec![10], 1.0, |time| 1.0 + time);
        v.add_reaction(Reaction::diffusion(
            2.0,
            Propensity::Linear { species: 0 },
            vec![-1],
            1,
        ))
        .unwrap();
        v.add_reaction(decay(1.5)).unwrap();

        v.update_properties(1.0);
        assert_eq!(v.voxel_size(), 2.0);
        // One growth dimension: jump rates pick up the factor squared.
        assert_eq!(v.reactions()[0].rate(), 0.5);
        assert_eq!(v.reactions()[1].rate(), 1.5);
    }

    #[test]
    fn multi_dimensional_growth_rescales_linearly() {
        let fns: Vec<GrowthFn> = vec![Arc::new(|_| 2.0), Arc::new(|_| 2.0)];
        let mut v = Voxel::growing(vec![10], 1.0, fns, 2.0).unwrap();
        v.add_reaction(Reaction::diffusion(
            2.0,
            Propensity::Linear { species: 0 },
            vec![-1],
            1,
        ))
        .unwrap();

        v.update_properties(0.0);
        assert_eq!(v.voxel_size(), 4.0);
        assert_eq!(v.reactions()[0].rate(), 0.5);
    }

    #[test]
    fn extrande_ratio_below_one_is_rejected() {
        let fns: Vec<GrowthFn> = vec![Arc::new(|_| 1.0)];
        assert!(matches!(
            Voxel::growing(vec![10], 1.0, fns, 0.5),
            Err(SimError::InvalidExtrandeRatio(_))
        ));
    }

    #[test]
    fn growing_needs_a_growth_function() {
        assert!(matches!(
            Voxel::growing(vec![10], 1.0, Vec::new(), 2.0),
            Err(SimError::InvalidArgument(_))
        ));
    }
}
