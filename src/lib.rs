//! Spatial Gillespie simulation with the next subvolume method.
//!
//! The domain is a collection of [`Voxel`]s, each holding integer molecule
//! counts and a catalog of [`Reaction`] channels. Local channels mutate the
//! firing voxel; diffusion channels additionally move molecules into a
//! neighboring voxel. The [`Simulator`] keeps a putative next-event time per
//! voxel in an indexed priority queue, so a step costs O(log N) in the
//! number of voxels.
//!
//! Voxels whose size changes in time (growing domains) use the extrande
//! device: the sampling bound is the total propensity inflated by a
//! configurable ratio, and draws that land in the headroom are null events
//! that only advance the clock.
//!
//! ```
//! use subvolumes::{Propensity, Reaction, Simulator, Voxel};
//!
//! // Production/decay birth-death process in a single voxel.
//! let mut voxel = Voxel::new(vec![100], 10.0);
//! voxel.add_reaction(Reaction::new(1.0, Propensity::PerSize, vec![1]))?;
//! voxel.add_reaction(Reaction::new(
//!     0.01,
//!     Propensity::Linear { species: 0 },
//!     vec![-1],
//! ))?;
//!
//! let mut simulator = Simulator::with_seed(vec![voxel], 42);
//! simulator.advance(10.0)?;
//! assert!(simulator.time() > 10.0);
//! # Ok::<(), subvolumes::SimError>(())
//! ```

pub mod ensemble;
pub mod error;
pub mod propensity;
mod queue;
pub mod reaction;
pub mod simulator;
pub mod voxel;

pub use ensemble::{run_ensemble, EnsembleOptions, EnsembleOutput};
pub use error::SimError;
pub use propensity::{Propensity, PropensityFn, Reactant};
pub use reaction::Reaction;
pub use simulator::Simulator;
pub use voxel::{GrowthFn, Voxel, DEFAULT_EXTRANDE_RATIO};
