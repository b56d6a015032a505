//! The stochastic simulation loop.
//!
//! Implements the next subvolume method: every voxel carries a putative
//! next-event time, the earliest voxel fires, and only the one or two voxels
//! touched by the event redraw their times. Event selection inside the
//! firing voxel is plain Gillespie sampling.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use log::{debug, warn};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::error::SimError;
use crate::queue::EventQueue;
use crate::voxel::Voxel;

const DEFAULT_HEADER: &str = "# time voxels...";

/// Owns the voxels and the schedule of putative next-event times.
///
/// Stepping is single-threaded and synchronous; with a fixed seed and a
/// fixed construction order of voxels and reactions the trajectory is
/// reproducible bit for bit.
pub struct Simulator {
    time: f64,
    voxels: Vec<Voxel>,
    queue: EventQueue,
    seed: u64,
    rng: ChaCha8Rng,
    /// Reused per-step copy of the firing reaction's stoichiometry, so the
    /// borrow of the reaction list ends before any voxel is mutated.
    scratch_stoichiometry: Vec<i64>,
}

impl Simulator {
    /// Takes ownership of the voxels and seeds the generator from entropy.
    /// The seed is captured and can be read back for reproduction.
    pub fn new(voxels: Vec<Voxel>) -> Self {
        Self::with_seed(voxels, rand::random())
    }

    /// Takes ownership of the voxels with an explicit seed.
    pub fn with_seed(voxels: Vec<Voxel>, seed: u64) -> Self {
        let mut simulator = Self {
            time: 0.0,
            voxels,
            queue: EventQueue::default(),
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
            scratch_stoichiometry: Vec::new(),
        };
        simulator.initialise_next_reaction_times();
        simulator
    }

    /// Reseeds the generator and redraws every next-event time from the
    /// current state.
    pub fn set_seed(&mut self, seed: u64) {
        debug!("reseeding simulator with {seed}");
        self.seed = seed;
        self.rng = ChaCha8Rng::seed_from_u64(seed);
        self.initialise_next_reaction_times();
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn voxels(&self) -> &[Voxel] {
        &self.voxels
    }

    /// Molecule counts of every voxel, concatenated in voxel-index order.
    pub fn molecules(&self) -> Vec<u64> {
        let mut output = Vec::new();
        for voxel in &self.voxels {
            output.extend_from_slice(voxel.molecules());
        }
        output
    }

    /// A uniform draw from (0, 1). Exact zeros are redrawn: they would turn
    /// into an infinite waiting time and break the strict-bound selection
    /// scan.
    fn uniform(&mut self) -> f64 {
        loop {
            let u: f64 = self.rng.gen();
            if u > 0.0 {
                return u;
            }
        }
    }

    /// A draw from the exponential distribution with the given rate, or
    /// infinity for a quiescent voxel.
    fn exponential(&mut self, propensity: f64) -> f64 {
        if propensity <= 0.0 {
            return f64::INFINITY;
        }
        -self.uniform().ln() / propensity
    }

    fn initialise_next_reaction_times(&mut self) {
        self.queue = EventQueue::with_capacity(self.voxels.len());
        for index in 0..self.voxels.len() {
            let total = self.voxels[index].update_total_propensity();
            let next_time = self.time + self.exponential(total);
            self.queue.push(index, next_time);
        }
    }

    fn update_next_reaction_time(&mut self, index: usize) {
        let total = self.voxels[index].update_total_propensity();
        let next_time = self.time + self.exponential(total);
        self.queue.update(index, next_time);
    }

    /// Executes a single event.
    ///
    /// The clock jumps to the earliest putative time even when that time is
    /// infinite, so a fully quiescent system parks the clock at infinity and
    /// [`advance`](Self::advance) terminates. Mutations and schedule updates
    /// for the firing voxel always precede the diffusion target's.
    pub fn step(&mut self) -> Result<(), SimError> {
        let Some((next_time, voxel_idx)) = self.queue.peek() else {
            self.time = f64::INFINITY;
            return Ok(());
        };
        self.time = next_time;

        self.voxels[voxel_idx].update_properties(self.time);

        if !self.time.is_finite() {
            return Ok(());
        }

        let u = self.uniform();
        let mut stoichiometry = std::mem::take(&mut self.scratch_stoichiometry);
        stoichiometry.clear();
        let diffusion_target = {
            let reaction = match self.voxels[voxel_idx].pick_reaction(u) {
                Ok(reaction) => reaction,
                Err(err) => {
                    self.scratch_stoichiometry = stoichiometry;
                    return Err(err);
                }
            };
            stoichiometry.extend_from_slice(reaction.stoichiometry());
            reaction.diffusion_target()
        };

        self.voxels[voxel_idx].add_vector(&stoichiometry);
        self.update_next_reaction_time(voxel_idx);

        if let Some(target) = diffusion_target {
            if target < self.voxels.len() {
                self.voxels[target].subtract_vector(&stoichiometry);
                self.update_next_reaction_time(target);
            } else {
                warn!(
                    "diffusion target {target} is outside the {}-voxel domain; jump dropped",
                    self.voxels.len()
                );
            }
        }

        self.scratch_stoichiometry = stoichiometry;
        Ok(())
    }

    /// Steps until the clock reaches `time_point` or the system goes
    /// permanently quiescent. The event that carries the clock past
    /// `time_point` is applied.
    pub fn advance(&mut self, time_point: f64) -> Result<(), SimError> {
        while self.time < time_point {
            self.step()?;
        }
        Ok(())
    }

    /// Writes one record: the current time followed by every molecule count
    /// in voxel-index then species-index order.
    pub fn save<W: Write>(&self, writer: &mut W) -> Result<(), SimError> {
        write!(writer, "{}", self.time)?;
        for voxel in &self.voxels {
            for count in voxel.molecules() {
                write!(writer, " {count}")?;
            }
        }
        writeln!(writer)?;
        Ok(())
    }

    /// Runs the simulation and writes one record per sample time
    /// `time_step * i` for `i` in `0..num_steps`, each after the
    /// corresponding [`advance`](Self::advance) returns. A custom header
    /// replaces the default `# time voxels...` line.
    pub fn run<P: AsRef<Path>>(
        &mut self,
        path: P,
        time_step: f64,
        num_steps: u64,
        header: Option<&str>,
    ) -> Result<(), SimError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "{}", header.unwrap_or(DEFAULT_HEADER))?;

        for i in 0..num_steps {
            self.advance(time_step * i as f64)?;
            self.save(&mut writer)?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::propensity::Propensity;
    use crate::reaction::Reaction;

    fn decay_voxel(initial: u64, rate: f64) -> Voxel {
        let mut voxel = Voxel::new(vec![initial], 1.0);
        voxel
            .add_reaction(Reaction::new(
                rate,
                Propensity::Linear { species: 0 },
                vec![-1],
            ))
            .unwrap();
        voxel
    }

    #[test]
    fn construction_starts_at_time_zero() {
        let simulator = Simulator::new(vec![decay_voxel(10, 1.5)]);
        assert_eq!(simulator.time(), 0.0);
        assert_eq!(simulator.voxels()[0].molecules(), &[10]);
    }

    #[test]
    fn set_seed_is_readable_back() {
        let mut simulator = Simulator::new(vec![decay_voxel(10, 1.5)]);
        simulator.set_seed(153);
        assert_eq!(simulator.seed(), 153);
    }

    #[test]
    fn a_single_step_fires_one_event() {
        let mut simulator = Simulator::new(vec![decay_voxel(10, 1.5)]);
        simulator.set_seed(153);
        simulator.step().unwrap();
        assert!(simulator.time() > 0.0);
        assert_eq!(simulator.voxels()[0].molecules(), &[9]);
    }

    #[test]
    fn advance_reaches_the_requested_time() {
        let mut simulator = Simulator::new(vec![decay_voxel(10, 1.5)]);
        simulator.set_seed(153);
        simulator.advance(1.0).unwrap();
        assert!(simulator.time() > 1.0);
    }

    #[test]
    fn quiescent_system_parks_the_clock_at_infinity() {
        let mut simulator = Simulator::new(vec![decay_voxel(0, 1.5)]);
        simulator.set_seed(7);
        simulator.step().unwrap();
        assert!(simulator.time().is_infinite());
        assert_eq!(simulator.voxels()[0].molecules(), &[0]);
        // Further advances return immediately.
        simulator.advance(100.0).unwrap();
        assert_eq!(simulator.voxels()[0].molecules(), &[0]);
    }

    #[test]
    fn zero_voxel_simulator_is_quiescent() {
        let mut simulator = Simulator::new(Vec::new());
        simulator.step().unwrap();
        assert!(simulator.time().is_infinite());
        simulator.advance(10.0).unwrap();
    }

    #[test]
    fn molecules_concatenates_in_voxel_order() {
        let voxels = vec![Voxel::new(vec![1, 2], 1.0), Voxel::new(vec![3], 1.0)];
        let simulator = Simulator::new(voxels);
        assert_eq!(simulator.molecules(), vec![1, 2, 3]);
    }

    #[test]
    fn same_seed_same_trajectory() {
        let run = |seed: u64| {
            let mut simulator = Simulator::with_seed(vec![decay_voxel(50, 0.3)], seed);
            let mut counts = Vec::new();
            let mut times = Vec::new();
            for _ in 0..20 {
                simulator.step().unwrap();
                counts.push(simulator.molecules());
                times.push(simulator.time());
            }
            (counts, times)
        };
        assert_eq!(run(42), run(42));
        assert_ne!(run(42).1, run(43).1);
    }

    #[test]
    fn save_writes_time_then_counts() {
        let voxels = vec![Voxel::new(vec![1, 2], 1.0), Voxel::new(vec![3], 1.0)];
        let simulator = Simulator::new(voxels);
        let mut record = Vec::new();
        simulator.save(&mut record).unwrap();
        assert_eq!(String::from_utf8(record).unwrap(), "0 1 2 3\n");
    }
}
