//! Synthetic workloads for exercising a [`Pool`].
//!
//! The simulator replays six allocation/deallocation patterns against a
//! pool and reports how each placement strategy held up: how many
//! allocations were attempted, how many found no block, and how high the
//! pool's usage climbed. The RNG is seeded, so a report is reproducible
//! from its seed.

use core::fmt;

use log::{debug, info};
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::PoolError;
use crate::pool::{Handle, Pool};

/// One synthetic workload shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Coin-flip between allocating a random 16..144-byte block and
    /// freeing a random live one.
    Random,
    /// Allocation sizes ramp up: 4, 8, ..., 4·iterations.
    IncreasingSizes,
    /// The same ramp, descending.
    DecreasingSizes,
    /// Fill with 64-byte blocks, free every other one, then try to
    /// allocate into the gaps.
    Fragmentation,
    /// A burst of random 32..=64-byte allocations with no frees between.
    Burst,
    /// Alternating 32/64-byte allocations, freeing the oldest live block
    /// every fifth step.
    MixedOverload,
}

impl Scenario {
    pub const ALL: [Scenario; 6] = [
        Scenario::Random,
        Scenario::IncreasingSizes,
        Scenario::DecreasingSizes,
        Scenario::Fragmentation,
        Scenario::Burst,
        Scenario::MixedOverload,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Scenario::Random => "Random Allocations",
            Scenario::IncreasingSizes => "Increasing Size Allocations",
            Scenario::DecreasingSizes => "Decreasing Size Allocations",
            Scenario::Fragmentation => "Fragmentation Test",
            Scenario::Burst => "Burst Allocations",
            Scenario::MixedOverload => "Mixed Overload",
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Aggregate outcome of one scenario run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioReport {
    pub scenario: Scenario,
    pub algorithm: &'static str,
    /// Allocation calls issued.
    pub attempted: usize,
    /// Allocation calls that found no fitting block.
    pub failed: usize,
    /// The pool's high-water mark during the scenario.
    pub peak_usage: usize,
}

impl ScenarioReport {
    /// Failed allocations as a fraction of attempts, 0.0 when nothing was
    /// attempted.
    pub fn failure_rate(&self) -> f64 {
        if self.attempted == 0 {
            0.0
        } else {
            self.failed as f64 / self.attempted as f64
        }
    }
}

impl fmt::Display for ScenarioReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- Scenario: {} ({}) ---", self.scenario, self.algorithm)?;
        writeln!(f, "Failed Allocations: {:.1}%", self.failure_rate() * 100.0)?;
        writeln!(f, "Peak Usage        : {} bytes", self.peak_usage)
    }
}

/// Replays the scenarios of [`Scenario::ALL`] against a pool.
pub struct Simulator {
    iterations: usize,
    rng: StdRng,
}

/// Running tally of one scenario's allocate calls.
#[derive(Default)]
struct Tally {
    attempted: usize,
    failed: usize,
}

impl Tally {
    /// Issue one allocation, recording the attempt and whether it failed.
    fn allocate(
        &mut self,
        pool: &mut Pool,
        size: usize,
    ) -> Result<Option<Handle>, PoolError> {
        self.attempted += 1;
        let handle = pool.allocate(size)?;
        if handle.is_none() {
            self.failed += 1;
        }
        Ok(handle)
    }
}

impl Simulator {
    /// A simulator issuing `iterations` steps per scenario, randomized
    /// from `seed`.
    pub fn new(iterations: usize, seed: u64) -> Simulator {
        info!("simulator using seed {}", seed);
        Simulator {
            iterations,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Run every scenario against `pool`, resetting it (at its current
    /// size) before each one.
    pub fn run_all(&mut self, pool: &mut Pool) -> Result<Vec<ScenarioReport>, PoolError> {
        Scenario::ALL
            .iter()
            .map(|&scenario| self.run(pool, scenario))
            .collect()
    }

    /// Run a single scenario against a freshly reset `pool`.
    pub fn run(
        &mut self,
        pool: &mut Pool,
        scenario: Scenario,
    ) -> Result<ScenarioReport, PoolError> {
        pool.reset(pool.total_memory())?;
        debug!("scenario {} ({})", scenario, pool.algorithm_name());

        let tally = match scenario {
            Scenario::Random => self.random(pool)?,
            Scenario::IncreasingSizes => self.increasing(pool)?,
            Scenario::DecreasingSizes => self.decreasing(pool)?,
            Scenario::Fragmentation => self.fragmentation(pool)?,
            Scenario::Burst => self.burst(pool)?,
            Scenario::MixedOverload => self.mixed_overload(pool)?,
        };

        Ok(ScenarioReport {
            scenario,
            algorithm: pool.algorithm_name(),
            attempted: tally.attempted,
            failed: tally.failed,
            peak_usage: pool.peak_usage(),
        })
    }

    fn random(&mut self, pool: &mut Pool) -> Result<Tally, PoolError> {
        let mut tally = Tally::default();
        let mut live = Vec::new();

        for _ in 0..self.iterations {
            if live.is_empty() || self.rng.gen_bool(0.5) {
                let size = self.rng.gen_range(16..144);
                if let Some(handle) = tally.allocate(pool, size)? {
                    live.push(handle);
                }
            } else {
                let idx = self.rng.gen_range(0..live.len());
                pool.deallocate(Some(live.remove(idx)))?;
            }
        }

        drain(pool, live)?;
        Ok(tally)
    }

    fn increasing(&mut self, pool: &mut Pool) -> Result<Tally, PoolError> {
        let mut tally = Tally::default();
        let mut live = Vec::new();

        for step in 1..=self.iterations {
            if let Some(handle) = tally.allocate(pool, step * 4)? {
                live.push(handle);
            }
        }

        drain(pool, live)?;
        Ok(tally)
    }

    fn decreasing(&mut self, pool: &mut Pool) -> Result<Tally, PoolError> {
        let mut tally = Tally::default();
        let mut live = Vec::new();

        for step in (1..=self.iterations).rev() {
            if let Some(handle) = tally.allocate(pool, step * 4)? {
                live.push(handle);
            }
        }

        drain(pool, live)?;
        Ok(tally)
    }

    fn fragmentation(&mut self, pool: &mut Pool) -> Result<Tally, PoolError> {
        let mut tally = Tally::default();
        let mut live = Vec::new();

        for _ in 0..self.iterations {
            if let Some(handle) = tally.allocate(pool, 64)? {
                live.push(handle);
            }
        }

        // Punch holes at every other block, then see how many same-sized
        // allocations the gaps can still absorb.
        for handle in live.iter().step_by(2) {
            pool.deallocate(Some(*handle))?;
        }
        for _ in (1..live.len()).step_by(2) {
            let _ = tally.allocate(pool, 64)?;
        }

        Ok(tally)
    }

    fn burst(&mut self, pool: &mut Pool) -> Result<Tally, PoolError> {
        let mut tally = Tally::default();
        let mut live = Vec::new();
        let sizes = Uniform::new_inclusive(32usize, 64);

        for _ in 0..self.iterations {
            let size = sizes.sample(&mut self.rng);
            if let Some(handle) = tally.allocate(pool, size)? {
                live.push(handle);
            }
        }

        drain(pool, live)?;
        Ok(tally)
    }

    fn mixed_overload(&mut self, pool: &mut Pool) -> Result<Tally, PoolError> {
        let mut tally = Tally::default();
        let mut live = Vec::new();

        for step in 0..self.iterations {
            let size = if step % 2 == 0 { 32 } else { 64 };
            if let Some(handle) = tally.allocate(pool, size)? {
                live.push(handle);
            }
            if step % 5 == 0 && !live.is_empty() {
                pool.deallocate(Some(live.remove(0)))?;
            }
        }

        drain(pool, live)?;
        Ok(tally)
    }
}

fn drain(pool: &mut Pool, live: Vec<Handle>) -> Result<(), PoolError> {
    for handle in live {
        pool.deallocate(Some(handle))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::strategy::Strategy;

    use test_log::test;

    #[test]
    fn runs_every_scenario() {
        let mut pool = Pool::new(Strategy::FirstFit, 2048).unwrap();
        let mut sim = Simulator::new(100, 7);
        let reports = sim.run_all(&mut pool).unwrap();

        assert_eq!(reports.len(), Scenario::ALL.len());
        for (report, scenario) in reports.iter().zip(Scenario::ALL) {
            assert_eq!(report.scenario, scenario);
            assert_eq!(report.algorithm, "First Fit");
            assert!(report.attempted > 0);
            assert!(report.failed <= report.attempted);
            assert!(report.peak_usage <= pool.total_memory());
        }

        // The pool must come out structurally sound.
        let (validity, _stats) = pool.audit();
        assert!(validity.is_valid(), "invalid pool: {:?}", validity);
    }

    #[test]
    fn same_seed_same_reports() {
        let mut a = Pool::new(Strategy::BestFit, 1024).unwrap();
        let mut b = Pool::new(Strategy::BestFit, 1024).unwrap();

        let reports_a = Simulator::new(200, 42).run_all(&mut a).unwrap();
        let reports_b = Simulator::new(200, 42).run_all(&mut b).unwrap();
        assert_eq!(reports_a, reports_b);
    }

    #[test]
    fn ramps_drain_cleanly() {
        let mut pool = Pool::new(Strategy::WorstFit, 4096).unwrap();
        let mut sim = Simulator::new(50, 1);

        for scenario in [Scenario::IncreasingSizes, Scenario::DecreasingSizes] {
            let report = sim.run(&mut pool, scenario).unwrap();
            assert_eq!(report.attempted, 50);
            // Everything that was allocated was freed again.
            assert_eq!(pool.used_memory(), 0);
        }
    }

    #[test]
    fn failure_rate_is_a_fraction() {
        let report = ScenarioReport {
            scenario: Scenario::Burst,
            algorithm: "First Fit",
            attempted: 200,
            failed: 50,
            peak_usage: 0,
        };
        assert_eq!(report.failure_rate(), 0.25);

        let empty = ScenarioReport {
            scenario: Scenario::Burst,
            algorithm: "First Fit",
            attempted: 0,
            failed: 0,
            peak_usage: 0,
        };
        assert_eq!(empty.failure_rate(), 0.0);
    }
}
