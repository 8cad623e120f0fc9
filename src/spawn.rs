/// Accumulated counts this close below a whole number are treated as reaching it, so
/// float error from summing frame times such as 1/30 s never loses a particle.
const WHOLE_PARTICLE_EPSILON: f64 = 1e-9;

/// Which accumulator a lane's spawns are drawn from.
///
/// The venous main lane has its own accumulator. All decorative lanes share one, so a
/// decorative spawn event puts one particle on every decorative lane in the same tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnGroup {
    Main,
    Decorative,
}

impl SpawnGroup {
    pub const ALL: [SpawnGroup; 2] = [SpawnGroup::Main, SpawnGroup::Decorative];

    fn index(self) -> usize {
        match self {
            SpawnGroup::Main => 0,
            SpawnGroup::Decorative => 1,
        }
    }
}

/// Converts a continuous spawn rate into whole-particle spawn counts without long-run bias.
///
/// After every `advance` each accumulator lies in `[0, 1)`; the fractional remainder carries
/// over to the next tick, so the count over a run does not depend on how it was split into ticks.
#[derive(Debug, Clone, Default)]
pub struct SpawnScheduler {
    accumulators: [f64; 2],
}

impl SpawnScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `rate * dt` to the group's accumulator and returns how many whole particles to spawn.
    /// Negative or non-finite increments are ignored.
    pub fn advance(&mut self, group: SpawnGroup, rate: f64, dt: f64) -> usize {
        let increment = rate * dt;
        let acc = &mut self.accumulators[group.index()];
        if increment.is_finite() && increment > 0.0 {
            *acc += increment;
        }
        let count = (*acc + WHOLE_PARTICLE_EPSILON).floor();
        *acc = (*acc - count).max(0.0);
        count as usize
    }

    pub fn accumulator(&self, group: SpawnGroup) -> f64 {
        self.accumulators[group.index()]
    }

    /// Zeroes every accumulator, as a restart does.
    pub fn reset(&mut self) {
        self.accumulators = [0.0; 2];
    }
}
