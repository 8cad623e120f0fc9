use circuit_common::{Lane, Rgb, Vec2};

/// One live particle in the circuit.
#[derive(Debug, Clone, PartialEq)]
pub struct Particle {
    pub id: u64,
    pub lane: Lane,
    /// Fraction of the current lane travelled, in [0, 1] while the particle is live.
    pub t: f64,
    is_bubble: bool,
    pub color: Rgb,
    /// Render coordinate from the most recent tick; `None` until the particle has been placed.
    pub position: Option<Vec2>,
}

impl Particle {
    /// A fresh blood particle at the start of a venous lane.
    pub fn blood(id: u64, lane: Lane) -> Self {
        Self { id, lane, t: 0.0, is_bubble: false, color: Rgb::VENOUS, position: None }
    }

    /// A fresh air bubble at the start of the venous main lane.
    pub fn bubble(id: u64) -> Self {
        Self { id, lane: Lane::VenousMain, t: 0.0, is_bubble: true, color: Rgb::BUBBLE, position: None }
    }

    /// Fixed at creation for the particle's whole life.
    pub fn is_bubble(&self) -> bool {
        self.is_bubble
    }
}

/// Owns the live particle set.
#[derive(Debug, Clone, Default)]
pub struct ParticleStore {
    particles: Vec<Particle>,
}

impl ParticleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, particle: Particle) {
        self.particles.push(particle);
    }

    /// Visits every particle exactly once and drops those for which `keep` returns false.
    /// Surviving particles keep their relative order.
    pub fn for_each_removable<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&mut Particle) -> bool,
    {
        let before = self.particles.len();
        self.particles.retain_mut(|p| keep(p));
        before - self.particles.len()
    }

    pub fn clear(&mut self) {
        self.particles.clear();
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Particle> {
        self.particles.iter()
    }

    pub fn count_in(&self, lane: Lane) -> usize {
        self.particles.iter().filter(|p| p.lane == lane).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(n: u64) -> ParticleStore {
        let mut store = ParticleStore::new();
        for id in 0..n {
            store.insert(Particle::blood(id, Lane::VenousMain));
        }
        store
    }

    #[test]
    fn test_removal_visits_each_once() {
        let mut store = store_with(10);
        let mut visited = Vec::new();
        let removed = store.for_each_removable(|p| {
            visited.push(p.id);
            p.id % 3 != 0
        });
        assert_eq!(visited, (0..10).collect::<Vec<_>>());
        assert_eq!(removed, 4);
        let left: Vec<u64> = store.iter().map(|p| p.id).collect();
        assert_eq!(left, vec![1, 2, 4, 5, 7, 8]);
    }

    #[test]
    fn test_adjacent_removals_not_skipped() {
        let mut store = store_with(5);
        let removed = store.for_each_removable(|p| p.id == 4);
        assert_eq!(removed, 4);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_mutation_persists() {
        let mut store = store_with(3);
        store.for_each_removable(|p| {
            p.t += 0.25;
            true
        });
        assert!(store.iter().all(|p| p.t == 0.25));
    }

    #[test]
    fn test_clear_and_counts() {
        let mut store = store_with(2);
        store.insert(Particle::blood(9, Lane::VenousDecorative(0)));
        store.insert(Particle::bubble(10));
        assert_eq!(store.count_in(Lane::VenousMain), 3);
        assert_eq!(store.count_in(Lane::VenousDecorative(0)), 1);
        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn test_constructors() {
        let bubble = Particle::bubble(1);
        assert!(bubble.is_bubble());
        assert_eq!(bubble.lane, Lane::VenousMain);
        assert_eq!(bubble.color, Rgb::BUBBLE);
        let blood = Particle::blood(2, Lane::VenousDecorative(1));
        assert!(!blood.is_bubble());
        assert_eq!(blood.t, 0.0);
        assert_eq!(blood.color, Rgb::VENOUS);
    }
}
