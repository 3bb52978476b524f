use crate::input::TestCase;

/// Mutation attempts granted to every seed by [`ConstantEnergy::default`].
pub const DEFAULT_ENERGY: usize = 10;

/// An `EnergyScheduler` decides how many mutation attempts a seed receives.
///
/// Energy is only an attempt budget: the campaign's inner loop consumes it one mutant
/// at a time. Adaptive policies (e.g. scaling by seed novelty) can be swapped in without
/// changing that loop.
pub trait EnergyScheduler {
    /// Returns the number of mutants to derive from `seed`.
    fn assign_energy(&mut self, seed: &TestCase) -> usize;
}

/// Grants every seed the same energy, regardless of its content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstantEnergy {
    energy: usize,
}

impl ConstantEnergy {
    pub fn new(energy: usize) -> Self {
        Self { energy }
    }

    pub fn energy(&self) -> usize {
        self.energy
    }
}

impl Default for ConstantEnergy {
    fn default() -> Self {
        Self::new(DEFAULT_ENERGY)
    }
}

impl EnergyScheduler for ConstantEnergy {
    fn assign_energy(&mut self, _seed: &TestCase) -> usize {
        self.energy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::FieldValue;
    use std::collections::BTreeMap;

    #[test]
    fn constant_energy_is_idempotent() {
        let mut scheduler = ConstantEnergy::default();
        let seed = TestCase::command(Some("auth_attempt"), vec![0, 1, 2, 3, 4, 5, 6]);
        assert_eq!(scheduler.assign_energy(&seed), 10);
        assert_eq!(scheduler.assign_energy(&seed), 10);
    }

    #[test]
    fn constant_energy_ignores_seed_content() {
        let mut scheduler = ConstantEnergy::new(3);
        let mut fields = BTreeMap::new();
        fields.insert("price".to_string(), FieldValue::Int(1));
        let seeds = [
            TestCase::command(None, vec![]),
            TestCase::command(Some("long"), vec![0xAA; 64]),
            TestCase::fields(fields),
        ];
        for seed in &seeds {
            assert_eq!(scheduler.assign_energy(seed), 3);
        }
    }
}
