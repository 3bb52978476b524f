use crate::input::{FieldValue, Payload, TestCase};
use crate::protocol::{BOUNDARY_BYTES, KNOWN_OPCODES, Protocol, StructuredFields};
use rand::Rng;
use rand::distr::{Distribution, StandardUniform};
use rand::seq::IndexedRandom;
use std::collections::BTreeMap;

/// Chance that length-change truncates rather than extends.
const TRUNCATE_PROBABILITY: f64 = 0.5;
/// Upper bound on bytes appended by a single length-change.
const MAX_EXTENSION: usize = 5;
/// Per-byte chance that boundary-value rewrites a byte.
const BOUNDARY_BYTE_PROBABILITY: f64 = 0.3;
/// Chance that command-swap picks from [`KNOWN_OPCODES`] instead of any byte.
const KNOWN_OPCODE_PROBABILITY: f64 = 0.7;
/// Replacement characters used by flip-character.
const PUNCTUATION: &[u8] = b"!@#$%^&*()_+-=[]{}|;:,.<>?";

/// A `Mutator` turns a seed into a fresh mutant.
///
/// Implementations never modify the seed and never fail: an operator that cannot act
/// on the payload it is handed returns it unchanged.
///
/// # Type Parameters
/// * `R`: The random number generator driving every mutation decision.
pub trait Mutator<R: Rng + ?Sized> {
    fn mutate(&mut self, seed: &TestCase, rng: &mut R) -> TestCase;
}

/// Operators over binary command payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOperator {
    BitFlip,
    ByteChange,
    LengthChange,
    BoundaryValue,
    CommandSwap,
}

impl Distribution<CommandOperator> for StandardUniform {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> CommandOperator {
        match rng.random_range(0..5) {
            0 => CommandOperator::BitFlip,
            1 => CommandOperator::ByteChange,
            2 => CommandOperator::LengthChange,
            3 => CommandOperator::BoundaryValue,
            _ => CommandOperator::CommandSwap,
        }
    }
}

impl CommandOperator {
    pub const ALL: [CommandOperator; 5] = [
        CommandOperator::BitFlip,
        CommandOperator::ByteChange,
        CommandOperator::LengthChange,
        CommandOperator::BoundaryValue,
        CommandOperator::CommandSwap,
    ];

    /// Applies the operator to a copy of `command`.
    ///
    /// Every operator except length-change leaves an empty command as it is.
    pub fn apply<R: Rng + ?Sized>(self, command: &[u8], rng: &mut R) -> Vec<u8> {
        let mut bytes = command.to_vec();
        if bytes.is_empty() && self != CommandOperator::LengthChange {
            return bytes;
        }
        match self {
            CommandOperator::BitFlip => {
                let idx = rng.random_range(0..bytes.len());
                let bit = rng.random_range(0..8u8);
                bytes[idx] ^= 1u8 << bit;
            }
            CommandOperator::ByteChange => {
                let idx = rng.random_range(0..bytes.len());
                bytes[idx] = rng.random();
            }
            CommandOperator::LengthChange => {
                if !bytes.is_empty() && rng.random_bool(TRUNCATE_PROBABILITY) {
                    let keep = rng.random_range(1..=bytes.len());
                    bytes.truncate(keep);
                } else {
                    let extra = rng.random_range(1..=MAX_EXTENSION);
                    bytes.extend((0..extra).map(|_| rng.random::<u8>()));
                }
            }
            CommandOperator::BoundaryValue => {
                for byte in bytes.iter_mut() {
                    if rng.random_bool(BOUNDARY_BYTE_PROBABILITY) {
                        *byte = BOUNDARY_BYTES[rng.random_range(0..BOUNDARY_BYTES.len())];
                    }
                }
            }
            CommandOperator::CommandSwap => {
                bytes[0] = if rng.random_bool(KNOWN_OPCODE_PROBABILITY) {
                    KNOWN_OPCODES[rng.random_range(0..KNOWN_OPCODES.len())]
                } else {
                    rng.random()
                };
            }
        }
        bytes
    }
}

/// Operators over structured field maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOperator {
    FlipCharacter,
    RemoveField,
    InvalidType,
    BoundaryValue,
}

impl Distribution<FieldOperator> for StandardUniform {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> FieldOperator {
        match rng.random_range(0..4) {
            0 => FieldOperator::FlipCharacter,
            1 => FieldOperator::RemoveField,
            2 => FieldOperator::InvalidType,
            _ => FieldOperator::BoundaryValue,
        }
    }
}

/// Values whose type the target's schema should reject.
fn invalid_type_pool() -> [FieldValue; 7] {
    let small = || vec![FieldValue::Int(1), FieldValue::Int(2), FieldValue::Int(3)];
    [
        FieldValue::Null,
        FieldValue::List(Vec::new()),
        FieldValue::Map(BTreeMap::new()),
        FieldValue::Bool(true),
        FieldValue::Bytes(Vec::new()),
        FieldValue::Set(small()),
        FieldValue::Tuple(small()),
    ]
}

fn numeric_boundary_pool() -> [FieldValue; 7] {
    [
        FieldValue::Int(-1),
        FieldValue::Int(0),
        FieldValue::Int(i64::from(i32::MAX)),
        FieldValue::Int(i64::from(i32::MAX) + 1),
        FieldValue::Float(f64::INFINITY),
        FieldValue::Float(f64::NEG_INFINITY),
        FieldValue::Float(f64::NAN),
    ]
}

impl FieldOperator {
    pub const ALL: [FieldOperator; 4] = [
        FieldOperator::FlipCharacter,
        FieldOperator::RemoveField,
        FieldOperator::InvalidType,
        FieldOperator::BoundaryValue,
    ];

    /// Applies the operator to a copy of `fields`, restricted to the configured names.
    pub fn apply<R: Rng + ?Sized>(
        self,
        fields: &BTreeMap<String, FieldValue>,
        settings: &StructuredFields,
        rng: &mut R,
    ) -> BTreeMap<String, FieldValue> {
        let mut mutated = fields.clone();
        match self {
            FieldOperator::FlipCharacter => {
                let Some(field) = settings.text_fields.choose(rng) else {
                    return mutated;
                };
                if let Some(FieldValue::Text(text)) = mutated.get_mut(field) {
                    let mut chars: Vec<char> = text.chars().collect();
                    if !chars.is_empty() {
                        let pos = rng.random_range(0..chars.len());
                        let replacement = PUNCTUATION[rng.random_range(0..PUNCTUATION.len())];
                        chars[pos] = char::from(replacement);
                        *text = chars.into_iter().collect();
                    }
                }
            }
            FieldOperator::RemoveField => {
                if let Some(field) = settings.removable_fields.choose(rng) {
                    mutated.remove(field);
                }
            }
            FieldOperator::InvalidType => {
                if let Some(field) = settings.removable_fields.choose(rng) {
                    let pool = invalid_type_pool();
                    let value = pool[rng.random_range(0..pool.len())].clone();
                    mutated.insert(field.clone(), value);
                }
            }
            FieldOperator::BoundaryValue => {
                if !settings.numeric_field.is_empty() {
                    let pool = numeric_boundary_pool();
                    let value = pool[rng.random_range(0..pool.len())].clone();
                    mutated.insert(settings.numeric_field.clone(), value);
                }
            }
        }
        mutated
    }
}

/// Picks one operator uniformly from the set registered for the active protocol and
/// applies it to the seed.
#[derive(Debug, Clone, Default)]
pub struct MutationEngine {
    protocol: Protocol,
}

impl MutationEngine {
    pub fn new(protocol: Protocol) -> Self {
        Self { protocol }
    }

    pub fn protocol(&self) -> &Protocol {
        &self.protocol
    }
}

impl<R: Rng + ?Sized> Mutator<R> for MutationEngine {
    fn mutate(&mut self, seed: &TestCase, rng: &mut R) -> TestCase {
        match (&self.protocol, seed.payload()) {
            (Protocol::Binary, Payload::Command(bytes)) => {
                let operator: CommandOperator = rng.random();
                tracing::trace!(?operator, "mutating command");
                seed.with_payload(Payload::Command(operator.apply(bytes, rng)))
            }
            (Protocol::Structured(settings), Payload::Fields(fields)) => {
                let operator: FieldOperator = rng.random();
                tracing::trace!(?operator, "mutating fields");
                seed.with_payload(Payload::Fields(operator.apply(fields, settings, rng)))
            }
            (protocol, payload) => {
                tracing::warn!(
                    protocol = protocol.kind().as_str(),
                    payload = payload.kind().as_str(),
                    "payload shape does not match the campaign protocol, leaving it unchanged"
                );
                seed.clone()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_chacha::ChaCha8Rng;
    use rand_core::SeedableRng;

    fn product() -> BTreeMap<String, FieldValue> {
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), FieldValue::from("widget"));
        fields.insert("info".to_string(), FieldValue::from("a blue widget"));
        fields.insert("price".to_string(), FieldValue::Int(10));
        fields
    }

    #[test]
    fn command_operators_never_produce_empty_output_from_non_empty_input() {
        let mut rng = ChaCha8Rng::from_seed([7u8; 32]);
        let seeds: [&[u8]; 3] = [&[0x00], &[0x01, 0x02], &[0, 1, 2, 3, 4, 5, 6]];
        for seed in seeds {
            for op in CommandOperator::ALL {
                for _ in 0..200 {
                    let out = op.apply(seed, &mut rng);
                    assert!(!out.is_empty(), "{op:?} emptied {seed:?}");
                }
            }
        }
    }

    #[test]
    fn byte_indexed_operators_leave_empty_command_unchanged() {
        let mut rng = ChaCha8Rng::from_seed([1u8; 32]);
        for op in [
            CommandOperator::BitFlip,
            CommandOperator::ByteChange,
            CommandOperator::BoundaryValue,
            CommandOperator::CommandSwap,
        ] {
            assert!(op.apply(&[], &mut rng).is_empty(), "{op:?} touched an empty command");
        }
    }

    #[test]
    fn length_change_extends_empty_command() {
        let mut rng = ChaCha8Rng::from_seed([2u8; 32]);
        for _ in 0..100 {
            let out = CommandOperator::LengthChange.apply(&[], &mut rng);
            assert!((1..=MAX_EXTENSION).contains(&out.len()));
        }
    }

    #[test]
    fn length_change_truncates_into_range_or_extends_by_one_to_five() {
        let mut rng = ChaCha8Rng::from_seed([3u8; 32]);
        let seed = [9u8, 8, 7, 6, 5, 4, 3];
        let (mut shorter_or_equal, mut longer) = (0, 0);
        for _ in 0..500 {
            let out = CommandOperator::LengthChange.apply(&seed, &mut rng);
            if out.len() <= seed.len() {
                assert!(out.len() >= 1);
                assert_eq!(&out[..], &seed[..out.len()], "truncation must keep a prefix");
                shorter_or_equal += 1;
            } else {
                assert!(out.len() - seed.len() <= MAX_EXTENSION);
                assert_eq!(&out[..seed.len()], &seed[..], "extension must keep the original");
                longer += 1;
            }
        }
        assert!(shorter_or_equal > 0 && longer > 0);
    }

    #[test]
    fn boundary_value_preserves_length_and_only_writes_boundary_bytes() {
        let mut rng = ChaCha8Rng::from_seed([4u8; 32]);
        let seed = [0x10u8, 0x20, 0x30, 0x40, 0x50, 0x60, 0x70];
        for _ in 0..200 {
            let out = CommandOperator::BoundaryValue.apply(&seed, &mut rng);
            assert_eq!(out.len(), seed.len());
            for (before, after) in seed.iter().zip(out.iter()) {
                assert!(before == after || BOUNDARY_BYTES.contains(after));
            }
        }
    }

    #[test]
    fn bit_flip_changes_exactly_one_bit() {
        let mut rng = ChaCha8Rng::from_seed([5u8; 32]);
        let seed = [0u8, 1, 2, 3, 4, 5, 6];
        for _ in 0..100 {
            let out = CommandOperator::BitFlip.apply(&seed, &mut rng);
            let flipped: u32 = seed
                .iter()
                .zip(out.iter())
                .map(|(a, b)| (a ^ b).count_ones())
                .sum();
            assert_eq!(flipped, 1);
        }
    }

    #[test]
    fn command_swap_only_touches_the_opcode() {
        let mut rng = ChaCha8Rng::from_seed([6u8; 32]);
        let seed = [0u8, 1, 2, 3, 4, 5, 6];
        let mut known = 0;
        for _ in 0..500 {
            let out = CommandOperator::CommandSwap.apply(&seed, &mut rng);
            assert_eq!(&out[1..], &seed[1..]);
            if KNOWN_OPCODES.contains(&out[0]) {
                known += 1;
            }
        }
        // 0.7 from the known set plus random bytes that happen to land in it.
        assert!(known > 300, "known opcodes chosen {known}/500 times");
    }

    #[test]
    fn engine_keeps_label_and_does_not_touch_seed() {
        let mut engine = MutationEngine::new(Protocol::Binary);
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let seed = TestCase::command(Some("auth_attempt"), vec![0, 1, 2, 3, 4, 5, 6]);
        let snapshot = seed.clone();
        let mut changed = 0;
        for _ in 0..50 {
            let mutant = engine.mutate(&seed, &mut rng);
            assert_eq!(mutant.name(), Some("auth_attempt"));
            if mutant != seed {
                changed += 1;
            }
        }
        assert_eq!(seed, snapshot);
        assert!(changed > 0);
    }

    #[test]
    fn engine_leaves_mismatched_payload_alone() {
        let mut engine = MutationEngine::new(Protocol::Binary);
        let mut rng = ChaCha8Rng::seed_from_u64(12);
        let seed = TestCase::fields(product());
        assert_eq!(engine.mutate(&seed, &mut rng), seed);
    }

    #[test]
    fn flip_character_swaps_in_punctuation() {
        let mut rng = ChaCha8Rng::seed_from_u64(13);
        let settings = StructuredFields::default();
        let seed = product();
        let mut flipped = false;
        for _ in 0..50 {
            let out = FieldOperator::FlipCharacter.apply(&seed, &settings, &mut rng);
            assert_eq!(out.len(), seed.len());
            for field in ["name", "info"] {
                let before = seed[field].as_text().unwrap();
                let after = out[field].as_text().unwrap();
                assert_eq!(before.chars().count(), after.chars().count());
                if before != after {
                    flipped = true;
                    let diff: Vec<char> = after
                        .chars()
                        .zip(before.chars())
                        .filter(|(a, b)| a != b)
                        .map(|(a, _)| a)
                        .collect();
                    assert_eq!(diff.len(), 1);
                    assert!(PUNCTUATION.contains(&(diff[0] as u8)));
                }
            }
            assert_eq!(out["price"], FieldValue::Int(10));
        }
        assert!(flipped);
    }

    #[test]
    fn remove_field_drops_at_most_one_configured_field() {
        let mut rng = ChaCha8Rng::seed_from_u64(14);
        let settings = StructuredFields::default();
        let mut seed = product();
        seed.insert("extra".to_string(), FieldValue::Bool(false));
        for _ in 0..50 {
            let out = FieldOperator::RemoveField.apply(&seed, &settings, &mut rng);
            assert_eq!(out.len(), seed.len() - 1);
            assert!(out.contains_key("extra"));
        }
    }

    #[test]
    fn invalid_type_and_boundary_value_draw_from_their_pools() {
        let mut rng = ChaCha8Rng::seed_from_u64(15);
        let settings = StructuredFields::default();
        let seed = product();
        let invalid = invalid_type_pool();
        let boundary = numeric_boundary_pool();
        for _ in 0..100 {
            let out = FieldOperator::InvalidType.apply(&seed, &settings, &mut rng);
            let changed: Vec<&String> = out.keys().filter(|k| out[*k] != seed[*k]).collect();
            assert!(changed.len() <= 1);
            for key in changed {
                assert!(invalid.contains(&out[key]));
            }

            let out = FieldOperator::BoundaryValue.apply(&seed, &settings, &mut rng);
            let price = &out["price"];
            let is_nan = matches!(price, FieldValue::Float(f) if f.is_nan());
            assert!(is_nan || boundary.contains(price));
        }
    }

    #[test]
    fn field_operators_tolerate_empty_maps_and_settings() {
        let mut rng = ChaCha8Rng::seed_from_u64(16);
        let empty_settings = StructuredFields {
            text_fields: Vec::new(),
            removable_fields: Vec::new(),
            numeric_field: String::new(),
        };
        for op in FieldOperator::ALL {
            assert!(op.apply(&BTreeMap::new(), &empty_settings, &mut rng).is_empty());
            assert_eq!(op.apply(&product(), &empty_settings, &mut rng), product());
        }
    }
}
