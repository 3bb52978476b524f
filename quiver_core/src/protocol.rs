use serde::Deserialize;

/// Which wire protocol a campaign speaks. Chosen once when the campaign is built;
/// every seed and mutant of that campaign shares the matching payload shape.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ProtocolKind {
    /// Opcode-prefixed byte commands answered with response codes (the smart lock).
    #[default]
    Binary,
    /// JSON field maps posted to an HTTP endpoint.
    Structured,
}

impl ProtocolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolKind::Binary => "binary",
            ProtocolKind::Structured => "structured",
        }
    }
}

/// Opcodes understood by the binary target.
pub mod opcode {
    pub const AUTHENTICATE: u8 = 0x00;
    pub const OPEN: u8 = 0x01;
    pub const CLOSE: u8 = 0x02;
    /// First opcode the target does not define.
    pub const FIRST_UNDEFINED: u8 = 0x03;
}

/// Response codes returned by the binary target.
pub mod response {
    pub const SUCCESS: u8 = 0x00;
    pub const AUTH_FAIL: u8 = 0x01;
    pub const INVALID_COMMAND: u8 = 0x02;
    pub const NOT_ALLOWED: u8 = 0x03;
    pub const LOCK_ERROR: u8 = 0x04;
    /// Codes at or above this value are outside the documented table.
    pub const FIRST_UNDEFINED: u8 = 0x05;
}

/// Opcodes the command-swap operator prefers, including a few undefined ones.
pub const KNOWN_OPCODES: [u8; 6] = [0x00, 0x01, 0x02, 0x03, 0x04, 0x05];

/// Byte values that tend to sit on parser edges.
pub const BOUNDARY_BYTES: [u8; 5] = [0x00, 0x01, 0x7F, 0x80, 0xFF];

/// Passcode accepted by the lock after the authenticate opcode.
pub const VALID_PASSCODE: [u8; 6] = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06];

/// Field names the structured operators are allowed to touch.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
#[serde(default)]
pub struct StructuredFields {
    /// Text fields eligible for character flips.
    pub text_fields: Vec<String>,
    /// Fields that may be removed or given a mistyped value.
    pub removable_fields: Vec<String>,
    /// Numeric field that receives boundary values.
    pub numeric_field: String,
}

impl Default for StructuredFields {
    fn default() -> Self {
        Self {
            text_fields: vec!["name".to_string(), "info".to_string()],
            removable_fields: vec![
                "name".to_string(),
                "info".to_string(),
                "price".to_string(),
            ],
            numeric_field: "price".to_string(),
        }
    }
}

/// Closed protocol tag carrying the per-protocol settings the mutation engine needs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Protocol {
    #[default]
    Binary,
    Structured(StructuredFields),
}

impl Protocol {
    pub fn kind(&self) -> ProtocolKind {
        match self {
            Protocol::Binary => ProtocolKind::Binary,
            Protocol::Structured(_) => ProtocolKind::Structured,
        }
    }
}
