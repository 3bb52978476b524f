use crate::executor::Observation;
use crate::input::TestCase;
use crate::protocol::{ProtocolKind, opcode, response};
use rand::Rng;

/// Name prefixes of seeds that deliberately send a wrong passcode.
const PASSCODE_PROBE_PREFIXES: [&str; 3] = ["invalid_passcode", "short_passcode", "long_passcode"];
/// Lowest HTTP status counted as a server error.
const SERVER_ERROR_STATUS: u16 = 500;
/// Default chance of flagging an otherwise unremarkable result.
pub const DEFAULT_NOISE_PROBABILITY: f64 = 0.05;

/// Protocol-level state the oracle accumulates over a campaign.
///
/// Owned by the campaign and handed to the oracle by reference. It is independent of the
/// transport: a dropped and rebuilt connection does not reset it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub authenticated: bool,
}

impl SessionState {
    pub fn reset(&mut self) {
        self.authenticated = false;
    }
}

/// Why a result was judged interesting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    /// The target produced no response at all.
    NoResponse,
    /// A wrong passcode was not answered with auth-fail.
    PasscodeNotRejected,
    /// An undefined command was not answered with invalid-command.
    UnknownCommandAccepted,
    /// Open/close before authenticating was not answered with not-allowed.
    UnauthenticatedAccess,
    /// The response code is outside the documented table.
    UndefinedResponseCode,
    /// Random exploration noise.
    ExplorationNoise,
    /// The structured target answered with a 5xx status.
    ServerError,
}

impl Rule {
    pub fn description(&self) -> &'static str {
        match self {
            Rule::NoResponse => "target produced no response",
            Rule::PasscodeNotRejected => "wrong passcode was not rejected",
            Rule::UnknownCommandAccepted => "unknown command was not reported as invalid",
            Rule::UnauthenticatedAccess => "open/close allowed without authentication",
            Rule::UndefinedResponseCode => "undefined response code",
            Rule::ExplorationNoise => "exploration noise",
            Rule::ServerError => "server error status",
        }
    }
}

/// An interesting result: the mutant, the rule it tripped and a digest for tracking.
#[derive(Debug, Clone)]
pub struct Finding {
    pub test_case: TestCase,
    pub rule: Rule,
    /// md5 of the normalized test case, useful for spotting repeats in the logs.
    pub input_hash: String,
}

impl Finding {
    fn new(test_case: &TestCase, rule: Rule) -> Self {
        Self {
            test_case: test_case.clone(),
            rule,
            input_hash: test_case.digest(),
        }
    }
}

/// An `Oracle` decides whether an observed result is worth keeping.
///
/// # Type Parameters
/// * `R`: Random number generator for probabilistic verdicts.
pub trait Oracle<R: Rng + ?Sized> {
    /// Examines the result of executing `test_case`.
    ///
    /// `result` is `None` when nothing was observed. The only side effect allowed is
    /// advancing `session` when the result shows the target accepted authentication.
    fn examine(
        &self,
        result: Option<&Observation>,
        test_case: &TestCase,
        session: &mut SessionState,
        rng: &mut R,
    ) -> Option<Finding>;

    fn is_interesting(
        &self,
        result: Option<&Observation>,
        test_case: &TestCase,
        session: &mut SessionState,
        rng: &mut R,
    ) -> bool {
        self.examine(result, test_case, session, rng).is_some()
    }
}

/// Rule table for both protocols, selected by [`ProtocolKind`].
#[derive(Debug, Clone)]
pub struct InterestingnessOracle {
    kind: ProtocolKind,
    noise_probability: f64,
}

impl InterestingnessOracle {
    /// `noise_probability` is clamped to `[0, 1]`; zero disables the noise rule.
    pub fn new(kind: ProtocolKind, noise_probability: f64) -> Self {
        let noise_probability = if noise_probability.is_nan() {
            0.0
        } else {
            noise_probability.clamp(0.0, 1.0)
        };
        Self {
            kind,
            noise_probability,
        }
    }

    pub fn noise_probability(&self) -> f64 {
        self.noise_probability
    }

    fn examine_command<R: Rng + ?Sized>(
        &self,
        result: Option<&Observation>,
        test_case: &TestCase,
        session: &mut SessionState,
        rng: &mut R,
    ) -> Option<Rule> {
        let response_bytes: &[u8] = match result {
            Some(Observation::Response(bytes)) => bytes,
            _ => &[],
        };
        let Some(&code) = response_bytes.first() else {
            return Some(Rule::NoResponse);
        };
        let command_opcode = test_case.opcode();

        if command_opcode == Some(opcode::AUTHENTICATE) && code == response::SUCCESS {
            if !session.authenticated {
                tracing::info!("target accepted authentication");
            }
            session.authenticated = true;
        }

        let name = test_case.name().unwrap_or("");
        if PASSCODE_PROBE_PREFIXES.iter().any(|p| name.starts_with(p))
            && code != response::AUTH_FAIL
        {
            return Some(Rule::PasscodeNotRejected);
        }

        let undefined_opcode = command_opcode.is_some_and(|op| op >= opcode::FIRST_UNDEFINED);
        if (name.to_lowercase().contains("unknown") || undefined_opcode)
            && code != response::INVALID_COMMAND
        {
            return Some(Rule::UnknownCommandAccepted);
        }

        if matches!(command_opcode, Some(opcode::OPEN | opcode::CLOSE))
            && !session.authenticated
            && code != response::NOT_ALLOWED
        {
            return Some(Rule::UnauthenticatedAccess);
        }

        if code >= response::FIRST_UNDEFINED {
            return Some(Rule::UndefinedResponseCode);
        }

        if self.noise_probability > 0.0 && rng.random_bool(self.noise_probability) {
            return Some(Rule::ExplorationNoise);
        }
        None
    }

    fn examine_http(result: Option<&Observation>) -> Option<Rule> {
        match result {
            Some(Observation::Http(http)) if http.status >= SERVER_ERROR_STATUS => {
                Some(Rule::ServerError)
            }
            _ => None,
        }
    }
}

impl<R: Rng + ?Sized> Oracle<R> for InterestingnessOracle {
    fn examine(
        &self,
        result: Option<&Observation>,
        test_case: &TestCase,
        session: &mut SessionState,
        rng: &mut R,
    ) -> Option<Finding> {
        let rule = match self.kind {
            ProtocolKind::Binary => self.examine_command(result, test_case, session, rng),
            ProtocolKind::Structured => Self::examine_http(result),
        }?;
        Some(Finding::new(test_case, rule))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::HttpResponse;
    use crate::input::FieldValue;
    use rand_chacha::ChaCha8Rng;
    use rand_core::SeedableRng;
    use std::collections::BTreeMap;

    fn quiet() -> InterestingnessOracle {
        InterestingnessOracle::new(ProtocolKind::Binary, 0.0)
    }

    fn rng() -> ChaCha8Rng {
        ChaCha8Rng::from_seed([0u8; 32])
    }

    fn verdict(
        oracle: &InterestingnessOracle,
        response_bytes: &[u8],
        tc: &TestCase,
        session: &mut SessionState,
    ) -> Option<Rule> {
        let observation = Observation::Response(response_bytes.to_vec());
        oracle
            .examine(Some(&observation), tc, session, &mut rng())
            .map(|f| f.rule)
    }

    #[test]
    fn missing_or_empty_response_is_interesting() {
        let oracle = quiet();
        let tc = TestCase::command(None, vec![0x00]);
        let mut session = SessionState::default();
        assert!(oracle.is_interesting(None, &tc, &mut session, &mut rng()));
        assert_eq!(verdict(&oracle, &[], &tc, &mut session), Some(Rule::NoResponse));
    }

    #[test]
    fn invalid_passcode_must_be_rejected() {
        let oracle = quiet();
        let tc = TestCase::command(Some("invalid_passcode_x"), vec![0x00, 9, 9, 9, 9, 9, 9]);
        let mut session = SessionState::default();
        assert_eq!(verdict(&oracle, &[response::AUTH_FAIL], &tc, &mut session), None);
        for code in [0x00, 0x02, 0x03, 0x04] {
            assert_eq!(
                verdict(&oracle, &[code], &tc, &mut SessionState::default()),
                Some(Rule::PasscodeNotRejected),
                "code {code:#04x}"
            );
        }
        for prefix in ["short_passcode", "long_passcode_7"] {
            let tc = TestCase::command(Some(prefix), vec![0x00, 1]);
            assert_eq!(
                verdict(&oracle, &[response::SUCCESS], &tc, &mut SessionState::default()),
                Some(Rule::PasscodeNotRejected)
            );
        }
    }

    #[test]
    fn unknown_commands_must_be_reported_invalid() {
        let oracle = quiet();
        let mut session = SessionState::default();
        let undefined = TestCase::command(None, vec![0x07]);
        assert_eq!(
            verdict(&oracle, &[response::INVALID_COMMAND], &undefined, &mut session),
            None
        );
        assert_eq!(
            verdict(&oracle, &[response::SUCCESS], &undefined, &mut session),
            Some(Rule::UnknownCommandAccepted)
        );

        let named = TestCase::command(Some("Send_UNKNOWN_cmd"), vec![0x00]);
        assert_eq!(
            verdict(&oracle, &[response::AUTH_FAIL], &named, &mut session),
            Some(Rule::UnknownCommandAccepted)
        );
    }

    #[test]
    fn open_without_authentication_must_be_refused() {
        let oracle = quiet();
        let open = TestCase::command(Some("open_door"), vec![opcode::OPEN]);
        let mut session = SessionState::default();
        assert_eq!(verdict(&oracle, &[response::NOT_ALLOWED], &open, &mut session), None);
        assert_eq!(
            verdict(&oracle, &[response::SUCCESS], &open, &mut session),
            Some(Rule::UnauthenticatedAccess)
        );

        let close = TestCase::command(None, vec![opcode::CLOSE, 0xAA]);
        assert_eq!(
            verdict(&oracle, &[response::SUCCESS], &close, &mut session),
            Some(Rule::UnauthenticatedAccess)
        );
    }

    #[test]
    fn successful_authentication_advances_session_state() {
        let oracle = quiet();
        let mut session = SessionState::default();
        let auth = TestCase::command(Some("auth_attempt"), vec![0, 1, 2, 3, 4, 5, 6]);

        assert_eq!(verdict(&oracle, &[response::AUTH_FAIL], &auth, &mut session), None);
        assert!(!session.authenticated);

        assert_eq!(verdict(&oracle, &[response::SUCCESS], &auth, &mut session), None);
        assert!(session.authenticated);

        let open = TestCase::command(None, vec![opcode::OPEN]);
        assert_eq!(verdict(&oracle, &[response::SUCCESS], &open, &mut session), None);

        session.reset();
        assert!(!session.authenticated);
    }

    #[test]
    fn undefined_response_codes_are_interesting() {
        let oracle = quiet();
        let mut session = SessionState {
            authenticated: true,
        };
        let open = TestCase::command(None, vec![opcode::OPEN]);
        assert_eq!(verdict(&oracle, &[response::LOCK_ERROR], &open, &mut session), None);
        assert_eq!(
            verdict(&oracle, &[0x05], &open, &mut session),
            Some(Rule::UndefinedResponseCode)
        );
        assert_eq!(
            verdict(&oracle, &[0xFF, 0x00], &open, &mut session),
            Some(Rule::UndefinedResponseCode)
        );
    }

    #[test]
    fn noise_flags_roughly_its_share_of_results() {
        let oracle = InterestingnessOracle::new(ProtocolKind::Binary, DEFAULT_NOISE_PROBABILITY);
        let mut rng = ChaCha8Rng::seed_from_u64(99);
        let auth = TestCase::command(None, vec![0x00, 1]);
        let observation = Observation::Response(vec![response::AUTH_FAIL]);
        let flagged = (0..10_000)
            .filter(|_| {
                oracle
                    .examine(Some(&observation), &auth, &mut SessionState::default(), &mut rng)
                    .is_some_and(|f| f.rule == Rule::ExplorationNoise)
            })
            .count();
        assert!((300..700).contains(&flagged), "flagged {flagged} of 10000");
    }

    #[test]
    fn noise_probability_is_clamped() {
        assert_eq!(InterestingnessOracle::new(ProtocolKind::Binary, 3.0).noise_probability(), 1.0);
        assert_eq!(InterestingnessOracle::new(ProtocolKind::Binary, -1.0).noise_probability(), 0.0);
        assert_eq!(
            InterestingnessOracle::new(ProtocolKind::Binary, f64::NAN).noise_probability(),
            0.0
        );
    }

    #[test]
    fn structured_oracle_only_cares_about_server_errors() {
        let oracle = InterestingnessOracle::new(ProtocolKind::Structured, 1.0);
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), FieldValue::from("widget"));
        let tc = TestCase::fields(fields);
        let mut session = SessionState::default();
        let status = |status| {
            Observation::Http(HttpResponse {
                status,
                body: String::new(),
            })
        };

        assert!(!oracle.is_interesting(Some(&status(200)), &tc, &mut session, &mut rng()));
        assert!(!oracle.is_interesting(Some(&status(499)), &tc, &mut session, &mut rng()));
        assert!(!oracle.is_interesting(None, &tc, &mut session, &mut rng()));
        let finding = oracle
            .examine(Some(&status(503)), &tc, &mut session, &mut rng())
            .unwrap();
        assert_eq!(finding.rule, Rule::ServerError);
        assert_eq!(finding.input_hash, tc.digest());
        assert_eq!(session, SessionState::default());
    }
}
