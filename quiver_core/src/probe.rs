use crate::executor::CommandTransport;
use crate::input::TestCase;
use std::thread::sleep;
use std::time::Duration;

/// Log marker the lock writes for every error code it reports.
pub const ERROR_CODE_MARKER: &str = "[Error] Code:";

/// One error code surfaced while replaying a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeHit {
    pub name: String,
    pub command: Vec<u8>,
    /// Text after the marker, e.g. `04`.
    pub error_code: String,
    /// Every log line the command produced.
    pub logs: Vec<String>,
}

impl ProbeHit {
    /// Command bytes as `0x00 0x01 ...`.
    pub fn command_hex(&self) -> String {
        self.command
            .iter()
            .map(|b| format!("0x{b:02X}"))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Outcome of replaying a failure file against a live transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeSummary {
    pub replayed: usize,
    pub hits: Vec<ProbeHit>,
    /// Set when the transport died and could not be brought back.
    pub aborted: bool,
}

/// Replays binary failures one by one and collects the error codes the target logs.
///
/// Logs are read before and after each command; only new lines count. On a transport
/// error the link is torn down and rebuilt after `pause`; if that fails, probing stops.
/// Structured test cases are skipped.
pub fn probe_failures<T: CommandTransport>(
    transport: &mut T,
    device_name: &str,
    failures: &[TestCase],
    pause: Duration,
) -> ProbeSummary {
    let mut summary = ProbeSummary::default();
    if let Err(err) = transport.connect(device_name) {
        tracing::error!("could not connect to {device_name}: {err}");
        summary.aborted = true;
        return summary;
    }

    for (index, test_case) in failures.iter().enumerate() {
        let Some(command) = test_case.command_bytes() else {
            continue;
        };
        let name = test_case.name().unwrap_or("unnamed");
        tracing::info!(index = index + 1, total = failures.len(), name, "probing");

        let before = transport.read_logs().len();
        match transport.write_command(command) {
            Ok(_) => {
                summary.replayed += 1;
                let new_logs: Vec<String> =
                    transport.read_logs().into_iter().skip(before).collect();
                for line in &new_logs {
                    let Some((_, code)) = line.split_once(ERROR_CODE_MARKER) else {
                        continue;
                    };
                    let hit = ProbeHit {
                        name: name.to_string(),
                        command: command.to_vec(),
                        error_code: code.trim().to_string(),
                        logs: new_logs.clone(),
                    };
                    tracing::warn!(
                        error_code = %hit.error_code,
                        command = %hit.command_hex(),
                        name,
                        "error code reported"
                    );
                    summary.hits.push(hit);
                }
            }
            Err(err) => {
                tracing::warn!("probe command failed: {err}");
                if let Err(err) = transport.disconnect() {
                    tracing::debug!("disconnect before reconnect failed: {err}");
                }
                sleep(pause);
                if let Err(err) = transport.connect(device_name) {
                    tracing::error!("could not reconnect, stopping probe: {err}");
                    summary.aborted = true;
                    return summary;
                }
            }
        }
    }

    if let Err(err) = transport.disconnect() {
        tracing::debug!("disconnect after probe failed: {err}");
    }
    summary
}
