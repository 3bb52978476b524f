use crate::corpus::{CorpusError, FailureCorpus, SeedQueue};
use crate::executor::TargetExecutor;
use crate::input::TestCase;
use crate::mutator::{MutationEngine, Mutator};
use crate::oracle::{DEFAULT_NOISE_PROBABILITY, InterestingnessOracle, Oracle, SessionState};
use crate::protocol::Protocol;
use crate::scheduler::EnergyScheduler;
use rand::Rng;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Outer iterations run by a campaign unless told otherwise.
pub const DEFAULT_MAX_ITERATIONS: u64 = 10;

/// Lifecycle of a [`FuzzCampaign`]. Terminal states never resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CampaignState {
    Idle,
    Running,
    /// The seed queue ran dry or the iteration budget was spent.
    Completed,
    /// Cancelled from outside, or the target could not be reconnected.
    Interrupted,
    /// The failure corpus could not be persisted.
    Failed,
}

impl CampaignState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CampaignState::Completed | CampaignState::Interrupted | CampaignState::Failed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignState::Idle => "idle",
            CampaignState::Running => "running",
            CampaignState::Completed => "completed",
            CampaignState::Interrupted => "interrupted",
            CampaignState::Failed => "failed",
        }
    }
}

impl fmt::Display for CampaignState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cooperative cancellation flag shared between a campaign and whoever may stop it.
///
/// The campaign polls it between outer iterations, never in the middle of an
/// execution attempt.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Error, Debug)]
pub enum CampaignError {
    #[error("campaign already finished ({0}); terminal campaigns cannot be resumed")]
    AlreadyFinished(CampaignState),
    #[error("failed to persist the failure corpus: {0}")]
    Persistence(#[from] CorpusError),
}

/// Summary of a finished campaign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CampaignReport {
    pub state: CampaignState,
    /// Outer iterations (seeds processed).
    pub iterations: u64,
    pub executions: u64,
    pub execution_errors: u64,
    pub reconnects: u64,
    pub failures_found: usize,
    pub seeds_remaining: usize,
    /// Where the failures were written; `None` when there was nothing to write.
    pub failure_file: Option<PathBuf>,
}

impl fmt::Display for CampaignReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Campaign {}", self.state)?;
        writeln!(f, "  iterations:       {}", self.iterations)?;
        writeln!(f, "  executions:       {}", self.executions)?;
        writeln!(f, "  execution errors: {}", self.execution_errors)?;
        writeln!(f, "  reconnects:       {}", self.reconnects)?;
        writeln!(f, "  failures found:   {}", self.failures_found)?;
        writeln!(f, "  seeds remaining:  {}", self.seeds_remaining)?;
        match &self.failure_file {
            Some(path) => write!(f, "  failures written: {}", path.display()),
            None => write!(f, "  failures written: none"),
        }
    }
}

/// Feedback-driven mutation campaign against a single target.
///
/// Each outer iteration pops one seed, spends its energy on mutants, runs each mutant
/// through the executor and the oracle, and pushes interesting mutants both into the
/// failure corpus and back onto the tail of the seed queue.
///
/// # Type Parameters
/// * `E`: The executor that talks to the target.
/// * `S`: Energy policy deciding how many mutants each seed gets.
/// * `R`: Random number generator driving mutation and oracle noise.
pub struct FuzzCampaign<E: TargetExecutor, S: EnergyScheduler, R: Rng> {
    state: CampaignState,
    queue: SeedQueue,
    failures: FailureCorpus,
    session: SessionState,
    mutator: MutationEngine,
    oracle: InterestingnessOracle,
    scheduler: S,
    executor: E,
    rng: R,
    max_iterations: u64,
    failure_file: Option<PathBuf>,
    persist_incrementally: bool,
    cancellation: CancellationToken,
    iterations: u64,
    executions: u64,
    execution_errors: u64,
    reconnects: u64,
}

impl<E: TargetExecutor, S: EnergyScheduler, R: Rng> FuzzCampaign<E, S, R> {
    /// Builds an idle campaign; `seeds` are queued in order.
    pub fn new(
        protocol: Protocol,
        seeds: impl IntoIterator<Item = TestCase>,
        executor: E,
        scheduler: S,
        rng: R,
    ) -> Self {
        let oracle = InterestingnessOracle::new(protocol.kind(), DEFAULT_NOISE_PROBABILITY);
        Self {
            state: CampaignState::Idle,
            queue: seeds.into_iter().collect(),
            failures: FailureCorpus::new(),
            session: SessionState::default(),
            mutator: MutationEngine::new(protocol),
            oracle,
            scheduler,
            executor,
            rng,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            failure_file: None,
            persist_incrementally: false,
            cancellation: CancellationToken::new(),
            iterations: 0,
            executions: 0,
            execution_errors: 0,
            reconnects: 0,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: u64) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_noise_probability(mut self, noise_probability: f64) -> Self {
        let kind = self.mutator.protocol().kind();
        self.oracle = InterestingnessOracle::new(kind, noise_probability);
        self
    }

    /// Where failures are persisted. Without one the corpus stays in memory.
    pub fn with_failure_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.failure_file = Some(path.into());
        self
    }

    /// Rewrite the failure file after every outer iteration that found something.
    pub fn with_incremental_persistence(mut self, enabled: bool) -> Self {
        self.persist_incrementally = enabled;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn state(&self) -> CampaignState {
        self.state
    }

    pub fn failures(&self) -> &FailureCorpus {
        &self.failures
    }

    pub fn queue(&self) -> &SeedQueue {
        &self.queue
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn failure_file(&self) -> Option<&Path> {
        self.failure_file.as_deref()
    }

    /// Runs the campaign to a terminal state.
    ///
    /// Whatever the outcome, the failure corpus is persisted before returning. If that
    /// last write fails the campaign ends `Failed` and the error is returned.
    pub fn run(&mut self) -> Result<CampaignReport, CampaignError> {
        if self.state != CampaignState::Idle {
            return Err(CampaignError::AlreadyFinished(self.state));
        }
        self.state = CampaignState::Running;
        tracing::info!(
            target = %self.executor.target(),
            protocol = self.mutator.protocol().kind().as_str(),
            seeds = self.queue.len(),
            max_iterations = self.max_iterations,
            "campaign started"
        );

        let outcome = self.fuzz_loop();

        let written = match self.persist() {
            Ok(written) => written,
            Err(err) => {
                tracing::error!("final persistence failed: {err}");
                self.state = CampaignState::Failed;
                return Err(CampaignError::Persistence(err));
            }
        };
        self.state = outcome;
        let report = self.report(written);
        tracing::info!(
            state = %report.state,
            iterations = report.iterations,
            failures = report.failures_found,
            "campaign finished"
        );
        Ok(report)
    }

    fn fuzz_loop(&mut self) -> CampaignState {
        let mut needs_reconnect = false;
        loop {
            if self.cancellation.is_cancelled() {
                tracing::info!(iterations = self.iterations, "campaign cancelled");
                return CampaignState::Interrupted;
            }
            if self.iterations >= self.max_iterations {
                return CampaignState::Completed;
            }
            if needs_reconnect {
                self.reconnects += 1;
                tracing::warn!(target = %self.executor.target(), "reconnecting to target");
                if let Err(err) = self.executor.reconnect() {
                    tracing::error!("reconnect failed, stopping campaign: {err}");
                    return CampaignState::Interrupted;
                }
                needs_reconnect = false;
            }
            let Some(seed) = self.queue.pop() else {
                tracing::info!("seed queue exhausted");
                return CampaignState::Completed;
            };

            let found_before = self.failures.len();
            let energy = self.scheduler.assign_energy(&seed);
            for _ in 0..energy {
                if self.execute_mutant(&seed) {
                    needs_reconnect = true;
                }
            }
            self.iterations += 1;

            if self.persist_incrementally
                && self.failures.len() > found_before
                && let Err(err) = self.persist()
            {
                tracing::error!("incremental persistence failed: {err}");
            }
        }
    }

    /// Mutates `seed` once and judges the result. Returns true when the target
    /// connection needs rebuilding.
    fn execute_mutant(&mut self, seed: &TestCase) -> bool {
        let mutant = self.mutator.mutate(seed, &mut self.rng);
        tracing::debug!(input = %mutant.to_json(), "executing mutant");
        self.executions += 1;

        let observation = match self.executor.execute(&mutant) {
            Ok(observation) => observation,
            Err(err) => {
                self.execution_errors += 1;
                tracing::warn!("execution attempt failed: {err}");
                return err.requires_reconnect();
            }
        };

        if let Some(finding) =
            self.oracle
                .examine(Some(&observation), &mutant, &mut self.session, &mut self.rng)
        {
            tracing::info!(
                rule = finding.rule.description(),
                hash = %finding.input_hash,
                input = %finding.test_case.to_json(),
                "interesting input found"
            );
            self.failures.add(mutant.clone());
            self.queue.push(mutant);
        }
        false
    }

    fn persist(&self) -> Result<Option<PathBuf>, CorpusError> {
        let Some(path) = &self.failure_file else {
            return Ok(None);
        };
        let written = self.failures.persist(path)?;
        Ok(written.then(|| path.clone()))
    }

    fn report(&self, failure_file: Option<PathBuf>) -> CampaignReport {
        CampaignReport {
            state: self.state,
            iterations: self.iterations,
            executions: self.executions,
            execution_errors: self.execution_errors,
            reconnects: self.reconnects,
            failures_found: self.failures.len(),
            seeds_remaining: self.queue.len(),
            failure_file,
        }
    }
}
