pub mod campaign;
pub mod config;
pub mod corpus;
pub mod executor;
pub mod input;
pub mod mutator;
pub mod oracle;
pub mod output;
pub mod probe;
pub mod protocol;
pub mod scheduler;

pub use campaign::{CampaignError, CampaignReport, CampaignState, CancellationToken, FuzzCampaign};
pub use config::QuiverConfig;
pub use corpus::{CorpusError, FailureCorpus, SeedQueue, load_seed_file};
pub use executor::{
    CommandExecutor, CommandTransport, ExecutionError, HttpClient, HttpExecutor, HttpResponse,
    Observation, SimulatedLock, TargetExecutor, TransportError,
};
pub use input::{FieldValue, Payload, TestCase};
pub use mutator::{MutationEngine, Mutator};
pub use oracle::{Finding, InterestingnessOracle, Oracle, Rule, SessionState};
pub use output::OutputDir;
pub use probe::{ProbeHit, ProbeSummary, probe_failures};
pub use protocol::{Protocol, ProtocolKind, StructuredFields};
pub use scheduler::{ConstantEnergy, EnergyScheduler};
