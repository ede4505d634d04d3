pub mod error;
pub mod natives;
pub mod session;
pub mod sink;
pub mod snapshot;
pub mod value;
pub mod vm;

pub use error::{LoadError, RuntimeError};
pub use natives::{Machine, NativeFn, NativeRegistry, quest_natives};
pub use session::{ChoiceResolver, ResolveError, Session, SessionOutcome};
pub use sink::{Discard, OutputSink, Transcript};
pub use snapshot::Snapshot;
pub use value::{Context, Value};
pub use vm::{Choice, PendingChoice, RunOutcome, Vm};
