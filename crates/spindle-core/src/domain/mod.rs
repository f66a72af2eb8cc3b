//! Domain model (ids, tasks, states, outcomes, wire envelopes, errors).

pub mod envelope;
pub mod errors;
pub mod ids;
pub mod outcome;
pub mod state;
pub mod task;

pub use self::envelope::{ResultMessage, TaskMessage};
pub use self::errors::PoolError;
pub use self::ids::{Id, IdMarker, ParseIdError, TaskId};
pub use self::outcome::{Outcome, SerializedError, TaskError};
pub use self::state::{TaskState, WorkerState};
pub use self::task::{Payload, Task};
