//! Session and entity listeners.
//!
//! Listeners observe the flush pipeline through tagged events:
//!
//! | Session phase                  | Entity phase        | When                           |
//! |--------------------------------|---------------------|--------------------------------|
//! | `BeforeFlushBeforeConstraints` | `BeforeConstraints` | before validation              |
//! | `AfterConstraintsFail`         |                     | validation failed              |
//! | `BeforeFlushAfterConstraints`  | `AfterConstraints`  | validated, not yet durable     |
//! | `Flushed`                      | `Flushed`           | durable, on the flushing thread|
//! |                                | `Async`             | durable, on the dispatcher     |
//!
//! Session and entity listeners share one ordered list; within a phase they
//! run in registration order.

mod dispatcher;
mod event;
mod registry;

pub(crate) use dispatcher::AsyncDispatcher;
pub use event::{EntityEvent, EntityListener, EntityPhase, SessionEvent, SessionListener, SessionPhase};
pub(crate) use registry::{Listener, Registration};
pub use registry::{ListenerId, ListenerRegistry};
