pub mod engine;
pub mod followup;
pub mod lines;
pub mod registry;
pub mod router;
pub mod session;
pub mod summary;

pub use engine::{DialogEngine, EngineReply, ReplyAction};
pub use followup::{FollowUpEngine, FollowUpKind, FollowUpReply};
pub use registry::{SessionHandle, SessionRegistry};
pub use router::{Answer, AnswerSource, NextAction, Router};
pub use session::{CallSession, SessionState};
