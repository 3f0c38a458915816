pub mod answer;
pub mod payload;
pub mod question;
pub mod session;

pub use answer::{Answer, AnswerValue, Provenance};
pub use payload::{Payload, PayloadContent, PayloadKind, PayloadMeta, Table};
pub use question::{AnswerShape, DataReference, Question, ReferenceKind, SubmissionTarget};
pub use session::{ChainSession, ChainStatus, SessionSnapshot, Stage, StepOutcome, StepRecord};
