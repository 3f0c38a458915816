pub mod acquirer;
pub mod analysis;
pub mod decoder;
pub mod deriver;
pub mod extractor;
pub mod llm_service;
pub mod outcome_writer;
pub mod submitter;

pub use acquirer::{DataAcquirer, DataSource};
pub use deriver::AnswerDeriver;
pub use extractor::{ContentExtractor, Extractor};
pub use llm_service::{LlmService, Reasoner, ReasoningPrompt};
pub use outcome_writer::OutcomeWriter;
pub use submitter::{HttpSubmitter, Submitter};
