// Library interface for paperscope modules
// This allows tests and the binaries to import modules

pub mod digest;
pub mod ingestion;
pub mod llm;
pub mod pipeline;
pub mod retry;
pub mod slack;
pub mod storage;
pub mod types;
