//! Cross-cutting services: artifact IO, stamping, instrumentation, and the
//! bounded LLM client.

pub mod artifact;
pub mod instrument;
pub mod llm;
pub mod stamp;
