pub mod batch_backend;
pub mod gemini_client;
pub mod scripted_backend;
pub mod wire;

pub use batch_backend::BatchBackend;
pub use gemini_client::GeminiBatchClient;
pub use scripted_backend::{JobContext, ScriptedBackend, SubmittedJob};
pub use wire::{GenerateRequest, InlinedResponse, JobHandle, JobSnapshot, JobState, Modality, Part};
