//! Model round-trip: send a prompt, get raw text back.

mod command;
mod scripted;

pub use command::CommandModel;
pub use scripted::ScriptedModel;

use async_trait::async_trait;

use crate::errors::ModelError;

/// A text-in, text-out language model.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Send `prompt` and return the raw response text.
    async fn complete(&self, prompt: &str) -> Result<String, ModelError>;

    /// Short label for logs.
    fn name(&self) -> &str;
}
