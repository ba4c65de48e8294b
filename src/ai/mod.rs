pub mod reliable;
pub mod router;
pub mod types;

pub use reliable::ReliableRouter;
pub use router::{AiRouter, Result};
pub use types::{
    AiRequest, AiResponse, Message, MessageRole, NativeToolCall, NativeToolSpec, OutputFile,
    RequestOptions, TokenUsage,
};
