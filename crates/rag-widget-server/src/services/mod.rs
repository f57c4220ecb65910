pub mod maintenance;
pub mod prompt;
pub mod query_engine;
pub mod rate_limit;
pub mod widget_tokens;

pub use prompt::PromptComposer;
pub use query_engine::QueryEngine;
pub use rate_limit::RateLimiter;
pub use widget_tokens::WidgetTokenService;
