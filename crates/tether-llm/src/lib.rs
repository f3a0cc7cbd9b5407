pub mod anthropic;
pub mod mock;

pub use anthropic::AnthropicClient;
pub use mock::{MockResponse, MockSummarizer};
