pub mod mock_llm;
pub mod server;
