use clap::{Parser, Subcommand, ValueEnum};

/// Local gateway exposing OpenAI and Anthropic surfaces over many providers
#[derive(Debug, Parser)]
#[command(name = "ai-gateway", about = "Local HTTP gateway for LLM providers")]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the HTTP surface on the loopback interface
    Serve {
        #[arg(long, default_value_t = 3000, env = "AI_GATEWAY_PORT")]
        port: u16,
    },
    /// Acquire credentials for a provider
    Login {
        /// Provider id (e.g. openai, github-copilot, qwen-cli)
        #[arg(long)]
        provider: String,
    },
    /// Probe a running gateway with text and tool requests
    Doctor {
        #[arg(long, default_value_t = 3000)]
        port: u16,
        /// Limit probes to one provider
        #[arg(long)]
        provider: Option<String>,
        #[arg(long, value_enum, default_value_t = Endpoint::Both)]
        endpoint: Endpoint,
        /// Print response bodies for failing probes
        #[arg(long)]
        verbose: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Endpoint {
    Chat,
    Messages,
    Both,
}

impl Endpoint {
    pub fn includes_chat(self) -> bool {
        matches!(self, Self::Chat | Self::Both)
    }

    pub fn includes_messages(self) -> bool {
        matches!(self, Self::Messages | Self::Both)
    }
}
