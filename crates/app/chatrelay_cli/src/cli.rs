use clap::{Parser, Subcommand};

pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:3000/api/chat";

#[derive(Parser, Debug)]
#[command(
    name = "chatrelay",
    about = "Chat with a Chatrelay server from the terminal",
    version
)]
pub struct Cli {
    /// Chat endpoint of the server.
    #[arg(long, env = "CHATRELAY_URL", default_value = DEFAULT_ENDPOINT, global = true)]
    pub url: String,

    /// API key sent in the `x-api-key` header.
    #[arg(long, env = "CHATRELAY_API_KEY", global = true, hide_env_values = true)]
    pub api_key: Option<String>,

    /// Site URL the assistant should link to.
    #[arg(long, global = true)]
    pub site_url: Option<String>,

    /// Client-side request timeout in seconds.
    #[arg(long, default_value_t = 30, global = true)]
    pub timeout_secs: u64,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Interactive chat (default). Submitting a new line while a reply is
    /// pending abandons the pending request.
    Chat,

    /// Send one message and print the reply.
    Send {
        /// Message text.
        message: String,

        /// Thread identifier to continue.
        #[arg(long)]
        thread_id: Option<String>,
    },

    /// Show server status.
    Status,

    /// Print the client version.
    Version,
}
