//! weft CLI entry point.

use weft_lib::cli::{self, Cli};
use weft_lib::core::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();
    cli::execute(cli).await
}
