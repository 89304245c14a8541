use anyhow::Result;

use tickerfx::runtime::Runner;
use tickerfx::state::Config;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cfg = Config::from_env();
    Runner::new(cfg)?.run().await
}
