use std::time::Duration;

use anyhow::Result;
use colored::Colorize;

use crate::client::Target;

pub fn run(target: Target) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let client = target.connect().await?;
        client.terminate().await?;
        println!("{} termination requested on {}", "✓".green(), client.controller());
        client.host().shutdown(Duration::from_secs(1)).await;
        Ok::<_, anyhow::Error>(())
    })
}
