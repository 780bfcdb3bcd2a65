use anyhow::Result;
use colored::Colorize;
use tb_core::TestExecutionState;

use crate::client::Target;

pub fn run(target: Target) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let client = target.connect().await?;
        let state = client.state().await?;

        let label = match state {
            TestExecutionState::Passed => state.as_str().green(),
            TestExecutionState::Failed | TestExecutionState::Crashed => state.as_str().red(),
            TestExecutionState::None => state.as_str().dimmed(),
            _ => state.as_str().yellow(),
        };
        println!("controller {}: {}", client.controller(), label.bold());

        if !state.is_idle() {
            let steps = client.test_case().await?;
            println!("current run: {} step(s)", steps.len());
            for step in &steps {
                println!("  {}", step.display_name());
            }
        }

        client.host().shutdown(std::time::Duration::from_secs(1)).await;
        Ok::<_, anyhow::Error>(())
    })
}
