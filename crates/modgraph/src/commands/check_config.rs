use crate::cli::CheckConfigArgs;
use anyhow::Result;

pub fn run(args: CheckConfigArgs) -> Result<()> {
    let config = args.config.load()?;

    println!("Configuration OK");
    println!("  scopes:                {}", config.scopes.len() + 1);
    for (child, parent) in &config.scopes {
        println!("    {child} -> {parent}");
    }
    println!("  evidence cap:          {}", config.evidence_cap);
    println!("  reverse index ceiling: {}", config.reverse_index_ceiling);
    println!("  max depth:             {}", config.max_depth);
    println!("  threads:               {}", config.effective_threads());
    println!("  facts dir:             {}", config.facts_dir.display());
    Ok(())
}
