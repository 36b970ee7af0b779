use console::style;
use crate::cli::commands::ToolsArgs;
use crate::errors::WardenError;
use crate::tools::{ToolCategory, ToolEntry, TOOL_REGISTRY};

fn parse_category(value: &str) -> Result<ToolCategory, WardenError> {
    let wanted = value.trim().to_lowercase().replace('_', "-");
    ToolCategory::ALL
        .iter()
        .copied()
        .find(|c| c.as_str() == wanted)
        .ok_or_else(|| {
            let known: Vec<&str> = ToolCategory::ALL.iter().map(|c| c.as_str()).collect();
            WardenError::Config(format!("Unknown tool category '{}'. Known: {}", value, known.join(", ")))
        })
}

fn select(category: Option<ToolCategory>) -> Vec<&'static ToolEntry> {
    TOOL_REGISTRY
        .iter()
        .filter(|entry| category.map_or(true, |c| entry.category == c))
        .collect()
}

pub fn handle_tools(args: ToolsArgs) -> Result<(), WardenError> {
    let category = args.category.as_deref().map(parse_category).transpose()?;
    let entries = select(category);

    println!("{:<14} {:<24} {:<18} {}", style("TOOL").bold(), style("CATEGORY").bold(), style("ALIASES").bold(), style("DESCRIPTION").bold());
    for entry in &entries {
        println!(
            "{:<14} {:<24} {:<18} {}",
            style(entry.name).cyan(),
            entry.category.as_str(),
            entry.aliases.join(","),
            entry.description
        );
    }
    println!("\n{} tool(s)", entries.len());
    Ok(())
}
