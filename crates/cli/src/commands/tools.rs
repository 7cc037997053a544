//! `cxloop tools`: list registered tools and their arguments.

use cxloop_tools::{OrderBook, default_registry};

pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    let registry = default_registry(OrderBook::new())?;

    println!("Registered tools ({}):", registry.len());
    for def in registry.definitions() {
        println!();
        println!("  {}", def.name);
        println!("    {}", def.description);
        let Some(schema) = registry.schema(&def.name) else {
            continue;
        };
        for field in &schema.fields {
            let required = if field.required { "required" } else { "optional" };
            match &field.pattern {
                Some(pattern) => println!(
                    "    - {} ({}, {required}, pattern {pattern})",
                    field.name,
                    field.kind.as_str()
                ),
                None => println!("    - {} ({}, {required})", field.name, field.kind.as_str()),
            }
        }
    }

    Ok(())
}
