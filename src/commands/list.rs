//! List-collectors command implementation.

use crate::registry::CollectorRegistry;

/// Prints every identifier the built-in registry resolves.
pub fn command_list_collectors() -> anyhow::Result<()> {
    let registry = CollectorRegistry::with_builtins();

    println!("Available collectors");
    println!("====================");
    for id in registry.identifiers() {
        println!("  {id}");
    }
    Ok(())
}
