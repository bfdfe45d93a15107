//! VST3 plugin scanner example
//!
//! Scans the standard locations, or the directories given on the command
//! line, and prints what it finds grouped by kind.

use std::collections::BTreeMap;
use std::path::PathBuf;
use vst3_bridge::prelude::*;

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    println!("VST3 Plugin Scanner");
    println!("==================\n");

    let dirs: Vec<PathBuf> = std::env::args().skip(1).map(PathBuf::from).collect();
    let host = HostContext::init()?;

    let mut plugins: Vec<PluginInfo> = Vec::new();
    if dirs.is_empty() {
        println!("Scanning standard locations...\n");
        host.scan_standard_locations(|info| {
            println!("  Found: {}", info.name);
            plugins.push(info.clone());
        })?;
    } else {
        for dir in &dirs {
            println!("Scanning {}...", dir.display());
            if let Err(e) = host.scan_directory(dir, |info| plugins.push(info.clone())) {
                eprintln!("  {}", e);
            }
        }
        println!();
    }

    println!("\n{} plugins found:\n", plugins.len());

    let mut by_kind: BTreeMap<&str, Vec<&PluginInfo>> = BTreeMap::new();
    for plugin in &plugins {
        let kind = if plugin.is_instrument {
            "Instruments"
        } else {
            "Effects"
        };
        by_kind.entry(kind).or_default().push(plugin);
    }

    for (kind, list) in by_kind {
        println!("{}:", kind);
        for plugin in list {
            println!("  {} by {} {}", plugin.name, plugin.vendor, plugin.version);
            println!("    Category: {}", plugin.category);
            println!("    Class:    {}", plugin.class_id);
            println!("    Path:     {}", plugin.path.display());
        }
        println!();
    }

    if let Some(path) = std::env::var_os("VST3_SCAN_JSON") {
        std::fs::write(&path, serde_json::to_string_pretty(&plugins)?)?;
        println!("Wrote {}", PathBuf::from(path).display());
    }

    HostContext::shutdown();
    Ok(())
}
