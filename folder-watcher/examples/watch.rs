//! Minimal demo: watch a folder and print every event.
//!
//! Usage: cargo run --example watch -- <path>

use anyhow::Result;
use folder_watcher::{FolderWatcher, WatcherEvent};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();

    let path = std::env::args().nth(1).unwrap_or_else(|| ".".to_string());

    let mut watcher = FolderWatcher::new(&path);
    watcher.subscribe(|event| match event {
        WatcherEvent::ItemAdded { path } => println!("added   {}", path.display()),
        WatcherEvent::ItemRemoved { path } => println!("removed {}", path.display()),
        WatcherEvent::ItemChanged { path } => println!("changed {}", path.display()),
        WatcherEvent::ItemRenamed { old_path, new_path } => {
            println!("renamed {} -> {}", old_path.display(), new_path.display());
        }
    });

    watcher.start().await?;
    println!("watching {path} — press Ctrl-C to quit");

    tokio::signal::ctrl_c().await?;
    watcher.stop().await;

    Ok(())
}
