use std::env;
use std::path::PathBuf;
use std::sync::mpsc;

use catalog::{CacheProvider, RedbCache};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut args = env::args().skip(1);
    let cache_path = args
        .next()
        .or_else(|| env::var("CACHE_PATH").ok())
        .ok_or("CACHE_PATH not set and no path argument")?;
    let action = args.next().unwrap_or_else(|| "show".to_string());

    let (sender, _receiver) = mpsc::channel();
    let cache = RedbCache::open(&PathBuf::from(&cache_path), sender)?;

    match action.as_str() {
        "show" => {}
        "json" => {
            println!("{}", serde_json::to_string_pretty(&cache.summary()?)?);
            return Ok(());
        }
        "invalidate" => {
            cache.invalidate()?;
            info!("Invalidated {:?}", cache.path());
        }
        other => return Err(format!("unknown action {:?}, expected show, json or invalidate", other).into()),
    }

    let summary = cache.summary()?;
    match &summary.meta {
        Some(meta) => println!(
            "Snapshot of {} as {:?}, last update {}",
            meta.server_url, meta.user, meta.last_update
        ),
        None => println!("No committed snapshot"),
    }
    println!(
        "Cached: {} artists, {} albums, {} tracks, {} covers",
        summary.artists, summary.albums, summary.tracks, summary.arts
    );

    Ok(())
}
