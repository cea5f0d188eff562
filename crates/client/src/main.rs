use std::env;
use std::rc::Rc;
use std::sync::mpsc;
use std::time::Duration;

use catalog::{CatalogEntity, Filter, LoadOrchestrator, Providers, RedbCache, WindowedRepository};
use client::config::{config_path_from_env, load_or_create_config};
use client::{run_load, HttpRemote};
use common::EntityKind;
use tracing::info;
use tracing_subscriber::EnvFilter;

const LISTING_LIMIT: usize = 20;

enum Command {
    Load,
    Search(String),
    Albums(String),
    Tracks(String),
}

fn parse_command() -> Result<Command, String> {
    let mut args = env::args().skip(1);
    let command = match args.next() {
        None => return Ok(Command::Load),
        Some(command) => command,
    };
    let rest: Vec<String> = args.collect();
    let argument = rest.join(" ");
    match command.as_str() {
        "load" => Ok(Command::Load),
        "search" if !argument.trim().is_empty() => Ok(Command::Search(argument)),
        "albums" if !argument.trim().is_empty() => Ok(Command::Albums(argument)),
        "tracks" if !argument.trim().is_empty() => Ok(Command::Tracks(argument)),
        _ => Err(format!(
            "usage: catalog-client [load | search TEXT | albums ARTIST_ID | tracks ALBUM_ID], got {:?}",
            command
        )),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let command = parse_command()?;

    let config_path = config_path_from_env();
    let (config, created) = load_or_create_config(&config_path)?;
    if created {
        info!("Created default config at {:?}", config_path);
    } else {
        info!("Loaded config from {:?}", config_path);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()?;
    let (sender, receiver) = mpsc::channel();

    let cache_path = config.cache_path(&config_path);
    let cache = RedbCache::open(&cache_path, sender.clone())?;
    info!("Using cache at {:?}", cache.path());
    let remote = HttpRemote::new(&config, runtime.handle().clone(), sender)?;

    let providers = Providers::new(Rc::new(remote), Rc::new(cache));
    let mut orchestrator = LoadOrchestrator::new(providers, config.catalog.clone());

    let result = run_load(
        &mut orchestrator,
        &receiver,
        Duration::from_secs(config.load_timeout_secs),
        Duration::from_secs(config.request_timeout_secs),
    );
    println!("{}", result.message());

    let catalog = orchestrator.catalog_mut();
    println!(
        "Catalog: {} artists, {} albums, {} tracks",
        catalog.count(EntityKind::Artist),
        catalog.count(EntityKind::Album),
        catalog.count(EntityKind::Track)
    );
    if !result.is_success() {
        return Ok(());
    }

    match command {
        Command::Load => {}
        Command::Search(text) => {
            for kind in EntityKind::ALL {
                catalog.set_filter(kind, Filter::name(text.as_str()))?;
            }
            print_listing(catalog.artists());
            print_listing(catalog.albums());
            print_listing(catalog.tracks());
        }
        Command::Albums(artist_id) => {
            catalog.set_filter(EntityKind::Album, Filter::albums_of_artists([artist_id]))?;
            print_listing(catalog.albums());
        }
        Command::Tracks(album_id) => {
            catalog.set_filter(EntityKind::Track, Filter::tracks_of_albums([album_id]))?;
            print_listing(catalog.tracks());
        }
    }

    Ok(())
}

fn print_listing<E: CatalogEntity + 'static>(repository: &WindowedRepository<E>) {
    let count = repository.count();
    if count == 0 {
        return;
    }
    println!("{} ({})", E::KIND, count);
    for position in 0..count.min(LISTING_LIMIT) {
        if let Some(record) = repository.record(position) {
            println!("  {}  {}", record.id(), record.name());
        }
    }
    if count > LISTING_LIMIT {
        println!("  ... {} more", count - LISTING_LIMIT);
    }
}
