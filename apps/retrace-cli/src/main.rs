use anyhow::{Context as _, bail};
use clap::{Parser, Subcommand};
use retrace_codec::{AttributeCoders, SnapshotCodec};
use retrace_common::{Attributes, Changes, Event, ItemId, ItemKey};
use retrace_kernel::{Context, Record, Repository, Settings, TrackingOptions, Trail, TrailConfig};
use retrace_persist::{
    DEFAULT_TIMESTAMP_FIELD, FileVersionStore, StoreOptions, Version, VersionId, VersionQuery,
    VersionStore,
};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "retrace-cli", about = "CLI tool for retrace version stores")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print crate versions
    Info,
    /// Create an empty version store
    Init {
        dir: PathBuf,
        /// Name of the timestamp column
        #[arg(long, default_value = DEFAULT_TIMESTAMP_FIELD)]
        timestamp_field: String,
        /// Keep `object_changes` on recorded versions
        #[arg(long)]
        with_changes: bool,
    },
    /// List versions in history order
    Log {
        dir: PathBuf,
        #[arg(long)]
        item_type: Option<String>,
        #[arg(long, requires = "item_type")]
        item_id: Option<String>,
        /// create, update or destroy
        #[arg(long)]
        event: Option<Event>,
    },
    /// Show one version with its decoded snapshot and changes
    Show {
        dir: PathBuf,
        id: u64,
        /// Settings file (YAML or JSON) declaring serializer and coders
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Check the integrity hash chain of a store
    Verify { dir: PathBuf },
    /// Record a short widget history into a store and walk it back
    Demo {
        dir: PathBuf,
        /// Acting user written as whodunnit
        #[arg(long, default_value = "demo")]
        whodunnit: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match cli.command {
        Commands::Info => {
            println!("retrace-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("codec: {}", retrace_codec::crate_info());
            println!("persist: {}", retrace_persist::crate_info());
            println!("kernel: {}", retrace_kernel::crate_info());
        }
        Commands::Init {
            dir,
            timestamp_field,
            with_changes,
        } => {
            let options = StoreOptions {
                timestamp_field,
                stores_changes: with_changes,
            };
            let store = FileVersionStore::open(&dir, options)
                .with_context(|| format!("opening {}", dir.display()))?;
            let meta = store.meta();
            println!(
                "Store at {}: schema v{}, timestamp field {:?}, changes {}, versions {}",
                dir.display(),
                meta.schema_version,
                meta.timestamp_field,
                if meta.stores_changes { "on" } else { "off" },
                meta.version_count
            );
        }
        Commands::Log {
            dir,
            item_type,
            item_id,
            event,
        } => {
            let store = open(&dir)?;
            let mut query = match (&item_type, item_id) {
                (Some(item_type), Some(item_id)) => {
                    VersionQuery::for_item(ItemKey::new(item_type.clone(), ItemId::from(item_id)))
                }
                _ => VersionQuery::all(),
            };
            if let Some(event) = event {
                query = query.event(event);
            }
            let mut versions = store.query(&query)?;
            if let Some(item_type) = &item_type {
                versions.retain(|v| &v.item_type == item_type);
            }
            for version in &versions {
                println!("{}", summary(version));
            }
            println!("{} version(s)", versions.len());
        }
        Commands::Show { dir, id, config } => {
            let store = open(&dir)?;
            let version = store
                .get(VersionId(id))?
                .with_context(|| format!("version {id} not found"))?;
            println!("{}", summary(&version));
            for (column, value) in &version.meta {
                println!("  meta {column} = {value}");
            }

            let (object, changes) = match config {
                Some(path) => decode_with_settings(&path, store, &version)?,
                None => decode_plain(&version)?,
            };
            match object {
                Some(attributes) => {
                    println!("object:");
                    for (name, value) in &attributes {
                        println!("  {name} = {value}");
                    }
                }
                None => println!("object: none (nothing before a create)"),
            }
            if let Some(changes) = changes {
                println!("changes:");
                for (name, (old, new)) in &changes {
                    println!("  {name}: {old} -> {new}");
                }
            }
        }
        Commands::Verify { dir } => {
            let store = open(&dir)?;
            store
                .verify_integrity()
                .with_context(|| format!("verifying {}", dir.display()))?;
            println!(
                "OK: {} segment(s) verified",
                store.manifest().entries.len()
            );
        }
        Commands::Demo { dir, whodunnit } => demo(&dir, &whodunnit)?,
    }

    Ok(())
}

fn open(dir: &Path) -> anyhow::Result<FileVersionStore> {
    FileVersionStore::open_existing(dir).with_context(|| format!("opening {}", dir.display()))
}

fn summary(version: &Version) -> String {
    format!(
        "#{:<6} {} {:<7} {:<24} by {}",
        version.id,
        version.timestamp.to_rfc3339(),
        version.event,
        version.item_key(),
        version.whodunnit.as_deref().unwrap_or("-")
    )
}

fn decode_plain(version: &Version) -> anyhow::Result<(Option<Attributes>, Option<Changes>)> {
    let codec = SnapshotCodec::new(Default::default(), AttributeCoders::new());
    let object = version
        .object
        .as_deref()
        .map(|o| codec.decode_object(o))
        .transpose()?;
    let changes = version
        .object_changes
        .as_deref()
        .map(|c| codec.decode_changes(c))
        .transpose()?;
    Ok((object, changes))
}

fn decode_with_settings(
    path: &Path,
    store: FileVersionStore,
    version: &Version,
) -> anyhow::Result<(Option<Attributes>, Option<Changes>)> {
    let settings = Settings::load(path).with_context(|| format!("loading {}", path.display()))?;
    let trail = Trail::from_settings(&settings, store)?;
    if !trail.is_tracked(&version.item_type) {
        bail!("type {:?} is not declared in {}", version.item_type, path.display());
    }
    let object = trail.reify(version)?.map(|record| record.attributes().clone());
    let changes = trail.changeset(version)?;
    Ok((object, changes))
}

fn demo(dir: &Path, whodunnit: &str) -> anyhow::Result<()> {
    let store = FileVersionStore::open(dir, StoreOptions::default())
        .with_context(|| format!("opening {}", dir.display()))?;
    let mut trail = Trail::new(TrailConfig::default(), store);
    trail.track("Widget", TrackingOptions::new().ignore(["views"]))?;
    let mut repo = Repository::new(trail);
    let ctx = Context::new().with_whodunnit(whodunnit);

    let mut widget = Record::new("Widget").with("name", "A").with("views", 0);
    repo.create(&mut widget, &ctx)?;
    for (name, views) in [("B", 1), ("C", 2)] {
        widget.set("name", name);
        widget.set("views", views);
        repo.update(&mut widget, &ctx)?;
    }
    widget.set("views", 3);
    repo.update(&mut widget, &ctx)?;

    let versions = repo.trail().versions_of(&widget)?;
    println!("Recorded {} version(s) for {}", versions.len(), repo.trail().item_key(&widget)?);
    for version in &versions {
        let before = match repo.trail().reify(version)? {
            Some(state) => state
                .get("name")
                .map(ToString::to_string)
                .unwrap_or_else(|| "?".into()),
            None => "(nothing)".into(),
        };
        println!("{}  before: {before}", summary(version));
    }

    let mut state = repo.trail().previous_modification(&widget)?;
    let mut steps = 0;
    while let Some(record) = state {
        steps += 1;
        state = repo.trail().previous_modification(&record)?;
    }
    println!("Walked back {steps} state(s); live name is {:?}", widget.get("name"));
    Ok(())
}
