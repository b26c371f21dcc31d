use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, ensure, Context};
use colored::Colorize;
use ogp_binary::{
    derive_reference_traversers, iterate_entities, ByteCodec, Direct, ReferenceTraverser, Reversed, TypeDictionary,
};
use ogp_registry::TypeHandlerRegistry;
use ogp_sdk::{RootsHandler, TYPE_DICTIONARY_FILE};
use ogp_storage::{FileStorage, FileStorageConfig, StorageManifest, StorageStats, SyncMode};
use ogp_types::{IdRange, ObjectId, TypeId};
use serde::Serialize;
use tracing::{debug, info};

use crate::cli::*;

const HEAD_LENGTH: usize = 16;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    if cli.reversed {
        dispatch::<Reversed>(&cli)
    } else {
        dispatch::<Direct>(&cli)
    }
}

fn dispatch<C: ByteCodec>(cli: &Cli) -> anyhow::Result<()> {
    let types = cli.types.as_deref();
    match &cli.command {
        Command::Inspect(args) => cmd_inspect(&Session::<C>::open(&args.directory, types)?, args, cli.format),
        Command::Verify(args) => cmd_verify(&Session::<C>::open(&args.directory, types)?, cli.format),
        Command::Stats(args) => cmd_stats(&Session::<C>::open(&args.directory, types)?, cli.format),
    }
}

/// A storage directory opened read-only, with the dictionary naming its types.
struct Session<C: ByteCodec> {
    storage: FileStorage<C>,
    dictionary: TypeDictionary,
    channel_count: usize,
}

impl<C: ByteCodec> Session<C> {
    fn open(directory: &Path, types: Option<&Path>) -> anyhow::Result<Self> {
        ensure!(directory.is_dir(), "{} is not a directory", directory.display());
        let manifest = StorageManifest::load(directory)?
            .ok_or_else(|| anyhow!("{} has no storage manifest", directory.display()))?;
        if manifest.byte_order != C::ORDER {
            let opened = C::ORDER;
            bail!(
                "storage is {} byte order, opened as {opened} (toggle --reversed)",
                manifest.byte_order
            );
        }

        let config = FileStorageConfig {
            channel_count: manifest.channel_count,
            sync_mode: SyncMode::OsDefault,
        };
        let storage =
            FileStorage::<C>::open(directory, config).with_context(|| format!("opening {}", directory.display()))?;
        storage.set_storing_enabled(false);

        Ok(Self {
            storage,
            dictionary: load_dictionary::<C>(directory, types)?,
            channel_count: manifest.channel_count,
        })
    }

    /// Walk every channel's committed data, superseded versions included.
    fn scan(&self) -> anyhow::Result<Scan> {
        let mut traversers: HashMap<TypeId, Vec<ReferenceTraverser>> = HashMap::new();
        let mut scan = Scan::default();

        for channel in 0..self.channel_count {
            let data = self.storage.channel_data(channel)?;
            let first = scan.entities.len();
            let mut entities = iterate_entities::<C>(&data, true);
            while let Some(entity) = entities.next() {
                let entity = match entity {
                    Ok(entity) => entity,
                    Err(e) => {
                        scan.layout_errors.push(format!("channel {channel}: {e}"));
                        break;
                    }
                };
                let length = entity.total_length();
                let mut record = EntityRecord {
                    channel,
                    offset: entities.position() as u64 - length,
                    oid: entity.object_id().value(),
                    tid: entity.type_id().value(),
                    type_name: None,
                    length,
                    references: None,
                    live: false,
                    head: hex::encode(&entity.content()[..entity.content_length().min(HEAD_LENGTH)]),
                    error: None,
                    targets: Vec::new(),
                };

                if let Some(description) = self.dictionary.lookup(entity.type_id()) {
                    record.type_name = Some(description.type_name.clone());
                    let steps = traversers
                        .entry(entity.type_id())
                        .or_insert_with(|| derive_reference_traversers(description));
                    let mut targets = Vec::new();
                    let traversed = entity.iterate_references(steps, &mut |oid: ObjectId| targets.push(oid));
                    match traversed {
                        Ok(_) => {
                            record.references = Some(targets.len());
                            record.targets = targets;
                        }
                        Err(e) => record.error = Some(e.to_string()),
                    }
                }
                scan.entities.push(record);
            }

            // The last version of a still indexed object is its live one.
            let mut latest = HashMap::new();
            for (i, record) in scan.entities.iter().enumerate().skip(first) {
                latest.insert(record.oid, i);
            }
            for (oid, i) in latest {
                if self.storage.contains(ObjectId::new(oid)) {
                    scan.entities[i].live = true;
                }
            }
        }
        debug!(entities = scan.entities.len(), "scanned storage");
        Ok(scan)
    }
}

/// Built-in and roots descriptions, merged with the persisted dictionary.
fn load_dictionary<C: ByteCodec>(directory: &Path, types: Option<&Path>) -> anyhow::Result<TypeDictionary> {
    let registry = TypeHandlerRegistry::<C>::with_builtins()?;
    registry.register(Arc::new(RootsHandler::new()))?;
    let mut dictionary = registry.type_dictionary()?;

    let path = match types {
        Some(path) => Some(path.to_path_buf()),
        None => Some(directory.join(TYPE_DICTIONARY_FILE)).filter(|path| path.exists()),
    };
    let Some(path) = path else {
        debug!("no type dictionary, only built-in types are named");
        return Ok(dictionary);
    };
    let stored = TypeDictionary::load(&path).with_context(|| format!("reading {}", path.display()))?;
    for description in stored.descriptions() {
        dictionary
            .register(description.clone())
            .with_context(|| format!("merging {}", path.display()))?;
    }
    info!(path = %path.display(), types = stored.len(), "loaded type dictionary");
    Ok(dictionary)
}

#[derive(Debug, Default)]
struct Scan {
    entities: Vec<EntityRecord>,
    layout_errors: Vec<String>,
}

#[derive(Debug, Serialize)]
struct EntityRecord {
    channel: usize,
    offset: u64,
    oid: u64,
    tid: u64,
    type_name: Option<String>,
    length: u64,
    /// Reference slots, null ones included; unknown without a description.
    references: Option<usize>,
    live: bool,
    /// Hex of the first content bytes.
    head: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip)]
    targets: Vec<ObjectId>,
}

// ---- inspect ----

fn cmd_inspect<C: ByteCodec>(session: &Session<C>, args: &InspectArgs, format: OutputFormat) -> anyhow::Result<()> {
    let scan = session.scan()?;
    let rows: Vec<&EntityRecord> = scan
        .entities
        .iter()
        .filter(|record| args.all || record.live)
        .filter(|record| args.oid.map_or(true, |oid| record.oid == oid))
        .take(args.limit.unwrap_or(usize::MAX))
        .collect();

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!(
        "{:>3} {:>10} {:>20} {:>6} {:<20} {:>8} {:>5}",
        "ch".bold(),
        "offset".bold(),
        "oid".bold(),
        "tid".bold(),
        "type".bold(),
        "length".bold(),
        "refs".bold()
    );
    for record in &rows {
        let refs = record.references.map_or_else(|| "-".to_string(), |n| n.to_string());
        let line = format!(
            "{:>3} {:>10} {:>20} {:>6} {:<20} {:>8} {:>5}",
            record.channel,
            record.offset,
            record.oid,
            record.tid,
            record.type_name.as_deref().unwrap_or("?"),
            record.length,
            refs
        );
        let line = if args.hex { format!("{line}  {}", record.head) } else { line };
        if record.live {
            println!("{line}");
        } else {
            println!("{}", line.dimmed());
        }
    }
    println!("{} of {} entities", rows.len(), scan.entities.len());
    for error in &scan.layout_errors {
        println!("{} {}", "✗".red().bold(), error);
    }
    Ok(())
}

// ---- verify ----

#[derive(Debug, Default, Serialize)]
struct VerifyReport {
    entities: usize,
    live: usize,
    references: usize,
    issues: Vec<String>,
}

fn verify<C: ByteCodec>(session: &Session<C>, scan: &Scan) -> VerifyReport {
    let mut report = VerifyReport {
        entities: scan.entities.len(),
        issues: scan.layout_errors.clone(),
        ..Default::default()
    };
    for record in scan.entities.iter().filter(|record| record.live) {
        report.live += 1;
        let oid = ObjectId::new(record.oid);
        if oid.channel_index(session.channel_count) != record.channel {
            report
                .issues
                .push(format!("oid {oid}: stored in channel {} of {}", record.channel, session.channel_count));
        }
        if record.type_name.is_none() {
            report.issues.push(format!("oid {oid}: unknown type id {}", record.tid));
        }
        if let Some(error) = &record.error {
            report.issues.push(format!("oid {oid}: {error}"));
        }
        for target in &record.targets {
            match target.range() {
                IdRange::Null | IdRange::Constant => continue,
                IdRange::Type | IdRange::Object => {}
            }
            report.references += 1;
            if !session.storage.contains(*target) {
                report.issues.push(format!("oid {oid}: dangling reference to {target}"));
            }
        }
    }
    report
}

fn cmd_verify<C: ByteCodec>(session: &Session<C>, format: OutputFormat) -> anyhow::Result<()> {
    let scan = session.scan()?;
    let report = verify(session, &scan);

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => {
            for issue in &report.issues {
                println!("{} {}", "✗".red().bold(), issue);
            }
            if report.issues.is_empty() {
                println!(
                    "{} {} live entities, {} references, no issues",
                    "✓".green().bold(),
                    report.live,
                    report.references
                );
            }
        }
    }
    if !report.issues.is_empty() {
        bail!("{} issue(s) found", report.issues.len());
    }
    Ok(())
}

// ---- stats ----

#[derive(Debug, Serialize)]
struct TypeStats {
    tid: u64,
    type_name: Option<String>,
    count: usize,
    bytes: u64,
}

#[derive(Debug, Serialize)]
struct StatsReport {
    storage: StorageStats,
    superseded: usize,
    types: Vec<TypeStats>,
}

fn stats<C: ByteCodec>(session: &Session<C>, scan: &Scan) -> StatsReport {
    let mut types: BTreeMap<u64, TypeStats> = BTreeMap::new();
    for record in scan.entities.iter().filter(|record| record.live) {
        let entry = types.entry(record.tid).or_insert_with(|| TypeStats {
            tid: record.tid,
            type_name: record.type_name.clone(),
            count: 0,
            bytes: 0,
        });
        entry.count += 1;
        entry.bytes += record.length;
    }
    StatsReport {
        storage: session.storage.stats(),
        superseded: scan.entities.iter().filter(|record| !record.live).count(),
        types: types.into_values().collect(),
    }
}

fn cmd_stats<C: ByteCodec>(session: &Session<C>, format: OutputFormat) -> anyhow::Result<()> {
    let scan = session.scan()?;
    let report = stats(session, &scan);
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let storage = &report.storage;
    println!("Channels:   {}", storage.channel_count.to_string().bold());
    println!(
        "Live:       {} entities, {} bytes",
        storage.live_entities.to_string().green(),
        storage.live_bytes
    );
    println!("Superseded: {} entities", report.superseded.to_string().yellow());
    println!("File bytes: {}", storage.file_bytes);
    println!();
    for entry in &report.types {
        println!(
            "  {:>6} {:<24} {:>8} {:>10}",
            entry.tid,
            entry.type_name.as_deref().unwrap_or("?").cyan(),
            entry.count,
            entry.bytes
        );
    }
    Ok(())
}
