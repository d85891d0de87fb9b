use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use colored::Colorize;
use serde_json::{json, Value};

use pkl_archive::DiskFileSystem;
use pkl_linker::{LinkError, LinkerConfig, LinkerContext, LoadOptions, LoaderId, PackageLoader, UnresolvedImport};
use pkl_names::{NameId, NameTable};
use pkl_netmap::PackageMap;
use pkl_types::PackageFlags;

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref(), &cli.search_path)?;
    let format = cli.format;
    match &cli.command {
        Command::Info(args) => cmd_info(&config, format, &args.file),
        Command::Names(args) => cmd_names(&config, format, &args.file),
        Command::Imports(args) => cmd_imports(&config, format, &args.file),
        Command::Exports(args) => cmd_exports(&config, format, &args.file),
        Command::Verify(args) => cmd_verify(&config, format, args),
        Command::Netmap(args) => cmd_netmap(&config, format, &args.files),
    }
}

fn load_config(path: Option<&Path>, search_paths: &[PathBuf]) -> anyhow::Result<LinkerConfig> {
    let mut config = match path {
        Some(path) => LinkerConfig::load(path)?,
        None => LinkerConfig::default(),
    };
    config.search_paths.extend(search_paths.iter().cloned());
    Ok(config)
}

/// A context whose search path also covers the directories of `files`.
fn context(config: &LinkerConfig, files: &[PathBuf]) -> LinkerContext {
    let mut config = config.clone();
    for file in files {
        let dir = match file.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        if !config.search_paths.contains(&dir) {
            config.search_paths.push(dir);
        }
    }
    tracing::debug!(search_paths = ?config.search_paths, "linker context");
    LinkerContext::new(Arc::new(NameTable::new()), Arc::new(DiskFileSystem::new()), config)
}

/// Open `file` for inspection only: import verification is deferred so a
/// missing provider does not hide the tables.
fn inspect(config: &LinkerConfig, file: &Path) -> anyhow::Result<(LinkerContext, LoaderId)> {
    let mut ctx = context(config, &[file.to_path_buf()]);
    let options = LoadOptions::from_config(config).deferred(true);
    let id = ctx
        .open_package_at(file, &options)
        .with_context(|| format!("cannot open {}", file.display()))?;
    Ok((ctx, id))
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn class_text(names: &NameTable, (class, package): (NameId, NameId)) -> String {
    format!("{}.{}", names.text_or_invalid(package), names.text_or_invalid(class))
}

fn flag_words(flags: PackageFlags) -> Vec<&'static str> {
    [
        (PackageFlags::ALLOW_DOWNLOAD, "allow-download"),
        (PackageFlags::CLIENT_OPTIONAL, "client-optional"),
        (PackageFlags::SERVER_SIDE_ONLY, "server-side-only"),
        (PackageFlags::COOKED, "cooked"),
        (PackageFlags::ASSET_CONTAINER, "asset-container"),
        (PackageFlags::CONTAINS_SCRIPT, "contains-script"),
    ]
    .into_iter()
    .filter(|(flag, _)| flags.contains(*flag))
    .map(|(_, word)| word)
    .collect()
}

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

fn cmd_info(config: &LinkerConfig, format: OutputFormat, file: &Path) -> anyhow::Result<()> {
    let (ctx, id) = inspect(config, file)?;
    let loader = ctx.loader(id)?;
    let summary = loader.summary();

    if format == OutputFormat::Json {
        let generations: Vec<Value> = summary
            .generations
            .iter()
            .map(|g| json!({"exports": g.export_count, "names": g.name_count, "net_objects": g.net_object_count}))
            .collect();
        return print_json(&json!({
            "package": loader.name(),
            "path": file.display().to_string(),
            "version": summary.version.to_string(),
            "guid": summary.guid.to_hex(),
            "flags": flag_words(summary.package_flags),
            "folder": summary.folder_name,
            "header_size": summary.header_size,
            "names": summary.name_count,
            "imports": summary.import_count,
            "exports": summary.export_count,
            "engine_version": summary.engine_version,
            "compressed_chunks": summary.compressed_chunks.len(),
            "generations": generations,
        }));
    }

    println!("Package {} ({})", loader.name().bold(), file.display());
    println!("  Version:      {}", summary.version);
    println!("  Guid:         {}", summary.guid.to_hex().cyan());
    let flags = flag_words(summary.package_flags);
    println!("  Flags:        {}", if flags.is_empty() { "none".into() } else { flags.join(", ") });
    println!("  Header size:  {}", summary.header_size);
    println!("  Names:        {}", summary.name_count);
    println!("  Imports:      {}", summary.import_count);
    println!("  Exports:      {}", summary.export_count);
    if summary.is_compressed() {
        println!("  Compression:  {} chunks", summary.compressed_chunks.len());
    }
    println!("  Generations:");
    for (i, g) in summary.generations.iter().enumerate() {
        println!(
            "    #{:<3} exports {}, names {}, net objects {}",
            i + 1,
            g.export_count,
            g.name_count,
            g.net_object_count
        );
    }
    Ok(())
}

fn cmd_names(config: &LinkerConfig, format: OutputFormat, file: &Path) -> anyhow::Result<()> {
    let (ctx, id) = inspect(config, file)?;
    let names = ctx.names();
    let texts: Vec<String> = ctx.loader(id)?.name_map().iter().map(|&n| names.text_or_invalid(n)).collect();

    if format == OutputFormat::Json {
        return print_json(&json!(texts));
    }
    for (i, text) in texts.iter().enumerate() {
        println!("{:>5}  {}", i.to_string().dimmed(), text);
    }
    Ok(())
}

fn cmd_imports(config: &LinkerConfig, format: OutputFormat, file: &Path) -> anyhow::Result<()> {
    let (ctx, id) = inspect(config, file)?;
    let loader = ctx.loader(id)?;
    let names = ctx.names();
    let rows: Vec<(String, String, i32)> = loader
        .imports()
        .iter()
        .enumerate()
        .map(|(i, import)| {
            let class = format!(
                "{}.{}",
                import.class_package.to_text(names),
                import.class_name.to_text(names)
            );
            (class, loader.import_path(i, names), import.outer_index.raw())
        })
        .collect();

    if format == OutputFormat::Json {
        let rows: Vec<Value> = rows
            .iter()
            .enumerate()
            .map(|(i, (class, path, outer))| json!({"index": i, "class": class, "path": path, "outer": outer}))
            .collect();
        return print_json(&json!(rows));
    }
    for (i, (class, path, _)) in rows.iter().enumerate() {
        println!("{:>5}  {:<28} {}", i.to_string().dimmed(), class.cyan(), path);
    }
    Ok(())
}

fn cmd_exports(config: &LinkerConfig, format: OutputFormat, file: &Path) -> anyhow::Result<()> {
    let (ctx, id) = inspect(config, file)?;
    let loader = ctx.loader(id)?;
    let names = ctx.names();

    if format == OutputFormat::Json {
        let rows: Vec<Value> = loader
            .exports()
            .iter()
            .enumerate()
            .map(|(i, export)| {
                json!({
                    "index": i,
                    "class": class_text(names, loader.export_class(i)),
                    "path": loader.export_path(i, names),
                    "outer": export.outer_index.raw(),
                    "size": export.serial_size,
                    "offset": export.serial_offset,
                    "flags": export.object_flags.bits(),
                })
            })
            .collect();
        return print_json(&json!(rows));
    }
    for (i, export) in loader.exports().iter().enumerate() {
        println!(
            "{:>5}  {:<28} {}  {} bytes @ {}",
            i.to_string().dimmed(),
            class_text(names, loader.export_class(i)).cyan(),
            loader.export_path(i, names),
            export.serial_size,
            export.serial_offset
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

/// Failures a forgiving verification recorded on the loader.
fn recorded_failures(loader: &PackageLoader, names: &NameTable) -> Vec<UnresolvedImport> {
    loader
        .imports()
        .iter()
        .enumerate()
        .filter_map(|(i, import)| {
            let reason = loader.import_failure(i)?;
            Some(UnresolvedImport {
                index: i,
                path: loader.import_path(i, names),
                class: format!(
                    "{}.{}",
                    import.class_package.to_text(names),
                    import.class_name.to_text(names)
                ),
                reason: reason.to_string(),
            })
        })
        .collect()
}

fn cmd_verify(config: &LinkerConfig, format: OutputFormat, args: &VerifyArgs) -> anyhow::Result<()> {
    let forgiving = args.forgiving || config.forgiving;
    let mut ctx = context(config, std::slice::from_ref(&args.file));
    let options = LoadOptions::from_config(config).forgiving(forgiving).deferred(true);
    let id = ctx
        .open_package_at(&args.file, &options)
        .with_context(|| format!("cannot open {}", args.file.display()))?;

    let failures = match ctx.verify_imports(id) {
        Ok(()) => recorded_failures(ctx.loader(id)?, ctx.names()),
        Err(LinkError::UnresolvedImports { failures, .. }) => failures,
        Err(e) => return Err(e.into()),
    };
    let loader = ctx.loader(id)?;
    let total = loader.imports().len();

    if format == OutputFormat::Json {
        let unresolved: Vec<Value> = failures
            .iter()
            .map(|f| json!({"index": f.index, "path": f.path, "class": f.class, "reason": f.reason}))
            .collect();
        print_json(&json!({
            "package": loader.name(),
            "imports": total,
            "resolved": total - failures.len(),
            "unresolved": unresolved,
        }))?;
    } else if failures.is_empty() {
        println!("{} {} imports of {} resolved", "✓".green().bold(), total, loader.name().bold());
    } else {
        for f in &failures {
            println!("  {} {:>4}  {} ({}): {}", "✗".red(), f.index, f.path.yellow(), f.class, f.reason);
        }
        let mark = if forgiving { "⚠".yellow().bold() } else { "✗".red().bold() };
        println!("{} {} of {} imports unresolved", mark, failures.len(), total);
    }

    if !failures.is_empty() && !forgiving {
        anyhow::bail!("{} has {} unresolved imports", loader.name(), failures.len());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Net map
// ---------------------------------------------------------------------------

fn cmd_netmap(config: &LinkerConfig, format: OutputFormat, files: &[PathBuf]) -> anyhow::Result<()> {
    let mut ctx = context(config, files);
    let options = LoadOptions::from_config(config).forgiving(true);
    let mut map = PackageMap::default();
    for file in files {
        let id = ctx
            .open_package_at(file, &options)
            .with_context(|| format!("cannot open {}", file.display()))?;
        map.add_source(&ctx, id)?;
    }
    map.compute(&ctx)?;

    if format == OutputFormat::Json {
        let rows: Vec<Value> = map
            .entries()
            .iter()
            .map(|e| {
                json!({
                    "package": e.package,
                    "guid": e.guid.to_hex(),
                    "generation": e.generation,
                    "object_base": e.object_base,
                    "object_count": e.object_count,
                    "name_base": e.name_base,
                    "name_count": e.name_count,
                })
            })
            .collect();
        return print_json(&json!({
            "objects": map.object_count(),
            "names": map.name_count(),
            "packages": rows,
        }));
    }

    println!("{:<24} {:>14} {:>14}  {}", "Package".bold(), "Objects".bold(), "Names".bold(), "Gen".bold());
    for e in map.entries() {
        println!(
            "{:<24} {:>14} {:>14}  {}",
            e.package,
            format!("{}+{}", e.object_base, e.object_count),
            format!("{}+{}", e.name_base, e.name_count),
            e.generation
        );
    }
    println!("{} objects, {} names", map.object_count().to_string().bold(), map.name_count().to_string().bold());
    Ok(())
}
