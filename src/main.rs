// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

//! Dump the layout of a micro-partition file.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Parser;
use itertools::Itertools;
use pax_storage::storage::file::{FileSystem, LocalFileSystem, OpenFlags};
use pax_storage::storage::orc::{GroupStatsInfo, OrcReader};
use pax_storage::storage::proto::{ColumnEncodingKind, StreamKind};
use pax_storage::storage::table::JsonCatalog;
use pax_storage::storage::visimap::read_visimap;
use pax_storage::storage::{ColumnStatsProvider, MicroPartitionReader, ReaderOptions};
use pax_storage::types::{TupleDesc, TupleSlot};
use tracing::info;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::filter;
use tracing_subscriber::prelude::*;

/// pax-dump: print the postscript, footer and groups of a micro-partition.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Micro-partition file, or a relation directory with `--catalog`.
    path: PathBuf,

    /// Print the micro-partitions registered in the catalog of a relation.
    #[clap(long)]
    catalog: bool,

    /// Only dump this group.
    #[clap(short, long)]
    group: Option<usize>,

    /// Print the stripe footer of each group.
    #[clap(long)]
    streams: bool,

    /// Print the visible rows.
    #[clap(short, long)]
    rows: bool,

    /// Visibility map applied when printing rows.
    #[clap(long)]
    visimap: Option<PathBuf>,

    /// Stop after this many rows.
    #[clap(long)]
    limit: Option<usize>,
}

fn dump_catalog(fs: Arc<dyn FileSystem>, args: &Args) -> Result<()> {
    let catalog = JsonCatalog::open(fs, &args.path, None)?;
    println!("catalog {:?}: {} micro partitions", args.path, catalog.len());
    for meta in catalog.partitions() {
        println!(
            "  #{} file={} tuples={} size={} visimap={}",
            meta.micro_partition_id,
            meta.file_name,
            meta.tuple_count,
            meta.file_size,
            meta.visimap_name.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

fn print_stats(indent: &str, stats: &dyn ColumnStatsProvider, desc: &TupleDesc) -> Result<()> {
    for (i, column) in desc.columns().iter().enumerate() {
        let range = match stats.min_max(i, column.kind)? {
            Some((min, max)) => format!("[{min}, {max}]"),
            None => "-".into(),
        };
        println!(
            "{indent}{} {:?}: all_null={} has_null={} range={}",
            column.name,
            column.kind,
            stats.all_null(i),
            stats.has_null(i),
            range
        );
    }
    Ok(())
}

fn dump_file(fs: Arc<dyn FileSystem>, args: &Args) -> Result<()> {
    let file = fs.open(&args.path, OpenFlags::READ, None)?;
    let visibility_bitmap = match &args.visimap {
        Some(path) => Some(Arc::new(read_visimap(fs.as_ref(), path, None)?)),
        None => None,
    };
    let mut reader = OrcReader::open(
        file,
        ReaderOptions {
            visibility_bitmap,
            ..Default::default()
        },
    )?;
    let format = reader.format_reader();
    let desc = reader.file_desc().clone();

    let postscript = format.postscript();
    println!(
        "postscript: magic={} version={}.{} writer={} footer_length={} checksum={:#010x}",
        postscript.magic,
        postscript.major_version,
        postscript.minor_version,
        postscript.writer,
        postscript.footer_length,
        postscript.footer_checksum
    );
    let footer = format.footer();
    println!(
        "footer: content_length={} rows={} groups={} format={:?}",
        footer.content_length,
        footer.number_of_rows,
        footer.stripes.len(),
        format.storage_format()
    );
    if let Some(stats) = &footer.statistics {
        print_stats("  ", stats, &desc)?;
    }

    if let Some(group) = args.group {
        if group >= format.group_nums() {
            bail!("group {} out of {} groups", group, format.group_nums());
        }
    }
    for index in 0..format.group_nums() {
        if args.group.is_some_and(|g| g != index) {
            continue;
        }
        let stripe = format.stripe(index)?;
        println!(
            "group {}: offset={} data_length={} footer_length={} rows={} first_row={}",
            index,
            stripe.offset,
            stripe.data_length,
            stripe.footer_length,
            stripe.number_of_rows,
            format.group_row_offset(index)
        );
        print_stats("  ", &GroupStatsInfo::new(stripe), &desc)?;
        if args.streams {
            let stripe_footer = format.read_stripe_footer(index)?;
            for stream in &stripe_footer.streams {
                let kind = StreamKind::try_from(stream.kind)
                    .map_or_else(|_| format!("#{}", stream.kind), |k| format!("{k:?}"));
                println!(
                    "    stream column={} kind={} length={} padding={} rows={}",
                    stream.column, kind, stream.length, stream.padding, stream.rows
                );
            }
            for (column, encoding) in stripe_footer.column_encodings.iter().enumerate() {
                let kind = ColumnEncodingKind::try_from(encoding.kind)
                    .map_or_else(|_| format!("#{}", encoding.kind), |k| format!("{k:?}"));
                println!(
                    "    encoding column={} kind={} level={} length={}",
                    column, kind, encoding.compress_level, encoding.length
                );
            }
        }
    }

    if args.rows {
        let mut slot = TupleSlot::default();
        let mut printed = 0;
        while args.limit.map_or(true, |l| printed < l) && reader.read_tuple(&mut slot)? {
            println!("{} {}", slot.tid, slot.values.iter().join(", "));
            printed += 1;
        }
        info!("printed {} rows", printed);
    }
    reader.close()?;
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let fmt_layer = tracing_subscriber::fmt::layer().compact();
    let filter_layer =
        filter::EnvFilter::from_default_env().add_directive(LevelFilter::INFO.into());

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();

    let fs: Arc<dyn FileSystem> = Arc::new(LocalFileSystem::new());
    if args.catalog {
        dump_catalog(fs, &args)
    } else {
        dump_file(fs, &args)
    }
}
