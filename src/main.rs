use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use env_logger::{Env, Target};
use log::info;

use esedump::data_types::{Codepage, ColumnFlags};
use esedump::export::{format_field, hex_string};
use esedump::Database;

const USAGE: &str = "usage: esedump export <source> [-t target] [-T table] [-c codepage] [-m tables|all] [-l logfile]";

struct ExportOptions {
    source: PathBuf,
    target: Option<PathBuf>,
    table: Option<String>,
    codepage: Codepage,
    list_only: bool,
    logfile: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = std::env::args().collect::<Vec<_>>();
    if args.len() < 2 {
        bail!("{USAGE}");
    }

    match args[1].as_str() {
        "export" => {
            let options = parse_export_options(&args[2..])?;
            init_logging(options.logfile.as_deref())?;
            run_export(options)
        }
        command => bail!("unknown command: {command}\n{USAGE}"),
    }
}

fn parse_export_options(args: &[String]) -> Result<ExportOptions> {
    let mut source = None;
    let mut target = None;
    let mut table = None;
    let mut codepage = Codepage::Windows1252;
    let mut list_only = false;
    let mut logfile = None;

    fn flag_value<'a>(iter: &mut std::slice::Iter<'a, String>, name: &str) -> Result<&'a String> {
        iter.next()
            .with_context(|| format!("{name} needs a value\n{USAGE}"))
    }

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-t" => target = Some(PathBuf::from(flag_value(&mut iter, "-t")?)),
            "-T" => table = Some(flag_value(&mut iter, "-T")?.clone()),
            "-c" => {
                let raw: u32 = flag_value(&mut iter, "-c")?
                    .parse()
                    .context("-c expects a number")?;
                codepage = match Codepage::from_u32(raw)? {
                    Some(codepage) => codepage,
                    None => bail!("-c 0 is not a codepage"),
                };
            }
            "-m" => match flag_value(&mut iter, "-m")?.as_str() {
                "tables" => list_only = true,
                "all" => list_only = false,
                other => bail!("unknown mode {other}\n{USAGE}"),
            },
            "-l" => logfile = Some(PathBuf::from(flag_value(&mut iter, "-l")?)),
            other if other.starts_with('-') => bail!("unknown option {other}\n{USAGE}"),
            _ => {
                if source.is_some() {
                    bail!("more than one source given\n{USAGE}");
                }
                source = Some(PathBuf::from(arg));
            }
        }
    }

    let Some(source) = source else {
        bail!("missing <source>\n{USAGE}");
    };
    Ok(ExportOptions {
        source,
        target,
        table,
        codepage,
        list_only,
        logfile,
    })
}

fn init_logging(logfile: Option<&Path>) -> Result<()> {
    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or("info"));
    if let Some(path) = logfile {
        let file = File::create(path)
            .with_context(|| format!("cannot create log file {}", path.display()))?;
        builder.target(Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

fn run_export(options: ExportOptions) -> Result<()> {
    let database = Database::open(&options.source)
        .with_context(|| format!("cannot open {}", options.source.display()))?;

    if options.list_only {
        for table in database.tables() {
            println!("{}", table.name);
        }
        return Ok(());
    }

    let target = options.target.clone().unwrap_or_else(|| {
        let mut dir = options.source.clone();
        dir.set_extension("export");
        dir
    });
    std::fs::create_dir_all(&target)
        .with_context(|| format!("cannot create target directory {}", target.display()))?;

    let names: Vec<String> = match &options.table {
        Some(name) => vec![name.clone()],
        None => database.tables().into_iter().map(|t| t.name).collect(),
    };

    for name in names {
        let exported = export_table(&database, &name, &target, options.codepage)
            .with_context(|| format!("exporting table {name}"))?;
        info!("exported {exported} records from {name}");
    }
    Ok(())
}

fn export_table(
    database: &Database,
    name: &str,
    target: &Path,
    codepage: Codepage,
) -> Result<usize> {
    let mut table = database.table(name)?;
    let path = target.join(format!("{name}.tsv"));
    let mut out = BufWriter::new(
        File::create(&path).with_context(|| format!("cannot create {}", path.display()))?,
    );

    let header: Vec<String> = table
        .definition()
        .columns
        .iter()
        .map(|c| c.name.clone())
        .collect();
    writeln!(out, "{}", header.join("\t"))?;

    let mut exported = 0usize;
    while let Some(record) = table.next_record()? {
        let mut fields = Vec::with_capacity(record.column_count()?);
        for index in 0..record.column_count()? {
            let value = record.column(index)?;
            if value.flags.contains(ColumnFlags::LONG_VALUE) {
                let bytes = record.long_value(index)?;
                fields.push(format_field(&value, &bytes, codepage));
            } else if value.column_type.is_text() {
                fields.push(format_field(&value, &value.data, codepage));
            } else {
                fields.push(hex_string(&value.data));
            }
        }
        writeln!(out, "{}", fields.join("\t"))?;
        exported += 1;
    }
    out.flush()?;
    Ok(exported)
}
