use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use log::info;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use xcube::fs::{split_protocol_and_path, Protocol};
use xcube::progress::{ConsoleProgressObserver, ProgressTracker};
use xcube::server::{ServerConfig, ServerContext};
use xcube::store::{new_fs_data_store, DataStore, WriteLevelsOptions};
use xcube::utils::parse_tile_size;
use xcube::webapi::s3::{list_dataset_bucket, ListBucketParams, ListVersion};
use xcube::webapi::wmts::get_wmts_capabilities_xml;

#[derive(Parser, Debug)]
#[command(name = "xcube", version, about = "Tools for Earth observation data cubes")]
struct Cli {
    /// Enable debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate multi-resolution levels.
    ///
    /// Writes the levels of a pyramid with spatial resolution decreasing by
    /// a factor of two to the directory OUTPUT.
    Level {
        input: String,
        /// Output path, defaults to INPUT with extension ".levels"
        #[arg(short, long)]
        output: Option<String>,
        /// Link INPUT as level zero instead of writing a copy of it.
        /// INPUT and OUTPUT must be local paths.
        #[arg(short = 'L', long)]
        link: bool,
        /// Tile size as N or W,H
        #[arg(short, long, value_name = "TILE_SIZE")]
        tile_size: Option<String>,
        /// Maximum number of levels to generate
        #[arg(short = 'n', long, value_name = "NUM_LEVELS_MAX")]
        num_levels_max: Option<usize>,
        /// Replace an existing dataset at OUTPUT
        #[arg(short, long)]
        replace: bool,
    },
    /// Print the WMTS capabilities document of a server configuration
    Wmts {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long, default_value = "http://localhost:8080")]
        base_url: String,
    },
    /// Print the S3 listing of a dataset's Zarr keys
    LsBucket {
        #[arg(short, long)]
        config: PathBuf,
        dataset: String,
        #[arg(long)]
        prefix: Option<String>,
        #[arg(long)]
        delimiter: Option<String>,
        #[arg(long)]
        max_keys: Option<usize>,
    },
}

/// Split a path into its parent directory and file name
fn split_dir(path: &str) -> (String, String) {
    let path = path.trim_end_matches('/');
    match path.rsplit_once('/') {
        Some(("", name)) => ("/".to_string(), name.to_string()),
        Some((dir, name)) => (dir.to_string(), name.to_string()),
        None => (".".to_string(), path.to_string()),
    }
}

fn default_output_path(input_path: &str) -> String {
    let (dir, name) = split_dir(input_path);
    let basename = match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name.as_str(),
    };
    format!("{}/{basename}.levels", dir.trim_end_matches('/'))
}

fn parse_level_args(
    tile_size: Option<&str>,
    num_levels_max: Option<usize>,
) -> anyhow::Result<Option<(usize, usize)>> {
    let tile_size = tile_size.map(parse_tile_size).transpose()?;
    if num_levels_max == Some(0) {
        bail!("NUM_LEVELS_MAX must be a positive integer");
    }
    Ok(tile_size)
}

/// Absolute form of a local path without `.` and `..` components
fn normalize_local_path(path: &str) -> anyhow::Result<String> {
    let path = std::env::current_dir()?.join(path);
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            component => normalized.push(component),
        }
    }
    Ok(normalized.to_string_lossy().into_owned())
}

struct LevelArgs {
    input: String,
    output: Option<String>,
    link: bool,
    tile_size: Option<String>,
    num_levels_max: Option<usize>,
    replace: bool,
}

async fn level(args: LevelArgs) -> anyhow::Result<()> {
    let tile_size = parse_level_args(args.tile_size.as_deref(), args.num_levels_max)?;
    let started = Instant::now();

    let (input_protocol, input_path) = split_protocol_and_path(&args.input)?;
    let (output_protocol, output_path) = match &args.output {
        Some(output) => split_protocol_and_path(output)?,
        None => (input_protocol, default_output_path(&input_path)),
    };

    let mut options = WriteLevelsOptions {
        tile_size,
        num_levels_max: args.num_levels_max,
        replace: args.replace,
        base_dataset_id: None,
    };
    let tracker = ProgressTracker::new().with_observer(Arc::new(ConsoleProgressObserver));

    if args.link {
        if input_protocol != Protocol::File || output_protocol != Protocol::File {
            bail!("links can be used only if input and output are local paths");
        }
        // one store spanning both paths, so that the link is a key of it
        let input_id = normalize_local_path(&input_path)?;
        let output_id = normalize_local_path(&output_path)?;
        let input_id = input_id.trim_start_matches('/');
        let output_id = output_id.trim_start_matches('/');
        let store = new_fs_data_store("local", Protocol::File, "/")?;
        let dataset = store
            .open_data(input_id)
            .await
            .with_context(|| format!("cannot open {:?}", args.input))?;
        options.base_dataset_id = Some(input_id.to_string());
        store
            .write_levels(dataset, output_id, &options, Some(&tracker))
            .await
            .with_context(|| format!("cannot write {output_path:?}"))?;
    } else {
        let (input_dir, input_id) = split_dir(&input_path);
        let input_store = new_fs_data_store("input", input_protocol, &input_dir)?;
        let dataset = input_store
            .open_data(&input_id)
            .await
            .with_context(|| format!("cannot open {:?}", args.input))?;

        let (output_dir, output_id) = split_dir(&output_path);
        let output_store = new_fs_data_store("output", output_protocol, &output_dir)?;
        output_store
            .write_levels(dataset, &output_id, &options, Some(&tracker))
            .await
            .with_context(|| format!("cannot write {output_path:?}"))?;
    }

    println!(
        "Multi-level dataset written to {output_path} after {:.2} seconds",
        started.elapsed().as_secs_f64()
    );
    Ok(())
}

fn load_context(config: &Path) -> anyhow::Result<ServerContext> {
    let config = ServerConfig::load(config)
        .with_context(|| format!("cannot load configuration {}", config.display()))?;
    Ok(ServerContext::new(config)?)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Level {
            input,
            output,
            link,
            tile_size,
            num_levels_max,
            replace,
        } => {
            let args = LevelArgs {
                input,
                output,
                link,
                tile_size,
                num_levels_max,
                replace,
            };
            level(args).await
        }
        Command::Wmts { config, base_url } => {
            let ctx = load_context(&config)?;
            let xml = get_wmts_capabilities_xml(ctx.datasets(), &base_url).await?;
            println!("{xml}");
            Ok(())
        }
        Command::LsBucket {
            config,
            dataset,
            prefix,
            delimiter,
            max_keys,
        } => {
            let ctx = load_context(&config)?;
            let params = ListBucketParams {
                prefix,
                delimiter,
                max_keys,
                ..ListBucketParams::default()
            };
            let result =
                list_dataset_bucket(ctx.datasets(), &dataset, &params, ListVersion::V2).await?;
            info!("listed {} object(s)", result.contents.len());
            println!("{}", result.to_xml());
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if let Err(e) = run(cli).await {
        eprintln!("xcube: {e:#}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_dir() {
        assert_eq!(split_dir("data/cube.zarr"), ("data".to_string(), "cube.zarr".to_string()));
        assert_eq!(split_dir("cube.zarr"), (".".to_string(), "cube.zarr".to_string()));
        assert_eq!(split_dir("/cube.zarr"), ("/".to_string(), "cube.zarr".to_string()));
        assert_eq!(split_dir("data/cube.zarr/"), ("data".to_string(), "cube.zarr".to_string()));
    }

    #[test]
    fn test_default_output_path() {
        assert_eq!(default_output_path("cube.zarr"), "./cube.levels");
        assert_eq!(default_output_path("/cube.zarr"), "/cube.levels");
        assert_eq!(default_output_path("/data/cube.zarr"), "/data/cube.levels");
        assert_eq!(default_output_path("data/cube.zarr/"), "data/cube.levels");
        assert_eq!(default_output_path(".cube"), "./.cube.levels");
        assert_eq!(default_output_path("data/.cube"), "data/.cube.levels");
        assert_eq!(default_output_path("data/cube.v2.zarr"), "data/cube.v2.levels");
        assert_eq!(default_output_path("data/cube"), "data/cube.levels");
    }

    #[test]
    fn test_parse_level_args() {
        assert_eq!(parse_level_args(None, None).unwrap(), None);
        assert_eq!(parse_level_args(Some("256"), Some(3)).unwrap(), Some((256, 256)));
        assert_eq!(parse_level_args(Some("512,256"), None).unwrap(), Some((512, 256)));
        let error = parse_level_args(None, Some(0)).unwrap_err();
        assert_eq!(error.to_string(), "NUM_LEVELS_MAX must be a positive integer");
        assert!(parse_level_args(Some("0"), None).is_err());
    }

    #[test]
    fn test_normalize_local_path() {
        let cwd = std::env::current_dir().unwrap();
        assert_eq!(
            normalize_local_path("/data/./cubes/../cube.zarr").unwrap(),
            "/data/cube.zarr"
        );
        assert_eq!(
            normalize_local_path("cube.zarr").unwrap(),
            cwd.join("cube.zarr").to_string_lossy()
        );
    }

    #[test]
    fn test_cli_parses_level() {
        let cli = Cli::try_parse_from(["xcube", "level", "cube.zarr", "-L", "-t", "256,128", "-n", "3"])
            .unwrap();
        match cli.command {
            Command::Level {
                input,
                link,
                tile_size,
                num_levels_max,
                replace,
                ..
            } => {
                assert_eq!(input, "cube.zarr");
                assert!(link);
                assert_eq!(tile_size.as_deref(), Some("256,128"));
                assert_eq!(num_levels_max, Some(3));
                assert!(!replace);
            }
            command => panic!("unexpected command {command:?}"),
        }
    }
}
