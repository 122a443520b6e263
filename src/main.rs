use std::{fs, path::PathBuf};

use clap::Parser;
use log::{info, warn};

use spine_optimiser::{
    archive::write_archive,
    cancel::CancelToken,
    config::{load_config, save_config, SessionConfig},
    session::{FileAsset, Session},
};

#[derive(Parser, Debug)]
#[command(name = "spine_optimiser")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Project directory holding skeleton JSONs, atlases, and images.
    #[arg(value_name = "PROJECT_DIR")]
    project_dir: PathBuf,
    #[arg(short, long, value_name = "OUTPUT_DIR", default_value = "./output")]
    output_dir: PathBuf,
    /// Safety buffer percentage added on top of the measured maxima.
    #[arg(long, default_value_t = 0.0)]
    buffer: f32,
    /// Repack the optimised images onto fresh atlas pages.
    #[arg(long)]
    repack: bool,
    #[arg(long, default_value_t = 2048)]
    page_size: u32,
    #[arg(long, default_value_t = 2)]
    padding: u32,
    /// Run emitted PNGs through an oxipng pass.
    #[arg(long)]
    optimise: bool,
    /// Session configuration to load overrides from.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn collect_files(dir: &PathBuf, root: &PathBuf, out: &mut Vec<FileAsset>) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot read directory {:?}: {}", dir, e);
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, root, out);
        } else if let Ok(bytes) = fs::read(&path) {
            let rel = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .to_string();
            out.push(FileAsset { path: rel, bytes });
        }
    }
}

fn main() {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .init()
        .unwrap();

    let cli = Cli::parse();

    if !cli.project_dir.exists() {
        eprintln!("Error: project path does not exist: {:?}", cli.project_dir);
        std::process::exit(1);
    }

    if !cli.output_dir.exists() {
        fs::create_dir_all(&cli.output_dir).expect("Failed to create output directory");
    }

    let mut session = Session::new();
    let mut buffer = cli.buffer;

    if let Some(config_path) = &cli.config {
        match load_config(config_path) {
            Ok(config) => {
                session.overrides = config.overrides.iter().cloned().collect();
                session.local_overrides = config.local_overrides.iter().cloned().collect();
                session.safety_buffer = config.safety_buffer;
                if cli.buffer == 0.0 {
                    buffer = config.safety_buffer;
                }
            }
            Err(e) => {
                eprintln!("Failed to load config {:?}: {}", config_path, e);
                std::process::exit(1);
            }
        }
    }

    let mut files = Vec::new();
    collect_files(&cli.project_dir, &cli.project_dir, &mut files);
    info!("Collected {} files from {:?}", files.len(), cli.project_dir);

    session.ingest(files);
    if session.skeletons().is_empty() {
        eprintln!("No usable skeleton documents found, nothing to analyse");
        std::process::exit(1);
    }

    let report = session.analyse();
    info!(
        "Analysed {} skeletons: {} images used, {} unused, {} missing",
        session.skeletons().len(),
        report.stats.len(),
        report.unused.len(),
        report.missing_images.len()
    );
    if report.is_canonical_data_missing {
        warn!("Some region/mesh attachments lack width/height; physical dimensions used");
    }

    let report_path = cli.output_dir.join("report.json");
    match fs::File::create(&report_path) {
        Ok(file) => {
            if let Err(e) = serde_json::to_writer_pretty(file, &report) {
                warn!("Failed to write report: {}", e);
            } else {
                info!("Report written to {}", report_path.display());
            }
        }
        Err(e) => warn!("Failed to create {}: {}", report_path.display(), e),
    }

    let tasks = session.plan(buffer);
    let resizes = tasks.iter().filter(|t| t.is_resize).count();
    info!(
        "Planned {} tasks ({} resizes, {} copies)",
        tasks.len(),
        resizes,
        tasks.len() - resizes
    );

    let cancel = CancelToken::new();
    let outputs = match session.resample_batch(&tasks, &cancel) {
        Ok(outputs) => outputs,
        Err(e) => {
            eprintln!("Resampling failed: {}", e);
            std::process::exit(1);
        }
    };

    let archive_path = cli.output_dir.join("images_optimized.zip");
    match write_archive(&archive_path, &outputs, cli.optimise) {
        Ok(()) => info!("Archive written to {}", archive_path.display()),
        Err(e) => {
            eprintln!("Failed to write archive: {}", e);
            std::process::exit(1);
        }
    }

    if cli.repack {
        match session.pack(&tasks, &outputs, cli.page_size, cli.padding, &cancel) {
            Ok(repack) => {
                for page in &repack.result.pages {
                    info!(
                        "Page {}: {} rects, {:.1}% efficiency",
                        page.name,
                        page.rects.len(),
                        page.efficiency * 100.0
                    );
                }
                for (name, pixels) in &repack.pages {
                    let path = cli.output_dir.join(name);
                    if let Err(e) = pixels.save(&path) {
                        warn!("Failed to save page {}: {}", path.display(), e);
                    }
                }
                let manifest_path = cli.output_dir.join("repacked.atlas");
                if let Err(e) = fs::write(&manifest_path, repack.manifest) {
                    warn!("Failed to save manifest: {}", e);
                }
            }
            Err(e) => warn!("Repacking failed: {}", e),
        }
    }

    let config_path = cli.output_dir.join("session.json");
    let mut config = SessionConfig::new();
    config.overrides = session
        .overrides
        .iter()
        .map(|(k, v)| (k.clone(), *v))
        .collect();
    config.overrides.sort_by(|a, b| a.0.cmp(&b.0));
    config.local_overrides = session.local_overrides.iter().cloned().collect();
    config.local_overrides.sort();
    config.safety_buffer = buffer;
    if let Err(e) = save_config(&config, &config_path) {
        warn!("Failed to save session config: {}", e);
    }
}
